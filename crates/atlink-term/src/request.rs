//! Parsing of terminal input lines.

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// Blank input.
    Empty,
    /// End the session (`:quit`, `:q`).
    Quit,
    /// Run a command and wait for its terminal line.
    Execute(&'a str),
    /// Run a command and wait for the event answering it (`? AT+CSQ`).
    AwaitEvent(&'a str),
    /// Write a line without waiting (`! data`).
    Raw(&'a str),
}

impl<'a> Request<'a> {
    pub fn parse(input: &'a str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            return Request::Empty;
        }
        if matches!(input, ":quit" | ":q" | ":exit") {
            return Request::Quit;
        }
        if let Some(text) = input.strip_prefix('?') {
            return Request::AwaitEvent(text.trim_start());
        }
        if let Some(text) = input.strip_prefix('!') {
            return Request::Raw(text.trim_start());
        }
        Request::Execute(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests() {
        assert_eq!(Request::parse("   "), Request::Empty);
        assert_eq!(Request::parse(":q"), Request::Quit);
        assert_eq!(Request::parse("AT+CSQ\n"), Request::Execute("AT+CSQ"));
        assert_eq!(Request::parse("? AT+CSQ"), Request::AwaitEvent("AT+CSQ"));
        assert_eq!(Request::parse("?AT+CPIN?"), Request::AwaitEvent("AT+CPIN?"));
        assert_eq!(Request::parse("! hello"), Request::Raw("hello"));
    }
}
