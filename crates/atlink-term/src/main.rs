//! Interactive terminal for AT command devices.
//!
//! Connects to a device behind a TCP serial bridge (ser2net and similar),
//! reads commands from stdin and prints each reply. Unsolicited events are
//! printed as they arrive, prefixed with `<<`.
//!
//! Input syntax:
//!
//! - `AT+CGMR` runs a command and waits for its terminal line
//! - `? AT+CSQ` runs a command and waits for the event answering it
//! - `! data` writes a line without waiting
//! - `:quit` ends the session

mod error;
mod request;

use std::fs;
use std::io::{self, BufRead};
use std::net::{Shutdown, TcpStream};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use atlink_engine::{
    describe_metrics, Command, CommandError, Engine, EngineBuilder, EngineConfig, HandlerError,
    Line, TimeoutPolicy, ERROR,
};
use clap::Parser;
use crossbeam_channel::{bounded, select, unbounded, Receiver};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::error::{TermError, TermResult};
use crate::request::Request;

#[derive(Parser, Debug)]
#[command(name = "atlink", version, about = "Interactive AT command terminal")]
struct Args {
    /// Address of the TCP serial bridge (host:port)
    #[arg(short, long)]
    connect: String,

    /// Engine configuration file (YAML)
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Default command timeout in milliseconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Restart the timeout whenever a reply line arrives
    #[arg(long)]
    inactivity: bool,

    /// Treat ERROR as a failed command
    #[arg(long)]
    error_is_failure: bool,

    /// Discard the device's echo of each command
    #[arg(long)]
    skip_echo: bool,

    /// Terminal token ending a reply (repeatable)
    #[arg(long = "terminal", default_value = "OK")]
    terminals: Vec<String>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> TermResult<()> {
    init_logging(args.verbose)?;
    describe_metrics();

    let config = load_config(&args)?;
    config.validate()?;

    let connect_err = |source| TermError::Connect {
        addr: args.connect.clone(),
        source,
    };
    let stream = TcpStream::connect(&args.connect).map_err(connect_err)?;
    stream.set_nodelay(true).map_err(connect_err)?;
    let reader = stream.try_clone().map_err(connect_err)?;
    let control = stream.try_clone().map_err(connect_err)?;

    let (engine, reader) = EngineBuilder::new(config)
        .event_handler(print_event)
        .connect(reader, stream)?;
    info!("connected to {}", args.connect);

    let (interrupt_tx, interrupt) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })?;
    let input = spawn_stdin()?;

    let result = session(&engine, &args, &input, &interrupt);

    engine.stop();
    // Unblock the reader thread.
    let _ = control.shutdown(Shutdown::Both);
    if reader.join().is_err() {
        debug!("reader thread panicked");
    }
    result
}

fn session(
    engine: &Engine,
    args: &Args,
    input: &Receiver<io::Result<String>>,
    interrupt: &Receiver<()>,
) -> TermResult<()> {
    loop {
        select! {
            recv(interrupt) -> _ => {
                info!("interrupted");
                return Ok(());
            }
            recv(input) -> line => match line {
                Ok(Ok(line)) => {
                    if !handle(engine, args, &line) {
                        return Ok(());
                    }
                }
                Ok(Err(e)) => return Err(TermError::Stdin(e)),
                // End of input.
                Err(_) => return Ok(()),
            },
        }
    }
}

/// Run one input line. Returns false when the session should end.
fn handle(engine: &Engine, args: &Args, line: &str) -> bool {
    let result = match Request::parse(line) {
        Request::Empty => Ok(()),
        Request::Quit => return false,
        Request::Execute(text) => {
            let command = Command::new(text).terminals(args.terminals.iter().cloned());
            engine.run(&command).map(|reply| {
                for line in &reply.lines {
                    println!("{}", line);
                }
                println!("{}", reply.terminal);
            })
        }
        Request::AwaitEvent(text) => {
            let timeout = engine.config().command_timeout();
            engine
                .execute_awaiting_event(text, timeout)
                .map(|value| println!("{}", value))
        }
        Request::Raw(text) => engine.send_raw(text),
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            report(&e);
            !e.is_aborted()
        }
    }
}

fn report(e: &CommandError) {
    match e {
        CommandError::Rejected { lines, line, .. } => {
            for line in lines {
                println!("{}", line);
            }
            println!("{}", line);
        }
        _ => eprintln!("{}", e),
    }
}

fn print_event(line: Line) -> Result<(), HandlerError> {
    println!("<< {}", line);
    Ok(())
}

fn spawn_stdin() -> TermResult<Receiver<io::Result<String>>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .map_err(TermError::Stdin)?;
    Ok(rx)
}

fn init_logging(verbose: u8) -> TermResult<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| TermError::Logging(e.to_string()))
}

fn load_config(args: &Args) -> TermResult<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|source| TermError::ConfigRead {
                path: path.clone(),
                source,
            })?;
            serde_yaml::from_str(&text).map_err(|source| TermError::ConfigParse {
                path: path.clone(),
                source,
            })?
        }
        None => EngineConfig::default(),
    };

    if let Some(ms) = args.timeout {
        config.command_timeout_ms = ms;
    }
    if args.inactivity {
        config.timeout_policy = TimeoutPolicy::Inactivity;
    }
    if args.skip_echo {
        config.skip_echo = true;
    }
    if args.error_is_failure && !config.failure_tokens.iter().any(|t| t == ERROR) {
        config.failure_tokens.push(ERROR.to_string());
    }
    Ok(config)
}
