//! Duplex Math Server
//!
//! Runs the arithmetic bidi-streaming service on the in-memory transport
//! and drives it with local load clients. One stream per client; each
//! client sends `--messages` divisions of 64 by 2 and checks every reply
//! is 32.
//!
//! Usage:
//!     cargo build --release -p duplex-math
//!     ./target/release/duplex-math [--workers N] [--clients N] [--messages N]
//!
//! Console (with `--interactive`), one command per line on stdin:
//!     quit          cancel every live stream and shut down
//!     cancel <idx>  cancel the live stream in slot <idx>
//!     streams       list live streams
//!     stats         print engine counters
//!
//! Logging follows `RUST_LOG`, falling back to `DUPLEX_LOG` (default
//! `info`). `DUPLEX_LOG_THREADS=0` drops thread names from log lines.
//! SIGINT/SIGTERM shut the server down the same way `quit` does.

use duplex_core::completion::CompletionQueue;
use duplex_core::env::{env_get_bool, env_get_str};
use duplex_core::message::MathRequest;
use duplex_executor::{Server, ServerConfig};
use duplex_module::{run_load, Arithmetic, BlockingQueue, LoadConfig, LoadReport, MemTransport};

use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::io::BufRead;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type MathServer = Server<BlockingQueue, MemTransport, Arithmetic>;

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_signal(_: std::ffi::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

#[derive(Parser, Debug)]
#[command(name = "duplex-math", about = "Arithmetic bidi-streaming server")]
struct Args {
    /// Dispatch workers (overrides DUPLEX_WORKERS)
    #[arg(long)]
    workers: Option<usize>,

    /// Offload pool threads, 0 computes inline (overrides DUPLEX_OFFLOAD_WORKERS)
    #[arg(long)]
    offload_workers: Option<usize>,

    /// Stream table capacity (overrides DUPLEX_MAX_STREAMS)
    #[arg(long)]
    max_streams: Option<usize>,

    /// Concurrent load clients
    #[arg(long, default_value_t = 1)]
    clients: usize,

    /// Requests per client
    #[arg(long, default_value_t = 1_000_000)]
    messages: u64,

    /// Read console commands from stdin and keep serving after the load ends
    #[arg(long)]
    interactive: bool,
}

enum Command {
    Quit,
    Cancel(usize),
    Streams,
    Stats,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let cmd = match words.next()? {
            "quit" | "exit" => Command::Quit,
            "cancel" => Command::Cancel(words.next()?.parse().ok()?),
            "streams" => Command::Streams,
            "stats" => Command::Stats,
            _ => return None,
        };
        Some(cmd)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(env_get_str("DUPLEX_LOG", "info")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(env_get_bool("DUPLEX_LOG_THREADS", true))
        .init();
}

fn install_signal_handlers() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to an atomic.
    unsafe {
        sigaction(Signal::SIGINT, &action)?;
        sigaction(Signal::SIGTERM, &action)?;
    }
    Ok(())
}

fn build_config(args: &Args) -> ServerConfig {
    let mut config = ServerConfig::from_env();
    if let Some(n) = args.workers {
        config = config.workers(n);
    }
    if let Some(n) = args.offload_workers {
        config = config.offload_workers(n);
    }
    if let Some(n) = args.max_streams {
        config = config.max_streams(n);
    }
    config
}

fn start_server(config: ServerConfig) -> duplex_core::Result<MathServer> {
    let queue = Arc::new(BlockingQueue::with_park_timeout(config.park_timeout));
    let completions: Arc<dyn CompletionQueue> = queue.clone();
    let transport = Arc::new(MemTransport::new(completions));
    Server::start(config, queue, transport, Arc::new(Arithmetic))
}

/// Lines from stdin, parsed on a detached thread.
fn spawn_console() -> std::io::Result<Receiver<Command>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("duplex-console".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    None => eprintln!("unknown command: {}", line.trim()),
                }
            }
        })?;
    Ok(rx)
}

fn spawn_clients(
    server: &MathServer,
    args: &Args,
) -> Vec<thread::JoinHandle<duplex_core::Result<LoadReport>>> {
    let load = LoadConfig::new(args.messages, MathRequest::new(64.0, 2.0, "/")).expect(32.0);
    let mut clients = Vec::with_capacity(args.clients);
    for i in 0..args.clients {
        let stream = match server.transport().connect() {
            Ok(stream) => stream,
            Err(e) => {
                error!(client = i, error = %e, "connect failed");
                continue;
            }
        };
        let load = load.clone();
        let spawned = thread::Builder::new()
            .name(format!("duplex-client-{}", i))
            .spawn(move || run_load(stream, &load));
        match spawned {
            Ok(handle) => clients.push(handle),
            Err(e) => error!(client = i, error = %e, "client thread spawn failed"),
        }
    }
    clients
}

/// Apply one console command. Returns false on `quit`.
fn handle_command(server: &MathServer, cmd: Command) -> bool {
    match cmd {
        Command::Quit => {
            let n = server.cancel_all();
            info!(cancelled = n, "quit requested");
            return false;
        }
        Command::Cancel(index) => {
            match server
                .live_streams()
                .into_iter()
                .find(|s| s.stream.index() == index)
            {
                Some(info) => match server.cancel(info.stream) {
                    Ok(()) => info!(stream = %info.stream, "cancel posted"),
                    Err(e) => warn!(stream = %info.stream, error = %e, "cancel failed"),
                },
                None => warn!(index, "no live stream in that slot"),
            }
        }
        Command::Streams => {
            for s in server.live_streams() {
                println!("{}  {:?}  served={}", s.stream, s.phase, s.served);
            }
        }
        Command::Stats => {
            let t = server.transport();
            println!("{}", server.stats());
            println!(
                "transport: pending_accepts={} backlog={} bound={}",
                t.pending_accepts(),
                t.backlog_len(),
                t.bound_streams()
            );
        }
    }
    true
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    if let Err(e) = install_signal_handlers() {
        warn!(error = %e, "signal handlers not installed");
    }

    let server = match start_server(build_config(&args)) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "server failed to start");
            return ExitCode::FAILURE;
        }
    };

    let console = if args.interactive {
        match spawn_console() {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!(error = %e, "console unavailable");
                None
            }
        }
    } else {
        None
    };

    let clients = spawn_clients(&server, &args);
    info!(clients = clients.len(), messages = args.messages, "load started");

    while RUNNING.load(Ordering::SeqCst) {
        if console.is_none() && clients.iter().all(|c| c.is_finished()) {
            break;
        }
        let Some(rx) = &console else {
            thread::sleep(Duration::from_millis(50));
            continue;
        };
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(cmd) => {
                if !handle_command(&server, cmd) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            // stdin closed; behave as without a console.
            Err(RecvTimeoutError::Disconnected) => {
                if clients.iter().all(|c| c.is_finished()) {
                    break;
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    let report = server.shutdown();
    println!(
        "shutdown: cancelled={} forced={} in {:?}",
        report.cancelled, report.forced, report.elapsed
    );

    let mut clean = true;
    for (i, handle) in clients.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(load)) => {
                println!(
                    "client {}: sent={} received={} mismatches={} status={:?} elapsed={:?}",
                    i, load.sent, load.received, load.mismatches, load.status, load.elapsed
                );
                clean &= load.is_clean();
            }
            Ok(Err(e)) => {
                error!(client = i, error = %e, "load failed");
                clean = false;
            }
            Err(_) => {
                error!(client = i, "client thread panicked");
                clean = false;
            }
        }
    }
    println!("{}", server.stats());

    if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
