//! storekeeperd - TCP daemon for the key-value store.
//!
//! Loads an optional config file written in the directive grammar described
//! by `store_core::config`, restores the most recent snapshot if one is on
//! disk, and then drives the connections through a single-threaded `mio`
//! reactor until a shutdown signal arrives.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use store_core::config::Config;
use store_core::server::Server;

/// TCP daemon for the key-value store.
#[derive(Parser)]
#[command(name = "storekeeperd", about = "Key-value store daemon", version)]
struct Args {
    /// Path to a config file written in the `directive arg...` grammar.
    /// Options not covered by the file fall back to their built-in defaults.
    config: Option<String>,

    /// Listening port. Overrides the config file's `port` directive.
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address. Overrides the config file's `bind` directive.
    #[arg(long)]
    bind: Option<String>,

    /// Working directory for the snapshot and append-only log.
    #[arg(long)]
    dir: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("storekeeperd={level}").parse().unwrap())
        .add_directive(format!("store_core={level}").parse().unwrap());

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(args: &Args) -> Config {
    let (mut config, warnings) = match &args.config {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => Config::load_str(&text),
            Err(e) => {
                error!(path = %path, error = %e, "could not read config file, using defaults");
                (Config::default(), Vec::new())
            }
        },
        None => (Config::default(), Vec::new()),
    };
    for warning in &warnings {
        warn!("{warning}");
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = &args.bind {
        config.bind = bind.clone();
    }
    if let Some(dir) = &args.dir {
        config.dir = dir.into();
    }
    config
}

/// Ignores `SIGHUP`/`SIGPIPE` directly — a write to a socket the peer
/// already closed should surface as an `EPIPE` `io::Error`, not kill the
/// process, and a detached daemon has no controlling terminal to hang up.
fn ignore_terminal_signals() {
    unsafe {
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);
    ignore_terminal_signals();

    let config = load_config(&args);
    info!("storekeeperd {} ({}) starting", env!("CARGO_PKG_VERSION"), store_core::GIT_SHA);
    info!(bind = %config.bind, port = config.port, dir = %config.dir.display(), "configuration loaded");

    let mut server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };

    match server.load_snapshot() {
        Ok(true) => info!("restored keyspace from snapshot"),
        Ok(false) => info!("no snapshot found, starting with an empty keyspace"),
        Err(e) => {
            error!(error = %e, "failed to load snapshot");
            std::process::exit(1);
        }
    }

    let keep_running = Arc::new(AtomicBool::new(true));
    let r = keep_running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("failed to set Ctrl-C handler: {e}");
    }

    if let Err(e) = server.run(keep_running) {
        error!(error = %e, "event loop exited with an error");
        std::process::exit(1);
    }
    info!("storekeeperd shut down cleanly");
}
