//! Stash daemon - background sync for the dual-store engine.
//!
//! Watches every stash directory under the base for out-of-band edits to
//! `records.jsonl` or `config.json` and rebuilds the indexed cache from
//! the log, debounced per stash. Modes: `start` (spawn a detached daemon),
//! `run` (the daemon loop itself), `stop`, `status`, and `tail [n]`.

mod config;
mod daemon;
mod error;
mod pidlock;
mod status;
mod watcher;

use crate::config::Config;
use crate::daemon::{StartOutcome, StopOutcome};
use crate::error::Result;
use crate::status::DaemonStatus;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stash_daemon=info,stash_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let code = match dispatch().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn dispatch() -> Result<()> {
    let config = Config::from_env()?;
    let mode = std::env::args().nth(1).unwrap_or_else(|| "run".into());

    match mode.as_str() {
        "start" => match daemon::start(&config)? {
            StartOutcome::AlreadyRunning(pid) => {
                println!("daemon already running (pid {pid})");
            }
            StartOutcome::Started(pid) => println!("daemon started (pid {pid})"),
        },
        "run" => daemon::run(config).await?,
        "stop" => match daemon::stop(&config)? {
            StopOutcome::NotRunning => println!("daemon not running"),
            StopOutcome::Stopped(pid) => println!("daemon stopped (pid {pid})"),
            StopOutcome::Killed(pid) => println!("daemon killed (pid {pid})"),
        },
        "status" => {
            let status = DaemonStatus::read(&config.base)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        "tail" => {
            let n = std::env::args()
                .nth(2)
                .and_then(|v| v.parse().ok())
                .unwrap_or(20);
            for line in daemon::tail_log(&config.base, n)? {
                println!("{line}");
            }
        }
        other => {
            eprintln!("unknown mode '{other}' (expected start|run|stop|status|tail)");
            std::process::exit(2);
        }
    }
    Ok(())
}
