//! ttbot - multi-server TeamTalk 5 administration bot.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use ttbot::config::{self, Config};
use ttbot::fleet::Fleet;

const EXIT_CONFIG: u8 = 1;
const EXIT_PANIC: u8 = 3;

struct Args {
    config_path: String,
    working_dir: Option<String>,
}

/// Parse `-c <config>` (default `config.xml`) and `-d <working-dir>`.
fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config_path: "config.xml".to_string(),
        working_dir: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "-c" | "--config" => {
                args.config_path = iter
                    .next()
                    .ok_or_else(|| format!("Missing path after {flag}"))?;
            }
            "-d" | "--working-dir" => {
                args.working_dir = Some(
                    iter.next()
                        .ok_or_else(|| format!("Missing path after {flag}"))?,
                );
            }
            other => return Err(format!("Unknown argument: {other}")),
        }
    }
    Ok(args)
}

async fn run() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if let Some(dir) = &args.working_dir
        && let Err(e) = std::env::set_current_dir(dir)
    {
        eprintln!("ERROR: cannot change working directory to {dir}: {e}");
        return ExitCode::from(EXIT_CONFIG);
    }
    let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = match Config::load(Path::new(&args.config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: Failed to load config from {}: {e}", args.config_path);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Err(errors) = config::validate(&config) {
        for err in &errors {
            error!(error = %err, "Configuration validation failed");
        }
        return ExitCode::from(EXIT_CONFIG);
    }

    info!(
        servers = config.servers.server.len(),
        config = %args.config_path,
        "Starting ttbot"
    );

    let fleet = Fleet::new(&config, working_dir);
    let started = fleet.start().await;
    if started == 0 {
        warn!("No servers are flagged to connect on start; nothing to do.");
        return ExitCode::SUCCESS;
    }

    // Graceful shutdown on SIGINT/SIGTERM; exit when every dispatcher
    // has returned.
    let interrupted = {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGINT handler");
                return ExitCode::from(EXIT_PANIC);
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return ExitCode::from(EXIT_PANIC);
            }
        };
        tokio::select! {
            _ = sigint.recv() => { info!("SIGINT received - shutting down"); true }
            _ = sigterm.recv() => { info!("SIGTERM received - shutting down"); true }
            _ = fleet.wait() => false
        }
    };
    if interrupted {
        fleet.shutdown_all().await;
        fleet.wait().await;
    }

    info!("Shutdown complete.");
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("ERROR: failed to start runtime: {e}");
            return ExitCode::from(EXIT_PANIC);
        }
    };
    // The top-level task is spawned so an unrecovered panic surfaces as a
    // join error and maps to the dedicated exit code instead of an abort.
    match runtime.block_on(async { tokio::spawn(run()).await }) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("PANIC: {e}");
            ExitCode::from(EXIT_PANIC)
        }
    }
}
