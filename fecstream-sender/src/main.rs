//! fecstream-sender entry point.
//!
//! ```text
//! fecstream-sender 10.0.0.5 5000 5001 5002 5003            Stream the screen
//! fecstream-sender 10.0.0.5 5000 5001 5002 5003 --simulate  Control plane only
//! fecstream-sender --gen-config                             Print default config
//! ```
//!
//! Exit status is 0 once a started stream has been torn down, whatever
//! stopped it, and 1 if it could not be started.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fecstream_sender::app;
use fecstream_sender::cli::Cli;
use fecstream_sender::config::{LoadError, SenderConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        return match SenderConfig::default_toml() {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to render default config: {e}");
                ExitCode::FAILURE
            }
        };
    }

    // Parse before logging exists (it picks the level), report after.
    let (settings, load_error) = match SenderConfig::read(&cli.config) {
        Ok(settings) => (settings, None),
        Err(e) => (SenderConfig::default(), Some(e)),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("fecstream-sender v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        Some(e @ LoadError::Invalid { .. }) => warn!("{e}; using defaults"),
        Some(e) => info!("{e}; using defaults"),
        None => {}
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            on_signal.cancel();
        }
    });

    match app::run(&cli, &settings, cancel).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
