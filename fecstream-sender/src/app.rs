//! Sender application: resolve configuration, pick a backend, stream.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use fecstream_core::engine::{self, Engine};
use fecstream_core::{FecError, MediaPipeline, PipelineError, RunOutcome, SimPipeline};

use crate::cli::Cli;
use crate::config::SenderConfig;
use crate::profile::{self, HostInfo};

/// Run one stream to completion.
///
/// `Err` means the stream never started; a stream that started and then
/// stopped, for any reason, returns its [`RunOutcome`].
pub async fn run(
    cli: &Cli,
    settings: &SenderConfig,
    cancel: CancellationToken,
) -> Result<RunOutcome, FecError> {
    let host_profile = profile::auto_select(HostInfo::probe());
    let config = cli.stream_config(settings, host_profile)?;

    let mut qos = settings.qos.clone();
    if let Some(ms) = cli.qos_interval_ms {
        qos.interval_ms = ms;
    }

    let pipeline = backend(cli.simulate)?;
    let outcome = engine::run(Engine::new(pipeline, config).with_qos(qos), cancel).await?;
    info!(?outcome, "stream finished");
    Ok(outcome)
}

fn backend(simulate: bool) -> Result<Arc<dyn MediaPipeline>, PipelineError> {
    if simulate {
        info!("using simulated pipeline");
        return Ok(Arc::new(SimPipeline::new()));
    }
    media_backend()
}

#[cfg(feature = "gst")]
fn media_backend() -> Result<Arc<dyn MediaPipeline>, PipelineError> {
    Ok(Arc::new(fecstream_core::pipeline::GstPipeline::new()?))
}

#[cfg(not(feature = "gst"))]
fn media_backend() -> Result<Arc<dyn MediaPipeline>, PipelineError> {
    Err(PipelineError::Backend(
        "built without the `gst` feature; rebuild with it or pass --simulate".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use fecstream_core::ConfigError;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["fecstream-sender"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[tokio::test]
    async fn simulated_run_stops_on_cancel() {
        let cli = cli(&[
            "127.0.0.1",
            "5000",
            "5001",
            "5002",
            "5003",
            "--simulate",
            "--qos-interval-ms",
            "10",
        ]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = run(&cli, &SenderConfig::default(), cancel).await.unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
    }

    #[test]
    fn invalid_config_fails_before_start() {
        let cli = cli(&["127.0.0.1", "5000", "5000", "5002", "5003", "--simulate"]);
        let settings = SenderConfig::default();
        let err = tokio_test::block_on(run(&cli, &settings, CancellationToken::new()))
            .unwrap_err();
        assert!(matches!(err, FecError::Config(ConfigError::DuplicatePort { .. })));
    }
}
