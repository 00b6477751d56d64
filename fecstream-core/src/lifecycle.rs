//! Pipeline lifecycle: start, watch the bus, stop.
//!
//! The run loop ends on cancellation, end-of-stream, a pipeline error, or
//! when the bus goes away. Warnings and state changes are only logged.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, SetupError};
use crate::pipeline::{BusEvent, BusReceiver, MediaPipeline, PipelineState};

/// Why the run loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The cancellation token fired.
    Cancelled,
    /// The stream ended.
    Eos,
    /// An element posted an error.
    Error { source: String, message: String },
    /// Every bus sender was dropped.
    BusClosed,
}

impl RunOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

pub struct Lifecycle {
    pipeline: Arc<dyn MediaPipeline>,
    bus: BusReceiver,
}

impl Lifecycle {
    /// Take the pipeline's bus. Fails if someone else already holds it.
    pub fn new(pipeline: Arc<dyn MediaPipeline>) -> Result<Self, PipelineError> {
        let bus = pipeline.take_bus()?;
        Ok(Self { pipeline, bus })
    }

    /// Set the pipeline to `PLAYING`.
    pub fn play(&self) -> Result<(), SetupError> {
        self.pipeline
            .set_state(PipelineState::Playing)
            .map_err(|source| SetupError::State {
                state: PipelineState::Playing.to_string(),
                source,
            })?;
        info!("pipeline playing");
        Ok(())
    }

    /// Process bus events until one of them ends the run or `cancel` fires.
    pub async fn run(&mut self, cancel: &CancellationToken) -> RunOutcome {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("shutdown requested");
                    return RunOutcome::Cancelled;
                }

                event = self.bus.recv() => {
                    let Some(event) = event else {
                        warn!("pipeline bus closed");
                        return RunOutcome::BusClosed;
                    };
                    if let Some(outcome) = handle_event(event) {
                        return outcome;
                    }
                }
            }
        }
    }

    /// Set the pipeline to `NULL`, releasing every element's resources.
    pub fn shutdown(&self) -> Result<(), PipelineError> {
        self.pipeline.set_state(PipelineState::Null)?;
        info!("pipeline stopped");
        Ok(())
    }
}

/// Log one bus event; `Some` if it ends the run.
fn handle_event(event: BusEvent) -> Option<RunOutcome> {
    match event {
        BusEvent::Error {
            source,
            message,
            debug: detail,
        } => {
            error!(
                element = %source,
                detail = detail.as_deref().unwrap_or("none"),
                "pipeline error: {message}"
            );
            Some(RunOutcome::Error { source, message })
        }
        BusEvent::Warning {
            source,
            message,
            debug: detail,
        } => {
            warn!(
                element = %source,
                detail = detail.as_deref().unwrap_or("none"),
                "pipeline warning: {message}"
            );
            None
        }
        BusEvent::StateChanged { source, old, new } => {
            debug!(element = %source, %old, %new, "state changed");
            None
        }
        BusEvent::Eos => {
            info!("end of stream");
            Some(RunOutcome::Eos)
        }
        BusEvent::Custom { name, payload } => {
            let payload = serde_json::to_string(&payload).unwrap_or_default();
            debug!(%name, %payload, "application message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SimPipeline;
    use crate::value::Structure;

    fn lifecycle() -> (Arc<SimPipeline>, Lifecycle) {
        let sim = Arc::new(SimPipeline::new());
        let lc = Lifecycle::new(sim.clone()).unwrap();
        (sim, lc)
    }

    #[test]
    fn bus_can_only_be_taken_once() {
        let (sim, _lc) = lifecycle();
        assert!(matches!(Lifecycle::new(sim), Err(PipelineError::BusTaken)));
    }

    #[tokio::test]
    async fn error_event_ends_the_run() {
        let (sim, mut lc) = lifecycle();
        lc.play().unwrap();

        sim.emit_bus(BusEvent::Warning {
            source: "encoder".into(),
            message: "slow".into(),
            debug: None,
        });
        sim.emit_bus(BusEvent::Custom {
            name: "qos-bitrate".into(),
            payload: Structure::new("qos-bitrate").with("new", 3400u32),
        });
        sim.emit_bus(BusEvent::Error {
            source: "udpsink_rtp".into(),
            message: "could not send".into(),
            debug: Some("sendto: ENETUNREACH".into()),
        });

        let outcome = lc.run(&CancellationToken::new()).await;
        assert_eq!(
            outcome,
            RunOutcome::Error {
                source: "udpsink_rtp".into(),
                message: "could not send".into()
            }
        );
        assert!(outcome.is_error());
    }

    #[test]
    fn warnings_with_detail_do_not_end_the_run() {
        let warning = BusEvent::Warning {
            source: "udpsink_fec".into(),
            message: "buffer dropped".into(),
            debug: Some("queue overrun".into()),
        };
        assert_eq!(handle_event(warning), None);

        let error = BusEvent::Error {
            source: "source".into(),
            message: "device lost".into(),
            debug: Some("ximagesrc: XGetImage failed".into()),
        };
        assert_eq!(
            handle_event(error),
            Some(RunOutcome::Error {
                source: "source".into(),
                message: "device lost".into()
            })
        );
    }

    #[test]
    fn eos_ends_the_run() {
        let (sim, mut lc) = lifecycle();
        sim.emit_bus(BusEvent::Eos);
        let outcome = tokio_test::block_on(lc.run(&CancellationToken::new()));
        assert_eq!(outcome, RunOutcome::Eos);
    }

    #[tokio::test]
    async fn cancellation_wins_over_pending_events() {
        let (sim, mut lc) = lifecycle();
        sim.emit_bus(BusEvent::Eos);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(lc.run(&cancel).await, RunOutcome::Cancelled);
    }

    #[tokio::test]
    async fn cancel_from_another_task() {
        let (_sim, mut lc) = lifecycle();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });
        assert_eq!(lc.run(&cancel).await, RunOutcome::Cancelled);
    }

    #[test]
    fn shutdown_reaches_null() {
        let (sim, lc) = lifecycle();
        lc.play().unwrap();
        assert_eq!(sim.state(), PipelineState::Playing);
        lc.shutdown().unwrap();
        assert_eq!(sim.state(), PipelineState::Null);
    }
}
