//! Streaming engine.
//!
//! Wires the pieces together in order: plan and build the topology, start
//! the pipeline, attach and start the QoS loop. Teardown runs in reverse:
//! the QoS worker is joined before the pipeline is stopped, and the
//! topology (with its relay subscription) is released last.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::StreamConfig;
use crate::error::FecError;
use crate::lifecycle::{Lifecycle, RunOutcome};
use crate::pipeline::MediaPipeline;
use crate::qos::{
    BitrateControl, EncoderBitrate, QosController, QosSettings, SessionStats, StatsSource,
};
use crate::topology::{Topology, TopologyBuilder, TopologyPlan};

pub struct Engine {
    pipeline: Arc<dyn MediaPipeline>,
    config: StreamConfig,
    qos: QosSettings,
}

impl Engine {
    pub fn new(pipeline: Arc<dyn MediaPipeline>, config: StreamConfig) -> Self {
        Self {
            pipeline,
            config,
            qos: QosSettings::default(),
        }
    }

    pub fn with_qos(mut self, settings: QosSettings) -> Self {
        self.qos = settings;
        self
    }

    /// Build the topology, start the pipeline and the QoS loop.
    ///
    /// On error nothing is left playing.
    pub fn start(self) -> Result<Session, FecError> {
        let cfg = &self.config;
        let ports = cfg.ports();
        let profile = cfg.profile();
        info!(
            destination = %cfg.destination(),
            rtp = ports.rtp,
            fec = ports.fec,
            rtcp_send = ports.rtcp_send,
            rtcp_recv = ports.rtcp_recv,
            "starting stream"
        );
        info!(
            mode = %cfg.mode(),
            width = profile.width,
            height = profile.height,
            fps = profile.fps,
            bitrate_kbps = profile.bitrate_kbps,
            redundancy_percent = cfg.redundancy_percent(),
            latency_ms = cfg.latency_ms(),
            "stream profile"
        );

        let plan = TopologyPlan::for_config(cfg);
        let topology = TopologyBuilder::new(Arc::clone(&self.pipeline)).build(&plan)?;
        let lifecycle = Lifecycle::new(Arc::clone(&self.pipeline))?;

        let mut session = Session {
            pipeline: Arc::clone(&self.pipeline),
            topology: Some(topology),
            lifecycle,
            qos: QosController::new(self.qos.clone()),
            stopped: false,
        };

        // Dropping `session` on any error below stops the pipeline.
        session.lifecycle.play()?;
        session.start_qos()?;
        Ok(session)
    }
}

// ── Session ──────────────────────────────────────────────────────

/// A running stream. Dropping it tears everything down.
pub struct Session {
    pipeline: Arc<dyn MediaPipeline>,
    topology: Option<Topology>,
    lifecycle: Lifecycle,
    qos: QosController,
    stopped: bool,
}

impl Session {
    fn start_qos(&mut self) -> Result<(), FecError> {
        let Some(topology) = self.topology.as_ref() else {
            return Ok(());
        };

        let stats: Option<Arc<dyn StatsSource>> = match topology.relay() {
            Some(relay) => Some(Arc::new(SessionStats::new(
                Arc::clone(&self.pipeline),
                relay.clone(),
            ))),
            None => {
                info!("no session relay; bitrate adaptation stays idle");
                None
            }
        };
        let encoder: Arc<dyn BitrateControl> = Arc::new(EncoderBitrate::new(
            Arc::clone(&self.pipeline),
            topology.encoder().clone(),
        ));

        self.qos
            .attach(stats, encoder, Some(Arc::clone(&self.pipeline)))?;
        let interval = self.qos.settings().interval();
        self.qos.start(interval)?;
        Ok(())
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_ref()
    }

    pub fn qos(&self) -> &QosController {
        &self.qos
    }

    /// Run until cancelled or the pipeline ends the stream.
    pub async fn run(&mut self, cancel: &CancellationToken) -> RunOutcome {
        self.lifecycle.run(cancel).await
    }

    /// Stop the QoS loop, stop the pipeline, release the topology.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.qos.stop();
        if let Err(e) = self.lifecycle.shutdown() {
            warn!("failed to stop pipeline: {e}");
        }
        self.topology = None;
        info!("stream stopped");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("topology", &self.topology)
            .field("qos_running", &self.qos.is_running())
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start `engine`, run it until `cancel` fires or the stream ends, then
/// tear it down.
pub async fn run(engine: Engine, cancel: CancellationToken) -> Result<RunOutcome, FecError> {
    let mut session = engine.start()?;
    let outcome = session.run(&cancel).await;
    session.shutdown();
    Ok(outcome)
}
