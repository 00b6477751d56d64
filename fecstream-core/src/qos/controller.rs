//! QoS control loop.
//!
//! ```text
//!  Idle ──attach──► Attached ──start──► Running
//!                      ▲                   │
//!                      └───────stop────────┘
//! ```
//!
//! [`QosController`] owns one worker thread while running. Each tick the
//! worker samples the loss fraction, reads the encoder's live bitrate, asks
//! the [`BitratePolicy`] for a decision and applies it. The worker is the
//! only writer of the encoder bitrate; `attach` is rejected while it runs,
//! so the handles never change under it.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, QosError};
use crate::pipeline::{BusEvent, ElementHandle, MediaPipeline};
use crate::qos::monitor::{NetworkQualityMonitor, StatsSource};
use crate::qos::policy::BitratePolicy;
use crate::value::{Structure, Value};

/// Name of the bus event posted after every applied change.
pub const BITRATE_EVENT: &str = "qos-bitrate";

// ── Encoder access ───────────────────────────────────────────────

/// Read/write access to an encoder's target bitrate in kbps.
pub trait BitrateControl: Send + Sync {
    fn bitrate(&self) -> Result<u32, PipelineError>;
    fn set_bitrate(&self, kbps: u32) -> Result<(), PipelineError>;
}

/// The `bitrate` property of a pipeline element.
pub struct EncoderBitrate {
    pipeline: Arc<dyn MediaPipeline>,
    encoder: ElementHandle,
}

impl EncoderBitrate {
    pub fn new(pipeline: Arc<dyn MediaPipeline>, encoder: ElementHandle) -> Self {
        Self { pipeline, encoder }
    }
}

impl BitrateControl for EncoderBitrate {
    fn bitrate(&self) -> Result<u32, PipelineError> {
        let value = self.pipeline.property(&self.encoder, "bitrate")?;
        value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| PipelineError::PropertyType {
                element: self.encoder.name().to_string(),
                property: "bitrate".to_string(),
                reason: format!("expected unsigned kbps, got {value:?}"),
            })
    }

    fn set_bitrate(&self, kbps: u32) -> Result<(), PipelineError> {
        self.pipeline
            .set_property(&self.encoder, "bitrate", Value::from(kbps))
    }
}

// ── Settings ─────────────────────────────────────────────────────

/// Cadence, bounds derivation and policy constants of the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QosSettings {
    /// Sampling interval in milliseconds.
    pub interval_ms: u64,
    /// `min = max(floor_kbps, base * min_ratio)`.
    pub min_ratio: f64,
    /// `max = max(min, base * max_ratio)`.
    pub max_ratio: f64,
    /// Lowest bitrate the controller will ever set.
    pub floor_kbps: u32,
    /// Base used when the encoder reports no bitrate.
    pub default_base_kbps: u32,
    /// Log one line per this many consecutive ticks without a report.
    pub miss_log_every: u64,
    pub policy: BitratePolicy,
}

impl Default for QosSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            min_ratio: 0.6,
            max_ratio: 1.5,
            floor_kbps: 500,
            default_base_kbps: 4000,
            miss_log_every: 10,
            policy: BitratePolicy::default(),
        }
    }
}

impl QosSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

// ── ControllerState ──────────────────────────────────────────────

/// Bounds and live values of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerState {
    pub base_kbps: u32,
    pub min_kbps: u32,
    pub max_kbps: u32,
    pub current_kbps: u32,
    pub consecutive_good_samples: u32,
}

impl ControllerState {
    /// Derive bounds from the bitrate the encoder reported at attach time.
    pub fn derive(reported_kbps: u32, settings: &QosSettings) -> Self {
        let base = if reported_kbps == 0 {
            settings.default_base_kbps
        } else {
            reported_kbps
        };
        let min = ((f64::from(base) * settings.min_ratio) as u32).max(settings.floor_kbps);
        let max = ((f64::from(base) * settings.max_ratio) as u32).max(min);

        Self {
            base_kbps: base,
            min_kbps: min,
            max_kbps: max,
            current_kbps: base,
            consecutive_good_samples: 0,
        }
    }
}

// ── ControlLoop ──────────────────────────────────────────────────

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// No loss report; `logged` is true on every Nth consecutive miss.
    NoSample { logged: bool },
    /// The encoder bitrate could not be read or written.
    EncoderUnavailable,
    /// A report arrived but the policy kept the bitrate.
    Hold { loss: f64 },
    /// The bitrate was changed.
    Adjusted { from: u32, to: u32, loss: f64 },
}

/// The body of the worker thread, usable synchronously for one tick at a
/// time.
pub struct ControlLoop {
    monitor: NetworkQualityMonitor,
    encoder: Arc<dyn BitrateControl>,
    events: Option<Arc<dyn MediaPipeline>>,
    policy: BitratePolicy,
    miss_log_every: u64,
    state: ControllerState,
    misses: u64,
}

impl ControlLoop {
    pub fn new(
        monitor: NetworkQualityMonitor,
        encoder: Arc<dyn BitrateControl>,
        events: Option<Arc<dyn MediaPipeline>>,
        settings: &QosSettings,
        state: ControllerState,
    ) -> Self {
        Self {
            monitor,
            encoder,
            events,
            policy: settings.policy,
            miss_log_every: settings.miss_log_every.max(1),
            state,
            misses: 0,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Run one sample → decide → apply cycle.
    pub fn tick(&mut self) -> TickOutcome {
        let Some(loss) = self.monitor.sample().clamped() else {
            self.misses += 1;
            let logged = self.misses % self.miss_log_every == 0;
            if logged {
                info!(misses = self.misses, "qos: no loss report available yet");
            }
            return TickOutcome::NoSample { logged };
        };
        self.misses = 0;

        // The encoder is the source of truth, not our last write.
        let current = match self.encoder.bitrate() {
            Ok(kbps) => kbps,
            Err(e) => {
                warn!("qos: cannot read encoder bitrate: {e}");
                return TickOutcome::EncoderUnavailable;
            }
        };
        self.state.current_kbps = current;

        if loss < self.policy.stable_threshold {
            self.state.consecutive_good_samples =
                self.state.consecutive_good_samples.saturating_add(1);
        } else {
            self.state.consecutive_good_samples = 0;
        }

        let (min, max) = (self.state.min_kbps, self.state.max_kbps);
        let Some(next) = self.policy.decide(current, min, max, loss) else {
            debug!(
                bitrate = current,
                loss_pct = loss * 100.0,
                good = self.state.consecutive_good_samples,
                "qos: hold"
            );
            return TickOutcome::Hold { loss };
        };

        if let Err(e) = self.encoder.set_bitrate(next) {
            warn!("qos: cannot set encoder bitrate to {next}: {e}");
            return TickOutcome::EncoderUnavailable;
        }
        self.state.current_kbps = next;

        if next < current {
            warn!("qos: loss {:.1}% -> bitrate {current} -> {next} kbps", loss * 100.0);
        } else {
            info!("qos: loss {:.1}% -> bitrate {current} -> {next} kbps", loss * 100.0);
        }
        self.announce(current, next, loss);

        TickOutcome::Adjusted {
            from: current,
            to: next,
            loss,
        }
    }

    fn announce(&self, from: u32, to: u32, loss: f64) {
        let Some(events) = &self.events else { return };
        let payload = Structure::new(BITRATE_EVENT)
            .with("old", from)
            .with("new", to)
            .with("loss", loss);
        if let Err(e) = events.post(BusEvent::Custom {
            name: BITRATE_EVENT.to_string(),
            payload,
        }) {
            debug!("qos: bitrate event not delivered: {e}");
        }
    }
}

// ── QosController ────────────────────────────────────────────────

struct Attachment {
    stats: Option<Arc<dyn StatsSource>>,
    encoder: Arc<dyn BitrateControl>,
    events: Option<Arc<dyn MediaPipeline>>,
    state: ControllerState,
}

struct Worker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<ControllerState>,
}

/// Owner of the QoS worker thread.
pub struct QosController {
    settings: QosSettings,
    attachment: Option<Attachment>,
    worker: Option<Worker>,
}

impl QosController {
    pub fn new(settings: QosSettings) -> Self {
        Self {
            settings,
            attachment: None,
            worker: None,
        }
    }

    /// Bind the controller to a stats source, an encoder and an optional
    /// bus for change notifications.
    ///
    /// Captures the encoder's current bitrate as the base and derives the
    /// bounds from it; they stay fixed for this attachment.
    pub fn attach(
        &mut self,
        stats: Option<Arc<dyn StatsSource>>,
        encoder: Arc<dyn BitrateControl>,
        events: Option<Arc<dyn MediaPipeline>>,
    ) -> Result<ControllerState, QosError> {
        if self.is_running() {
            return Err(QosError::AlreadyRunning);
        }

        let reported = encoder.bitrate().unwrap_or_else(|e| {
            warn!("qos: encoder bitrate unreadable at attach ({e}); using default base");
            0
        });
        let state = ControllerState::derive(reported, &self.settings);
        info!(
            base = state.base_kbps,
            min = state.min_kbps,
            max = state.max_kbps,
            "qos: attached"
        );

        self.attachment = Some(Attachment {
            stats,
            encoder,
            events,
            state,
        });
        Ok(state)
    }

    /// Spawn the worker. A no-op while already running.
    pub fn start(&mut self, interval: Duration) -> Result<(), QosError> {
        if self.is_running() {
            return Ok(());
        }
        let attachment = self.attachment.as_ref().ok_or(QosError::NotAttached)?;

        let mut control = ControlLoop::new(
            NetworkQualityMonitor::new(attachment.stats.clone()),
            Arc::clone(&attachment.encoder),
            attachment.events.clone(),
            &self.settings,
            attachment.state,
        );

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("qos-worker".into())
            .spawn(move || {
                // Any message or a dropped sender means stop.
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                    control.tick();
                }
                control.state()
            })?;

        info!(interval_ms = interval.as_millis() as u64, "qos: worker started");
        self.worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    /// Stop the worker and wait for it to exit. Idempotent.
    ///
    /// A tick in progress completes first; no encoder write happens after
    /// this returns.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else { return };
        let _ = worker.stop_tx.send(());
        match worker.handle.join() {
            Ok(state) => {
                if let Some(attachment) = self.attachment.as_mut() {
                    attachment.state = state;
                }
                info!(bitrate = state.current_kbps, "qos: worker stopped");
            }
            Err(_) => warn!("qos: worker panicked"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Controller state as of attach or the last `stop`.
    pub fn state(&self) -> Option<ControllerState> {
        self.attachment.as_ref().map(|a| a.state)
    }

    pub fn settings(&self) -> &QosSettings {
        &self.settings
    }
}

impl Drop for QosController {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ────────────────────────────────────────────────────────
