//! Bitrate policy engine.
//!
//! A stateless AIMD-shaped rule: cut hard on loss, recover slowly when the
//! link is clean, and hold still in between.

use serde::{Deserialize, Serialize};

/// Tunable constants of the bitrate policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitratePolicy {
    /// Loss fraction above which the bitrate is cut.
    pub high_loss_threshold: f64,
    /// Loss fraction below which the bitrate may grow.
    pub stable_threshold: f64,
    /// Multiplier applied on a cut.
    pub backoff_factor: f64,
    /// Multiplier applied on recovery.
    pub recovery_factor: f64,
    /// Added after recovery scaling so small bitrates still grow.
    pub recovery_step_kbps: u32,
}

impl Default for BitratePolicy {
    fn default() -> Self {
        Self {
            high_loss_threshold: 0.08,
            stable_threshold: 0.01,
            backoff_factor: 0.85,
            recovery_factor: 1.05,
            recovery_step_kbps: 1,
        }
    }
}

impl BitratePolicy {
    /// Decide the next bitrate, or `None` to leave the encoder alone.
    ///
    /// Proposals are bounded by `[min, max]` and only emitted when they
    /// move strictly in the intended direction.
    pub fn decide(&self, current: u32, min: u32, max: u32, fraction_lost: f64) -> Option<u32> {
        if fraction_lost > self.high_loss_threshold && current > min {
            let scaled = (f64::from(current) * self.backoff_factor).floor() as u32;
            let proposal = scaled.max(min);
            (proposal < current).then_some(proposal)
        } else if fraction_lost < self.stable_threshold && current < max {
            let scaled = (f64::from(current) * self.recovery_factor).floor() as u32;
            let proposal = scaled.saturating_add(self.recovery_step_kbps).min(max);
            (proposal > current).then_some(proposal)
        } else {
            None
        }
    }
}

/// [`BitratePolicy::decide`] with the default constants.
pub fn decide(current: u32, min: u32, max: u32, fraction_lost: f64) -> Option<u32> {
    BitratePolicy::default().decide(current, min, max, fraction_lost)
}

// ── Tests ────────────────────────────────────────────────────────
