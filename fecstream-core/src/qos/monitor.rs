//! Network quality monitor.
//!
//! Pulls the RTCP-derived loss fraction out of the relay session's
//! statistics. The statistics are a nested, self-describing tree; the
//! field is located by name wherever it sits.

use std::sync::Arc;

use crate::pipeline::{ElementHandle, MediaPipeline};
use crate::value::{Structure, Value};

/// Name of the statistics field carrying the loss fraction.
pub const FRACTION_LOST_FIELD: &str = "fraction-lost";

/// Anything that can hand out a fresh statistics snapshot.
pub trait StatsSource: Send + Sync {
    /// `None` while no session (or no report) is available.
    fn stats(&self) -> Option<Structure>;
}

/// Statistics of internal session 0 of a relay element.
pub struct SessionStats {
    pipeline: Arc<dyn MediaPipeline>,
    relay: ElementHandle,
}

impl SessionStats {
    pub fn new(pipeline: Arc<dyn MediaPipeline>, relay: ElementHandle) -> Self {
        Self { pipeline, relay }
    }
}

impl StatsSource for SessionStats {
    fn stats(&self) -> Option<Structure> {
        self.pipeline.session_stats(&self.relay, 0)
    }
}

// ── LossSample ───────────────────────────────────────────────────

/// One loss observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossSample {
    /// Lost / expected packets over the last report interval.
    pub fraction_lost: f64,
    /// `false` when no report was available this tick.
    pub valid: bool,
}

impl LossSample {
    pub fn new(fraction_lost: f64) -> Self {
        Self {
            fraction_lost,
            valid: true,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fraction_lost: 0.0,
            valid: false,
        }
    }

    /// The loss fraction, clamped into `[0, 1]`, if the sample is valid.
    pub fn clamped(&self) -> Option<f64> {
        if !self.valid || self.fraction_lost.is_nan() {
            return None;
        }
        Some(self.fraction_lost.clamp(0.0, 1.0))
    }
}

// ── NetworkQualityMonitor ────────────────────────────────────────

/// Produces a [`LossSample`] per query from an optional stats source.
pub struct NetworkQualityMonitor {
    source: Option<Arc<dyn StatsSource>>,
}

impl NetworkQualityMonitor {
    pub fn new(source: Option<Arc<dyn StatsSource>>) -> Self {
        Self { source }
    }

    /// Take a snapshot and extract the loss fraction from it.
    ///
    /// The snapshot is owned by this call and dropped before returning.
    pub fn sample(&self) -> LossSample {
        self.source
            .as_ref()
            .and_then(|s| s.stats())
            .and_then(|stats| find_fraction_lost(&stats))
            .map_or_else(LossSample::unavailable, LossSample::new)
    }
}

/// Depth-first search for the first `fraction-lost` field.
///
/// At each structure: its own fields first, then nested structures, then
/// lists and arrays, in field order.
pub fn find_fraction_lost(stats: &Structure) -> Option<f64> {
    find_field(stats, FRACTION_LOST_FIELD)
}

fn find_field(node: &Structure, field: &str) -> Option<f64> {
    if let Some(v) = node.get(field).and_then(Value::as_f64) {
        return Some(v);
    }

    for (_, value) in node.fields() {
        if let Some(nested) = value.as_structure() {
            if let Some(v) = find_field(nested, field) {
                return Some(v);
            }
        }
    }

    for (_, value) in node.fields() {
        if let Value::List(items) | Value::Array(items) = value {
            if let Some(v) = find_in_items(items, field) {
                return Some(v);
            }
        }
    }

    None
}

fn find_in_items(items: &[Value], field: &str) -> Option<f64> {
    items.iter().find_map(|item| match item {
        Value::Structure(s) | Value::Caps(s) => find_field(s, field),
        Value::List(inner) | Value::Array(inner) => find_in_items(inner, field),
        _ => None,
    })
}

// ── Tests ────────────────────────────────────────────────────────
