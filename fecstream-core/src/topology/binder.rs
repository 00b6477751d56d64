//! Runtime binding of relay outputs.
//!
//! The session relay creates its send pads at runtime, as soon as its send
//! input is requested or once it starts running, depending on the backend.
//! [`PadBinder`] holds the outstanding [`PendingLink`]s and resolves each
//! one exactly once, on the first pad whose name starts with its prefix.
//! A leg whose link fails is logged and left unlinked; the stream keeps
//! going on whatever legs did link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::pipeline::{ElementHandle, MediaPipeline};
use crate::topology::plan::Leg;

/// A relay output waiting for its pad to appear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    pub leg: Leg,
    pub prefix: String,
    pub sink: ElementHandle,
}

/// A pad-to-pad connection that exists in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub src: ElementHandle,
    pub src_pad: String,
    pub sink: ElementHandle,
    pub sink_pad: String,
}

/// What a single pad-added notification led to.
#[derive(Debug, Clone, PartialEq)]
pub enum BindOutcome {
    /// The pad was linked to its leg's sink.
    Linked { leg: Leg, edge: Edge },
    /// The link was attempted and refused; the leg stays unlinked.
    Failed { leg: Leg, pad: String, error: PipelineError },
    /// The pad matches a leg that was already resolved.
    Duplicate { leg: Leg, pad: String },
    /// The pad matches no leg.
    Ignored,
}

// ── PendingLinks ─────────────────────────────────────────────────

enum Match {
    Pending(PendingLink),
    Settled(Leg),
    None,
}

/// Outstanding legs in priority order, plus the ones already attempted.
#[derive(Debug, Default)]
pub struct PendingLinks {
    pending: Vec<PendingLink>,
    settled: Vec<(Leg, String)>,
}

impl PendingLinks {
    pub fn new(mut links: Vec<PendingLink>) -> Self {
        links.sort_by_key(|l| l.leg);
        Self {
            pending: links,
            settled: Vec::new(),
        }
    }

    /// Remove and return the first pending leg whose prefix matches `pad`.
    fn take_match(&mut self, pad: &str) -> Match {
        if let Some(idx) = self.pending.iter().position(|l| pad.starts_with(&l.prefix)) {
            let link = self.pending.remove(idx);
            self.settled.push((link.leg, link.prefix.clone()));
            return Match::Pending(link);
        }
        match self.settled.iter().find(|(_, prefix)| pad.starts_with(prefix)) {
            Some((leg, _)) => Match::Settled(*leg),
            None => Match::None,
        }
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.pending.iter().map(|l| l.prefix.clone()).collect()
    }
}

// ── PadBinder ────────────────────────────────────────────────────

/// Resolves the relay's pending legs as its pads appear.
pub struct PadBinder {
    pipeline: Arc<dyn MediaPipeline>,
    relay: ElementHandle,
    links: Mutex<PendingLinks>,
    resolved: Mutex<Vec<Edge>>,
    subscribed: AtomicBool,
}

impl PadBinder {
    pub fn new(
        pipeline: Arc<dyn MediaPipeline>,
        relay: ElementHandle,
        links: Vec<PendingLink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            relay,
            links: Mutex::new(PendingLinks::new(links)),
            resolved: Mutex::new(Vec::new()),
            subscribed: AtomicBool::new(false),
        })
    }

    /// Subscribe to the relay's pad-added notifications.
    ///
    /// Only the first call installs a handler. The handler holds a weak
    /// reference, so notifications after the binder is dropped are ignored.
    pub fn subscribe(self: &Arc<Self>) -> Result<(), PipelineError> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let result = self.pipeline.connect_pad_added(
            &self.relay,
            Box::new(move |pad: &str| {
                if let Some(binder) = weak.upgrade() {
                    binder.on_pad_added(pad);
                }
            }),
        );
        if result.is_err() {
            self.subscribed.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Handle one new relay pad.
    pub fn on_pad_added(&self, pad: &str) -> BindOutcome {
        let found = self.pending().take_match(pad);

        match found {
            Match::Pending(link) => {
                match self
                    .pipeline
                    .link_pads(&self.relay, pad, &link.sink, "sink")
                {
                    Ok(()) => {
                        let edge = Edge {
                            src: self.relay.clone(),
                            src_pad: pad.to_string(),
                            sink: link.sink,
                            sink_pad: "sink".to_string(),
                        };
                        info!(leg = %link.leg, pad, sink = %edge.sink, "relay leg linked");
                        self.resolved
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(edge.clone());
                        BindOutcome::Linked { leg: link.leg, edge }
                    }
                    Err(error) => {
                        warn!(
                            leg = %link.leg,
                            pad,
                            sink = %link.sink,
                            "relay leg failed to link, continuing degraded: {error}"
                        );
                        BindOutcome::Failed {
                            leg: link.leg,
                            pad: pad.to_string(),
                            error,
                        }
                    }
                }
            }
            Match::Settled(leg) => {
                warn!(%leg, pad, "relay pad for an already resolved leg; ignoring");
                BindOutcome::Duplicate {
                    leg,
                    pad: pad.to_string(),
                }
            }
            Match::None => {
                debug!(pad, relay = %self.relay, "ignoring relay pad");
                BindOutcome::Ignored
            }
        }
    }

    /// Prefixes still waiting for a pad.
    pub fn pending_prefixes(&self) -> Vec<String> {
        self.pending().prefixes()
    }

    /// Edges created so far, in resolution order.
    pub fn resolved(&self) -> Vec<Edge> {
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn relay(&self) -> &ElementHandle {
        &self.relay
    }

    fn pending(&self) -> MutexGuard<'_, PendingLinks> {
        self.links.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Tests ────────────────────────────────────────────────────────
