//! In-memory media backend.
//!
//! [`SimPipeline`] records elements, properties and links without moving
//! any media. It behaves like the real backend where the control plane can
//! observe it:
//!
//! - factories can be marked missing, links can be refused;
//! - relay elements (`rtpbin`) create their send pads when the pipeline
//!   enters `PLAYING`, or with [`SimPipeline::with_eager_relay_pads`] as
//!   soon as the primary send input is requested; pad-added handlers run
//!   outside the lock;
//! - session statistics are injected by the caller.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::PipelineError;
use crate::pipeline::{
    BusEvent, BusReceiver, BusSender, ElementHandle, MediaPipeline, PadAddedHandler, PipelineState,
};
use crate::value::{Structure, Value};

/// Factories the simulated registry knows about.
const KNOWN_FACTORIES: &[&str] = &[
    "ximagesrc",
    "v4l2src",
    "videotestsrc",
    "videoconvert",
    "videoscale",
    "videorate",
    "capsfilter",
    "queue",
    "x264enc",
    "h264parse",
    "rtph264pay",
    "rtpbin",
    "rtpulpfecenc",
    "tee",
    "udpsink",
    "udpsrc",
];

/// Pads a relay element exposes once it is running.
const RELAY_PRIMARY_PAD: &str = "send_rtp_src_0";
const RELAY_FEC_PAD: &str = "send_fec_src_0_0";

/// A recorded pad-to-pad connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimLink {
    pub src: String,
    pub src_pad: String,
    pub sink: String,
    pub sink_pad: String,
}

#[derive(Debug, Default)]
struct SimElement {
    factory: String,
    properties: HashMap<String, Value>,
    /// Pads created on request or at runtime (static pads are implicit).
    extra_pads: Vec<String>,
    request_counter: u32,
}

impl SimElement {
    fn new(factory: &str) -> Self {
        let mut properties = HashMap::new();
        // Mirror the encoder's built-in default so "read back" has data.
        if factory == "x264enc" {
            properties.insert("bitrate".to_string(), Value::UInt(2048));
        }
        Self {
            factory: factory.to_string(),
            properties,
            ..Self::default()
        }
    }

    fn has_pad(&self, pad: &str) -> bool {
        pad == "src" || pad == "sink" || self.extra_pads.iter().any(|p| p == pad)
    }
}

struct Inner {
    elements: HashMap<String, SimElement>,
    order: Vec<String>,
    links: Vec<SimLink>,
    state: PipelineState,
    bus_tx: BusSender,
    bus_rx: Option<BusReceiver>,
    missing_factories: HashSet<String>,
    refused_links: HashSet<(String, String)>,
    stats: HashMap<String, Structure>,
    eager_relay_pads: bool,
}

type SharedHandler = Arc<dyn Fn(&str) + Send + Sync>;

// ── SimPipeline ──────────────────────────────────────────────────

/// Simulated pipeline; see the module docs.
pub struct SimPipeline {
    inner: Mutex<Inner>,
    handlers: Mutex<HashMap<String, Vec<SharedHandler>>>,
}

impl SimPipeline {
    pub fn new() -> Self {
        let (bus_tx, bus_rx) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(Inner {
                elements: HashMap::new(),
                order: Vec::new(),
                links: Vec::new(),
                state: PipelineState::Null,
                bus_tx,
                bus_rx: Some(bus_rx),
                missing_factories: HashSet::new(),
                refused_links: HashSet::new(),
                stats: HashMap::new(),
                eager_relay_pads: false,
            }),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    // ── Fault injection ──────────────────────────────────────────

    /// Pretend the plugin providing `factory` is not installed.
    pub fn without_factory(self, factory: &str) -> Self {
        self.inner().missing_factories.insert(factory.to_string());
        self
    }

    /// Create relay send pads when `send_rtp_sink_*` is requested instead
    /// of on entering `PLAYING`.
    pub fn with_eager_relay_pads(self) -> Self {
        self.inner().eager_relay_pads = true;
        self
    }

    /// Refuse every link from element `src` to element `sink`.
    pub fn refuse_link(&self, src: &str, sink: &str) {
        self.inner()
            .refused_links
            .insert((src.to_string(), sink.to_string()));
    }

    /// Install (or replace) the statistics snapshot of `relay`.
    pub fn set_session_stats(&self, relay: &str, stats: Structure) {
        self.inner().stats.insert(relay.to_string(), stats);
    }

    /// Create `pad` on `element` and notify pad-added subscribers.
    pub fn emit_pad_added(&self, element: &str, pad: &str) {
        {
            let mut inner = self.inner();
            if let Some(el) = inner.elements.get_mut(element) {
                if !el.extra_pads.iter().any(|p| p == pad) {
                    el.extra_pads.push(pad.to_string());
                }
            }
        }
        self.notify_pad_added(element, pad);
    }

    /// Inject a bus event as if an element had posted it.
    pub fn emit_bus(&self, event: BusEvent) {
        let _ = self.inner().bus_tx.send(event);
    }

    // ── Inspection ───────────────────────────────────────────────

    pub fn state(&self) -> PipelineState {
        self.inner().state
    }

    /// Element names in creation order.
    pub fn element_names(&self) -> Vec<String> {
        self.inner().order.clone()
    }

    pub fn links(&self) -> Vec<SimLink> {
        self.inner().links.clone()
    }

    pub fn property_of(&self, element: &str, property: &str) -> Option<Value> {
        self.inner()
            .elements
            .get(element)
            .and_then(|el| el.properties.get(property).cloned())
    }

    /// Whether any link leaves `element` (on any pad).
    pub fn has_link_from(&self, element: &str) -> bool {
        self.inner().links.iter().any(|l| l.src == element)
    }

    // ── Internal ─────────────────────────────────────────────────

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify_pad_added(&self, element: &str, pad: &str) {
        let handlers: Vec<SharedHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(element)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            (*handler)(pad);
        }
    }

    fn record_link(
        inner: &mut Inner,
        src: &ElementHandle,
        src_pad: &str,
        sink: &ElementHandle,
        sink_pad: &str,
    ) -> Result<(), PipelineError> {
        let refused = || PipelineError::LinkRefused {
            src: src.name().to_string(),
            src_pad: src_pad.to_string(),
            sink: sink.name().to_string(),
            sink_pad: sink_pad.to_string(),
        };

        let src_el = inner
            .elements
            .get(src.name())
            .ok_or_else(|| PipelineError::UnknownElement(src.name().to_string()))?;
        let sink_el = inner
            .elements
            .get(sink.name())
            .ok_or_else(|| PipelineError::UnknownElement(sink.name().to_string()))?;

        if !src_el.has_pad(src_pad) || !sink_el.has_pad(sink_pad) {
            return Err(refused());
        }
        if inner
            .refused_links
            .contains(&(src.name().to_string(), sink.name().to_string()))
        {
            return Err(refused());
        }
        let busy = inner.links.iter().any(|l| {
            (l.src == src.name() && l.src_pad == src_pad)
                || (l.sink == sink.name() && l.sink_pad == sink_pad)
        });
        if busy {
            return Err(refused());
        }

        inner.links.push(SimLink {
            src: src.name().to_string(),
            src_pad: src_pad.to_string(),
            sink: sink.name().to_string(),
            sink_pad: sink_pad.to_string(),
        });
        Ok(())
    }

    /// Send pads a running relay exposes; the FEC pad needs an encoder.
    fn relay_send_pads(el: &SimElement) -> Vec<&'static str> {
        if el.properties.contains_key("fec-encoders") {
            vec![RELAY_PRIMARY_PAD, RELAY_FEC_PAD]
        } else {
            vec![RELAY_PRIMARY_PAD]
        }
    }

    fn allocate_request_pad(el: &mut SimElement, template: &str) -> String {
        let name = if template.contains("%u") {
            let name = template.replace("%u", &el.request_counter.to_string());
            el.request_counter += 1;
            name
        } else {
            template.to_string()
        };
        el.extra_pads.push(name.clone());
        name
    }
}

impl Default for SimPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaPipeline for SimPipeline {
    fn make_element(&self, factory: &str, name: &str) -> Result<ElementHandle, PipelineError> {
        let mut inner = self.inner();
        if !KNOWN_FACTORIES.contains(&factory) || inner.missing_factories.contains(factory) {
            return Err(PipelineError::UnknownFactory(factory.to_string()));
        }
        if inner.elements.contains_key(name) {
            return Err(PipelineError::DuplicateElement(name.to_string()));
        }
        inner.elements.insert(name.to_string(), SimElement::new(factory));
        inner.order.push(name.to_string());
        Ok(ElementHandle::new(name, factory))
    }

    fn set_property(
        &self,
        element: &ElementHandle,
        property: &str,
        value: Value,
    ) -> Result<(), PipelineError> {
        let mut inner = self.inner();
        let el = inner
            .elements
            .get_mut(element.name())
            .ok_or_else(|| PipelineError::UnknownElement(element.name().to_string()))?;
        el.properties.insert(property.to_string(), value);
        Ok(())
    }

    fn property(&self, element: &ElementHandle, property: &str) -> Result<Value, PipelineError> {
        let inner = self.inner();
        let el = inner
            .elements
            .get(element.name())
            .ok_or_else(|| PipelineError::UnknownElement(element.name().to_string()))?;
        el.properties
            .get(property)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownProperty {
                element: element.name().to_string(),
                property: property.to_string(),
            })
    }

    fn link(&self, src: &ElementHandle, sink: &ElementHandle) -> Result<(), PipelineError> {
        let mut inner = self.inner();
        // A tee hands out a fresh request pad per downstream branch.
        let src_pad = match inner.elements.get_mut(src.name()) {
            Some(el) if el.factory == "tee" => Self::allocate_request_pad(el, "src_%u"),
            _ => "src".to_string(),
        };
        Self::record_link(&mut inner, src, &src_pad, sink, "sink")
    }

    fn link_pads(
        &self,
        src: &ElementHandle,
        src_pad: &str,
        sink: &ElementHandle,
        sink_pad: &str,
    ) -> Result<(), PipelineError> {
        let mut inner = self.inner();
        Self::record_link(&mut inner, src, src_pad, sink, sink_pad)
    }

    fn request_pad(
        &self,
        element: &ElementHandle,
        template: &str,
    ) -> Result<String, PipelineError> {
        let (pad, send_pads) = {
            let mut inner = self.inner();
            let eager = inner.eager_relay_pads;
            let el = inner
                .elements
                .get_mut(element.name())
                .ok_or_else(|| PipelineError::UnknownElement(element.name().to_string()))?;
            if el.factory != "rtpbin" && el.factory != "tee" {
                return Err(PipelineError::RequestPadRefused {
                    element: element.name().to_string(),
                    template: template.to_string(),
                });
            }
            let pad = Self::allocate_request_pad(el, template);
            let primary_input = el.factory == "rtpbin" && pad.starts_with("send_rtp_sink_");
            let send_pads = if eager && primary_input {
                Self::relay_send_pads(el)
            } else {
                Vec::new()
            };
            (pad, send_pads)
        };

        for send_pad in send_pads {
            self.emit_pad_added(element.name(), send_pad);
        }
        Ok(pad)
    }

    fn set_state(&self, state: PipelineState) -> Result<(), PipelineError> {
        let relays: Vec<(String, Vec<&'static str>)> = {
            let mut inner = self.inner();
            let old = inner.state;
            inner.state = state;
            let _ = inner.bus_tx.send(BusEvent::StateChanged {
                source: "pipeline".to_string(),
                old,
                new: state,
            });
            debug!(%old, new = %state, "simulated pipeline state change");

            let starting = state == PipelineState::Playing && old != PipelineState::Playing;
            if !starting || inner.eager_relay_pads {
                Vec::new()
            } else {
                inner
                    .order
                    .iter()
                    .filter_map(|name| inner.elements.get(name).map(|el| (name, el)))
                    .filter(|(_, el)| el.factory == "rtpbin")
                    .map(|(name, el)| (name.clone(), Self::relay_send_pads(el)))
                    .collect()
            }
        };

        for (relay, pads) in relays {
            for pad in pads {
                self.emit_pad_added(&relay, pad);
            }
        }
        Ok(())
    }

    fn take_bus(&self) -> Result<BusReceiver, PipelineError> {
        self.inner().bus_rx.take().ok_or(PipelineError::BusTaken)
    }

    fn post(&self, event: BusEvent) -> Result<(), PipelineError> {
        self.inner()
            .bus_tx
            .send(event)
            .map_err(|_| PipelineError::BusClosed)
    }

    fn connect_pad_added(
        &self,
        element: &ElementHandle,
        handler: PadAddedHandler,
    ) -> Result<(), PipelineError> {
        if !self.inner().elements.contains_key(element.name()) {
            return Err(PipelineError::UnknownElement(element.name().to_string()));
        }
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(element.name().to_string())
            .or_default()
            .push(Arc::from(handler));
        Ok(())
    }

    fn session_stats(&self, relay: &ElementHandle, session: u32) -> Option<Structure> {
        if session != 0 {
            return None;
        }
        self.inner().stats.get(relay.name()).cloned()
    }
}

// ── Tests ────────────────────────────────────────────────────────
