//! Media pipeline abstraction.
//!
//! The core never touches media buffers. It drives a backend through the
//! [`MediaPipeline`] trait: create named elements, set properties, link
//! pads, change state, and consume typed bus events.
//!
//! | Module | Purpose                                             |
//! |--------|-----------------------------------------------------|
//! | `sim`  | In-memory backend used by tests and `--simulate`    |
//! | `gst`  | GStreamer backend (feature `gst`)                   |

pub mod sim;

#[cfg(feature = "gst")]
pub mod gst;

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::value::{Structure, Value};

pub use sim::SimPipeline;

#[cfg(feature = "gst")]
pub use gst::GstPipeline;

// ── ElementHandle ────────────────────────────────────────────────

/// Owned, cheaply cloneable reference to an element of a pipeline.
///
/// Handles carry only the element's name and factory; backends resolve
/// them to their native objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    name: Arc<str>,
    factory: Arc<str>,
}

impl ElementHandle {
    pub fn new(name: &str, factory: &str) -> Self {
        Self {
            name: Arc::from(name),
            factory: Arc::from(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> &str {
        &self.factory
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ── PipelineState ────────────────────────────────────────────────

/// Pipeline / element states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// Stopped; all resources released.
    #[default]
    Null,
    Ready,
    Paused,
    Playing,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Ready => write!(f, "READY"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Playing => write!(f, "PLAYING"),
        }
    }
}

// ── BusEvent ─────────────────────────────────────────────────────

/// Asynchronous notifications delivered on the pipeline bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Error {
        source: String,
        message: String,
        debug: Option<String>,
    },
    Warning {
        source: String,
        message: String,
        debug: Option<String>,
    },
    StateChanged {
        source: String,
        old: PipelineState,
        new: PipelineState,
    },
    Eos,
    /// Application message posted onto the bus.
    Custom { name: String, payload: Structure },
}

/// Receiving half of the bus subscription.
pub type BusReceiver = mpsc::UnboundedReceiver<BusEvent>;

/// Sending half, held by backends.
pub type BusSender = mpsc::UnboundedSender<BusEvent>;

/// Callback invoked with the name of every pad an element creates at
/// runtime. Runs on the backend's streaming/event thread.
pub type PadAddedHandler = Box<dyn Fn(&str) + Send + Sync + 'static>;

// ── MediaPipeline ────────────────────────────────────────────────

/// Operations the core needs from a media backend.
///
/// All methods take `&self`; backends synchronise internally so the
/// QoS worker and the bus thread can share one pipeline.
pub trait MediaPipeline: Send + Sync {
    /// Create an element of kind `factory` named `name` and add it to
    /// the pipeline.
    fn make_element(&self, factory: &str, name: &str) -> Result<ElementHandle, PipelineError>;

    fn set_property(
        &self,
        element: &ElementHandle,
        property: &str,
        value: Value,
    ) -> Result<(), PipelineError>;

    fn property(&self, element: &ElementHandle, property: &str) -> Result<Value, PipelineError>;

    /// Link the always-present `src` pad of `src` to the `sink` pad of `sink`.
    fn link(&self, src: &ElementHandle, sink: &ElementHandle) -> Result<(), PipelineError>;

    /// Link two named pads. Pads must already exist.
    fn link_pads(
        &self,
        src: &ElementHandle,
        src_pad: &str,
        sink: &ElementHandle,
        sink_pad: &str,
    ) -> Result<(), PipelineError>;

    /// Request a pad from `template`, returning the name of the new pad.
    fn request_pad(&self, element: &ElementHandle, template: &str) -> Result<String, PipelineError>;

    fn set_state(&self, state: PipelineState) -> Result<(), PipelineError>;

    /// Take the bus subscription. Succeeds once per pipeline.
    fn take_bus(&self) -> Result<BusReceiver, PipelineError>;

    /// Post an application event onto the bus.
    fn post(&self, event: BusEvent) -> Result<(), PipelineError>;

    /// Subscribe to runtime pad creation on `element`.
    fn connect_pad_added(
        &self,
        element: &ElementHandle,
        handler: PadAddedHandler,
    ) -> Result<(), PipelineError>;

    /// Statistics snapshot of the relay's internal session `session`.
    ///
    /// `None` while the session does not exist yet.
    fn session_stats(&self, relay: &ElementHandle, session: u32) -> Option<Structure>;
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_name_and_factory() {
        let a = ElementHandle::new("encoder", "x264enc");
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, ElementHandle::new("encoder", "vp8enc"));
        assert_eq!(a.to_string(), "encoder");
    }

    #[test]
    fn state_display() {
        assert_eq!(PipelineState::Playing.to_string(), "PLAYING");
        assert_eq!(PipelineState::default(), PipelineState::Null);
    }
}
