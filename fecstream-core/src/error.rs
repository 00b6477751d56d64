//! Domain-specific error types for fecstream.
//!
//! Setup failures always name the operation that failed (which element,
//! which link). Runtime degradations never surface here: they are logged
//! where they happen and the stream keeps running.

use thiserror::Error;

/// The top-level error type for the crate.
#[derive(Debug, Error)]
pub enum FecError {
    /// The stream configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The pipeline could not be assembled or started.
    #[error("setup error: {0}")]
    Setup(#[from] SetupError),

    /// The QoS controller was driven in the wrong order.
    #[error("qos error: {0}")]
    Qos(#[from] QosError),

    /// The media backend reported a failure outside of setup.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

// ── ConfigError ──────────────────────────────────────────────────

/// Rejected `StreamConfig` values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The destination is not a dotted-quad IPv4 address.
    #[error("invalid destination address: {0}")]
    InvalidAddress(String),

    /// A port is outside `1..=65535`.
    #[error("invalid {role} port: {value}")]
    InvalidPort { role: &'static str, value: i64 },

    /// Two port roles share the same number.
    #[error("{first} and {second} ports both use {port}")]
    DuplicatePort {
        first: &'static str,
        second: &'static str,
        port: u16,
    },

    /// A video profile dimension is zero.
    #[error("invalid video profile: {0}")]
    InvalidProfile(&'static str),
}

// ── PipelineError ────────────────────────────────────────────────

/// Failures reported by a [`MediaPipeline`](crate::pipeline::MediaPipeline)
/// backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// No element factory with that name is available.
    #[error("no element factory '{0}'")]
    UnknownFactory(String),

    /// The handle does not refer to an element of this pipeline.
    #[error("no element named '{0}'")]
    UnknownElement(String),

    /// An element with that name already exists.
    #[error("element '{0}' already exists")]
    DuplicateElement(String),

    /// The element has no such property.
    #[error("element '{element}' has no property '{property}'")]
    UnknownProperty { element: String, property: String },

    /// The supplied value does not fit the property type.
    #[error("property '{property}' on '{element}' rejected value: {reason}")]
    PropertyType {
        element: String,
        property: String,
        reason: String,
    },

    /// Two pads could not be connected.
    #[error("cannot link {src}.{src_pad} -> {sink}.{sink_pad}")]
    LinkRefused {
        src: String,
        src_pad: String,
        sink: String,
        sink_pad: String,
    },

    /// A request pad template was refused.
    #[error("element '{element}' refused request pad '{template}'")]
    RequestPadRefused { element: String, template: String },

    /// The pipeline refused a state transition.
    #[error("state change to {0} failed")]
    StateChange(String),

    /// The bus has already been subscribed to.
    #[error("pipeline bus already taken")]
    BusTaken,

    /// The bus receiver is gone.
    #[error("pipeline bus closed")]
    BusClosed,

    /// Catch-all for backend-specific failures.
    #[error("{0}")]
    Backend(String),
}

// ── SetupError ───────────────────────────────────────────────────

/// Fatal errors while building or starting the topology.
#[derive(Debug, Error)]
pub enum SetupError {
    /// An element could not be created.
    #[error("failed to create element '{name}' ({factory}): {source}")]
    ElementCreation {
        factory: String,
        name: String,
        #[source]
        source: PipelineError,
    },

    /// A property could not be applied during configuration.
    #[error("failed to set '{property}' on '{element}': {source}")]
    Property {
        element: String,
        property: String,
        #[source]
        source: PipelineError,
    },

    /// A static link between two adjacent elements failed.
    #[error("failed to link {src} -> {sink}: {source}")]
    Link {
        src: String,
        sink: String,
        #[source]
        source: PipelineError,
    },

    /// A request-pad link (control legs, relay input) failed.
    #[error("failed to link {src}.{src_pad} -> {sink}.{sink_pad}: {source}")]
    RequestLink {
        src: String,
        src_pad: String,
        sink: String,
        sink_pad: String,
        #[source]
        source: PipelineError,
    },

    /// The plan references an element that was never created.
    #[error("topology requires element '{0}'")]
    MissingElement(String),

    /// The relay's endpoint subscription could not be installed.
    #[error("failed to subscribe to '{element}' endpoints: {source}")]
    Subscription {
        element: String,
        #[source]
        source: PipelineError,
    },

    /// The pipeline refused to enter the requested state.
    #[error("failed to set pipeline {state}: {source}")]
    State {
        state: String,
        #[source]
        source: PipelineError,
    },
}

// ── QosError ─────────────────────────────────────────────────────

/// Misuse of the QoS controller API.
#[derive(Debug, Error)]
pub enum QosError {
    /// `start` was called before `attach`.
    #[error("controller is not attached")]
    NotAttached,

    /// `attach` was called while the worker is running.
    #[error("controller is running; stop it before re-attaching")]
    AlreadyRunning,

    /// The worker thread could not be spawned.
    #[error("failed to spawn qos worker: {0}")]
    Spawn(#[from] std::io::Error),
}
