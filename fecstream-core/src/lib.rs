//! # fecstream-core
//!
//! Control plane of a low-latency video sender with forward error
//! correction and adaptive bitrate.
//!
//! This crate contains:
//! - **Config**: `StreamConfig`, `PortMap`, `VideoProfile`, validated up front
//! - **Pipeline**: `MediaPipeline` trait, owned `ElementHandle`s, typed `BusEvent`s,
//!   and an in-memory `SimPipeline` backend
//! - **Topology**: plan, builder and runtime pad binder for the two transport modes
//! - **QoS**: loss monitor, bitrate policy and the worker-thread controller
//! - **Lifecycle / Engine**: start, run until cancelled or failed, ordered teardown
//! - **Error**: `FecError` and its per-concern `thiserror` enums

pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod qos;
pub mod topology;
pub mod value;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use config::{PortMap, SourceKind, StreamConfig, TopologyMode, VideoProfile};
pub use engine::{Engine, Session};
pub use error::{ConfigError, FecError, PipelineError, QosError, SetupError};
pub use lifecycle::{Lifecycle, RunOutcome};
pub use pipeline::{BusEvent, ElementHandle, MediaPipeline, PipelineState, SimPipeline};
pub use qos::{BitratePolicy, QosController, QosSettings};
pub use topology::{Topology, TopologyBuilder, TopologyPlan};
pub use value::{Structure, Value};
