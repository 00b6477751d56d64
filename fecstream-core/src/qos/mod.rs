//! Adaptive bitrate control.
//!
//! | Module       | Purpose                                            |
//! |--------------|----------------------------------------------------|
//! | `monitor`    | Loss fraction extraction from session statistics   |
//! | `policy`     | Stateless bitrate decision rule                    |
//! | `controller` | Worker thread applying decisions to the encoder    |

pub mod controller;
pub mod monitor;
pub mod policy;

pub use controller::{
    BitrateControl, ControlLoop, ControllerState, EncoderBitrate, QosController, QosSettings,
    TickOutcome,
};
pub use monitor::{LossSample, NetworkQualityMonitor, SessionStats, StatsSource, find_fraction_lost};
pub use policy::{BitratePolicy, decide};
