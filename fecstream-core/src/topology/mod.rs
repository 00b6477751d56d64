//! Streaming topology.
//!
//! | Module    | Purpose                                               |
//! |-----------|-------------------------------------------------------|
//! | `plan`    | Declarative element/link plan per topology mode       |
//! | `builder` | Applies a plan to a pipeline                          |
//! | `binder`  | Links relay outputs once their pads appear            |

pub mod binder;
pub mod builder;
pub mod plan;

pub use binder::{BindOutcome, Edge, PadBinder, PendingLink, PendingLinks};
pub use builder::{Topology, TopologyBuilder};
pub use plan::{Leg, LegSpec, NodeSpec, PadRef, RelaySpec, TopologyPlan};
