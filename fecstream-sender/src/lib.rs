//! # fecstream-sender
//!
//! Command-line front end for `fecstream-core`. Parses the destination
//! and ports, layers flags over the settings file and the auto-selected
//! host profile, then streams until Ctrl-C or a pipeline failure.

pub mod app;
pub mod cli;
pub mod config;
pub mod profile;
