//! Shared types for Pulse Monitor.
//!
//! Canonical health-record and aggregate-view models, the error taxonomy,
//! command-line settings and display helpers used by every other crate.

pub mod error;
pub mod formatting;
pub mod models;
pub mod settings;

pub use error::{PulseError, Result};
