//! Core types for ko-operator: the `KoBuilder` resource, operator
//! configuration, and the shared error type.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod kobuilder;

pub use config::{ControllerConfig, JobConfig, OperatorConfig};
pub use error::{Error, Result};
pub use kobuilder::{KoBuilder, KoBuilderSpec, KoBuilderState, KoBuilderStatus};
