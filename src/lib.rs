#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # ko-operator
//!
//! Kubernetes operator that turns `KoBuilder` resources into ko
//! build-and-publish Jobs.
//!
//! The binary is a thin shell over [`ko_reconciler`]; this library holds its
//! CLI definition and command handlers so they can be tested.

pub mod cli;
pub mod commands;
