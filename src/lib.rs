//! Lifecycle controller for a local fleet of long-running agent processes.
#![warn(unused_crate_dependencies)]
// These dependencies are only used in the binary (src/bin/main.rs).
use ctrlc as _;
#[cfg(test)]
use predicates as _;
#[cfg(test)]
use tempfile as _;
use tracing_subscriber as _;

/// CLI parsing.
pub mod cli;

/// Config loading.
pub mod config;

/// Constants.
pub mod constants;

/// Task DB / mail service client interfaces and implementations.
pub mod clients;

/// Dashboard event loop.
pub mod dashboard;

/// Errors.
pub mod error;

/// Health monitor and recovery policy.
pub mod health;

/// Process manager.
pub mod process;

/// Configuration reload engine.
pub mod reload;

/// Runtime paths and state directory layout.
pub mod runtime;

/// Secrets envelope.
pub mod secrets;
