//! # Runtime
//!
//! Process-level plumbing around the controller.
//!
//! - `error_policy`: watch stream error classification
//! - `initialization`: builds every component from the environment
//! - `signals`: turns SIGINT/SIGTERM into a shutdown signal

pub mod error_policy;
pub mod initialization;
pub mod signals;
