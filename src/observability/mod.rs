//! # Observability
//!
//! - `logging`: tracing subscriber set-up
//! - `metrics`: Prometheus metrics collection
//! - `recorder`: reconciliation results reported by the workers

pub mod logging;
pub mod metrics;
pub mod recorder;

pub use recorder::{EventRecorder, TracingRecorder};
