//! Metrics and observability module
//!
//! Prometheus-compatible metrics for the relay engine:
//! - Admissions, duplicates and status transitions
//! - Hand-offs (success, failure, latency) and halted relays
//! - Acknowledgments and reaped messages
//! - Online devices and active messages

pub mod exporter;
pub mod recorder;

pub use exporter::{render_metrics, start_metrics_server, MetricsConfig, MetricsError};
pub use recorder::{init_metrics, HandOffTimer};
