//! `mi-thermometer-exporter` library.
//!
//! The binary (`src/main.rs`) is responsible for logging setup, signal handling
//! and process exit codes. The pipeline lives in [`crate::app`] where it can be
//! tested deterministically with an injected advertisement source.

pub mod activity;
pub mod app;
pub mod filter;
pub mod frame;
pub mod output;
pub mod reporter;
pub mod scan_loop;
pub mod scanner;
pub mod server;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use activity::ActivityTracker;
pub use filter::{DeviceFilter, canonical_address};
pub use frame::{DecodeError, Measurement, decode};
pub use output::prometheus::{PrometheusSink, encode_metrics};
pub use output::{Gauge, MetricSink, SinkError};
pub use reporter::Reporter;
pub use scan_loop::ScanLoop;
pub use scanner::{Advertisement, AdvertisementSource, ScanError};
