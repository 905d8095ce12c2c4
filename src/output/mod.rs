//! Metric sinks for decoded measurements.
//!
//! This module provides a trait for the per-device gauges exported by the
//! reporter, and an implementation backed by a Prometheus registry.

pub mod prometheus;

use thiserror::Error;

/// Label holding the device address.
pub const DEVICE_ADDRESS_LABEL: &str = "device_address";
/// Label holding the device display name.
pub const DEVICE_NAME_LABEL: &str = "device_name";

/// Label keys shared by every device gauge, in value order.
pub const DEVICE_LABELS: [&str; 2] = [DEVICE_ADDRESS_LABEL, DEVICE_NAME_LABEL];

/// Error reported by a metric sink.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("metric sink error: {0}")]
pub struct SinkError(pub String);

/// The per-device gauges. All share [`DEVICE_LABELS`] and are created and
/// deleted together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gauge {
    Temperature,
    Humidity,
    BatteryPercent,
    BatteryVoltage,
    MeasurementCount,
}

impl Gauge {
    pub const ALL: [Gauge; 5] = [
        Gauge::Temperature,
        Gauge::Humidity,
        Gauge::BatteryPercent,
        Gauge::BatteryVoltage,
        Gauge::MeasurementCount,
    ];

    /// Subsystem part of the metric name, empty when there is none.
    pub fn subsystem(&self) -> &'static str {
        match self {
            Gauge::BatteryPercent | Gauge::BatteryVoltage => "battery",
            _ => "",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Gauge::Temperature => "temperature_celsius_degrees",
            Gauge::Humidity => "humidity_percent",
            Gauge::BatteryPercent => "available_percent",
            Gauge::BatteryVoltage => "voltage_volts",
            Gauge::MeasurementCount => "measurements_count",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            Gauge::Temperature => "Temperature reported by the device in celsius degrees",
            Gauge::Humidity => "Humidity reported by the device in percent",
            Gauge::BatteryPercent => "battery left on the device in %",
            Gauge::BatteryVoltage => "Voltage reported by the battery in volt",
            Gauge::MeasurementCount => "Total measurements reported by the device",
        }
    }
}

/// Processing stage at which an advertisement was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStage {
    Decode,
    Record,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Decode => "decode",
            ErrorStage::Record => "record",
        }
    }
}

/// Destination for device gauges.
///
/// Implementations must be safe for concurrent writes, reads and deletions.
pub trait MetricSink: Send + Sync {
    /// Create or overwrite the series of `gauge` for (`address`, `name`).
    fn set(&self, gauge: Gauge, address: &str, name: &str, value: f64) -> Result<(), SinkError>;

    /// Delete every series of `gauge` whose address label is `address`,
    /// whatever its name label. Returns the number of deleted series.
    fn delete_device(&self, gauge: Gauge, address: &str) -> Result<usize, SinkError>;

    /// Count an advertisement dropped at `stage`.
    fn count_error(&self, stage: ErrorStage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_gauge_names_are_unique() {
        let names: HashSet<_> = Gauge::ALL
            .iter()
            .map(|g| (g.subsystem(), g.name()))
            .collect();
        assert_eq!(names.len(), Gauge::ALL.len());
    }

    #[test]
    fn test_error_stage_as_str() {
        assert_eq!(ErrorStage::Decode.as_str(), "decode");
        assert_eq!(ErrorStage::Record.as_str(), "record");
    }
}
