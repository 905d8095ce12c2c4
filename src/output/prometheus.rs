//! Prometheus metric sink.

use crate::output::{
    DEVICE_ADDRESS_LABEL, DEVICE_LABELS, DEVICE_NAME_LABEL, ErrorStage, Gauge, MetricSink,
    SinkError,
};
use ::prometheus::core::Collector;
use ::prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

/// Namespace prefixed to every exported metric.
pub const NAMESPACE: &str = "atc_mi_thermometer";

impl From<::prometheus::Error> for SinkError {
    fn from(err: ::prometheus::Error) -> Self {
        SinkError(err.to_string())
    }
}

/// Metric sink exposing device gauges through a Prometheus [`Registry`].
#[derive(Clone)]
pub struct PrometheusSink {
    temperature: GaugeVec,
    humidity: GaugeVec,
    battery_percent: GaugeVec,
    battery_voltage: GaugeVec,
    measurements_count: GaugeVec,
    processing_errors: IntCounterVec,
}

fn gauge_vec(gauge: Gauge) -> Result<GaugeVec, SinkError> {
    let opts = Opts::new(gauge.name(), gauge.help())
        .namespace(NAMESPACE)
        .subsystem(gauge.subsystem());
    Ok(GaugeVec::new(opts, &DEVICE_LABELS)?)
}

impl PrometheusSink {
    /// Create the device gauges and register them with `registry`.
    ///
    /// # Errors
    /// Fails if metrics with the same names are already registered.
    pub fn new(registry: &Registry) -> Result<Self, SinkError> {
        let sink = Self {
            temperature: gauge_vec(Gauge::Temperature)?,
            humidity: gauge_vec(Gauge::Humidity)?,
            battery_percent: gauge_vec(Gauge::BatteryPercent)?,
            battery_voltage: gauge_vec(Gauge::BatteryVoltage)?,
            measurements_count: gauge_vec(Gauge::MeasurementCount)?,
            processing_errors: IntCounterVec::new(
                Opts::new(
                    "processing_errors_total",
                    "Advertisements dropped because of a processing error",
                )
                .namespace(NAMESPACE),
                &["stage"],
            )?,
        };

        for gauge in Gauge::ALL {
            registry.register(Box::new(sink.vec(gauge).clone()))?;
        }
        registry.register(Box::new(sink.processing_errors.clone()))?;

        Ok(sink)
    }

    fn vec(&self, gauge: Gauge) -> &GaugeVec {
        match gauge {
            Gauge::Temperature => &self.temperature,
            Gauge::Humidity => &self.humidity,
            Gauge::BatteryPercent => &self.battery_percent,
            Gauge::BatteryVoltage => &self.battery_voltage,
            Gauge::MeasurementCount => &self.measurements_count,
        }
    }
}

impl MetricSink for PrometheusSink {
    fn set(&self, gauge: Gauge, address: &str, name: &str, value: f64) -> Result<(), SinkError> {
        self.vec(gauge)
            .get_metric_with_label_values(&[address, name])?
            .set(value);
        Ok(())
    }

    fn delete_device(&self, gauge: Gauge, address: &str) -> Result<usize, SinkError> {
        let vec = self.vec(gauge);

        // Collect the name labels first, removal needs the full label set.
        let mut names = Vec::new();
        for family in vec.collect() {
            for metric in family.get_metric() {
                let labels = metric.get_label();
                let matches = labels
                    .iter()
                    .any(|l| l.get_name() == DEVICE_ADDRESS_LABEL && l.get_value() == address);
                if matches {
                    let name = labels
                        .iter()
                        .find(|l| l.get_name() == DEVICE_NAME_LABEL)
                        .map(|l| l.get_value().to_string())
                        .unwrap_or_default();
                    names.push(name);
                }
            }
        }

        for name in &names {
            vec.remove_label_values(&[address, name.as_str()])?;
        }

        Ok(names.len())
    }

    fn count_error(&self, stage: ErrorStage) {
        match self
            .processing_errors
            .get_metric_with_label_values(&[stage.as_str()])
        {
            Ok(counter) => counter.inc(),
            Err(e) => warn!(error = %e, "Could not count processing error"),
        }
    }
}

/// Encode every metric of `registry` in the Prometheus text format.
pub fn encode_metrics(registry: &Registry) -> Result<String, SinkError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| SinkError(e.to_string()))
}
