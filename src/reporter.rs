//! Measurement reporting and eviction of inactive devices.

use crate::activity::ActivityTracker;
use crate::frame::Measurement;
use crate::output::{ErrorStage, Gauge, MetricSink, SinkError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Shortest accepted sweep period.
const MIN_CLEAN_PERIOD: Duration = Duration::from_millis(1);

/// Writes measurements to a [`MetricSink`] and keeps the exported series in
/// lockstep with the [`ActivityTracker`]: a device has series if and only if
/// it has an activity record.
pub struct Reporter {
    sink: Arc<dyn MetricSink>,
    tracker: Arc<ActivityTracker>,
    clean_period: Duration,
}

impl Reporter {
    /// Create a reporter sweeping `tracker` every `clean_period`.
    pub fn new(
        sink: Arc<dyn MetricSink>,
        tracker: Arc<ActivityTracker>,
        clean_period: Duration,
    ) -> Self {
        Self {
            sink,
            tracker,
            clean_period: clean_period.max(MIN_CLEAN_PERIOD),
        }
    }

    pub fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }

    /// Export the measurement's five gauges and check its device in.
    ///
    /// The device is checked in before the gauges are written, so a
    /// concurrent sweep either sees it active or evicts it before the
    /// gauges are recreated.
    ///
    /// # Errors
    /// Returns the first sink failure. The remaining gauges are still written.
    pub fn record(&self, m: &Measurement) -> Result<(), SinkError> {
        self.tracker.check_in(&m.address);

        let values = [
            (Gauge::Temperature, m.temperature),
            (Gauge::Humidity, m.humidity),
            (Gauge::BatteryPercent, f64::from(m.battery_percent)),
            (Gauge::BatteryVoltage, m.battery_voltage),
            (Gauge::MeasurementCount, f64::from(m.counter)),
        ];

        let mut result = Ok(());
        for (gauge, value) in values {
            if let Err(e) = self.sink.set(gauge, &m.address, &m.name, value) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Count an advertisement dropped at `stage`.
    pub fn count_error(&self, stage: ErrorStage) {
        self.sink.count_error(stage);
    }

    /// Run one eviction pass and return the number of evicted devices.
    ///
    /// Series are deleted while the tracker holds the device, so a device
    /// reporting at the same time either stays fully exported or is checked
    /// in again after its series are gone. A device whose series could not be
    /// deleted keeps its record and is retried on the next pass.
    pub fn sweep_once(&self) -> usize {
        let mut evicted = 0;

        for address in self.tracker.list_inactive() {
            match self
                .tracker
                .evict_if_inactive(&address, |address| self.delete_series(address))
            {
                Ok(Some(deleted)) => {
                    info!(device_address = %address, deleted_series = deleted, "Removed inactive device");
                    evicted += 1;
                }
                Ok(None) => {
                    debug!(device_address = %address, "Device reported again, keeping it");
                }
                Err(e) => {
                    error!(device_address = %address, error = %e, "Could not remove device metrics");
                }
            }
        }

        evicted
    }

    /// Periodically evict inactive devices until `cancel` fires.
    ///
    /// The first pass runs one period after the call.
    pub async fn sweep(&self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.clean_period, self.clean_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    info!("Removing inactive devices");
                    self.sweep_once();
                }
            }
        }
    }

    fn delete_series(&self, address: &str) -> Result<usize, SinkError> {
        let mut deleted = 0;
        for gauge in Gauge::ALL {
            deleted += self.sink.delete_device(gauge, address)?;
        }
        Ok(deleted)
    }
}
