//! The scan loop: filter, decode and record every observed advertisement.

use crate::filter::DeviceFilter;
use crate::frame;
use crate::output::ErrorStage;
use crate::reporter::Reporter;
use crate::scanner::{Advertisement, AdvertisementSource, ENVIRONMENTAL_SENSING_UUID, ScanError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Feeds advertisements from a source through the filter and decoder into
/// the reporter.
pub struct ScanLoop {
    source: Arc<dyn AdvertisementSource>,
    filter: DeviceFilter,
    reporter: Arc<Reporter>,
}

impl ScanLoop {
    pub fn new(
        source: Arc<dyn AdvertisementSource>,
        filter: DeviceFilter,
        reporter: Arc<Reporter>,
    ) -> Self {
        Self {
            source,
            filter,
            reporter,
        }
    }

    /// Scan until `cancel` fires or the source fails.
    ///
    /// Cancellation is a clean stop. Per-advertisement failures are logged
    /// and skipped; only a failure of the source itself is returned.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ScanError> {
        let mut handler = |adv: Advertisement| self.handle(&adv);

        match self.source.scan(cancel, &mut handler).await {
            Ok(()) | Err(ScanError::Cancelled) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Process one advertisement.
    pub fn handle(&self, adv: &Advertisement) {
        if adv.name.is_empty() || !self.filter.allowed(adv) {
            return;
        }

        for data in adv.service_data_for(ENVIRONMENTAL_SENSING_UUID) {
            debug!(
                device_name = %adv.name,
                device_address = %adv.address,
                "Received an update from a device"
            );

            let measurement = match frame::decode(data, &adv.name, &adv.address) {
                Ok(m) => m,
                Err(e) => {
                    warn!(device_address = %adv.address, error = %e, "Could not read device data");
                    self.reporter.count_error(ErrorStage::Decode);
                    continue;
                }
            };

            if let Err(e) = self.reporter.record(&measurement) {
                error!(device_address = %adv.address, error = %e, "Could not report reading");
                self.reporter.count_error(ErrorStage::Record);
            }
        }
    }
}
