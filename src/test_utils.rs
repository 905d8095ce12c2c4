use crate::frame::Measurement;
use crate::output::{DEVICE_ADDRESS_LABEL, DEVICE_NAME_LABEL, ErrorStage, Gauge, MetricSink, SinkError};
use crate::scanner::{
    Advertisement, AdvertisementHandler, AdvertisementSource, ENVIRONMENTAL_SENSING_UUID,
    ScanError, ServiceData,
};
use prometheus::Registry;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// A stable device address for unit tests.
pub const TEST_ADDRESS: &str = "A4:C1:38:20:94:A9";

/// A frame captured from a real sensor: 27.87 °C, 45.95 %, 3.199 V, 100 %, count 36.
pub const GOLDEN_FRAME: [u8; 15] = [
    0xA9, 0x94, 0x20, 0x38, 0xC1, 0xA4, 0xE3, 0x0A, 0xF3, 0x11, 0x7F, 0x0C, 0x64, 0x24, 0x04,
];

/// Build an advertisement carrying [`GOLDEN_FRAME`] as environmental sensing data.
pub fn advertisement(address: &str, name: &str) -> Advertisement {
    Advertisement {
        address: address.to_string(),
        name: name.to_string(),
        service_data: vec![ServiceData {
            uuid: ENVIRONMENTAL_SENSING_UUID,
            data: GOLDEN_FRAME.to_vec(),
        }],
    }
}

/// The measurement decoded from [`GOLDEN_FRAME`].
pub fn measurement(address: &str, name: &str) -> Measurement {
    Measurement {
        address: address.to_string(),
        name: name.to_string(),
        temperature: 27.87,
        humidity: 45.95,
        battery_voltage: 3.199,
        battery_percent: 100,
        counter: 36,
    }
}

/// One exported series of a gauge family.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub address: String,
    pub name: String,
    pub value: f64,
}

/// Every series of the gauge family `family` currently in `registry`.
pub fn series(registry: &Registry, family: &str) -> Vec<Series> {
    registry
        .gather()
        .iter()
        .filter(|f| f.get_name() == family)
        .flat_map(|f| f.get_metric().iter())
        .map(|m| {
            let label = |key: &str| {
                m.get_label()
                    .iter()
                    .find(|l| l.get_name() == key)
                    .map(|l| l.get_value().to_string())
                    .unwrap_or_default()
            };
            Series {
                address: label(DEVICE_ADDRESS_LABEL),
                name: label(DEVICE_NAME_LABEL),
                value: m.get_gauge().get_value(),
            }
        })
        .collect()
}

/// Number of device series, across all gauges, exported for `address`.
pub fn series_count(registry: &Registry, address: &str) -> usize {
    registry
        .gather()
        .iter()
        .flat_map(|f| f.get_metric().iter())
        .filter(|m| {
            m.get_label()
                .iter()
                .any(|l| l.get_name() == DEVICE_ADDRESS_LABEL && l.get_value() == address)
        })
        .count()
}

/// A sink whose writes and deletions always fail.
#[derive(Debug, Default)]
pub struct FailingSink;

impl MetricSink for FailingSink {
    fn set(&self, _gauge: Gauge, _address: &str, _name: &str, _value: f64) -> Result<(), SinkError> {
        Err(SinkError("sink unavailable".into()))
    }

    fn delete_device(&self, _gauge: Gauge, _address: &str) -> Result<usize, SinkError> {
        Err(SinkError("sink unavailable".into()))
    }

    fn count_error(&self, _stage: ErrorStage) {}
}

#[derive(Debug, Clone)]
enum Ending {
    Finish,
    WaitForCancel,
    Fail(String),
}

/// An advertisement source replaying a fixed list of advertisements.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    advertisements: Vec<Advertisement>,
    ending: Ending,
}

impl ScriptedSource {
    /// Replay `advertisements`, then finish.
    pub fn new(advertisements: Vec<Advertisement>) -> Self {
        Self {
            advertisements,
            ending: Ending::Finish,
        }
    }

    /// After replaying, block until cancelled like a real adapter.
    pub fn until_cancelled(mut self) -> Self {
        self.ending = Ending::WaitForCancel;
        self
    }

    /// After replaying, fail with a Bluetooth error.
    pub fn failing_with(mut self, message: &str) -> Self {
        self.ending = Ending::Fail(message.to_string());
        self
    }
}

impl AdvertisementSource for ScriptedSource {
    fn scan<'a>(
        &'a self,
        cancel: CancellationToken,
        handler: &'a mut AdvertisementHandler<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ScanError>> + Send + 'a>> {
        Box::pin(async move {
            for adv in &self.advertisements {
                handler(adv.clone());
            }

            match &self.ending {
                Ending::Finish => Ok(()),
                Ending::WaitForCancel => {
                    cancel.cancelled().await;
                    Err(ScanError::Cancelled)
                }
                Ending::Fail(message) => Err(ScanError::Bluetooth(message.clone())),
            }
        })
    }
}
