//! BLE advertisement source abstraction.
//!
//! The scan loop does not talk to a Bluetooth stack directly. It consumes
//! [`Advertisement`] values from an [`AdvertisementSource`], which lets the
//! pipeline be tested deterministically without hardware.

#[cfg(feature = "bluer")]
pub mod bluer;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error type for advertisement sources.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// The scan was stopped through its cancellation token
    #[error("scan cancelled")]
    Cancelled,
    /// The underlying event stream ended on its own
    #[error("scan stopped: {0}")]
    Stopped(String),
}

/// Offset of 16-bit assigned numbers inside the Bluetooth base UUID
/// (`0000xxxx-0000-1000-8000-00805F9B34FB`).
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// A 128-bit service UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceUuid(pub u128);

impl ServiceUuid {
    /// Expand a 16-bit assigned number into the Bluetooth base UUID.
    pub const fn from_u16(short: u16) -> Self {
        Self(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
    }
}

impl fmt::Display for ServiceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

/// Environmental Sensing service (0x181A), used by ATC firmware for its
/// custom advertising frame.
pub const ENVIRONMENTAL_SENSING_UUID: ServiceUuid = ServiceUuid::from_u16(0x181A);

/// One service data entry of an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceData {
    pub uuid: ServiceUuid,
    pub data: Vec<u8>,
}

/// An observed BLE advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Advertisement {
    /// Device address in the transport's string form (e.g. `A4:C1:38:20:94:A9`)
    pub address: String,
    /// Advertised local name, empty when the device does not send one
    pub name: String,
    pub service_data: Vec<ServiceData>,
}

impl Advertisement {
    /// Iterate over the payloads carried under `uuid`.
    pub fn service_data_for(&self, uuid: ServiceUuid) -> impl Iterator<Item = &[u8]> {
        self.service_data
            .iter()
            .filter(move |entry| entry.uuid == uuid)
            .map(|entry| entry.data.as_slice())
    }
}

/// Callback invoked once per observed advertisement.
pub type AdvertisementHandler<'a> = dyn FnMut(Advertisement) + Send + 'a;

/// Source of advertisements, e.g. a Bluetooth adapter.
///
/// Implementations call `handler` synchronously for every advertisement until
/// `cancel` fires, then return [`ScanError::Cancelled`]. Any other error is
/// fatal for the scan.
pub trait AdvertisementSource: Send + Sync {
    fn scan<'a>(
        &'a self,
        cancel: CancellationToken,
        handler: &'a mut AdvertisementHandler<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ScanError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uuid_from_u16() {
        assert_eq!(
            ENVIRONMENTAL_SENSING_UUID.to_string(),
            "0000181a-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_service_uuid_display_full_form() {
        let custom = ServiceUuid(0x1234_5678_9abc_def0_1234_5678_9abc_def0);
        assert_eq!(custom.to_string(), "12345678-9abc-def0-1234-56789abcdef0");
    }

    #[test]
    fn test_service_data_for_filters_by_uuid() {
        let adv = Advertisement {
            address: "A4:C1:38:20:94:A9".into(),
            name: "bedroom".into(),
            service_data: vec![
                ServiceData {
                    uuid: ServiceUuid::from_u16(0xFE95),
                    data: vec![1, 2, 3],
                },
                ServiceData {
                    uuid: ENVIRONMENTAL_SENSING_UUID,
                    data: vec![4, 5],
                },
                ServiceData {
                    uuid: ENVIRONMENTAL_SENSING_UUID,
                    data: vec![6],
                },
            ],
        };

        let payloads: Vec<&[u8]> = adv.service_data_for(ENVIRONMENTAL_SENSING_UUID).collect();
        assert_eq!(payloads, vec![&[4u8, 5][..], &[6u8][..]]);
    }

    #[test]
    fn test_scan_error_display() {
        assert_eq!(
            ScanError::Bluetooth("no adapter".into()).to_string(),
            "Bluetooth error: no adapter"
        );
        assert_eq!(ScanError::Cancelled.to_string(), "scan cancelled");
    }
}
