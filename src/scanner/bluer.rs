//! BlueZ D-Bus advertisement source.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    Advertisement, AdvertisementHandler, AdvertisementSource, ENVIRONMENTAL_SENSING_UUID,
    ScanError, ServiceData, ServiceUuid,
};
use bluer::{
    Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session, Uuid,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

impl From<Uuid> for ServiceUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.as_u128())
    }
}

/// Advertisement source backed by a BlueZ adapter.
#[derive(Debug, Clone, Default)]
pub struct BluerSource {
    /// Adapter name such as `hci0`; the default adapter when `None`
    adapter_name: Option<String>,
}

impl BluerSource {
    pub fn new(adapter_name: Option<String>) -> Self {
        Self { adapter_name }
    }

    async fn run(
        &self,
        cancel: CancellationToken,
        handler: &mut AdvertisementHandler<'_>,
    ) -> Result<(), ScanError> {
        let session = Session::new().await?;
        let adapter = match &self.adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        adapter.set_powered(true).await?;

        adapter.set_discovery_filter(discovery_filter()).await?;

        info!(
            adapter = adapter.name(),
            service = %ENVIRONMENTAL_SENSING_UUID,
            "Scanning for advertisements"
        );

        let events = adapter.discover_devices_with_changes().await?;
        futures::pin_mut!(events);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        // A device can disappear between the event and the property reads.
                        match read_advertisement(&adapter, address).await {
                            Ok(adv) => handler(adv),
                            Err(e) => debug!(device_address = %address, error = %e, "Could not read device"),
                        }
                    }
                    Some(_) => {}
                    None => return Err(ScanError::Stopped("discovery stream ended".into())),
                },
            }
        }
    }
}

impl AdvertisementSource for BluerSource {
    fn scan<'a>(
        &'a self,
        cancel: CancellationToken,
        handler: &'a mut AdvertisementHandler<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ScanError>> + Send + 'a>> {
        Box::pin(self.run(cancel, handler))
    }
}

/// LE discovery reporting duplicates, so every broadcast is seen.
///
/// No UUID filter: BlueZ matches filter UUIDs against advertised service
/// UUIDs only, and ATC frames carry 0x181A as service data alone. The scan
/// loop selects the payloads.
fn discovery_filter() -> DiscoveryFilter {
    DiscoveryFilter {
        transport: DiscoveryTransport::Le,
        duplicate_data: true,
        ..Default::default()
    }
}

/// Read the cached advertisement properties of a discovered device.
async fn read_advertisement(adapter: &Adapter, address: Address) -> Result<Advertisement, ScanError> {
    let device = adapter.device(address)?;
    let name = device.name().await?;
    let service_data = device.service_data().await?;
    Ok(to_advertisement(address, name, service_data))
}

fn to_advertisement(
    address: Address,
    name: Option<String>,
    service_data: Option<HashMap<Uuid, Vec<u8>>>,
) -> Advertisement {
    Advertisement {
        address: address.to_string(),
        name: name.unwrap_or_default(),
        service_data: service_data
            .unwrap_or_default()
            .into_iter()
            .map(|(uuid, data)| ServiceData {
                uuid: uuid.into(),
                data,
            })
            .collect(),
    }
}
