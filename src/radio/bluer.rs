//! BlueZ D-Bus backend for the radio stack.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    ConnectionHandle, DiscoveryPass, HandleRange, RadioError, RadioFuture, RadioStack, ScanEvent,
};
use crate::advertisement::{AddressType, Advertisement, TARGET_SERVICE_UUID};
use crate::payload::to_hex;
use bluer::{
    Adapter, AdapterEvent, Address, Device, DiscoveryFilter, DiscoveryTransport, ErrorKind,
    Session,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// BlueZ reports a dropped link as a generic failure, so it is recognized by
/// its message.
fn is_link_loss(err: &bluer::Error) -> bool {
    let message = err.message.to_ascii_lowercase();
    message.contains("not connected") || message.contains("disconnected")
}

impl From<bluer::Error> for RadioError {
    fn from(err: bluer::Error) -> Self {
        if is_link_loss(&err) {
            return RadioError::Disconnected(err.to_string());
        }
        match err.kind {
            ErrorKind::DoesNotExist => RadioError::NotFound(err.to_string()),
            _ => RadioError::Bluetooth(err.to_string()),
        }
    }
}

/// Radio stack backed by the default BlueZ adapter.
pub struct BluerRadio {
    _session: Session,
    adapter: Adapter,
    connections: Mutex<HashMap<u64, Device>>,
    next_id: AtomicU64,
}

impl BluerRadio {
    /// Open a BlueZ session and power on the default adapter.
    pub async fn new() -> Result<Self, RadioError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        tracing::debug!(adapter = adapter.name(), "Bluetooth adapter ready");

        Ok(BluerRadio {
            _session: session,
            adapter,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    async fn discover(&self, duration: Duration) -> Result<Vec<ScanEvent>, RadioError> {
        self.adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..Default::default()
            })
            .await?;

        let events = self.adapter.discover_devices_with_changes().await?;
        futures::pin_mut!(events);

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        let mut pass = DiscoveryPass::new();

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        let ad = match self.advertisement(address).await {
                            Ok(Some(ad)) => ad,
                            Ok(None) => continue,
                            Err(e) => {
                                tracing::debug!(%address, error = %e, "skipping device");
                                continue;
                            }
                        };
                        pass.observe(ad);
                    }
                    Some(_) => {}
                    None => {
                        return Err(RadioError::Disconnected(
                            "discovery stream ended".to_string(),
                        ));
                    }
                },
            }
        }

        Ok(pass.into_events())
    }

    /// Snapshot the advertisement data of a device. Devices without a
    /// current RSSI are cached entries that are not advertising right now.
    async fn advertisement(&self, address: Address) -> Result<Option<Advertisement>, RadioError> {
        let device = self.adapter.device(address)?;

        let Some(rssi) = device.rssi().await? else {
            return Ok(None);
        };

        let address_type = match device.address_type().await? {
            bluer::AddressType::LeRandom => AddressType::Random,
            _ => AddressType::Public,
        };

        let uuids: Vec<String> = device
            .uuids()
            .await?
            .unwrap_or_default()
            .iter()
            .map(|uuid| uuid.to_string())
            .collect();
        let service_uuid = uuids
            .iter()
            .find(|uuid| uuid.eq_ignore_ascii_case(TARGET_SERVICE_UUID))
            .or_else(|| uuids.iter().min())
            .cloned()
            .unwrap_or_default();

        let manufacturer_data = device.manufacturer_data().await?.map(|data| {
            let mut ids: Vec<_> = data.keys().copied().collect();
            ids.sort_unstable();
            ids.iter()
                .map(|id| format!("{}{}", to_hex(&id.to_le_bytes()), to_hex(&data[id])))
                .collect::<String>()
        });

        Ok(Some(Advertisement {
            address: address.to_string(),
            address_type,
            rssi,
            service_uuid,
            name: device.name().await?,
            manufacturer_data,
        }))
    }

    async fn open(&self, address: &str) -> Result<ConnectionHandle, RadioError> {
        let address = parse_address(address)?;
        let device = self.adapter.device(address)?;
        device.connect().await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().await.insert(id, device);

        Ok(ConnectionHandle {
            id,
            address: address.to_string(),
        })
    }

    async fn device(&self, handle: &ConnectionHandle) -> Result<Device, RadioError> {
        self.connections
            .lock()
            .await
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| RadioError::NotFound(format!("connection to {}", handle.address)))
    }

    async fn read(
        &self,
        handle: &ConnectionHandle,
        uuid: &str,
        range: HandleRange,
    ) -> Result<Vec<u8>, RadioError> {
        let device = self.device(handle).await?;

        for service in device.services().await? {
            for characteristic in service.characteristics().await? {
                if !range.contains(characteristic.id()) {
                    continue;
                }
                if characteristic
                    .uuid()
                    .await?
                    .to_string()
                    .eq_ignore_ascii_case(uuid)
                {
                    return Ok(characteristic.read().await?);
                }
            }
        }

        Err(RadioError::NotFound(format!("characteristic {uuid}")))
    }

    async fn close(&self, handle: &ConnectionHandle) -> Result<(), RadioError> {
        let device = self.connections.lock().await.remove(&handle.id);
        let device = match device {
            Some(device) => device,
            // Abandoned attempt: BlueZ may still be bringing the link up.
            None => self.adapter.device(parse_address(&handle.address)?)?,
        };
        Ok(device.disconnect().await?)
    }
}

fn parse_address(address: &str) -> Result<Address, RadioError> {
    address
        .parse()
        .map_err(|_| RadioError::NotFound(format!("invalid address {address}")))
}

impl RadioStack for BluerRadio {
    fn start_discovery(&self, duration: Duration) -> RadioFuture<'_, Vec<ScanEvent>> {
        Box::pin(self.discover(duration))
    }

    fn connect<'a>(&'a self, address: &'a str) -> RadioFuture<'a, ConnectionHandle> {
        Box::pin(self.open(address))
    }

    fn negotiate_mtu<'a>(
        &'a self,
        handle: &'a ConnectionHandle,
        mtu: u16,
    ) -> RadioFuture<'a, u16> {
        // BlueZ exchanges the ATT MTU itself when the link comes up and offers
        // no D-Bus call to request one, so the request is only recorded.
        Box::pin(async move {
            tracing::debug!(address = %handle.address, mtu, "MTU exchange left to BlueZ");
            Ok(mtu)
        })
    }

    fn read_characteristic<'a>(
        &'a self,
        handle: &'a ConnectionHandle,
        uuid: &'a str,
        range: HandleRange,
    ) -> RadioFuture<'a, Vec<u8>> {
        Box::pin(self.read(handle, uuid, range))
    }

    fn disconnect<'a>(&'a self, handle: &'a ConnectionHandle) -> RadioFuture<'a, ()> {
        Box::pin(self.close(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_loss_is_transient() {
        let err = bluer::Error {
            kind: ErrorKind::Failed,
            message: "Not Connected".to_string(),
        };
        assert!(RadioError::from(err).is_transient());

        let err = bluer::Error {
            kind: ErrorKind::Failed,
            message: "Device disconnected".to_string(),
        };
        assert!(RadioError::from(err).is_transient());
    }

    #[test]
    fn test_generic_failures_are_fatal() {
        for kind in [ErrorKind::Failed, ErrorKind::NotReady, ErrorKind::InProgress] {
            let err = bluer::Error {
                kind,
                message: "Operation failed".to_string(),
            };
            let err = RadioError::from(err);
            assert!(matches!(err, RadioError::Bluetooth(_)));
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_fatal_error_mapping() {
        let err = bluer::Error {
            kind: ErrorKind::NotAuthorized,
            message: "Operation Not Authorized".to_string(),
        };
        assert!(matches!(RadioError::from(err), RadioError::Bluetooth(_)));
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("AA:BB:CC:DD:EE:FF").unwrap().to_string(),
            "AA:BB:CC:DD:EE:FF"
        );
        assert!(matches!(
            parse_address("not-an-address"),
            Err(RadioError::NotFound(_))
        ));
    }

    #[test]
    fn test_not_found_mapping() {
        let err = bluer::Error {
            kind: ErrorKind::DoesNotExist,
            message: "Does Not Exist".to_string(),
        };
        assert!(matches!(RadioError::from(err), RadioError::NotFound(_)));
    }
}
