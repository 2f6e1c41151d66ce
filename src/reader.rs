//! Connect to a selected peripheral and read its COVIDSafe characteristic.

use crate::advertisement::{Advertisement, TARGET_SERVICE_UUID};
use crate::radio::{ConnectionHandle, HandleRange, RadioError, RadioStack};
use std::time::Duration;
use thiserror::Error;

/// Default MTU requested from peripherals.
pub const DEFAULT_MTU: u16 = 512;

/// Bytes read from a peripheral's characteristic, known to be valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    pub bytes: Vec<u8>,
    pub source_address: String,
}

impl RawPayload {
    /// The payload as text.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Why a device could not be read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadFailure {
    #[error("connection failed: {0}")]
    Connect(RadioError),
    #[error("timed out")]
    Timeout,
    #[error("characteristic read failed: {0}")]
    Read(RadioError),
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed device JSON: {0}")]
    MalformedDeviceJson(String),
}

/// Per-device read failure. Never aborts a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("Error connecting or reading from device {address}: {cause}")]
    DeviceUnreachable { address: String, cause: ReadFailure },
}

impl ReadError {
    pub fn address(&self) -> &str {
        match self {
            ReadError::DeviceUnreachable { address, .. } => address,
        }
    }
}

/// Reads the COVIDSafe characteristic from one device at a time.
pub struct DeviceReader<'a> {
    radio: &'a dyn RadioStack,
    mtu: u16,
    timeout: Duration,
}

impl<'a> DeviceReader<'a> {
    /// Create a reader requesting `mtu` and bounding both the connection
    /// attempt and the characteristic read by `timeout`.
    pub fn new(radio: &'a dyn RadioStack, mtu: u16, timeout: Duration) -> Self {
        DeviceReader {
            radio,
            mtu,
            timeout,
        }
    }

    /// Read the payload of the device behind `ad`.
    ///
    /// The connection is released before returning, whatever the outcome.
    pub async fn read(&self, ad: &Advertisement) -> Result<RawPayload, ReadError> {
        let unreachable = |cause| ReadError::DeviceUnreachable {
            address: ad.address.clone(),
            cause,
        };

        let connect = tokio::time::timeout(self.timeout, self.radio.connect(&ad.address));
        let handle = match connect.await {
            Ok(result) => result.map_err(|e| unreachable(ReadFailure::Connect(e)))?,
            Err(_) => {
                self.release(&ConnectionHandle::abandoned(&ad.address)).await;
                return Err(unreachable(ReadFailure::Timeout));
            }
        };

        let result = self.read_connected(&handle).await;
        self.release(&handle).await;

        let bytes = result.map_err(unreachable)?;
        if std::str::from_utf8(&bytes).is_err() {
            return Err(unreachable(ReadFailure::InvalidUtf8));
        }

        Ok(RawPayload {
            bytes,
            source_address: ad.address.clone(),
        })
    }

    async fn release(&self, handle: &ConnectionHandle) {
        if let Err(e) = self.radio.disconnect(handle).await {
            tracing::debug!(address = %handle.address, error = %e, "disconnect failed");
        }
    }

    async fn read_connected(&self, handle: &ConnectionHandle) -> Result<Vec<u8>, ReadFailure> {
        let mtu = self
            .radio
            .negotiate_mtu(handle, self.mtu)
            .await
            .map_err(ReadFailure::Connect)?;
        tracing::debug!(address = %handle.address, mtu, "MTU negotiated");

        tokio::time::timeout(
            self.timeout,
            self.radio
                .read_characteristic(handle, TARGET_SERVICE_UUID, HandleRange::ALL),
        )
        .await
        .map_err(|_| ReadFailure::Timeout)?
        .map_err(ReadFailure::Read)
    }
}
