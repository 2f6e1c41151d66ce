//! BLE radio stack abstraction.
//!
//! The pipeline talks to the radio only through [`RadioStack`], so discovery,
//! connections and characteristic reads can be exercised deterministically in
//! tests without Bluetooth hardware. The BlueZ implementation lives in
//! [`bluer`](self::bluer) behind the `bluer` feature.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::advertisement::Advertisement;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by the radio stack.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// The link to the adapter or peer dropped; worth retrying
    #[error("link disconnected: {0}")]
    Disconnected(String),
    /// The requested device or characteristic does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// Any other Bluetooth failure
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

impl RadioError {
    /// Returns `true` for transient link drops.
    pub fn is_transient(&self) -> bool {
        matches!(self, RadioError::Disconnected(_))
    }
}

/// A discovery notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// First advertisement seen from an address
    Discovered(Advertisement),
    /// New advertisement data from an address already seen
    Updated(Advertisement),
}

impl ScanEvent {
    pub fn into_advertisement(self) -> Advertisement {
        match self {
            ScanEvent::Discovered(ad) | ScanEvent::Updated(ad) => ad,
        }
    }
}

/// Events of one discovery pass, in arrival order.
///
/// Each advertisement is classified and logged as soon as it is observed,
/// not when the pass ends.
#[derive(Debug, Default)]
pub struct DiscoveryPass {
    seen: HashSet<String>,
    events: Vec<ScanEvent>,
}

impl DiscoveryPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, ad: Advertisement) {
        let event = if self.seen.insert(ad.address.clone()) {
            tracing::info!("Discovered device {}", ad.address);
            ScanEvent::Discovered(ad)
        } else {
            tracing::info!("Received new data from {}", ad.address);
            ScanEvent::Updated(ad)
        };
        self.events.push(event);
    }

    pub fn into_events(self) -> Vec<ScanEvent> {
        self.events
    }
}

/// An open connection to a peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub id: u64,
    pub address: String,
}

impl ConnectionHandle {
    /// Handle for a connection attempt given up before it completed. The
    /// link may still come up afterwards, so it is released by address.
    pub fn abandoned(address: &str) -> Self {
        ConnectionHandle {
            id: 0,
            address: address.to_string(),
        }
    }
}

/// Inclusive range of GATT attribute handles to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRange {
    pub start: u16,
    pub end: u16,
}

impl HandleRange {
    /// Every valid attribute handle.
    pub const ALL: HandleRange = HandleRange {
        start: 0x0001,
        end: 0xFFFF,
    };

    pub fn contains(&self, handle: u16) -> bool {
        (self.start..=self.end).contains(&handle)
    }
}

/// Boxed future returned by [`RadioStack`] operations.
pub type RadioFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RadioError>> + Send + 'a>>;

/// Operations the pipeline consumes from the BLE stack.
pub trait RadioStack: Send + Sync {
    /// Run one discovery pass lasting `duration`, returning every discovery
    /// and update event in the order observed.
    fn start_discovery(&self, duration: Duration) -> RadioFuture<'_, Vec<ScanEvent>>;

    /// Open a connection to the device at `address`.
    fn connect<'a>(&'a self, address: &'a str) -> RadioFuture<'a, ConnectionHandle>;

    /// Request an MTU for the connection, returning the one in effect.
    fn negotiate_mtu<'a>(&'a self, handle: &'a ConnectionHandle, mtu: u16)
    -> RadioFuture<'a, u16>;

    /// Read the value of the first characteristic with `uuid` within `range`.
    fn read_characteristic<'a>(
        &'a self,
        handle: &'a ConnectionHandle,
        uuid: &'a str,
        range: HandleRange,
    ) -> RadioFuture<'a, Vec<u8>>;

    /// Release the connection, including one from an
    /// [abandoned](ConnectionHandle::abandoned) attempt.
    fn disconnect<'a>(&'a self, handle: &'a ConnectionHandle) -> RadioFuture<'a, ()>;
}
