//! Discovered BLE advertisements.
//!
//! This module holds the advertisement record produced by a discovery pass,
//! decoupled from any specific Bluetooth library, along with the constants
//! that identify a COVIDSafe peripheral.

use std::fmt;

/// Service UUID advertised by the COVIDSafe app.
///
/// The app exposes its payload through a GATT characteristic that shares
/// this UUID with the service.
pub const TARGET_SERVICE_UUID: &str = "b82ab3fc-1595-4f6a-80f0-fe094cc218f9";

/// Generic Access Profile advertising data types reported per device.
///
/// See: https://www.bluetooth.com/specifications/assigned-numbers/generic-access-profile/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AdType {
    /// Complete list of 128-bit service class UUIDs (0x07)
    CompleteServiceUuids128 = 7,
    /// Complete local name (0x09)
    CompleteLocalName = 9,
    /// Manufacturer specific data (0xFF)
    ManufacturerData = 255,
}

impl AdType {
    /// Human-readable description, as shown next to values in device dumps.
    pub fn description(self) -> &'static str {
        match self {
            AdType::CompleteServiceUuids128 => "Complete 128b Services",
            AdType::CompleteLocalName => "Complete Local Name",
            AdType::ManufacturerData => "Manufacturer",
        }
    }
}

/// BLE address type of an advertiser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressType::Public => write!(f, "public"),
            AddressType::Random => write!(f, "random"),
        }
    }
}

/// A beacon observed during one discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Device address, e.g. "AA:BB:CC:DD:EE:FF"
    pub address: String,
    pub address_type: AddressType,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Advertised service UUID (AD type 7)
    pub service_uuid: String,
    /// Advertised local name (AD type 9)
    pub name: Option<String>,
    /// Manufacturer data as hex, company id first (AD type 255)
    pub manufacturer_data: Option<String>,
}

impl Advertisement {
    /// Text value for the given advertising data type, if advertised.
    pub fn value_text(&self, ad_type: AdType) -> Option<&str> {
        match ad_type {
            AdType::CompleteServiceUuids128 => {
                Some(self.service_uuid.as_str()).filter(|uuid| !uuid.is_empty())
            }
            AdType::CompleteLocalName => self.name.as_deref(),
            AdType::ManufacturerData => self.manufacturer_data.as_deref(),
        }
    }
}
