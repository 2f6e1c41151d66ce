//! Persisted record of one successful device read.

use crate::advertisement::AddressType;
use chrono::{DateTime, Local};

/// Timestamp layout used in the record file (local time, milliseconds).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// A row in the record file.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// When the payload was decoded
    pub timestamp: DateTime<Local>,
    pub address: String,
    pub address_type: AddressType,
    /// Signal strength in dBm at discovery time
    pub rssi: i16,
    /// Phone model reported by the device
    pub model: String,
    /// Message format version reported by the device
    pub version: i64,
    /// Raw or decoded message; structured v2 messages hold five comma-separated subfields
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_has_milliseconds() {
        let timestamp = Local
            .with_ymd_and_hms(2020, 5, 1, 9, 30, 15)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(42))
            .unwrap();
        assert_eq!(
            timestamp.format(TIMESTAMP_FORMAT).to_string(),
            "2020-05-01 09:30:15.042"
        );
    }
}
