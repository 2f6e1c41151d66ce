//! Advertisement selection by service UUID and signal strength.

use crate::advertisement::{Advertisement, TARGET_SERVICE_UUID};

/// Selects COVIDSafe advertisers that are close enough to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    rssi_threshold: i16,
}

impl DeviceFilter {
    /// Create a filter accepting signals at or above `rssi_threshold` dBm.
    pub fn new(rssi_threshold: i16) -> Self {
        DeviceFilter { rssi_threshold }
    }

    /// Returns `true` if the advertisement carries the target service UUID
    /// (case-insensitive) and its RSSI meets the threshold (inclusive).
    pub fn matches(&self, ad: &Advertisement) -> bool {
        ad.service_uuid.eq_ignore_ascii_case(TARGET_SERVICE_UUID) && ad.rssi >= self.rssi_threshold
    }
}
