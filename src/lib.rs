//! `covidsafe-scanner` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The core “business logic” lives in [`crate::app`] where it
//! can be tested deterministically with an injected radio stack and record sink.

pub mod advertisement;
pub mod app;
pub mod filter;
pub mod logging;
pub mod output;
pub mod payload;
pub mod radio;
pub mod reader;
pub mod record;
pub mod scan;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{AdType, AddressType, Advertisement, TARGET_SERVICE_UUID};
pub use app::{BatchSummary, DeviceError, Options, PayloadMode, RunError, run_with_io};
pub use filter::DeviceFilter;
pub use output::RecordSink;
pub use output::csv::CsvSink;
pub use payload::{DecodeError, DecodedMessage, DevicePayload, decode, normalize_raw};
pub use radio::{
    ConnectionHandle, DiscoveryPass, HandleRange, RadioError, RadioFuture, RadioStack, ScanEvent,
};
pub use reader::{DeviceReader, RawPayload, ReadError, ReadFailure};
pub use record::Record;
pub use scan::{ScanError, ScanSession};
