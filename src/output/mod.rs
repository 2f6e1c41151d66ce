//! Durable record output.
//!
//! This module provides the trait the pipeline appends records through and
//! the CSV implementation used by the binary.

pub mod csv;

use crate::record::Record;
use std::io;

/// Append-only destination for records.
///
/// Implementations must never truncate or reorder rows already written; a
/// failed append leaves earlier rows intact.
pub trait RecordSink: Send {
    /// Append one record, durably, before returning.
    fn append(&mut self, record: &Record) -> io::Result<()>;
}
