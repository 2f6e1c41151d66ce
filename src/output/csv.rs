//! Comma-delimited record file.

use crate::output::RecordSink;
use crate::record::{Record, TIMESTAMP_FORMAT};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Column names written at the top of a new record file.
pub const HEADER: &str = "timestamp,address,address_type,rssi,model,version,message";

/// A record formatted as one CSV row (without line terminator).
pub struct Row<'a>(pub &'a Record);

impl fmt::Display for Row<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.0;
        write!(
            f,
            "{},{},{},{},{},{},{}",
            record.timestamp.format(TIMESTAMP_FORMAT),
            record.address,
            record.address_type,
            record.rssi,
            sanitize(&record.model),
            record.version,
            single_line(&record.message)
        )
    }
}

/// Keep free-text columns from spilling into neighbouring columns or rows.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ',' => ';',
            '\n' | '\r' => ' ',
            c => c,
        })
        .collect()
}

/// Structured v2 messages carry their own comma subfields, so only line
/// breaks are replaced in the message column.
fn single_line(value: &str) -> String {
    value.replace(['\n', '\r'], " ")
}

/// Writes records as CSV rows, one write and flush per row.
#[derive(Debug)]
pub struct CsvSink<W: Write> {
    writer: W,
}

impl<W: Write> CsvSink<W> {
    /// Wrap an arbitrary writer. No header is written.
    pub fn new(writer: W) -> Self {
        CsvSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl CsvSink<File> {
    /// Open `path` for appending, creating it if absent. A header is
    /// written when the file is empty.
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() == 0 {
            file.write_all(format!("{HEADER}\n").as_bytes())?;
            file.flush()?;
        }
        Ok(CsvSink { writer: file })
    }
}

impl<W: Write + Send> RecordSink for CsvSink<W> {
    fn append(&mut self, record: &Record) -> io::Result<()> {
        let line = format!("{}\n", Row(record));
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()
    }
}
