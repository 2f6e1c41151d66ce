//! Core application runner (business logic) for `covidsafe-scanner`.
//!
//! This module is intentionally decoupled from CLI parsing, logging setup and
//! process exit codes so one batch can be tested deterministically with an
//! injected radio, sink and output streams.

use crate::advertisement::{AdType, Advertisement};
use crate::filter::DeviceFilter;
use crate::output::{RecordSink, csv};
use crate::payload::{self, DecodeError, DecodedMessage, DevicePayload};
use crate::radio::{RadioError, RadioStack};
use crate::reader::{DEFAULT_MTU, DeviceReader, ReadError};
use crate::record::Record;
use crate::scan::{ScanError, ScanSession};
use clap::Parser;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exit codes for the application
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_PANIC: i32 = 2;
pub const EXIT_INTERRUPTED: i32 = 130;

/// How the device message is written to the record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PayloadMode {
    /// Message string as received, with escape sequences normalized
    #[default]
    Raw,
    /// Version 2 messages split into pubkey y, pubkey x, counter, ciphertext and MAC
    Structured,
}

/// Configuration for one batch.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Scanner timeout in seconds
    #[arg(long = "timeout", default_value_t = 15, value_name = "SECONDS")]
    pub scan_timeout: u64,

    /// RSSI threshold in dBm; weaker devices are skipped
    #[arg(long = "rssi", default_value_t = -85, allow_negative_numbers = true)]
    pub rssi_threshold: i16,

    /// MTU requested from each device
    #[arg(long, default_value_t = DEFAULT_MTU)]
    pub mtu: u16,

    /// How to record the device message
    #[arg(long, default_value_t, value_enum)]
    pub payload_mode: PayloadMode,

    /// Record file, appended to and created if absent
    #[arg(long, default_value = "covidsafe.csv")]
    pub output: PathBuf,

    /// Log file, appended to and created if absent
    #[arg(long, default_value = "covidsafe.log")]
    pub log_file: PathBuf,

    /// Per-device connect and read timeout in seconds
    #[arg(long, default_value_t = 30, value_name = "SECONDS")]
    pub read_timeout: u64,

    /// Give up scanning after this many disconnect retries (default: retry forever)
    #[arg(long)]
    pub max_scan_retries: Option<u32>,

    /// Verbose output, print debug events to the console
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            scan_timeout: 15,
            rssi_threshold: -85,
            mtu: DEFAULT_MTU,
            payload_mode: PayloadMode::Raw,
            output: PathBuf::from("covidsafe.csv"),
            log_file: PathBuf::from("covidsafe.log"),
            read_timeout: 30,
            max_scan_retries: None,
            verbose: false,
        }
    }
}

/// Errors that abort a batch.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error("cannot open record file {}: {source}", path.display())]
    StorageOpen { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A failure isolated to one device. The batch carries on.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("Error decoding message from device {address}: {source}")]
    Decode {
        address: String,
        source: DecodeError,
    },
    #[error("Error writing record for device {address}: {source}")]
    Sink { address: String, source: io::Error },
}

impl DeviceError {
    pub fn address(&self) -> &str {
        match self {
            DeviceError::Read(e) => e.address(),
            DeviceError::Decode { address, .. } | DeviceError::Sink { address, .. } => address,
        }
    }
}

/// Outcome of one batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Distinct addresses seen during the scan
    pub discovered: usize,
    /// Advertisements that passed the filter
    pub selected: usize,
    /// Records appended to the sink
    pub written: usize,
    pub failures: Vec<DeviceError>,
}

fn log_device(ad: &Advertisement) {
    tracing::info!("===============================================================");
    tracing::info!(
        "Device {} ({}), RSSI={} dB",
        ad.address,
        ad.address_type,
        ad.rssi
    );
    for ad_type in [
        AdType::CompleteLocalName,
        AdType::ManufacturerData,
        AdType::CompleteServiceUuids128,
    ] {
        tracing::info!(
            "{} = {}",
            ad_type.description(),
            ad.value_text(ad_type).unwrap_or("None")
        );
    }
}

/// Only structured v2 messages may span several CSV fields; everything else
/// is folded into the single message column.
fn render_message(payload: &DevicePayload, mode: PayloadMode) -> Result<String, DecodeError> {
    match mode {
        PayloadMode::Raw => Ok(csv::sanitize(&payload::normalize_raw(&payload.message))),
        PayloadMode::Structured => {
            match payload::decode_message(&payload.message, payload.version)? {
                DecodedMessage::V1(message) => Ok(csv::sanitize(&message)),
                v2 @ DecodedMessage::V2(_) => Ok(v2.to_string()),
            }
        }
    }
}

async fn read_record(
    reader: &DeviceReader<'_>,
    ad: &Advertisement,
    mode: PayloadMode,
) -> Result<Record, DeviceError> {
    let raw = reader.read(ad).await?;
    tracing::info!("Payload: {}", raw.text());

    let device = DevicePayload::from_raw(&raw)?;
    let message = render_message(&device, mode).map_err(|source| DeviceError::Decode {
        address: ad.address.clone(),
        source,
    })?;

    Ok(Record {
        timestamp: chrono::Local::now(),
        address: ad.address.clone(),
        address_type: ad.address_type,
        rssi: ad.rssi,
        model: device.model,
        version: device.version,
        message,
    })
}

/// Run one batch: scan, then read, decode and record every selected device
/// in turn.
///
/// - Operator messages are written to `out`, per-device failures to `err`.
/// - A scan error aborts before any device is contacted.
/// - Read, decode and sink failures are collected in the summary and the
///   device is skipped; no record is written for it.
pub async fn run_with_io(
    options: &Options,
    radio: &dyn RadioStack,
    sink: &mut dyn RecordSink,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<BatchSummary, RunError> {
    writeln!(
        out,
        "Scanning (timeout {} seconds, RSSI threshold: {})",
        options.scan_timeout, options.rssi_threshold
    )?;

    let session = ScanSession::new(
        radio,
        Duration::from_secs(options.scan_timeout),
        options.max_scan_retries,
    );
    let advertisements = session.scan().await?;

    let filter = DeviceFilter::new(options.rssi_threshold);
    let reader = DeviceReader::new(
        radio,
        options.mtu,
        Duration::from_secs(options.read_timeout),
    );

    let mut summary = BatchSummary {
        discovered: advertisements.len(),
        ..Default::default()
    };

    for ad in advertisements.iter().filter(|ad| filter.matches(ad)) {
        summary.selected += 1;
        log_device(ad);

        let result = match read_record(&reader, ad, options.payload_mode).await {
            Ok(record) => sink
                .append(&record)
                .map_err(|source| DeviceError::Sink {
                    address: ad.address.clone(),
                    source,
                }),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => summary.written += 1,
            Err(e) => {
                tracing::debug!(address = %e.address(), error = ?e, "device skipped");
                writeln!(err, "{e}")?;
                summary.failures.push(e);
            }
        }
    }

    tracing::info!(
        discovered = summary.discovered,
        selected = summary.selected,
        written = summary.written,
        failed = summary.failures.len(),
        "batch complete"
    );

    Ok(summary)
}

/// Map the outcome of a batch to the process exit code, explaining any
/// failure on `err`.
pub fn exit_code(result: &Result<BatchSummary, RunError>, err: &mut dyn Write) -> i32 {
    let message = match result {
        Ok(_) => return EXIT_SUCCESS,
        Err(RunError::Scan(why)) => {
            format!("Scan error. Try increase the timeout and retry ({why})")
        }
        Err(why) => format!("error: {why}"),
    };
    // Nothing left to report a failed write to.
    let _ = writeln!(err, "{message}");
    EXIT_ERROR
}
