use crate::advertisement::{AddressType, Advertisement, TARGET_SERVICE_UUID};
use crate::output::RecordSink;
use crate::radio::{ConnectionHandle, HandleRange, RadioError, RadioFuture, RadioStack, ScanEvent};
use crate::record::Record;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{Local, TimeZone};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

/// A stable device address for unit tests.
pub const TEST_ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

/// A COVIDSafe advertisement with the given address and RSSI.
pub fn covidsafe_ad(address: &str, rssi: i16) -> Advertisement {
    Advertisement {
        address: address.to_string(),
        address_type: AddressType::Random,
        rssi,
        service_uuid: TARGET_SERVICE_UUID.to_string(),
        name: None,
        manufacturer_data: None,
    }
}

/// The characteristic JSON a device would return.
pub fn device_json(model: &str, version: i64, message: &str) -> String {
    serde_json::json!({ "modelP": model, "v": version, "msg": message }).to_string()
}

/// Hex of a minimal v2 message: pubkey y `01`, pubkey x `ab..`, counter
/// `0002`, 32 ciphertext bytes `cd..`, MAC `ef..` (166 characters).
pub fn v2_hex() -> String {
    format!(
        "01{}0002{}{}",
        "ab".repeat(32),
        "cd".repeat(32),
        "ef".repeat(16)
    )
}

/// [`v2_hex`] as the base64 message a device sends.
pub fn v2_message() -> String {
    let mut bytes = vec![0x01];
    bytes.extend([0xab; 32]);
    bytes.extend([0x00, 0x02]);
    bytes.extend([0xcd; 32]);
    bytes.extend([0xef; 16]);
    STANDARD.encode(bytes)
}

/// A record with a fixed timestamp (2020-05-01 09:30:15.042 local).
pub fn record(address: &str, message: &str) -> Record {
    let timestamp = Local
        .with_ymd_and_hms(2020, 5, 1, 9, 30, 15)
        .unwrap()
        .checked_add_signed(chrono::Duration::milliseconds(42))
        .unwrap();

    Record {
        timestamp,
        address: address.to_string(),
        address_type: AddressType::Random,
        rssi: -80,
        model: "SM-G960F".to_string(),
        version: 2,
        message: message.to_string(),
    }
}

/// Scripted radio stack.
///
/// Discovery passes return the queued results in order (an empty pass once
/// the queue runs out). Devices registered with [`FakeRadio::with_device`]
/// accept connections and return their scripted characteristic value.
/// Unresponsive devices never finish connecting. Any other address refuses
/// to connect.
#[derive(Debug, Default)]
pub struct FakeRadio {
    discoveries: Mutex<VecDeque<Result<Vec<ScanEvent>, RadioError>>>,
    devices: HashMap<String, Result<Vec<u8>, RadioError>>,
    unresponsive: HashSet<String>,
    discovery_calls: Mutex<usize>,
    connected: Mutex<Vec<String>>,
    disconnected: Mutex<Vec<String>>,
    mtus: Mutex<Vec<u16>>,
    read_uuids: Mutex<Vec<String>>,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_discovery(self, result: Result<Vec<ScanEvent>, RadioError>) -> Self {
        self.discoveries.lock().unwrap().push_back(result);
        self
    }

    pub fn with_device(mut self, address: &str, value: Result<Vec<u8>, RadioError>) -> Self {
        self.devices.insert(address.to_string(), value);
        self
    }

    pub fn with_unresponsive_device(mut self, address: &str) -> Self {
        self.unresponsive.insert(address.to_string());
        self
    }

    pub fn discovery_calls(&self) -> usize {
        *self.discovery_calls.lock().unwrap()
    }

    pub fn connected(&self) -> Vec<String> {
        self.connected.lock().unwrap().clone()
    }

    pub fn disconnected(&self) -> Vec<String> {
        self.disconnected.lock().unwrap().clone()
    }

    pub fn requested_mtus(&self) -> Vec<u16> {
        self.mtus.lock().unwrap().clone()
    }

    pub fn read_uuids(&self) -> Vec<String> {
        self.read_uuids.lock().unwrap().clone()
    }
}

impl RadioStack for FakeRadio {
    fn start_discovery(&self, _duration: Duration) -> RadioFuture<'_, Vec<ScanEvent>> {
        *self.discovery_calls.lock().unwrap() += 1;
        let result = self
            .discoveries
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()));
        Box::pin(async move { result })
    }

    fn connect<'a>(&'a self, address: &'a str) -> RadioFuture<'a, ConnectionHandle> {
        if self.unresponsive.contains(address) {
            return Box::pin(std::future::pending());
        }
        let result = if self.devices.contains_key(address) {
            let mut connected = self.connected.lock().unwrap();
            connected.push(address.to_string());
            Ok(ConnectionHandle {
                id: connected.len() as u64,
                address: address.to_string(),
            })
        } else {
            Err(RadioError::NotFound(format!("device {address}")))
        };
        Box::pin(async move { result })
    }

    fn negotiate_mtu<'a>(
        &'a self,
        _handle: &'a ConnectionHandle,
        mtu: u16,
    ) -> RadioFuture<'a, u16> {
        self.mtus.lock().unwrap().push(mtu);
        Box::pin(async move { Ok(mtu) })
    }

    fn read_characteristic<'a>(
        &'a self,
        handle: &'a ConnectionHandle,
        uuid: &'a str,
        range: HandleRange,
    ) -> RadioFuture<'a, Vec<u8>> {
        assert_eq!(range, HandleRange::ALL);
        self.read_uuids.lock().unwrap().push(uuid.to_string());
        let result = self
            .devices
            .get(&handle.address)
            .cloned()
            .unwrap_or_else(|| Err(RadioError::NotFound(handle.address.clone())));
        Box::pin(async move { result })
    }

    fn disconnect<'a>(&'a self, handle: &'a ConnectionHandle) -> RadioFuture<'a, ()> {
        self.disconnected
            .lock()
            .unwrap()
            .push(handle.address.clone());
        Box::pin(async move { Ok(()) })
    }
}

/// Sink keeping records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<Record>,
}

impl RecordSink for MemorySink {
    fn append(&mut self, record: &Record) -> io::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Sink whose every append fails.
#[derive(Debug, Default)]
pub struct FailingSink {
    pub attempts: usize,
}

impl RecordSink for FailingSink {
    fn append(&mut self, _record: &Record) -> io::Result<()> {
        self.attempts += 1;
        Err(io::Error::other("disk full"))
    }
}

/// In-memory log output for a `tracing_subscriber::fmt` subscriber.
#[derive(Debug, Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
