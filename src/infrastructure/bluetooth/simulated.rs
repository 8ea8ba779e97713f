//! Simulated headset platforms.
//!
//! In-process implementations of [`GattPlatform`], [`SerialPlatform`] and
//! [`AudioPlatform`] backed by a [`SimulatedHeadset`] profile. Callbacks are
//! delivered from a dispatcher thread after the profile's latency, in the
//! order they were produced, the way a radio stack would deliver them.
//!
//! Every platform call is recorded in a shared [`SimulationLog`], together
//! with how many operations were outstanding at once.

use crate::domain::models::{InfoKind, ScannedDevice};
use crate::error::PlatformError;
use crate::infrastructure::bluetooth::audio::{AudioCallback, AudioEvent, AudioPlatform};
use crate::infrastructure::bluetooth::driver::{BondState, Prerequisites};
use crate::infrastructure::bluetooth::le::{GattCallback, GattEvent, GattPlatform, GATT_SUCCESS};
use crate::infrastructure::bluetooth::protocol::{
    info_kind_for, info_kind_from_selector, MailboxCode, BATTERY_SERVICE_UUID,
    DEVICE_INFO_SERVICE_UUID, EEG_CHAR_UUID, MAILBOX_CHAR_UUID, MEASUREMENT_SERVICE_UUID,
};
use crate::infrastructure::bluetooth::spp::{
    encode_envelope, FrameReassembler, SerialCallback, SerialEvent, SerialPlatform,
    ENVELOPE_EEG, ENVELOPE_MAILBOX,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

const GATT_READ_NOT_PERMITTED: i32 = 0x02;
const GATT_CONNECTION_FAILED: i32 = 0x85;
const GATT_LINK_LOST: i32 = 0x08;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Behaviour of the simulated headset.
#[derive(Debug, Clone)]
pub struct SimulatedHeadset {
    pub name: String,
    pub address: String,
    pub firmware_version: String,
    pub hardware_version: String,
    pub serial_number: String,
    pub model_number: String,
    pub battery_level: u8,
    pub audio_address: [u8; 6],
    /// Delay before each callback is delivered.
    pub latency: Duration,
    pub prerequisites: Prerequisites,
    /// Whether the headset shows up in scans at all.
    pub discoverable: bool,
    pub accept_connection: bool,
    pub bonded: bool,
    pub reject_bond: bool,
    /// Whether a bond request ever settles. When false it stays in
    /// `Bonding` until the link goes away.
    pub bond_settles: bool,
    /// Whether mailbox commands get answered.
    pub respond_to_commands: bool,
    /// Mailbox identifiers the headset answers with a bad-command frame.
    pub rejected_commands: Vec<MailboxCode>,
    /// A read that fails with a GATT error.
    pub failing_read: Option<InfoKind>,
    /// Whether the mailbox characteristic accepts writes.
    pub mailbox_writable: bool,
}

impl Default for SimulatedHeadset {
    fn default() -> Self {
        Self {
            name: "melo_2220100001".to_string(),
            address: "AA:BB:CC:DD:EE:01".to_string(),
            firmware_version: "1.7.4".to_string(),
            hardware_version: "2.1.0".to_string(),
            serial_number: "2220100001".to_string(),
            model_number: "melomind".to_string(),
            battery_level: 87,
            audio_address: [0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13],
            latency: Duration::from_millis(5),
            prerequisites: Prerequisites::default(),
            discoverable: true,
            accept_connection: true,
            bonded: false,
            reject_bond: false,
            bond_settles: true,
            respond_to_commands: true,
            rejected_commands: Vec::new(),
            failing_read: None,
            mailbox_writable: true,
        }
    }
}

impl SimulatedHeadset {
    pub fn with_firmware(mut self, version: &str) -> Self {
        self.firmware_version = version.to_string();
        self
    }

    pub fn device(&self) -> ScannedDevice {
        ScannedDevice {
            name: self.name.clone(),
            address: self.address.clone(),
            signal_strength: -48,
        }
    }

    /// A nearby device that never matches the default name rules.
    fn bystander(&self) -> ScannedDevice {
        ScannedDevice {
            name: "Pixel Buds".to_string(),
            address: "11:22:33:44:55:66".to_string(),
            signal_strength: -71,
        }
    }

    fn info_bytes(&self, kind: InfoKind) -> Vec<u8> {
        match kind {
            InfoKind::FirmwareVersion => self.firmware_version.as_bytes().to_vec(),
            InfoKind::HardwareVersion => self.hardware_version.as_bytes().to_vec(),
            InfoKind::SerialNumber => self.serial_number.as_bytes().to_vec(),
            InfoKind::ModelNumber => self.model_number.as_bytes().to_vec(),
            InfoKind::Battery => vec![self.battery_level],
            InfoKind::ExternalName => self.name.as_bytes().to_vec(),
            InfoKind::AudioAddress => self.audio_address.to_vec(),
        }
    }

    /// Frames the headset sends back for one mailbox `frame`.
    fn mailbox_responses(&self, frame: &[u8]) -> Vec<Vec<u8>> {
        let Some(&identifier) = frame.first() else {
            return Vec::new();
        };
        let Some(code) = MailboxCode::from_u8(identifier) else {
            return vec![vec![MailboxCode::BadCommand.as_u8(), identifier]];
        };
        if self.rejected_commands.contains(&code) {
            return vec![vec![MailboxCode::BadCommand.as_u8(), identifier]];
        }
        if !self.respond_to_commands || !code.has_response() {
            return Vec::new();
        }
        match code {
            MailboxCode::ConnectAudio => {
                let mut done = vec![identifier, 0x00];
                done.extend_from_slice(&self.audio_address);
                vec![vec![identifier, 0x01], done]
            }
            MailboxCode::GetSystemStatus => vec![vec![identifier, 0, 0, 0, 0]],
            MailboxCode::GetEegConfig => vec![vec![identifier, 0x01, 0x0C, 0x00, 0x00]],
            MailboxCode::GetDeviceInfo => {
                let selector = frame.get(1).copied().unwrap_or(0);
                let mut response = vec![identifier, selector];
                if let Some(kind) = info_kind_from_selector(selector) {
                    if self.failing_read != Some(kind) {
                        response.extend(self.info_bytes(kind));
                    }
                }
                vec![response]
            }
            MailboxCode::StopStream => vec![vec![identifier]],
            _ => vec![vec![identifier, 0x00]],
        }
    }
}

/// Record of the calls made into the simulated platforms.
#[derive(Debug, Default)]
pub struct SimulationLog {
    operations: Mutex<Vec<String>>,
    writes: Mutex<Vec<Vec<u8>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SimulationLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every platform call, in order, e.g. `"le:read:Battery"`.
    pub fn operations(&self) -> Vec<String> {
        lock(&self.operations).clone()
    }

    pub fn contains(&self, operation: &str) -> bool {
        lock(&self.operations).iter().any(|op| op == operation)
    }

    /// Mailbox frames written to the headset.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.writes).clone()
    }

    /// Largest number of operations that were awaiting completion at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, operation: String) {
        trace!("Simulated platform call: {}", operation);
        lock(&self.operations).push(operation);
    }

    /// Record an operation whose completion callback is still to come.
    fn begin(&self, operation: String) {
        self.record(operation);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn complete(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn record_write(&self, frame: &[u8]) {
        lock(&self.writes).push(frame.to_vec());
    }
}

type Callback<E> = Arc<dyn Fn(E) + Send + Sync>;

struct Delivery<E> {
    event: E,
    completes: bool,
}

/// Delivers callbacks one at a time, each after `latency`.
struct Dispatcher<E> {
    tx: mpsc::UnboundedSender<Delivery<E>>,
    callback: Arc<Mutex<Option<Callback<E>>>>,
}

impl<E: Send + 'static> Dispatcher<E> {
    fn spawn(name: &str, latency: Duration, log: Arc<SimulationLog>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery<E>>();
        let callback: Arc<Mutex<Option<Callback<E>>>> = Arc::new(Mutex::new(None));
        let slot = callback.clone();
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(delivery) = rx.blocking_recv() {
                    std::thread::sleep(latency);
                    // Counted as done before the waiter can start anything new.
                    if delivery.completes {
                        log.complete();
                    }
                    let callback = lock(&slot).clone();
                    if let Some(callback) = callback {
                        callback(delivery.event);
                    }
                }
            });
        if let Err(e) = spawned {
            warn!("Failed to start {} dispatcher: {}", name, e);
        }
        Self { tx, callback }
    }

    fn register(&self, callback: Callback<E>) {
        *lock(&self.callback) = Some(callback);
    }

    fn deliver(&self, event: E, completes: bool) {
        if self.tx.send(Delivery { event, completes }).is_err() {
            debug!("Dispatcher stopped, dropping callback");
        }
    }
}

#[derive(Debug)]
struct GattState {
    connected: bool,
    bond: BondState,
}

/// Simulated GATT client for [`crate::infrastructure::bluetooth::le::LeDriver`].
pub struct SimulatedGatt {
    profile: SimulatedHeadset,
    log: Arc<SimulationLog>,
    dispatcher: Dispatcher<GattEvent>,
    state: Mutex<GattState>,
}

impl SimulatedGatt {
    pub fn new(profile: SimulatedHeadset, log: Arc<SimulationLog>) -> Arc<Self> {
        let dispatcher = Dispatcher::spawn("sim-gatt", profile.latency, log.clone());
        let bond = if profile.bonded {
            BondState::Bonded
        } else {
            BondState::None
        };
        Arc::new(Self {
            profile,
            log,
            dispatcher,
            state: Mutex::new(GattState {
                connected: false,
                bond,
            }),
        })
    }

    pub fn log(&self) -> Arc<SimulationLog> {
        self.log.clone()
    }

    /// Drop the link as if the headset went out of range.
    pub fn drop_link(&self) {
        let mut state = lock(&self.state);
        if !state.connected {
            return;
        }
        state.connected = false;
        drop(state);
        self.log.record("le:link-lost".to_string());
        self.dispatcher.deliver(
            GattEvent::ConnectionStateChanged {
                connected: false,
                status: GATT_LINK_LOST,
            },
            false,
        );
    }

    /// Push a status measurement notification.
    pub fn notify(&self, characteristic: Uuid, value: Vec<u8>) {
        self.dispatcher.deliver(
            GattEvent::CharacteristicChanged {
                characteristic,
                value,
            },
            false,
        );
    }
}

impl GattPlatform for SimulatedGatt {
    fn prerequisites(&self) -> Prerequisites {
        self.profile.prerequisites.clone()
    }

    fn register_callback(&self, callback: GattCallback) {
        self.dispatcher.register(callback);
    }

    fn start_scan(&self) -> Result<(), PlatformError> {
        self.log.record("le:scan".to_string());
        self.dispatcher
            .deliver(GattEvent::ScanResult(self.profile.bystander()), false);
        if self.profile.discoverable {
            self.dispatcher
                .deliver(GattEvent::ScanResult(self.profile.device()), false);
        }
        Ok(())
    }

    fn stop_scan(&self) {
        self.log.record("le:stop-scan".to_string());
    }

    fn connect_gatt(&self, address: &str) -> Result<(), PlatformError> {
        self.log.begin(format!("le:connect:{}", address));
        let connected = self.profile.accept_connection && address == self.profile.address;
        lock(&self.state).connected = connected;
        self.dispatcher.deliver(
            GattEvent::ConnectionStateChanged {
                connected,
                status: if connected {
                    GATT_SUCCESS
                } else {
                    GATT_CONNECTION_FAILED
                },
            },
            true,
        );
        Ok(())
    }

    fn disconnect_gatt(&self) -> Result<(), PlatformError> {
        self.log.begin("le:disconnect".to_string());
        lock(&self.state).connected = false;
        self.dispatcher.deliver(
            GattEvent::ConnectionStateChanged {
                connected: false,
                status: GATT_SUCCESS,
            },
            true,
        );
        Ok(())
    }

    fn discover_services(&self) -> Result<(), PlatformError> {
        self.log.begin("le:discover".to_string());
        self.dispatcher.deliver(
            GattEvent::ServicesDiscovered {
                status: GATT_SUCCESS,
                services: vec![
                    MEASUREMENT_SERVICE_UUID,
                    DEVICE_INFO_SERVICE_UUID,
                    BATTERY_SERVICE_UUID,
                ],
            },
            true,
        );
        Ok(())
    }

    fn read_characteristic(&self, characteristic: Uuid) -> Result<(), PlatformError> {
        let Some(kind) = info_kind_for(characteristic) else {
            return Err(PlatformError::CallFailed(format!(
                "characteristic {} is not readable",
                characteristic
            )));
        };
        self.log.begin(format!("le:read:{:?}", kind));
        let (status, value) = if self.profile.failing_read == Some(kind) {
            (GATT_READ_NOT_PERMITTED, Vec::new())
        } else {
            (GATT_SUCCESS, self.profile.info_bytes(kind))
        };
        self.dispatcher.deliver(
            GattEvent::CharacteristicRead {
                characteristic,
                status,
                value,
            },
            true,
        );
        Ok(())
    }

    fn write_characteristic(&self, characteristic: Uuid, value: &[u8]) -> Result<(), PlatformError> {
        if characteristic != MAILBOX_CHAR_UUID {
            return Err(PlatformError::CallFailed(format!(
                "characteristic {} is not writable",
                characteristic
            )));
        }
        if !lock(&self.state).connected {
            return Err(PlatformError::CallFailed("not connected".to_string()));
        }
        if !self.profile.mailbox_writable {
            return Err(PlatformError::CallFailed("write rejected".to_string()));
        }
        self.log.record_write(value);
        let responses = self.profile.mailbox_responses(value);
        let operation = format!("le:write:{:02X?}", value);
        if responses.is_empty() {
            self.log.record(operation);
            return Ok(());
        }
        self.log.begin(operation);
        let last = responses.len() - 1;
        for (index, response) in responses.into_iter().enumerate() {
            self.dispatcher.deliver(
                GattEvent::CharacteristicChanged {
                    characteristic: MAILBOX_CHAR_UUID,
                    value: response,
                },
                index == last,
            );
        }
        Ok(())
    }

    fn set_notifications(&self, characteristic: Uuid, enable: bool) -> Result<(), PlatformError> {
        self.log
            .begin(format!("le:notify:{}:{}", characteristic, enable));
        self.dispatcher.deliver(
            GattEvent::DescriptorWritten {
                characteristic,
                status: GATT_SUCCESS,
                enabled: enable,
            },
            true,
        );
        if enable && characteristic == EEG_CHAR_UUID {
            self.dispatcher.deliver(
                GattEvent::CharacteristicChanged {
                    characteristic: EEG_CHAR_UUID,
                    value: vec![0x00, 0x01, 0x7F, 0xFF, 0x80, 0x00],
                },
                false,
            );
        }
        Ok(())
    }

    fn create_bond(&self) -> Result<(), PlatformError> {
        self.log.begin("le:bond".to_string());
        self.dispatcher
            .deliver(
                GattEvent::BondStateChanged(BondState::Bonding),
                !self.profile.bond_settles,
            );
        if !self.profile.bond_settles {
            return Ok(());
        }
        let outcome = if self.profile.reject_bond {
            BondState::None
        } else {
            BondState::Bonded
        };
        lock(&self.state).bond = outcome;
        self.dispatcher
            .deliver(GattEvent::BondStateChanged(outcome), true);
        Ok(())
    }

    fn bond_state(&self) -> BondState {
        lock(&self.state).bond
    }
}

#[derive(Debug)]
struct SerialState {
    connected: bool,
    bond: BondState,
    inbound: FrameReassembler,
}

/// Simulated serial-profile socket for [`crate::infrastructure::bluetooth::spp::SppDriver`].
pub struct SimulatedSerial {
    profile: SimulatedHeadset,
    log: Arc<SimulationLog>,
    dispatcher: Dispatcher<SerialEvent>,
    state: Mutex<SerialState>,
}

impl SimulatedSerial {
    pub fn new(profile: SimulatedHeadset, log: Arc<SimulationLog>) -> Arc<Self> {
        let dispatcher = Dispatcher::spawn("sim-serial", profile.latency, log.clone());
        let bond = if profile.bonded {
            BondState::Bonded
        } else {
            BondState::None
        };
        Arc::new(Self {
            profile,
            log,
            dispatcher,
            state: Mutex::new(SerialState {
                connected: false,
                bond,
                inbound: FrameReassembler::new(),
            }),
        })
    }

    pub fn log(&self) -> Arc<SimulationLog> {
        self.log.clone()
    }

    pub fn drop_link(&self) {
        let mut state = lock(&self.state);
        if !state.connected {
            return;
        }
        state.connected = false;
        drop(state);
        self.log.record("spp:link-lost".to_string());
        self.dispatcher.deliver(SerialEvent::SocketClosed, false);
    }

    /// Send `bytes` split in two reads to exercise reassembly.
    fn deliver_split(&self, bytes: Vec<u8>, completes: bool) {
        let middle = bytes.len() / 2;
        let (head, tail) = bytes.split_at(middle);
        if !head.is_empty() {
            self.dispatcher.deliver(SerialEvent::Data(head.to_vec()), false);
        }
        self.dispatcher
            .deliver(SerialEvent::Data(tail.to_vec()), completes);
    }
}

impl SerialPlatform for SimulatedSerial {
    fn prerequisites(&self) -> Prerequisites {
        self.profile.prerequisites.clone()
    }

    fn register_callback(&self, callback: SerialCallback) {
        self.dispatcher.register(callback);
    }

    fn start_discovery(&self) -> Result<(), PlatformError> {
        self.log.record("spp:discovery".to_string());
        self.dispatcher
            .deliver(SerialEvent::DeviceDiscovered(self.profile.bystander()), false);
        if self.profile.discoverable {
            self.dispatcher
                .deliver(SerialEvent::DeviceDiscovered(self.profile.device()), false);
        }
        self.dispatcher.deliver(SerialEvent::DiscoveryFinished, false);
        Ok(())
    }

    fn cancel_discovery(&self) {
        self.log.record("spp:cancel-discovery".to_string());
    }

    fn open_socket(&self, address: &str) -> Result<(), PlatformError> {
        self.log.begin(format!("spp:connect:{}", address));
        let connected = self.profile.accept_connection && address == self.profile.address;
        let mut state = lock(&self.state);
        state.connected = connected;
        state.inbound.clear();
        drop(state);
        let event = if connected {
            SerialEvent::SocketConnected
        } else {
            SerialEvent::SocketFailed("connection refused".to_string())
        };
        self.dispatcher.deliver(event, true);
        Ok(())
    }

    fn close_socket(&self) -> Result<(), PlatformError> {
        self.log.begin("spp:disconnect".to_string());
        lock(&self.state).connected = false;
        self.dispatcher.deliver(SerialEvent::SocketClosed, true);
        Ok(())
    }

    fn write(&self, bytes: &[u8]) -> Result<(), PlatformError> {
        let frames = {
            let mut state = lock(&self.state);
            if !state.connected {
                return Err(PlatformError::Io("socket closed".to_string()));
            }
            state.inbound.push(bytes)
        };

        for (kind, frame) in frames {
            if kind != ENVELOPE_MAILBOX {
                continue;
            }
            self.log.record_write(&frame);
            let operation = match (frame.first().copied().and_then(MailboxCode::from_u8), frame.get(1)) {
                (Some(MailboxCode::GetDeviceInfo), Some(selector)) => match info_kind_from_selector(*selector) {
                    Some(kind) => format!("spp:read:{:?}", kind),
                    None => format!("spp:write:{:02X?}", frame),
                },
                _ => format!("spp:write:{:02X?}", frame),
            };
            let responses = self.profile.mailbox_responses(&frame);
            if responses.is_empty() {
                self.log.record(operation);
                continue;
            }
            self.log.begin(operation);
            let starts_stream = frame.first() == Some(&MailboxCode::StartStream.as_u8());
            let last = responses.len() - 1;
            for (index, response) in responses.into_iter().enumerate() {
                self.deliver_split(encode_envelope(ENVELOPE_MAILBOX, &response), index == last);
            }
            if starts_stream && self.profile.respond_to_commands {
                self.dispatcher.deliver(
                    SerialEvent::Data(encode_envelope(ENVELOPE_EEG, &[0x00, 0x01, 0x7F, 0xFF])),
                    false,
                );
            }
        }
        Ok(())
    }

    fn create_bond(&self, address: &str) -> Result<(), PlatformError> {
        self.log.begin(format!("spp:bond:{}", address));
        self.dispatcher
            .deliver(
                SerialEvent::BondStateChanged(BondState::Bonding),
                !self.profile.bond_settles,
            );
        if !self.profile.bond_settles {
            return Ok(());
        }
        let outcome = if self.profile.reject_bond {
            BondState::None
        } else {
            BondState::Bonded
        };
        lock(&self.state).bond = outcome;
        self.dispatcher
            .deliver(SerialEvent::BondStateChanged(outcome), true);
        Ok(())
    }

    fn bond_state(&self, address: &str) -> BondState {
        if address == self.profile.address {
            lock(&self.state).bond
        } else {
            BondState::None
        }
    }
}

/// Simulated audio profile for [`crate::infrastructure::bluetooth::audio::AudioDriver`].
pub struct SimulatedAudio {
    profile: SimulatedHeadset,
    log: Arc<SimulationLog>,
    dispatcher: Dispatcher<AudioEvent>,
    connected: Mutex<Option<ScannedDevice>>,
}

impl SimulatedAudio {
    pub fn new(profile: SimulatedHeadset, log: Arc<SimulationLog>) -> Arc<Self> {
        let dispatcher = Dispatcher::spawn("sim-audio", profile.latency, log.clone());
        Arc::new(Self {
            profile,
            log,
            dispatcher,
            connected: Mutex::new(None),
        })
    }

    /// Audio comes up without any request, e.g. the headset reconnected it.
    pub fn connect_externally(&self) {
        *lock(&self.connected) = Some(self.profile.device());
    }

    /// Audio goes away without any callback.
    pub fn disconnect_externally(&self) {
        lock(&self.connected).take();
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.connected).is_some()
    }
}

impl AudioPlatform for SimulatedAudio {
    fn prerequisites(&self) -> Prerequisites {
        self.profile.prerequisites.clone()
    }

    fn register_callback(&self, callback: AudioCallback) {
        self.dispatcher.register(callback);
    }

    fn connected_devices(&self) -> Result<Vec<ScannedDevice>, PlatformError> {
        Ok(lock(&self.connected).iter().cloned().collect())
    }

    fn connect(&self, address: &str) -> Result<(), PlatformError> {
        self.log.begin(format!("audio:connect:{}", address));
        let event = if address == self.profile.address && self.profile.accept_connection {
            *lock(&self.connected) = Some(self.profile.device());
            AudioEvent::Connected {
                address: address.to_string(),
            }
        } else {
            AudioEvent::ConnectFailed {
                address: address.to_string(),
            }
        };
        self.dispatcher.deliver(event, true);
        Ok(())
    }

    fn disconnect(&self, address: &str) -> Result<(), PlatformError> {
        self.log.record(format!("audio:disconnect:{}", address));
        lock(&self.connected).take();
        self.dispatcher.deliver(
            AudioEvent::Disconnected {
                address: address.to_string(),
            },
            false,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    #[test]
    fn test_connect_audio_answers_twice() {
        let profile = SimulatedHeadset::default();
        let responses = profile.mailbox_responses(&[0x0A]);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0], vec![0x0A, 0x01]);
        assert_eq!(responses[1][..2], [0x0A, 0x00]);
        assert_eq!(responses[1].len(), 8);
    }

    #[test]
    fn test_unknown_and_rejected_commands() {
        let profile = SimulatedHeadset {
            rejected_commands: vec![MailboxCode::GetSystemStatus],
            ..Default::default()
        };
        assert_eq!(profile.mailbox_responses(&[0x02]), vec![vec![0xFF, 0x02]]);
        assert_eq!(profile.mailbox_responses(&[0x0C]), vec![vec![0xFF, 0x0C]]);
        assert!(profile.mailbox_responses(&[0x0D]).is_empty());
    }

    #[test]
    fn test_gatt_delivers_in_order() {
        let log = SimulationLog::new();
        let gatt = SimulatedGatt::new(SimulatedHeadset::default(), log.clone());
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);
        gatt.register_callback(Arc::new(move |event: GattEvent| {
            let _ = tx.lock().unwrap().send(event);
        }));

        gatt.connect_gatt("AA:BB:CC:DD:EE:01").unwrap();
        gatt.write_characteristic(MAILBOX_CHAR_UUID, &[0x0A]).unwrap();

        let timeout = Duration::from_secs(1);
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            GattEvent::ConnectionStateChanged {
                connected: true,
                status: GATT_SUCCESS
            }
        );
        assert!(matches!(
            rx.recv_timeout(timeout).unwrap(),
            GattEvent::CharacteristicChanged { value, .. } if value == vec![0x0A, 0x01]
        ));
        assert!(matches!(
            rx.recv_timeout(timeout).unwrap(),
            GattEvent::CharacteristicChanged { value, .. } if value[1] == 0x00
        ));
        assert_eq!(log.writes(), vec![vec![0x0A]]);
        assert_eq!(log.max_in_flight(), 2);
    }
}
