//! Serial-profile transport driver.
//!
//! Everything travels over one RFCOMM-style byte stream, so mailbox frames,
//! EEG samples and status measurements are wrapped in envelopes:
//!
//! ```text
//! [type: u8][length: u16 LE][frame bytes...]
//!   0x40 mailbox, 0x41 EEG data, 0x42 status measurement
//! ```
//!
//! Device information is queried with `GetDeviceInfo` mailbox frames.

use crate::domain::models::{InfoKind, ScannedDevice, Transport};
use crate::error::PlatformError;
use crate::infrastructure::bluetooth::driver::{
    initiated, BondState, DriverEvent, EventSink, Prerequisites, SinkSlot, TransportDriver,
};
use crate::infrastructure::bluetooth::protocol::{
    decode_info, info_kind_from_selector, info_selector, MailboxCode,
};
use crate::infrastructure::bluetooth::scanner::{ScanFilter, ScanSession};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, trace, warn};

pub const ENVELOPE_MAILBOX: u8 = 0x40;
pub const ENVELOPE_EEG: u8 = 0x41;
pub const ENVELOPE_STATUS: u8 = 0x42;

const HEADER_LEN: usize = 3;
const MAX_ENVELOPE_LEN: usize = 1024;

/// Wrap `frame` in an envelope of `kind`.
pub fn encode_envelope(kind: u8, frame: &[u8]) -> Vec<u8> {
    let length = frame.len().min(u16::MAX as usize) as u16;
    let mut bytes = Vec::with_capacity(HEADER_LEN + frame.len());
    bytes.push(kind);
    bytes.extend_from_slice(&length.to_le_bytes());
    bytes.extend_from_slice(&frame[..length as usize]);
    bytes
}

/// Rebuilds envelopes from arbitrarily chunked socket reads.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buffer: Vec<u8>,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every complete `(type, frame)` pair.
    ///
    /// Bytes that cannot start a known envelope are dropped one at a time
    /// until the stream lines up again.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<(u8, Vec<u8>)> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(&kind) = self.buffer.first() else {
                break;
            };
            if !matches!(kind, ENVELOPE_MAILBOX | ENVELOPE_EEG | ENVELOPE_STATUS) {
                trace!("Dropping stray byte {:#04X}", kind);
                self.buffer.remove(0);
                continue;
            }
            if self.buffer.len() < HEADER_LEN {
                break;
            }
            let length = u16::from_le_bytes([self.buffer[1], self.buffer[2]]) as usize;
            if length > MAX_ENVELOPE_LEN {
                warn!("Envelope length {} too large, resynchronizing", length);
                self.buffer.remove(0);
                continue;
            }
            if self.buffer.len() < HEADER_LEN + length {
                break;
            }
            let frame = self.buffer[HEADER_LEN..HEADER_LEN + length].to_vec();
            self.buffer.drain(..HEADER_LEN + length);
            frames.push((kind, frame));
        }

        frames
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Raw serial-profile callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    DeviceDiscovered(ScannedDevice),
    DiscoveryFinished,
    SocketConnected,
    SocketFailed(String),
    SocketClosed,
    Data(Vec<u8>),
    BondStateChanged(BondState),
}

pub type SerialCallback = Arc<dyn Fn(SerialEvent) + Send + Sync>;

pub trait SerialPlatform: Send + Sync {
    fn prerequisites(&self) -> Prerequisites;
    fn register_callback(&self, callback: SerialCallback);
    fn start_discovery(&self) -> Result<(), PlatformError>;
    fn cancel_discovery(&self);
    fn open_socket(&self, address: &str) -> Result<(), PlatformError>;
    fn close_socket(&self) -> Result<(), PlatformError>;
    fn write(&self, bytes: &[u8]) -> Result<(), PlatformError>;
    fn create_bond(&self, address: &str) -> Result<(), PlatformError>;
    fn bond_state(&self, address: &str) -> BondState;
}

struct SppShared<P> {
    platform: Arc<P>,
    sink: SinkSlot,
    scan: ScanSession,
    connected: AtomicBool,
    connecting: AtomicBool,
    streaming: AtomicBool,
    bonding: AtomicBool,
    reassembler: Mutex<FrameReassembler>,
}

impl<P: SerialPlatform> SppShared<P> {
    fn emit(&self, event: DriverEvent) {
        self.sink.emit(Transport::SerialProfile, event);
    }

    fn reassembler(&self) -> MutexGuard<'_, FrameReassembler> {
        match self.reassembler.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn handle(&self, event: SerialEvent) {
        match event {
            SerialEvent::DeviceDiscovered(device) => {
                if let Some(device) = self.scan.offer(device) {
                    self.emit(DriverEvent::DeviceFound(device));
                }
            }
            SerialEvent::DiscoveryFinished => {
                // Inquiry is time boxed by the platform; keep going until the
                // scheduler stops the scan.
                if self.scan.is_active() {
                    debug!("Inquiry finished without a match, restarting");
                    if !initiated("serial discovery", self.platform.start_discovery()) {
                        self.scan.end();
                        self.emit(DriverEvent::ScanFailed);
                    }
                }
            }
            SerialEvent::SocketConnected => {
                info!("Serial socket connected");
                self.connecting.store(false, Ordering::Release);
                self.reassembler().clear();
                self.connected.store(true, Ordering::Release);
                self.emit(DriverEvent::Connected);
            }
            SerialEvent::SocketFailed(reason) => {
                warn!("Serial socket failed: {}", reason);
                self.connecting.store(false, Ordering::Release);
                self.emit(DriverEvent::ConnectFailed);
            }
            SerialEvent::SocketClosed => {
                self.connecting.store(false, Ordering::Release);
                if self.streaming.swap(false, Ordering::AcqRel) {
                    self.emit(DriverEvent::StreamStopped);
                }
                if self.connected.swap(false, Ordering::AcqRel) {
                    info!("Serial socket closed");
                    self.emit(DriverEvent::Disconnected);
                }
            }
            SerialEvent::Data(chunk) => {
                let frames = self.reassembler().push(&chunk);
                for (kind, frame) in frames {
                    self.on_envelope(kind, frame);
                }
            }
            SerialEvent::BondStateChanged(BondState::Bonded) => {
                if self.bonding.swap(false, Ordering::AcqRel) {
                    self.emit(DriverEvent::Bonded);
                }
            }
            SerialEvent::BondStateChanged(BondState::None) => {
                if self.bonding.swap(false, Ordering::AcqRel) {
                    self.emit(DriverEvent::BondFailed);
                }
            }
            SerialEvent::BondStateChanged(BondState::Bonding) => {}
        }
    }

    fn on_envelope(&self, kind: u8, frame: Vec<u8>) {
        match kind {
            ENVELOPE_EEG => self.emit(DriverEvent::StreamData(frame)),
            ENVELOPE_STATUS => self.emit(DriverEvent::StatusMeasurement(frame)),
            _ => self.on_mailbox_frame(frame),
        }
    }

    /// Frames answering driver-level queries are consumed here; everything
    /// else goes to the command router.
    fn on_mailbox_frame(&self, frame: Vec<u8>) {
        let code = frame.first().copied().and_then(MailboxCode::from_u8);
        match code {
            Some(MailboxCode::GetDeviceInfo) => {
                let Some(kind) = frame.get(1).copied().and_then(info_kind_from_selector) else {
                    warn!("Device info response without a known selector");
                    return;
                };
                match decode_info(kind, &frame[2..]) {
                    Some(value) => self.emit(DriverEvent::InfoRead { kind, value }),
                    None => self.emit(DriverEvent::InfoReadFailed(kind)),
                }
            }
            Some(MailboxCode::StartStream) => {
                if frame.get(1) == Some(&0x00) {
                    self.streaming.store(true, Ordering::Release);
                    self.emit(DriverEvent::StreamStarted);
                } else {
                    self.emit(DriverEvent::StreamFailed);
                }
            }
            Some(MailboxCode::StopStream) => {
                self.streaming.store(false, Ordering::Release);
                self.emit(DriverEvent::StreamStopped);
            }
            _ => self.emit(DriverEvent::MailboxFrame(frame)),
        }
    }
}

pub struct SppDriver<P: SerialPlatform + 'static> {
    shared: Arc<SppShared<P>>,
    target: Option<ScannedDevice>,
}

impl<P: SerialPlatform + 'static> SppDriver<P> {
    pub fn new(platform: Arc<P>) -> Self {
        let shared = Arc::new(SppShared {
            platform: platform.clone(),
            sink: SinkSlot::default(),
            scan: ScanSession::new(),
            connected: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            bonding: AtomicBool::new(false),
            reassembler: Mutex::new(FrameReassembler::new()),
        });

        let weak: Weak<SppShared<P>> = Arc::downgrade(&shared);
        platform.register_callback(Arc::new(move |event: SerialEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.handle(event);
            }
        }));

        Self {
            shared,
            target: None,
        }
    }

    fn write_mailbox(&self, frame: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }
        initiated(
            "serial write",
            self.shared
                .platform
                .write(&encode_envelope(ENVELOPE_MAILBOX, frame)),
        )
    }
}

impl<P: SerialPlatform + 'static> TransportDriver for SppDriver<P> {
    fn transport(&self) -> Transport {
        Transport::SerialProfile
    }

    fn attach(&mut self, sink: EventSink) {
        self.shared.sink.set(sink);
    }

    fn prerequisites(&self) -> Prerequisites {
        self.shared.platform.prerequisites()
    }

    fn start_scan(&mut self, name_filter: Option<&str>, name_prefix: &str) -> bool {
        self.shared.scan.begin(ScanFilter::new(name_filter, name_prefix));
        let started = initiated("serial discovery", self.shared.platform.start_discovery());
        if !started {
            self.shared.scan.end();
        }
        started
    }

    fn stop_scan(&mut self) {
        if self.shared.scan.end() {
            self.shared.platform.cancel_discovery();
        }
    }

    fn connect(&mut self, target: &ScannedDevice) -> bool {
        info!("Opening serial socket to {}", target.address);
        self.target = Some(target.clone());
        self.shared.connecting.store(true, Ordering::Release);
        let started = initiated("serial connect", self.shared.platform.open_socket(&target.address));
        if !started {
            self.shared.connecting.store(false, Ordering::Release);
        }
        started
    }

    fn disconnect(&mut self) -> bool {
        if !self.is_connected() && !self.shared.connecting.load(Ordering::Acquire) {
            return false;
        }
        initiated("serial disconnect", self.shared.platform.close_socket())
    }

    fn discover_capabilities(&mut self) -> bool {
        // A serial link exposes everything once the socket is open.
        if !self.is_connected() {
            return false;
        }
        self.shared.emit(DriverEvent::CapabilitiesDiscovered);
        true
    }

    fn read_info(&mut self, kind: InfoKind) -> bool {
        self.write_mailbox(&[MailboxCode::GetDeviceInfo.as_u8(), info_selector(kind)])
    }

    fn bond(&mut self) -> bool {
        let Some(target) = self.target.clone() else {
            return false;
        };
        if self.is_bonded() {
            self.shared.emit(DriverEvent::Bonded);
            return true;
        }
        self.shared.bonding.store(true, Ordering::Release);
        let started = initiated("bonding", self.shared.platform.create_bond(&target.address));
        if !started {
            self.shared.bonding.store(false, Ordering::Release);
        }
        started
    }

    fn is_bonded(&self) -> bool {
        self.target
            .as_ref()
            .map_or(false, |t| self.shared.platform.bond_state(&t.address) == BondState::Bonded)
    }

    fn write_command(&mut self, frame: &[u8]) -> bool {
        self.write_mailbox(frame)
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::Acquire)
    }

    fn start_stream(&mut self, monitor_status: bool) -> bool {
        self.write_mailbox(&[MailboxCode::StartStream.as_u8(), monitor_status as u8])
    }

    fn stop_stream(&mut self) -> bool {
        self.write_mailbox(&[MailboxCode::StopStream.as_u8()])
    }
}
