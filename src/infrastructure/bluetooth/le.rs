//! Low-energy (GATT) transport driver.
//!
//! Translates GATT callbacks from a [`GattPlatform`] into [`DriverEvent`]s.
//! Capability discovery counts as done once the required services are present
//! and mailbox notifications are enabled.

use crate::domain::models::{InfoKind, ScannedDevice, Transport};
use crate::error::PlatformError;
use crate::infrastructure::bluetooth::driver::{
    initiated, BondState, DriverEvent, EventSink, Prerequisites, SinkSlot, TransportDriver,
};
use crate::infrastructure::bluetooth::protocol::{
    decode_info, info_characteristic, info_kind_for, EEG_CHAR_UUID, HEADSET_STATUS_CHAR_UUID,
    MAILBOX_CHAR_UUID, REQUIRED_SERVICES,
};
use crate::infrastructure::bluetooth::scanner::{ScanFilter, ScanSession};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const GATT_SUCCESS: i32 = 0;

/// Raw GATT callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    ScanResult(ScannedDevice),
    ScanFailed(i32),
    ConnectionStateChanged {
        connected: bool,
        status: i32,
    },
    ServicesDiscovered {
        status: i32,
        services: Vec<Uuid>,
    },
    CharacteristicRead {
        characteristic: Uuid,
        status: i32,
        value: Vec<u8>,
    },
    CharacteristicChanged {
        characteristic: Uuid,
        value: Vec<u8>,
    },
    DescriptorWritten {
        characteristic: Uuid,
        status: i32,
        enabled: bool,
    },
    BondStateChanged(BondState),
}

pub type GattCallback = Arc<dyn Fn(GattEvent) + Send + Sync>;

/// Platform GATT client. Every call only starts the operation; results come
/// back through the registered callback.
pub trait GattPlatform: Send + Sync {
    fn prerequisites(&self) -> Prerequisites;
    fn register_callback(&self, callback: GattCallback);
    fn start_scan(&self) -> Result<(), PlatformError>;
    fn stop_scan(&self);
    fn connect_gatt(&self, address: &str) -> Result<(), PlatformError>;
    fn disconnect_gatt(&self) -> Result<(), PlatformError>;
    fn discover_services(&self) -> Result<(), PlatformError>;
    fn read_characteristic(&self, characteristic: Uuid) -> Result<(), PlatformError>;
    fn write_characteristic(&self, characteristic: Uuid, value: &[u8])
        -> Result<(), PlatformError>;
    fn set_notifications(&self, characteristic: Uuid, enable: bool) -> Result<(), PlatformError>;
    fn create_bond(&self) -> Result<(), PlatformError>;
    fn bond_state(&self) -> BondState;
}

/// Descriptor writes still to perform for a stream start or stop.
#[derive(Debug)]
struct NotificationChain {
    enable: bool,
    remaining: VecDeque<Uuid>,
}

struct LeShared<P> {
    platform: Arc<P>,
    sink: SinkSlot,
    scan: ScanSession,
    connected: AtomicBool,
    connecting: AtomicBool,
    discovering: AtomicBool,
    bonding: AtomicBool,
    streaming: AtomicBool,
    chain: Mutex<Option<NotificationChain>>,
}

impl<P: GattPlatform> LeShared<P> {
    fn emit(&self, event: DriverEvent) {
        self.sink.emit(Transport::LowEnergy, event);
    }

    fn chain(&self) -> MutexGuard<'_, Option<NotificationChain>> {
        match self.chain.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn handle(&self, event: GattEvent) {
        match event {
            GattEvent::ScanResult(device) => {
                if let Some(device) = self.scan.offer(device) {
                    self.emit(DriverEvent::DeviceFound(device));
                }
            }
            GattEvent::ScanFailed(code) => {
                warn!("LE scan failed with status {}", code);
                self.scan.end();
                self.emit(DriverEvent::ScanFailed);
            }
            GattEvent::ConnectionStateChanged { connected, status } => {
                self.on_connection_state(connected, status)
            }
            GattEvent::ServicesDiscovered { status, services } => {
                self.on_services_discovered(status, &services)
            }
            GattEvent::CharacteristicRead {
                characteristic,
                status,
                value,
            } => self.on_characteristic_read(characteristic, status, &value),
            GattEvent::CharacteristicChanged {
                characteristic,
                value,
            } => match characteristic {
                c if c == MAILBOX_CHAR_UUID => self.emit(DriverEvent::MailboxFrame(value)),
                c if c == EEG_CHAR_UUID => self.emit(DriverEvent::StreamData(value)),
                c if c == HEADSET_STATUS_CHAR_UUID => {
                    self.emit(DriverEvent::StatusMeasurement(value))
                }
                other => debug!("Ignoring notification from {}", other),
            },
            GattEvent::DescriptorWritten {
                characteristic,
                status,
                enabled,
            } => self.on_descriptor_written(characteristic, status, enabled),
            GattEvent::BondStateChanged(state) => self.on_bond_state(state),
        }
    }

    fn on_connection_state(&self, connected: bool, status: i32) {
        self.connecting.store(false, Ordering::Release);
        if connected && status == GATT_SUCCESS {
            info!("GATT connected");
            self.connected.store(true, Ordering::Release);
            self.emit(DriverEvent::Connected);
            return;
        }

        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        self.discovering.store(false, Ordering::Release);
        self.chain().take();
        if self.streaming.swap(false, Ordering::AcqRel) {
            self.emit(DriverEvent::StreamStopped);
        }
        if was_connected {
            info!("GATT disconnected (status {})", status);
            self.emit(DriverEvent::Disconnected);
        } else {
            warn!("GATT connection failed (status {})", status);
            self.emit(DriverEvent::ConnectFailed);
        }
    }

    fn on_services_discovered(&self, status: i32, services: &[Uuid]) {
        if !self.discovering.load(Ordering::Acquire) {
            return;
        }
        let missing: Vec<&Uuid> = REQUIRED_SERVICES
            .iter()
            .filter(|required| !services.contains(required))
            .collect();
        if status != GATT_SUCCESS || !missing.is_empty() {
            warn!(
                "Service discovery failed (status {}, missing {:?})",
                status, missing
            );
            self.discovering.store(false, Ordering::Release);
            self.emit(DriverEvent::DiscoveryFailed);
            return;
        }
        debug!("Required services present, enabling mailbox notifications");
        if !initiated(
            "mailbox subscription",
            self.platform.set_notifications(MAILBOX_CHAR_UUID, true),
        ) {
            self.discovering.store(false, Ordering::Release);
            self.emit(DriverEvent::DiscoveryFailed);
        }
    }

    fn on_characteristic_read(&self, characteristic: Uuid, status: i32, value: &[u8]) {
        let Some(kind) = info_kind_for(characteristic) else {
            debug!("Ignoring read of {}", characteristic);
            return;
        };
        match decode_info(kind, value) {
            Some(value) if status == GATT_SUCCESS => {
                self.emit(DriverEvent::InfoRead { kind, value })
            }
            _ => {
                warn!("Read of {:?} failed (status {})", kind, status);
                self.emit(DriverEvent::InfoReadFailed(kind));
            }
        }
    }

    fn on_descriptor_written(&self, characteristic: Uuid, status: i32, enabled: bool) {
        if characteristic == MAILBOX_CHAR_UUID {
            if self.discovering.swap(false, Ordering::AcqRel) {
                if status == GATT_SUCCESS && enabled {
                    info!("Capabilities discovered");
                    self.emit(DriverEvent::CapabilitiesDiscovered);
                } else {
                    self.emit(DriverEvent::DiscoveryFailed);
                }
            }
            return;
        }

        let mut chain = self.chain();
        let Some(current) = chain.as_mut() else {
            return;
        };
        if current.remaining.front() != Some(&characteristic) {
            return;
        }
        let enable = current.enable;
        if status != GATT_SUCCESS || enabled != enable {
            warn!("Notification change on {} failed (status {})", characteristic, status);
            chain.take();
            drop(chain);
            self.emit(DriverEvent::StreamFailed);
            return;
        }

        current.remaining.pop_front();
        let next = current.remaining.front().copied();
        match next {
            Some(next) => {
                drop(chain);
                if !initiated("notification change", self.platform.set_notifications(next, enable)) {
                    self.chain().take();
                    self.emit(DriverEvent::StreamFailed);
                }
            }
            None => {
                chain.take();
                drop(chain);
                self.streaming.store(enable, Ordering::Release);
                self.emit(if enable {
                    DriverEvent::StreamStarted
                } else {
                    DriverEvent::StreamStopped
                });
            }
        }
    }

    fn on_bond_state(&self, state: BondState) {
        match state {
            BondState::Bonded if self.bonding.swap(false, Ordering::AcqRel) => {
                info!("Headset bonded");
                self.emit(DriverEvent::Bonded);
            }
            BondState::None if self.bonding.swap(false, Ordering::AcqRel) => {
                warn!("Bonding rejected");
                self.emit(DriverEvent::BondFailed);
            }
            other => debug!("Bond state {:?}", other),
        }
    }
}

pub struct LeDriver<P: GattPlatform + 'static> {
    shared: Arc<LeShared<P>>,
}

impl<P: GattPlatform + 'static> LeDriver<P> {
    pub fn new(platform: Arc<P>) -> Self {
        let shared = Arc::new(LeShared {
            platform: platform.clone(),
            sink: SinkSlot::default(),
            scan: ScanSession::new(),
            connected: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            discovering: AtomicBool::new(false),
            bonding: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            chain: Mutex::new(None),
        });

        // The platform holds the callback, so it must not keep the driver alive.
        let weak: Weak<LeShared<P>> = Arc::downgrade(&shared);
        platform.register_callback(Arc::new(move |event: GattEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.handle(event);
            }
        }));

        Self { shared }
    }

    fn start_notification_chain(&mut self, enable: bool, characteristics: Vec<Uuid>) -> bool {
        let Some(first) = characteristics.first().copied() else {
            return false;
        };
        *self.shared.chain() = Some(NotificationChain {
            enable,
            remaining: characteristics.into(),
        });
        let started = initiated(
            "notification change",
            self.shared.platform.set_notifications(first, enable),
        );
        if !started {
            self.shared.chain().take();
        }
        started
    }
}

impl<P: GattPlatform + 'static> TransportDriver for LeDriver<P> {
    fn transport(&self) -> Transport {
        Transport::LowEnergy
    }

    fn attach(&mut self, sink: EventSink) {
        self.shared.sink.set(sink);
    }

    fn prerequisites(&self) -> Prerequisites {
        self.shared.platform.prerequisites()
    }

    fn start_scan(&mut self, name_filter: Option<&str>, name_prefix: &str) -> bool {
        self.shared.scan.begin(ScanFilter::new(name_filter, name_prefix));
        let started = initiated("LE scan", self.shared.platform.start_scan());
        if !started {
            self.shared.scan.end();
        }
        started
    }

    fn stop_scan(&mut self) {
        if self.shared.scan.end() {
            self.shared.platform.stop_scan();
        }
    }

    fn connect(&mut self, target: &ScannedDevice) -> bool {
        info!("Connecting GATT to {}", target.address);
        self.shared.connecting.store(true, Ordering::Release);
        let started = initiated("GATT connect", self.shared.platform.connect_gatt(&target.address));
        if !started {
            self.shared.connecting.store(false, Ordering::Release);
        }
        started
    }

    /// Closes the link, or abandons a connect that is still pending.
    fn disconnect(&mut self) -> bool {
        if !self.shared.connected.load(Ordering::Acquire)
            && !self.shared.connecting.load(Ordering::Acquire)
        {
            return false;
        }
        initiated("GATT disconnect", self.shared.platform.disconnect_gatt())
    }

    fn discover_capabilities(&mut self) -> bool {
        self.shared.discovering.store(true, Ordering::Release);
        let started = initiated("service discovery", self.shared.platform.discover_services());
        if !started {
            self.shared.discovering.store(false, Ordering::Release);
        }
        started
    }

    fn read_info(&mut self, kind: InfoKind) -> bool {
        match info_characteristic(kind) {
            Some(characteristic) => initiated(
                "characteristic read",
                self.shared.platform.read_characteristic(characteristic),
            ),
            None => {
                warn!("{:?} cannot be read over GATT", kind);
                false
            }
        }
    }

    fn bond(&mut self) -> bool {
        if self.is_bonded() {
            self.shared.emit(DriverEvent::Bonded);
            return true;
        }
        self.shared.bonding.store(true, Ordering::Release);
        let started = initiated("bonding", self.shared.platform.create_bond());
        if !started {
            self.shared.bonding.store(false, Ordering::Release);
        }
        started
    }

    fn is_bonded(&self) -> bool {
        self.shared.platform.bond_state() == BondState::Bonded
    }

    fn write_command(&mut self, frame: &[u8]) -> bool {
        initiated(
            "mailbox write",
            self.shared
                .platform
                .write_characteristic(MAILBOX_CHAR_UUID, frame),
        )
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::Acquire)
    }

    fn start_stream(&mut self, monitor_status: bool) -> bool {
        let mut characteristics = Vec::with_capacity(2);
        if monitor_status {
            characteristics.push(HEADSET_STATUS_CHAR_UUID);
        }
        characteristics.push(EEG_CHAR_UUID);
        self.start_notification_chain(true, characteristics)
    }

    fn stop_stream(&mut self) -> bool {
        self.start_notification_chain(false, vec![EEG_CHAR_UUID, HEADSET_STATUS_CHAR_UUID])
    }
}
