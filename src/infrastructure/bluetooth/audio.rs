//! Audio-profile transport driver and connection monitor.
//!
//! The platform's audio connect entry point is hidden on most stacks; the
//! [`AudioPlatform`] trait is where a binding reaches it, and any failure it
//! reports stays inside this driver.

use crate::domain::models::{InfoKind, ScannedDevice, Transport};
use crate::domain::state::{ConnectionState, StateCell};
use crate::error::PlatformError;
use crate::infrastructure::bluetooth::driver::{
    initiated, DriverEvent, EventSink, Prerequisites, SinkSlot, TransportDriver,
};
use crate::infrastructure::bluetooth::scanner::{ScanFilter, ScanSession};
use crate::infrastructure::sync::WaitHandle;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    Connected { address: String },
    ConnectFailed { address: String },
    Disconnected { address: String },
}

pub type AudioCallback = Arc<dyn Fn(AudioEvent) + Send + Sync>;

pub trait AudioPlatform: Send + Sync {
    fn prerequisites(&self) -> Prerequisites;
    fn register_callback(&self, callback: AudioCallback);
    /// Devices currently connected on the audio profile.
    fn connected_devices(&self) -> Result<Vec<ScannedDevice>, PlatformError>;
    fn connect(&self, address: &str) -> Result<(), PlatformError>;
    fn disconnect(&self, address: &str) -> Result<(), PlatformError>;
}

#[derive(Debug, Default)]
struct Link {
    connected: Option<String>,
    requested: Option<String>,
}

struct AudioShared<P> {
    platform: Arc<P>,
    sink: SinkSlot,
    link: Mutex<Link>,
}

impl<P: AudioPlatform> AudioShared<P> {
    fn emit(&self, event: DriverEvent) {
        self.sink.emit(Transport::AudioProfile, event);
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        match self.link.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn handle(&self, event: AudioEvent) {
        match event {
            AudioEvent::Connected { address } => self.adopt(address),
            AudioEvent::ConnectFailed { address } => {
                let mut link = self.link();
                if link.requested.as_deref() == Some(address.as_str()) {
                    link.requested = None;
                    drop(link);
                    warn!("Audio connection to {} failed", address);
                    self.emit(DriverEvent::ConnectFailed);
                }
            }
            AudioEvent::Disconnected { address } => self.release(&address),
        }
    }

    /// Record `address` as the connected audio device, once.
    fn adopt(&self, address: String) {
        let mut link = self.link();
        link.requested = None;
        if link.connected.as_deref() == Some(address.as_str()) {
            return;
        }
        link.connected = Some(address.clone());
        drop(link);
        info!("Audio connected to {}", address);
        self.emit(DriverEvent::AudioConnected(address));
    }

    fn release(&self, address: &str) {
        let mut link = self.link();
        if link.connected.as_deref() != Some(address) {
            return;
        }
        link.connected = None;
        drop(link);
        info!("Audio disconnected from {}", address);
        self.emit(DriverEvent::AudioDisconnected);
    }
}

pub struct AudioDriver<P: AudioPlatform + 'static> {
    shared: Arc<AudioShared<P>>,
    scan: ScanSession,
}

impl<P: AudioPlatform + 'static> AudioDriver<P> {
    pub fn new(platform: Arc<P>) -> Self {
        let shared = Arc::new(AudioShared {
            platform: platform.clone(),
            sink: SinkSlot::default(),
            link: Mutex::new(Link::default()),
        });

        let weak: Weak<AudioShared<P>> = Arc::downgrade(&shared);
        platform.register_callback(Arc::new(move |event: AudioEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.handle(event);
            }
        }));

        Self {
            shared,
            scan: ScanSession::new(),
        }
    }

    pub fn connected_address(&self) -> Option<String> {
        self.shared.link().connected.clone()
    }

    /// Start polling the platform's connected-device list.
    ///
    /// Audio links that appear or vanish without a request from this driver
    /// are reported as `AudioConnected` / `AudioDisconnected`. While audio is
    /// up but the primary link has failed (other than by user interruption),
    /// `reconnect` is called, at most `config.max_retries` times until the
    /// primary link is ready again.
    pub fn spawn_monitor(
        &self,
        config: MonitorConfig,
        primary: Arc<StateCell>,
        reconnect: Box<dyn Fn() + Send>,
    ) -> std::io::Result<AudioMonitor> {
        let stop = Arc::new(WaitHandle::new());
        let shared = self.shared.clone();
        let stop_signal = stop.clone();
        let handle = std::thread::Builder::new()
            .name("audio-monitor".to_string())
            .spawn(move || {
                let mut poller = MonitorLoop {
                    shared,
                    config,
                    primary,
                    reconnect,
                    retries: 0,
                };
                info!("Audio monitor started");
                // A stop notification ends the loop; a timeout means "poll again".
                while stop_signal.wait(poller.config.interval).is_none() {
                    poller.poll();
                }
                info!("Audio monitor stopped");
            })?;

        Ok(AudioMonitor {
            stop,
            handle: Some(handle),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub max_retries: u32,
    pub filter: ScanFilter,
}

struct MonitorLoop<P> {
    shared: Arc<AudioShared<P>>,
    config: MonitorConfig,
    primary: Arc<StateCell>,
    reconnect: Box<dyn Fn() + Send>,
    retries: u32,
}

impl<P: AudioPlatform> MonitorLoop<P> {
    fn poll(&mut self) {
        let devices = match self.shared.platform.connected_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Audio device list unavailable: {}", e);
                return;
            }
        };
        let headset = devices
            .into_iter()
            .find(|device| self.config.filter.matches(&device.name));

        let (known, requested) = {
            let link = self.shared.link();
            (link.connected.clone(), link.requested.is_some())
        };
        match (&headset, known) {
            (Some(device), None) if !requested => {
                debug!("Audio link to {} appeared without a request", device.address);
                self.shared.adopt(device.address.clone());
            }
            (None, Some(address)) => self.shared.release(&address),
            _ => {}
        }

        let primary = self.primary.get();
        if primary == ConnectionState::ReadyForUse {
            self.retries = 0;
        } else if headset.is_some()
            && primary.is_failure()
            && primary != ConnectionState::ConnectionInterrupted
        {
            if self.retries < self.config.max_retries {
                self.retries += 1;
                info!(
                    "Audio connected but primary link is {}, reconnecting (attempt {}/{})",
                    primary, self.retries, self.config.max_retries
                );
                (self.reconnect)();
            } else if self.retries == self.config.max_retries {
                self.retries += 1;
                warn!("Primary reconnection attempts exhausted");
            }
        }
    }
}

/// Background poller; stopped and joined on drop.
pub struct AudioMonitor {
    stop: Arc<WaitHandle<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AudioMonitor {
    pub fn stop(&mut self) {
        self.stop.notify(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Audio monitor thread panicked");
            }
        }
    }
}

impl Drop for AudioMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<P: AudioPlatform + 'static> TransportDriver for AudioDriver<P> {
    fn transport(&self) -> Transport {
        Transport::AudioProfile
    }

    fn attach(&mut self, sink: EventSink) {
        self.shared.sink.set(sink);
    }

    fn prerequisites(&self) -> Prerequisites {
        self.shared.platform.prerequisites()
    }

    /// Audio devices are found among those the platform already knows.
    fn start_scan(&mut self, name_filter: Option<&str>, name_prefix: &str) -> bool {
        self.scan.begin(ScanFilter::new(name_filter, name_prefix));
        let devices = match self.shared.platform.connected_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Audio device list unavailable: {}", e);
                self.scan.end();
                return false;
            }
        };
        if let Some(device) = devices.into_iter().find_map(|d| self.scan.offer(d)) {
            self.shared.emit(DriverEvent::DeviceFound(device));
        }
        true
    }

    fn stop_scan(&mut self) {
        self.scan.end();
    }

    fn connect(&mut self, target: &ScannedDevice) -> bool {
        if self.connected_address().as_deref() == Some(target.address.as_str()) {
            self.shared.emit(DriverEvent::AudioConnected(target.address.clone()));
            return true;
        }
        info!("Connecting audio to {}", target.address);
        self.shared.link().requested = Some(target.address.clone());
        let started = initiated("audio connect", self.shared.platform.connect(&target.address));
        if !started {
            self.shared.link().requested = None;
        }
        started
    }

    fn disconnect(&mut self) -> bool {
        let Some(address) = self.connected_address() else {
            return false;
        };
        initiated("audio disconnect", self.shared.platform.disconnect(&address))
    }

    fn discover_capabilities(&mut self) -> bool {
        self.shared.emit(DriverEvent::CapabilitiesDiscovered);
        true
    }

    fn read_info(&mut self, kind: InfoKind) -> bool {
        warn!("{:?} cannot be read over the audio profile", kind);
        false
    }

    fn bond(&mut self) -> bool {
        // Audio connections are bonded by the platform when they are made.
        self.shared.emit(DriverEvent::Bonded);
        true
    }

    fn is_bonded(&self) -> bool {
        self.connected_address().is_some()
    }

    fn write_command(&mut self, _frame: &[u8]) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        self.connected_address().is_some()
    }

    fn is_streaming(&self) -> bool {
        false
    }

    fn start_stream(&mut self, _monitor_status: bool) -> bool {
        false
    }

    fn stop_stream(&mut self) -> bool {
        false
    }
}
