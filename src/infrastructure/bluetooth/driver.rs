//! Transport driver abstraction.
//!
//! A driver owns one physical link. Every `bool` it returns reports whether
//! the operation was *started*; completion arrives later as a
//! [`DriverEvent`] delivered to the sink the driver was attached to.

use crate::domain::models::{InfoKind, ScannedDevice, Transport};
use crate::domain::settings::LinkSettings;
use crate::error::{LinkError, PlatformError};
use std::sync::{Arc, Mutex};
use tracing::{trace, warn};

/// Completion and data events translated from platform callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    DeviceFound(ScannedDevice),
    ScanFailed,
    Connected,
    ConnectFailed,
    Disconnected,
    CapabilitiesDiscovered,
    DiscoveryFailed,
    InfoRead { kind: InfoKind, value: String },
    InfoReadFailed(InfoKind),
    Bonded,
    BondFailed,
    StreamStarted,
    StreamStopped,
    StreamFailed,
    StatusMeasurement(Vec<u8>),
    StreamData(Vec<u8>),
    MailboxFrame(Vec<u8>),
    AudioConnected(String),
    AudioDisconnected,
}

pub type EventSink = Arc<dyn Fn(Transport, DriverEvent) + Send + Sync>;

/// Late-bound event sink shared between a driver and its platform callbacks.
#[derive(Clone, Default)]
pub struct SinkSlot {
    sink: Arc<Mutex<Option<EventSink>>>,
}

impl SinkSlot {
    pub fn set(&self, sink: EventSink) {
        match self.sink.lock() {
            Ok(mut slot) => *slot = Some(sink),
            Err(poisoned) => *poisoned.into_inner() = Some(sink),
        }
    }

    pub fn emit(&self, transport: Transport, event: DriverEvent) {
        let sink = match self.sink.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match sink {
            Some(sink) => sink(transport, event),
            None => trace!("No sink attached, dropping {:?}", event),
        }
    }
}

/// Platform bond state of the target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

/// Collapse a platform call result into "operation started".
///
/// Platform failures stop at the driver boundary; they are logged here and
/// surface to the scheduler only as a `false` return.
pub(crate) fn initiated(operation: &str, result: Result<(), PlatformError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("{} could not be started: {}", operation, e);
            false
        }
    }
}

/// Environment facts checked before any radio operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prerequisites {
    pub adapter_present: bool,
    pub adapter_enabled: bool,
    pub location_enabled: bool,
    pub permission_granted: bool,
    /// Name of a headset already linked at the platform level, if any.
    pub connected_headset: Option<String>,
}

impl Default for Prerequisites {
    fn default() -> Self {
        Self {
            adapter_present: true,
            adapter_enabled: true,
            location_enabled: true,
            permission_granted: true,
            connected_headset: None,
        }
    }
}

impl Prerequisites {
    /// First unmet prerequisite, in the order a user would have to fix them.
    ///
    /// A headset connected elsewhere only counts when it is not the one the
    /// settings target.
    pub fn check(&self, settings: &LinkSettings) -> Result<(), LinkError> {
        if !self.adapter_present {
            return Err(LinkError::AdapterUnavailable);
        }
        if !self.adapter_enabled {
            return Err(LinkError::AdapterDisabled);
        }
        if !self.permission_granted {
            return Err(LinkError::PermissionDenied);
        }
        if !self.location_enabled {
            return Err(LinkError::LocationDisabled);
        }
        if let Some(other) = &self.connected_headset {
            let targeted = settings
                .device_name_filter
                .as_deref()
                .map_or(false, |filter| filter == other);
            if !targeted {
                return Err(LinkError::AnotherDeviceConnected(other.clone()));
            }
        }
        Ok(())
    }
}

pub trait TransportDriver: Send {
    fn transport(&self) -> Transport;

    /// Route this driver's events to `sink`. Called once before use.
    fn attach(&mut self, sink: EventSink);

    fn prerequisites(&self) -> Prerequisites;

    fn start_scan(&mut self, name_filter: Option<&str>, name_prefix: &str) -> bool;
    fn stop_scan(&mut self);

    fn connect(&mut self, target: &ScannedDevice) -> bool;
    fn disconnect(&mut self) -> bool;

    fn discover_capabilities(&mut self) -> bool;
    fn read_info(&mut self, kind: InfoKind) -> bool;

    /// Start bonding. Completion is `Bonded` or `BondFailed`.
    fn bond(&mut self) -> bool;
    fn is_bonded(&self) -> bool;

    /// Write one serialized mailbox frame.
    fn write_command(&mut self, frame: &[u8]) -> bool;

    fn is_connected(&self) -> bool;
    fn is_streaming(&self) -> bool;
    fn start_stream(&mut self, monitor_status: bool) -> bool;
    fn stop_stream(&mut self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prerequisite_order() {
        let settings = LinkSettings::default();
        let mut prerequisites = Prerequisites::default();
        assert_eq!(prerequisites.check(&settings), Ok(()));

        prerequisites.location_enabled = false;
        assert_eq!(prerequisites.check(&settings), Err(LinkError::LocationDisabled));

        prerequisites.adapter_enabled = false;
        assert_eq!(prerequisites.check(&settings), Err(LinkError::AdapterDisabled));

        prerequisites.adapter_present = false;
        assert_eq!(prerequisites.check(&settings), Err(LinkError::AdapterUnavailable));
    }

    #[test]
    fn test_other_headset_blocks_unless_targeted() {
        let mut settings = LinkSettings::default();
        let prerequisites = Prerequisites {
            connected_headset: Some("melo_0001".to_string()),
            ..Default::default()
        };
        assert_eq!(
            prerequisites.check(&settings),
            Err(LinkError::AnotherDeviceConnected("melo_0001".to_string()))
        );

        settings.device_name_filter = Some("melo_0001".to_string());
        assert_eq!(prerequisites.check(&settings), Ok(()));
    }

    #[test]
    fn test_initiated_swallows_platform_errors() {
        assert!(initiated("scan", Ok(())));
        assert!(!initiated(
            "scan",
            Err(PlatformError::CallFailed("radio busy".to_string()))
        ));
    }

    #[test]
    fn test_sink_slot_forwards_after_set() {
        let slot = SinkSlot::default();
        slot.emit(Transport::LowEnergy, DriverEvent::Connected);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        slot.set(Arc::new(move |transport: Transport, event: DriverEvent| {
            recorder.lock().unwrap().push((transport, event));
        }));
        slot.emit(Transport::LowEnergy, DriverEvent::Connected);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Transport::LowEnergy, DriverEvent::Connected)]
        );
    }
}
