//! Registry of what is known about the connected headset.
//!
//! Written only by the connection core when device information arrives;
//! everything else reads snapshots.

use crate::domain::models::{ConnectedDeviceInfo, InfoKind, ScannedDevice};
use std::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    info: RwLock<ConnectedDeviceInfo>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current device information.
    pub fn snapshot(&self) -> ConnectedDeviceInfo {
        match self.info.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn record_target(&self, device: &ScannedDevice) {
        self.update(|info| {
            info.device_name = Some(device.name.clone());
            info.address = Some(device.address.clone());
        });
    }

    /// Store a received value. Battery values that are not a percentage are dropped.
    pub(crate) fn record(&self, kind: InfoKind, value: &str) {
        debug!("Registry update {:?} = {}", kind, value);
        self.update(|info| match kind {
            InfoKind::FirmwareVersion => info.firmware_version = Some(value.to_string()),
            InfoKind::HardwareVersion => info.hardware_version = Some(value.to_string()),
            InfoKind::SerialNumber => info.serial_number = Some(value.to_string()),
            InfoKind::ModelNumber => info.model_number = Some(value.to_string()),
            InfoKind::ExternalName => info.external_name = Some(value.to_string()),
            InfoKind::Battery => match value.parse::<u8>() {
                Ok(level) if level <= 100 => info.battery_level = Some(level),
                _ => warn!("Ignoring invalid battery level: {}", value),
            },
            InfoKind::AudioAddress => info.audio_address = Some(value.to_string()),
        });
    }

    pub(crate) fn clear_audio(&self) {
        self.update(|info| info.audio_address = None);
    }

    pub(crate) fn clear(&self) {
        self.update(|info| *info = ConnectedDeviceInfo::default());
    }

    fn update(&self, apply: impl FnOnce(&mut ConnectedDeviceInfo)) {
        match self.info.write() {
            Ok(mut guard) => apply(&mut guard),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let registry = DeviceRegistry::new();
        registry.record(InfoKind::FirmwareVersion, "1.7.4");
        registry.record(InfoKind::SerialNumber, "2220100001");
        registry.record(InfoKind::Battery, "85");

        let info = registry.snapshot();
        assert_eq!(info.firmware_version.as_deref(), Some("1.7.4"));
        assert_eq!(info.serial_number.as_deref(), Some("2220100001"));
        assert_eq!(info.battery_level, Some(85));
        assert_eq!(info.value(InfoKind::Battery).as_deref(), Some("85"));
    }

    #[test]
    fn test_invalid_battery_is_ignored() {
        let registry = DeviceRegistry::new();
        registry.record(InfoKind::Battery, "140");
        registry.record(InfoKind::Battery, "full");
        assert_eq!(registry.snapshot().battery_level, None);
    }

    #[test]
    fn test_clear_resets_everything() {
        let registry = DeviceRegistry::new();
        registry.record_target(&ScannedDevice {
            name: "melo_1".to_string(),
            address: "00:11:22:33:44:55".to_string(),
            signal_strength: -60,
        });
        registry.record(InfoKind::AudioAddress, "00:11:22:33:44:56");
        registry.clear_audio();
        assert_eq!(registry.snapshot().audio_address, None);
        assert_eq!(registry.snapshot().device_name.as_deref(), Some("melo_1"));

        registry.clear();
        assert_eq!(registry.snapshot(), ConnectedDeviceInfo::default());
    }
}
