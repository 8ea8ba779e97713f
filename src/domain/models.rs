use crate::domain::state::ConnectionState;
use crate::error::LinkError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Physical link type owned by a transport driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    /// Connection-oriented low-power transport (GATT).
    #[serde(rename = "le")]
    LowEnergy,
    /// Legacy serial-profile transport.
    #[serde(rename = "spp")]
    SerialProfile,
    /// Audio-streaming transport.
    #[serde(rename = "audio")]
    AudioProfile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub name: String,
    pub address: String,
    pub signal_strength: i16,
}

/// Piece of device information the core can read or learn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoKind {
    FirmwareVersion,
    HardwareVersion,
    SerialNumber,
    ModelNumber,
    ExternalName,
    Battery,
    AudioAddress,
}

impl InfoKind {
    /// Reads performed during the handshake, in order.
    pub const HANDSHAKE_READS: [InfoKind; 4] = [
        InfoKind::FirmwareVersion,
        InfoKind::HardwareVersion,
        InfoKind::SerialNumber,
        InfoKind::ModelNumber,
    ];

    /// Whether a `Read` request may target this kind.
    pub fn is_readable(&self) -> bool {
        !matches!(self, InfoKind::ExternalName | InfoKind::AudioAddress)
    }
}

/// Dotted firmware version, e.g. `1.7.4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FirmwareVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl FirmwareVersion {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// `true` when this version is at least `gate`.
    pub fn supports(&self, gate: &FirmwareVersion) -> bool {
        self >= gate
    }
}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl FromStr for FirmwareVersion {
    type Err = String;

    /// Accepts `1.7.4`, `v1.7`, `1.7.4-beta` and `1_7_4`. Missing segments are zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches(['v', 'V']);
        let mut parts = [0u16; 3];
        let mut count = 0;
        for segment in trimmed.split(['.', '_']).take(3) {
            let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                break;
            }
            parts[count] = digits
                .parse()
                .map_err(|_| format!("firmware segment out of range: {}", segment))?;
            count += 1;
        }
        if count == 0 {
            return Err(format!("not a firmware version: {:?}", s));
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for FirmwareVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FirmwareVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// What the core knows about the connected headset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectedDeviceInfo {
    pub device_name: Option<String>,
    pub address: Option<String>,
    pub firmware_version: Option<String>,
    pub hardware_version: Option<String>,
    pub serial_number: Option<String>,
    pub model_number: Option<String>,
    pub external_name: Option<String>,
    pub battery_level: Option<u8>,
    pub audio_address: Option<String>,
}

impl ConnectedDeviceInfo {
    /// Parsed firmware version, if one was read and is well formed.
    pub fn firmware(&self) -> Option<FirmwareVersion> {
        self.firmware_version.as_deref().and_then(|v| v.parse().ok())
    }

    /// Whether the firmware satisfies `gate`. Unknown firmware never does.
    pub fn firmware_supports(&self, gate: &FirmwareVersion) -> bool {
        self.firmware().map(|fw| fw.supports(gate)).unwrap_or(false)
    }

    pub fn value(&self, kind: InfoKind) -> Option<String> {
        match kind {
            InfoKind::FirmwareVersion => self.firmware_version.clone(),
            InfoKind::HardwareVersion => self.hardware_version.clone(),
            InfoKind::SerialNumber => self.serial_number.clone(),
            InfoKind::ModelNumber => self.model_number.clone(),
            InfoKind::ExternalName => self.external_name.clone(),
            InfoKind::Battery => self.battery_level.map(|level| level.to_string()),
            InfoKind::AudioAddress => self.audio_address.clone(),
        }
    }
}

/// State of the EEG data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Started,
    Stopped,
    Failed,
    Disconnected,
}

/// Notch filter setting sent to the headset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotchFilter {
    Off,
    Hz50,
    Hz60,
}

/// Amplifier gain multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmplifierGain {
    X1,
    X2,
    X3,
    X4,
    X6,
    X8,
    X12,
}

/// Post-connection configuration applied through `Reconfigure`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    pub notch_filter: Option<NotchFilter>,
    pub amplifier_gain: Option<AmplifierGain>,
    pub dc_offset: Option<bool>,
    pub p300: Option<bool>,
    pub external_name: Option<String>,
}

/// Notifications published by the core.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    ConnectionStateChanged {
        state: ConnectionState,
        cause: Option<LinkError>,
    },
    DeviceInfoReceived {
        kind: InfoKind,
        value: String,
    },
    StreamStateChanged(StreamState),
    RawStatusMeasurement(Vec<u8>),
    RawStreamData(Vec<u8>),
}
