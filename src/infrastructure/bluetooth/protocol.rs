//! Headset Protocol
//!
//! GATT identifiers, the mailbox command catalogue and the decoders for the
//! few responses the connection core interprets itself.
//!
//! # Mailbox frame
//!
//! ```text
//! request:  [identifier][security bytes (some commands)][payload...]
//! response: [identifier][payload...]
//! ```

use crate::domain::models::{AmplifierGain, FirmwareVersion, InfoKind, NotchFilter};
use crate::error::CommandError;
use std::fmt;
use uuid::Uuid;

/// Build a 128-bit UUID from a Bluetooth SIG 16-bit short identifier.
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5f9b_34fb | ((short as u128) << 96))
}

/// Headset measurement service.
pub const MEASUREMENT_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_b2a0_0000_1000_8000_0080_5f9b_34fb);
/// EEG samples (notify).
pub const EEG_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_b2a5_0000_1000_8000_0080_5f9b_34fb);
/// Headset status: battery, saturation, DC offset (notify).
pub const HEADSET_STATUS_CHAR_UUID: Uuid =
    Uuid::from_u128(0x0000_b2a6_0000_1000_8000_0080_5f9b_34fb);
/// Mailbox (write + notify).
pub const MAILBOX_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_b2a7_0000_1000_8000_0080_5f9b_34fb);

pub const DEVICE_INFO_SERVICE_UUID: Uuid = sig_uuid(0x180A);
pub const MODEL_NUMBER_CHAR_UUID: Uuid = sig_uuid(0x2A24);
pub const SERIAL_NUMBER_CHAR_UUID: Uuid = sig_uuid(0x2A25);
pub const FIRMWARE_REVISION_CHAR_UUID: Uuid = sig_uuid(0x2A26);
pub const HARDWARE_REVISION_CHAR_UUID: Uuid = sig_uuid(0x2A27);

pub const BATTERY_SERVICE_UUID: Uuid = sig_uuid(0x180F);
pub const BATTERY_LEVEL_CHAR_UUID: Uuid = sig_uuid(0x2A19);

/// Services that must be present for the capability discovery step to succeed.
pub const REQUIRED_SERVICES: [Uuid; 2] = [MEASUREMENT_SERVICE_UUID, DEVICE_INFO_SERVICE_UUID];

/// Characteristic holding `kind`, if it is read over GATT.
pub fn info_characteristic(kind: InfoKind) -> Option<Uuid> {
    match kind {
        InfoKind::FirmwareVersion => Some(FIRMWARE_REVISION_CHAR_UUID),
        InfoKind::HardwareVersion => Some(HARDWARE_REVISION_CHAR_UUID),
        InfoKind::SerialNumber => Some(SERIAL_NUMBER_CHAR_UUID),
        InfoKind::ModelNumber => Some(MODEL_NUMBER_CHAR_UUID),
        InfoKind::Battery => Some(BATTERY_LEVEL_CHAR_UUID),
        InfoKind::ExternalName | InfoKind::AudioAddress => None,
    }
}

/// Reverse of [`info_characteristic`].
pub fn info_kind_for(characteristic: Uuid) -> Option<InfoKind> {
    [
        InfoKind::FirmwareVersion,
        InfoKind::HardwareVersion,
        InfoKind::SerialNumber,
        InfoKind::ModelNumber,
        InfoKind::Battery,
    ]
    .into_iter()
    .find(|kind| info_characteristic(*kind) == Some(characteristic))
}

/// Fixed bytes inserted after the identifier of protected commands.
pub const SECURITY_BYTES: [u8; 2] = [0x53, 0x7A];

/// Largest frame that fits one write (23-byte ATT MTU minus 3 bytes of header).
pub const MAX_FRAME_LEN: usize = 20;

/// Largest firmware image accepted by a transfer request.
pub const MAX_FIRMWARE_IMAGE_LEN: u32 = 16 * 1024 * 1024;

/// Provisional response code of the audio-connect command.
pub const AUDIO_CONNECT_IN_PROGRESS: u8 = 0x01;

/// Mailbox identifiers understood by the headset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MailboxCode {
    SetNotchFilter = 0x01,
    SetAmplifierGain = 0x03,
    GetEegConfig = 0x04,
    EnableP300 = 0x05,
    EnableDcOffset = 0x06,
    SetProductName = 0x07,
    SetSerialNumber = 0x08,
    SetExternalName = 0x09,
    ConnectAudio = 0x0A,
    DisconnectAudio = 0x0B,
    GetSystemStatus = 0x0C,
    Reboot = 0x0D,
    StartFirmwareTransfer = 0x0E,
    FirmwareTransferStatus = 0x0F,
    LeadOffEvent = 0x10,
    GetDeviceInfo = 0x11,
    StartStream = 0x12,
    StopStream = 0x13,
    BadCommand = 0xFF,
}

impl MailboxCode {
    const ALL: [MailboxCode; 19] = [
        MailboxCode::SetNotchFilter,
        MailboxCode::SetAmplifierGain,
        MailboxCode::GetEegConfig,
        MailboxCode::EnableP300,
        MailboxCode::EnableDcOffset,
        MailboxCode::SetProductName,
        MailboxCode::SetSerialNumber,
        MailboxCode::SetExternalName,
        MailboxCode::ConnectAudio,
        MailboxCode::DisconnectAudio,
        MailboxCode::GetSystemStatus,
        MailboxCode::Reboot,
        MailboxCode::StartFirmwareTransfer,
        MailboxCode::FirmwareTransferStatus,
        MailboxCode::LeadOffEvent,
        MailboxCode::GetDeviceInfo,
        MailboxCode::StartStream,
        MailboxCode::StopStream,
        MailboxCode::BadCommand,
    ];

    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|code| *code as u8 == byte)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the headset answers this command with a response frame.
    pub fn has_response(self) -> bool {
        !matches!(
            self,
            MailboxCode::Reboot
                | MailboxCode::FirmwareTransferStatus
                | MailboxCode::LeadOffEvent
                | MailboxCode::BadCommand
        )
    }

    /// Whether the command carries [`SECURITY_BYTES`].
    pub fn is_protected(self) -> bool {
        matches!(
            self,
            MailboxCode::SetSerialNumber | MailboxCode::SetExternalName | MailboxCode::SetProductName
        )
    }
}

pub type SentCallback = Box<dyn FnOnce(Result<(), CommandError>) + Send>;
pub type ResponseCallback = Box<dyn FnOnce(Result<Vec<u8>, CommandError>) + Send>;

/// How the caller wants to hear back about a command.
#[derive(Default)]
pub enum CommandCallback {
    /// Fire and forget.
    #[default]
    None,
    /// Told once the frame is written (or why it was not).
    Sent(SentCallback),
    /// Told once written, then once the response frame arrives.
    Response {
        on_sent: Option<SentCallback>,
        on_response: ResponseCallback,
    },
}

impl CommandCallback {
    /// Report a failure that ends the command. Invokes exactly one closure.
    pub(crate) fn fail(self, error: CommandError) {
        match self {
            CommandCallback::None => {}
            CommandCallback::Sent(on_sent) => on_sent(Err(error)),
            CommandCallback::Response { on_response, .. } => on_response(Err(error)),
        }
    }

    /// Split into the sent and response closures.
    pub(crate) fn into_parts(self) -> (Option<SentCallback>, Option<ResponseCallback>) {
        match self {
            CommandCallback::None => (None, None),
            CommandCallback::Sent(on_sent) => (Some(on_sent), None),
            CommandCallback::Response {
                on_sent,
                on_response,
            } => (on_sent, Some(on_response)),
        }
    }

    pub(crate) fn expects_response(&self) -> bool {
        matches!(self, CommandCallback::Response { .. })
    }
}

impl fmt::Debug for CommandCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandCallback::None => write!(f, "None"),
            CommandCallback::Sent(_) => write!(f, "Sent"),
            CommandCallback::Response { on_sent, .. } => {
                write!(f, "Response {{ on_sent: {} }}", on_sent.is_some())
            }
        }
    }
}

/// Payload validity predicate.
pub type Validator = fn(&[u8]) -> Result<(), String>;

/// One outbound mailbox command.
#[derive(Debug)]
pub struct DeviceCommand {
    code: MailboxCode,
    security: &'static [u8],
    payload: Vec<u8>,
    validator: Validator,
    pub(crate) callback: CommandCallback,
}

fn always_valid(_: &[u8]) -> Result<(), String> {
    Ok(())
}

fn empty_payload(payload: &[u8]) -> Result<(), String> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err("command takes no payload".to_string())
    }
}

fn serial_number_payload(payload: &[u8]) -> Result<(), String> {
    if payload.is_empty() || payload.len() > 10 {
        return Err(format!(
            "serial number must be 1 to 10 characters, got {}",
            payload.len()
        ));
    }
    if !payload.iter().all(u8::is_ascii_alphanumeric) {
        return Err("serial number must be ASCII alphanumeric".to_string());
    }
    Ok(())
}

fn printable_name_payload(payload: &[u8]) -> Result<(), String> {
    if payload.is_empty() || payload.len() > 16 {
        return Err(format!(
            "name must be 1 to 16 characters, got {}",
            payload.len()
        ));
    }
    if !payload.iter().all(|b| (0x20..=0x7E).contains(b)) {
        return Err("name must be printable ASCII".to_string());
    }
    Ok(())
}

fn toggle_payload(payload: &[u8]) -> Result<(), String> {
    match payload {
        [0x00] | [0x01] => Ok(()),
        _ => Err("toggle payload must be a single 0 or 1 byte".to_string()),
    }
}

fn firmware_transfer_payload(payload: &[u8]) -> Result<(), String> {
    let [_, _, _, l0, l1, l2, l3] = payload else {
        return Err("firmware transfer payload must be 7 bytes".to_string());
    };
    let length = u32::from_le_bytes([*l0, *l1, *l2, *l3]);
    if length == 0 || length >= MAX_FIRMWARE_IMAGE_LEN {
        return Err(format!("firmware image length out of range: {}", length));
    }
    Ok(())
}

impl DeviceCommand {
    fn build(code: MailboxCode, payload: Vec<u8>, validator: Validator) -> Self {
        Self {
            code,
            security: if code.is_protected() {
                &SECURITY_BYTES
            } else {
                &[]
            },
            payload,
            validator,
            callback: CommandCallback::None,
        }
    }

    /// Arbitrary command, valid as long as it fits in one frame.
    pub fn raw(code: MailboxCode, payload: Vec<u8>) -> Self {
        Self::build(code, payload, always_valid)
    }

    pub fn set_serial_number(serial: &str) -> Self {
        Self::build(
            MailboxCode::SetSerialNumber,
            serial.as_bytes().to_vec(),
            serial_number_payload,
        )
    }

    pub fn set_external_name(name: &str) -> Self {
        Self::build(
            MailboxCode::SetExternalName,
            name.as_bytes().to_vec(),
            printable_name_payload,
        )
    }

    pub fn set_product_name(name: &str) -> Self {
        Self::build(
            MailboxCode::SetProductName,
            name.as_bytes().to_vec(),
            printable_name_payload,
        )
    }

    pub fn connect_audio() -> Self {
        Self::build(MailboxCode::ConnectAudio, Vec::new(), empty_payload)
    }

    pub fn disconnect_audio() -> Self {
        Self::build(MailboxCode::DisconnectAudio, Vec::new(), empty_payload)
    }

    pub fn reboot() -> Self {
        Self::build(MailboxCode::Reboot, Vec::new(), empty_payload)
    }

    pub fn get_system_status() -> Self {
        Self::build(MailboxCode::GetSystemStatus, Vec::new(), empty_payload)
    }

    pub fn get_eeg_config() -> Self {
        Self::build(MailboxCode::GetEegConfig, Vec::new(), empty_payload)
    }

    pub fn set_notch_filter(filter: NotchFilter) -> Self {
        let byte = match filter {
            NotchFilter::Off => 0x00,
            NotchFilter::Hz50 => 0x01,
            NotchFilter::Hz60 => 0x02,
        };
        Self::build(MailboxCode::SetNotchFilter, vec![byte], always_valid)
    }

    pub fn set_amplifier_gain(gain: AmplifierGain) -> Self {
        let byte = match gain {
            AmplifierGain::X1 => 0x01,
            AmplifierGain::X2 => 0x02,
            AmplifierGain::X3 => 0x03,
            AmplifierGain::X4 => 0x04,
            AmplifierGain::X6 => 0x06,
            AmplifierGain::X8 => 0x08,
            AmplifierGain::X12 => 0x0C,
        };
        Self::build(MailboxCode::SetAmplifierGain, vec![byte], always_valid)
    }

    pub fn enable_dc_offset(enable: bool) -> Self {
        Self::build(
            MailboxCode::EnableDcOffset,
            vec![enable as u8],
            toggle_payload,
        )
    }

    pub fn enable_p300(enable: bool) -> Self {
        Self::build(MailboxCode::EnableP300, vec![enable as u8], toggle_payload)
    }

    /// Announce a firmware image transfer. Version segments above 255 are
    /// truncated, so callers should only pass headset firmware versions.
    pub fn start_firmware_transfer(version: FirmwareVersion, image_len: u32) -> Self {
        let mut payload = vec![version.major as u8, version.minor as u8, version.patch as u8];
        payload.extend_from_slice(&image_len.to_le_bytes());
        Self::build(
            MailboxCode::StartFirmwareTransfer,
            payload,
            firmware_transfer_payload,
        )
    }

    /// Notify `callback` once the frame has been written.
    pub fn on_sent(mut self, callback: impl FnOnce(Result<(), CommandError>) + Send + 'static) -> Self {
        self.callback = match self.callback {
            CommandCallback::Response { on_response, .. } => CommandCallback::Response {
                on_sent: Some(Box::new(callback)),
                on_response,
            },
            _ => CommandCallback::Sent(Box::new(callback)),
        };
        self
    }

    /// Notify `callback` with the response payload (identifier stripped).
    pub fn on_response(
        mut self,
        callback: impl FnOnce(Result<Vec<u8>, CommandError>) + Send + 'static,
    ) -> Self {
        let on_sent = match std::mem::take(&mut self.callback) {
            CommandCallback::Sent(on_sent) => Some(on_sent),
            CommandCallback::Response { on_sent, .. } => on_sent,
            CommandCallback::None => None,
        };
        self.callback = CommandCallback::Response {
            on_sent,
            on_response: Box::new(callback),
        };
        self
    }

    pub fn code(&self) -> MailboxCode {
        self.code
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Reason the command must not be sent, if any.
    pub fn validate(&self) -> Result<(), String> {
        let frame_len = 1 + self.security.len() + self.payload.len();
        if frame_len > MAX_FRAME_LEN {
            return Err(format!(
                "frame of {} bytes exceeds the {} byte limit",
                frame_len, MAX_FRAME_LEN
            ));
        }
        (self.validator)(&self.payload)
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// `identifier ++ security ++ payload`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(1 + self.security.len() + self.payload.len());
        frame.push(self.code.as_u8());
        frame.extend_from_slice(self.security);
        frame.extend_from_slice(&self.payload);
        frame
    }

    pub(crate) fn take_callback(&mut self) -> CommandCallback {
        std::mem::take(&mut self.callback)
    }
}

/// Final or provisional status of the audio-connect command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioConnectStatus {
    Success,
    InProgress,
    FailedBadAddress,
    FailedAlreadyConnected,
    FailedTimeout,
    LinkKeyInvalid,
    FailedOther,
}

impl AudioConnectStatus {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Success),
            AUDIO_CONNECT_IN_PROGRESS => Some(Self::InProgress),
            0x02 => Some(Self::FailedBadAddress),
            0x03 => Some(Self::FailedAlreadyConnected),
            0x04 => Some(Self::FailedTimeout),
            0x05 => Some(Self::LinkKeyInvalid),
            0x06 => Some(Self::FailedOther),
            _ => None,
        }
    }

    /// Whether the headset ends up with audio connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Success | Self::FailedAlreadyConnected)
    }
}

/// Audio address following the status byte of a final audio-connect
/// response, formatted `AA:BB:CC:DD:EE:FF`.
pub fn decode_audio_address(payload: &[u8]) -> Option<String> {
    let address = payload.get(1..7)?;
    Some(
        address
            .iter()
            .map(|byte| format!("{:02X}", byte))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioDisconnectStatus {
    Success,
    NotConnected,
    Failed,
}

impl AudioDisconnectStatus {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Success),
            0x01 => Some(Self::NotConnected),
            0x02 => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Self-test report returned by `GetSystemStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemStatus {
    pub processor_ok: bool,
    pub external_memory_ok: bool,
    pub amplifier_ok: bool,
    pub accelerometer_ok: bool,
}

impl SystemStatus {
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let [processor, memory, amplifier, accelerometer, ..] = payload else {
            return None;
        };
        Some(Self {
            processor_ok: *processor == 0,
            external_memory_ok: *memory == 0,
            amplifier_ok: *amplifier == 0,
            accelerometer_ok: *accelerometer == 0,
        })
    }

    pub fn all_ok(&self) -> bool {
        self.processor_ok && self.external_memory_ok && self.amplifier_ok && self.accelerometer_ok
    }
}

/// Battery level from a one-byte percentage value.
pub fn decode_battery(value: &[u8]) -> Option<u8> {
    match value.first() {
        Some(level) if *level <= 100 => Some(*level),
        _ => None,
    }
}

/// UTF-8 text with trailing NUL padding and whitespace removed.
pub fn decode_text(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

/// Decode a device information value into its published text form.
pub fn decode_info(kind: InfoKind, value: &[u8]) -> Option<String> {
    match kind {
        InfoKind::Battery => decode_battery(value).map(|level| level.to_string()),
        _ => {
            let text = decode_text(value);
            (!text.is_empty()).then_some(text)
        }
    }
}

/// Selector byte used when device information is queried through the mailbox.
pub fn info_selector(kind: InfoKind) -> u8 {
    match kind {
        InfoKind::FirmwareVersion => 0x01,
        InfoKind::HardwareVersion => 0x02,
        InfoKind::SerialNumber => 0x03,
        InfoKind::ModelNumber => 0x04,
        InfoKind::Battery => 0x05,
        InfoKind::ExternalName => 0x06,
        InfoKind::AudioAddress => 0x07,
    }
}

pub fn info_kind_from_selector(selector: u8) -> Option<InfoKind> {
    [
        InfoKind::FirmwareVersion,
        InfoKind::HardwareVersion,
        InfoKind::SerialNumber,
        InfoKind::ModelNumber,
        InfoKind::Battery,
        InfoKind::ExternalName,
        InfoKind::AudioAddress,
    ]
    .into_iter()
    .find(|kind| info_selector(*kind) == selector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            FIRMWARE_REVISION_CHAR_UUID.to_string(),
            "00002a26-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            MAILBOX_CHAR_UUID.to_string(),
            "0000b2a7-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_info_characteristics_round_trip() {
        for kind in InfoKind::HANDSHAKE_READS {
            let uuid = info_characteristic(kind).unwrap();
            assert_eq!(info_kind_for(uuid), Some(kind));
        }
        assert_eq!(info_kind_for(EEG_CHAR_UUID), None);
    }

    #[test]
    fn test_serialize_protected_command() {
        let command = DeviceCommand::set_serial_number("2220100001");
        assert!(command.is_valid());
        let frame = command.serialize();
        assert_eq!(frame[0], MailboxCode::SetSerialNumber as u8);
        assert_eq!(&frame[1..3], &SECURITY_BYTES);
        assert_eq!(&frame[3..], b"2220100001");
    }

    #[test]
    fn test_serialize_plain_command() {
        assert_eq!(DeviceCommand::connect_audio().serialize(), vec![0x0A]);
        assert_eq!(
            DeviceCommand::set_notch_filter(NotchFilter::Hz60).serialize(),
            vec![0x01, 0x02]
        );
        assert_eq!(
            DeviceCommand::set_amplifier_gain(AmplifierGain::X12).serialize(),
            vec![0x03, 0x0C]
        );
    }

    #[test]
    fn test_validation_rules() {
        assert!(!DeviceCommand::set_serial_number("").is_valid());
        assert!(!DeviceCommand::set_serial_number("12345678901").is_valid());
        assert!(!DeviceCommand::set_serial_number("12-34").is_valid());
        assert!(!DeviceCommand::set_external_name("name\twith tab").is_valid());
        assert!(!DeviceCommand::set_external_name("a name that is far too long").is_valid());
        assert!(DeviceCommand::set_external_name("QR 0042").is_valid());
        assert!(!DeviceCommand::raw(MailboxCode::GetEegConfig, vec![0; 20]).is_valid());
        assert!(
            !DeviceCommand::start_firmware_transfer(FirmwareVersion::new(1, 7, 4), 0).is_valid()
        );
        assert!(
            DeviceCommand::start_firmware_transfer(FirmwareVersion::new(1, 7, 4), 200_000)
                .is_valid()
        );
    }

    #[test]
    fn test_callback_builders_compose() {
        let command = DeviceCommand::get_system_status()
            .on_sent(|_| {})
            .on_response(|_| {});
        assert!(matches!(
            command.callback,
            CommandCallback::Response {
                on_sent: Some(_),
                ..
            }
        ));
        assert!(command.callback.expects_response());
    }

    #[test]
    fn test_mailbox_code_lookup() {
        assert_eq!(MailboxCode::from_u8(0x0A), Some(MailboxCode::ConnectAudio));
        assert_eq!(MailboxCode::from_u8(0x02), None);
        assert!(!MailboxCode::Reboot.has_response());
        assert!(MailboxCode::SetExternalName.is_protected());
    }

    #[test]
    fn test_response_decoders() {
        assert_eq!(AudioConnectStatus::from_u8(0x01), Some(AudioConnectStatus::InProgress));
        assert!(AudioConnectStatus::FailedAlreadyConnected.is_connected());
        assert_eq!(AudioDisconnectStatus::from_u8(0x01), Some(AudioDisconnectStatus::NotConnected));

        let status = SystemStatus::decode(&[0, 0, 1, 0]).unwrap();
        assert!(!status.amplifier_ok);
        assert!(!status.all_ok());
        assert_eq!(SystemStatus::decode(&[0, 0]), None);

        assert_eq!(
            decode_audio_address(&[0x00, 0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]),
            Some("00:1A:7D:DA:71:13".to_string())
        );
        assert_eq!(decode_audio_address(&[0x00]), None);
    }

    #[test]
    fn test_info_decoding() {
        assert_eq!(decode_info(InfoKind::Battery, &[87]), Some("87".to_string()));
        assert_eq!(decode_info(InfoKind::Battery, &[101]), None);
        assert_eq!(
            decode_info(InfoKind::FirmwareVersion, b"1.7.4\0\0"),
            Some("1.7.4".to_string())
        );
        assert_eq!(decode_info(InfoKind::SerialNumber, b"\0\0"), None);
        for kind in InfoKind::HANDSHAKE_READS {
            assert_eq!(info_kind_from_selector(info_selector(kind)), Some(kind));
        }
    }
}
