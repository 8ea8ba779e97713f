//! Error types shared by the connection core.

use thiserror::Error;

/// Cause attached to every failure state of the connection state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("no bluetooth adapter available")]
    AdapterUnavailable,

    #[error("bluetooth adapter is disabled")]
    AdapterDisabled,

    #[error("location services are disabled")]
    LocationDisabled,

    #[error("bluetooth permission not granted")]
    PermissionDenied,

    #[error("scan could not be started")]
    ScanFailed,

    #[error("no matching headset found before the scan timeout")]
    ScanTimeout,

    #[error("link to the headset could not be established")]
    LinkFailed,

    #[error("link establishment timed out")]
    ConnectionTimeout,

    #[error("capability discovery failed")]
    DiscoveryFailed,

    #[error("capability discovery timed out")]
    DiscoveryTimeout,

    #[error("reading device information failed")]
    ReadFailed,

    #[error("pairing failed")]
    PairingFailed,

    #[error("pairing timed out")]
    PairingTimeout,

    #[error("device name registration failed")]
    NameRegistrationFailed,

    #[error("another headset is already connected: {0}")]
    AnotherDeviceConnected(String),

    #[error("link to the headset was lost")]
    ConnectionLost,

    #[error("connection interrupted by the user")]
    Interrupted,
}

/// Errors delivered to device command callbacks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid command: {0}")]
    Invalid(String),

    #[error("no headset connected")]
    NotConnected,

    #[error("command could not be written to the headset")]
    WriteFailed,

    #[error("no response received before the timeout")]
    Timeout,

    #[error("headset rejected the command with code {0:#04X}")]
    Rejected(u8),

    #[error("command superseded by a newer command with the same identifier")]
    Superseded,

    #[error("command cancelled because the link was torn down")]
    Cancelled,
}

/// Failures raised by platform bindings underneath a transport driver.
///
/// These never leave the driver: each driver translates them into a `false`
/// initiation result or a failure event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("platform API unavailable: {0}")]
    Unavailable(String),

    #[error("platform call failed: {0}")]
    CallFailed(String),

    #[error("i/o error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_display() {
        assert_eq!(
            LinkError::ScanTimeout.to_string(),
            "no matching headset found before the scan timeout"
        );
        assert_eq!(
            LinkError::AnotherDeviceConnected("melo_123".to_string()).to_string(),
            "another headset is already connected: melo_123"
        );
    }

    #[test]
    fn test_command_error_display() {
        assert_eq!(
            CommandError::Invalid("name too long".to_string()).to_string(),
            "invalid command: name too long"
        );
        assert_eq!(
            CommandError::Rejected(0x05).to_string(),
            "headset rejected the command with code 0x05"
        );
    }
}
