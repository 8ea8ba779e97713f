//! Connection state machine.
//!
//! The handshake is a chain of in-progress states, each carrying a unique
//! rank. Failure states sit outside that chain: they have no rank, are not
//! ordered against anything and each names the [`LinkError`] that caused it.
//!
//! ```text
//! Idle(0) → ReadyForOperation(1) → Scanning(2) → DeviceFound(3)
//!   → LinkEstablished(4) → DiscoveringCapabilities(5) → DiscoverySucceeded(6)
//!   → ReadingFirmwareVersion(7) → ReadingHardwareVersion(8)
//!   → ReadingSerialNumber(9) → ReadingModelNumber(10) → ReadingSucceeded(11)
//!   → Pairing(12) → Paired(13) → RegisteringName(14) → NameRegistered(15)
//!   → ReadyForUse(16)
//! ```
//!
//! The current state is published through a [`StateCell`] so any thread can
//! read it without locking while only the scheduler worker writes it.

use crate::error::LinkError;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Highest success rank; reaching it completes the handshake.
pub const TERMINAL_RANK: u8 = 16;

/// Offset of the failure codes inside the published `u8` encoding.
const FAILURE_BASE: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    ReadyForOperation,
    Scanning,
    DeviceFound,
    LinkEstablished,
    DiscoveringCapabilities,
    DiscoverySucceeded,
    ReadingFirmwareVersion,
    ReadingHardwareVersion,
    ReadingSerialNumber,
    ReadingModelNumber,
    ReadingSucceeded,
    Pairing,
    Paired,
    RegisteringName,
    NameRegistered,
    ReadyForUse,

    // Failure sinks
    AdapterUnavailable,
    AdapterDisabled,
    LocationDisabled,
    PermissionDenied,
    ScanFailed,
    ScanTimeout,
    LinkFailed,
    ConnectionTimeout,
    DiscoveryFailed,
    DiscoveryTimeout,
    ReadFailed,
    PairingFailed,
    PairingTimeout,
    NameRegistrationFailed,
    AnotherDeviceConnected,
    ConnectionLost,
    ConnectionInterrupted,
}

const SUCCESS_STATES: [ConnectionState; 17] = [
    ConnectionState::Idle,
    ConnectionState::ReadyForOperation,
    ConnectionState::Scanning,
    ConnectionState::DeviceFound,
    ConnectionState::LinkEstablished,
    ConnectionState::DiscoveringCapabilities,
    ConnectionState::DiscoverySucceeded,
    ConnectionState::ReadingFirmwareVersion,
    ConnectionState::ReadingHardwareVersion,
    ConnectionState::ReadingSerialNumber,
    ConnectionState::ReadingModelNumber,
    ConnectionState::ReadingSucceeded,
    ConnectionState::Pairing,
    ConnectionState::Paired,
    ConnectionState::RegisteringName,
    ConnectionState::NameRegistered,
    ConnectionState::ReadyForUse,
];

const FAILURE_STATES: [ConnectionState; 17] = [
    ConnectionState::AdapterUnavailable,
    ConnectionState::AdapterDisabled,
    ConnectionState::LocationDisabled,
    ConnectionState::PermissionDenied,
    ConnectionState::ScanFailed,
    ConnectionState::ScanTimeout,
    ConnectionState::LinkFailed,
    ConnectionState::ConnectionTimeout,
    ConnectionState::DiscoveryFailed,
    ConnectionState::DiscoveryTimeout,
    ConnectionState::ReadFailed,
    ConnectionState::PairingFailed,
    ConnectionState::PairingTimeout,
    ConnectionState::NameRegistrationFailed,
    ConnectionState::AnotherDeviceConnected,
    ConnectionState::ConnectionLost,
    ConnectionState::ConnectionInterrupted,
];

impl ConnectionState {
    /// Position in the handshake, or `None` for failure states.
    pub fn rank(&self) -> Option<u8> {
        let rank = match self {
            Self::Idle => 0,
            Self::ReadyForOperation => 1,
            Self::Scanning => 2,
            Self::DeviceFound => 3,
            Self::LinkEstablished => 4,
            Self::DiscoveringCapabilities => 5,
            Self::DiscoverySucceeded => 6,
            Self::ReadingFirmwareVersion => 7,
            Self::ReadingHardwareVersion => 8,
            Self::ReadingSerialNumber => 9,
            Self::ReadingModelNumber => 10,
            Self::ReadingSucceeded => 11,
            Self::Pairing => 12,
            Self::Paired => 13,
            Self::RegisteringName => 14,
            Self::NameRegistered => 15,
            Self::ReadyForUse => TERMINAL_RANK,
            _ => return None,
        };
        Some(rank)
    }

    /// Success state holding `rank`.
    pub fn from_rank(rank: u8) -> Option<Self> {
        SUCCESS_STATES.get(rank as usize).copied()
    }

    /// Successor by rank among success states.
    ///
    /// `None` for the terminal state and for every failure state.
    pub fn next(&self) -> Option<Self> {
        let rank = self.rank()?;
        if rank >= TERMINAL_RANK {
            return None;
        }
        Self::from_rank(rank + 1)
    }

    pub fn is_failure(&self) -> bool {
        self.rank().is_none()
    }

    pub fn is_terminal(&self) -> bool {
        *self == Self::ReadyForUse
    }

    /// True while a handshake is under way (neither idle, terminal nor failed).
    pub fn is_in_progress(&self) -> bool {
        matches!(self.rank(), Some(rank) if rank > 0 && rank < TERMINAL_RANK)
    }

    /// True once the primary link is up and not yet torn down.
    pub fn has_link(&self) -> bool {
        matches!(self.rank(), Some(rank) if rank >= 4)
    }

    /// `true` when `self` comes strictly before `other` in the handshake.
    ///
    /// Always `false` when either side is a failure state.
    pub fn precedes(&self, other: &Self) -> bool {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    /// Error cause of a failure state.
    ///
    /// `AnotherDeviceConnected` carries the other device's name only in the
    /// notification; the state itself reports an empty name.
    pub fn cause(&self) -> Option<LinkError> {
        let cause = match self {
            Self::AdapterUnavailable => LinkError::AdapterUnavailable,
            Self::AdapterDisabled => LinkError::AdapterDisabled,
            Self::LocationDisabled => LinkError::LocationDisabled,
            Self::PermissionDenied => LinkError::PermissionDenied,
            Self::ScanFailed => LinkError::ScanFailed,
            Self::ScanTimeout => LinkError::ScanTimeout,
            Self::LinkFailed => LinkError::LinkFailed,
            Self::ConnectionTimeout => LinkError::ConnectionTimeout,
            Self::DiscoveryFailed => LinkError::DiscoveryFailed,
            Self::DiscoveryTimeout => LinkError::DiscoveryTimeout,
            Self::ReadFailed => LinkError::ReadFailed,
            Self::PairingFailed => LinkError::PairingFailed,
            Self::PairingTimeout => LinkError::PairingTimeout,
            Self::NameRegistrationFailed => LinkError::NameRegistrationFailed,
            Self::AnotherDeviceConnected => LinkError::AnotherDeviceConnected(String::new()),
            Self::ConnectionLost => LinkError::ConnectionLost,
            Self::ConnectionInterrupted => LinkError::Interrupted,
            _ => return None,
        };
        Some(cause)
    }

    /// Failure state carrying `error`.
    pub fn failure_for(error: &LinkError) -> Self {
        match error {
            LinkError::AdapterUnavailable => Self::AdapterUnavailable,
            LinkError::AdapterDisabled => Self::AdapterDisabled,
            LinkError::LocationDisabled => Self::LocationDisabled,
            LinkError::PermissionDenied => Self::PermissionDenied,
            LinkError::ScanFailed => Self::ScanFailed,
            LinkError::ScanTimeout => Self::ScanTimeout,
            LinkError::LinkFailed => Self::LinkFailed,
            LinkError::ConnectionTimeout => Self::ConnectionTimeout,
            LinkError::DiscoveryFailed => Self::DiscoveryFailed,
            LinkError::DiscoveryTimeout => Self::DiscoveryTimeout,
            LinkError::ReadFailed => Self::ReadFailed,
            LinkError::PairingFailed => Self::PairingFailed,
            LinkError::PairingTimeout => Self::PairingTimeout,
            LinkError::NameRegistrationFailed => Self::NameRegistrationFailed,
            LinkError::AnotherDeviceConnected(_) => Self::AnotherDeviceConnected,
            LinkError::ConnectionLost => Self::ConnectionLost,
            LinkError::Interrupted => Self::ConnectionInterrupted,
        }
    }

    fn code(&self) -> u8 {
        match self.rank() {
            Some(rank) => rank,
            None => {
                let index = FAILURE_STATES
                    .iter()
                    .position(|state| state == self)
                    .unwrap_or(0);
                FAILURE_BASE + index as u8
            }
        }
    }

    fn from_code(code: u8) -> Self {
        if code >= FAILURE_BASE {
            FAILURE_STATES
                .get((code - FAILURE_BASE) as usize)
                .copied()
                .unwrap_or(Self::ConnectionLost)
        } else {
            Self::from_rank(code).unwrap_or(Self::Idle)
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rank() {
            Some(rank) => write!(f, "{:?}({})", self, rank),
            None => write!(f, "{:?}", self),
        }
    }
}

/// Atomically published current state: one writer, any number of readers.
#[derive(Debug)]
pub struct StateCell {
    code: AtomicU8,
}

impl StateCell {
    pub fn new(initial: ConnectionState) -> Self {
        Self {
            code: AtomicU8::new(initial.code()),
        }
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_code(self.code.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.code.store(state.code(), Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(ConnectionState::Idle)
    }
}
