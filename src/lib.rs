//! Connection core of the headset SDK.
//!
//! Establishes, maintains, configures and tears down the link to a headset
//! over a low-energy, serial-profile or audio-profile transport, and exchanges
//! mailbox commands with it once linked.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{
    ConnectedDeviceInfo, DeviceConfig, FirmwareVersion, InfoKind, LinkEvent, StreamState,
    Transport,
};
pub use domain::settings::{LinkSettings, Settings, SettingsService};
pub use domain::state::ConnectionState;
pub use error::{CommandError, LinkError};
pub use infrastructure::bluetooth::protocol::DeviceCommand;
pub use infrastructure::bluetooth::{LinkRequest, LinkService};
