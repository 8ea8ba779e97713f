use crate::domain::models::{FirmwareVersion, Transport};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Prefix of the environment variables that override [`LinkSettings`].
pub const ENV_PREFIX: &str = "HEADSET_LINK_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_true(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "headset_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Connection settings: timeouts, target selection and firmware gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    #[serde(default = "default_transport")]
    pub transport: Transport,

    // Step timeouts
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_bonding_timeout_ms")]
    pub bonding_timeout_ms: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,

    // Target selection
    #[serde(default)]
    pub device_name_filter: Option<String>,
    #[serde(default = "default_device_name_prefix")]
    pub device_name_prefix: String,
    #[serde(default)]
    pub external_name: Option<String>,

    // Audio
    #[serde(default = "default_true")]
    pub connect_audio_if_compatible: bool,
    #[serde(default = "default_audio_monitor_interval_ms")]
    pub audio_monitor_interval_ms: u64,
    #[serde(default = "default_audio_reconnect_max_retries")]
    pub audio_reconnect_max_retries: u32,

    // Firmware gates
    #[serde(default = "default_pairing_min_firmware")]
    pub pairing_min_firmware: FirmwareVersion,
    #[serde(default = "default_name_registration_min_firmware")]
    pub name_registration_min_firmware: FirmwareVersion,
    #[serde(default = "default_audio_from_primary_min_firmware")]
    pub audio_from_primary_min_firmware: FirmwareVersion,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            scan_timeout_ms: default_scan_timeout_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            bonding_timeout_ms: default_bonding_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
            device_name_filter: None,
            device_name_prefix: default_device_name_prefix(),
            external_name: None,
            connect_audio_if_compatible: default_true(),
            audio_monitor_interval_ms: default_audio_monitor_interval_ms(),
            audio_reconnect_max_retries: default_audio_reconnect_max_retries(),
            pairing_min_firmware: default_pairing_min_firmware(),
            name_registration_min_firmware: default_name_registration_min_firmware(),
            audio_from_primary_min_firmware: default_audio_from_primary_min_firmware(),
        }
    }
}

fn default_transport() -> Transport {
    Transport::LowEnergy
}
fn default_scan_timeout_ms() -> u64 {
    30_000
}
fn default_connection_timeout_ms() -> u64 {
    20_000
}
fn default_discovery_timeout_ms() -> u64 {
    20_000
}
fn default_read_timeout_ms() -> u64 {
    5_000
}
fn default_bonding_timeout_ms() -> u64 {
    30_000
}
fn default_command_timeout_ms() -> u64 {
    5_000
}
fn default_disconnect_timeout_ms() -> u64 {
    3_000
}
fn default_device_name_prefix() -> String {
    "melo_".to_string()
}
fn default_audio_monitor_interval_ms() -> u64 {
    1_000
}
fn default_audio_reconnect_max_retries() -> u32 {
    3
}
fn default_pairing_min_firmware() -> FirmwareVersion {
    FirmwareVersion::new(1, 6, 7)
}
fn default_name_registration_min_firmware() -> FirmwareVersion {
    FirmwareVersion::new(1, 7, 1)
}
fn default_audio_from_primary_min_firmware() -> FirmwareVersion {
    FirmwareVersion::new(1, 6, 7)
}

impl LinkSettings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
    pub fn bonding_timeout(&self) -> Duration {
        Duration::from_millis(self.bonding_timeout_ms)
    }
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
    pub fn audio_monitor_interval(&self) -> Duration {
        Duration::from_millis(self.audio_monitor_interval_ms)
    }

    /// Whether a scanned device name is an acceptable connection target.
    ///
    /// An explicit filter must match exactly; otherwise the name must start
    /// with the configured prefix.
    pub fn accepts_device_name(&self, name: &str) -> bool {
        match self.device_name_filter.as_deref() {
            Some(filter) if !filter.is_empty() => name == filter,
            _ => name.starts_with(&self.device_name_prefix),
        }
    }

    /// Apply `HEADSET_LINK_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply overrides from `(name, value)` pairs. Unknown names are ignored,
    /// malformed values are logged and skipped.
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let applied = match key {
                "TRANSPORT" => match value.to_lowercase().as_str() {
                    "le" | "ble" => set(&mut self.transport, Transport::LowEnergy),
                    "spp" | "serial" => set(&mut self.transport, Transport::SerialProfile),
                    _ => false,
                },
                "SCAN_TIMEOUT_MS" => parse_into(&mut self.scan_timeout_ms, &value),
                "CONNECTION_TIMEOUT_MS" => parse_into(&mut self.connection_timeout_ms, &value),
                "DISCOVERY_TIMEOUT_MS" => parse_into(&mut self.discovery_timeout_ms, &value),
                "READ_TIMEOUT_MS" => parse_into(&mut self.read_timeout_ms, &value),
                "BONDING_TIMEOUT_MS" => parse_into(&mut self.bonding_timeout_ms, &value),
                "COMMAND_TIMEOUT_MS" => parse_into(&mut self.command_timeout_ms, &value),
                "DISCONNECT_TIMEOUT_MS" => parse_into(&mut self.disconnect_timeout_ms, &value),
                "DEVICE_NAME" => set(&mut self.device_name_filter, non_empty(&value)),
                "DEVICE_NAME_PREFIX" => set(&mut self.device_name_prefix, value.clone()),
                "EXTERNAL_NAME" => set(&mut self.external_name, non_empty(&value)),
                "CONNECT_AUDIO" => parse_bool_into(&mut self.connect_audio_if_compatible, &value),
                "AUDIO_MONITOR_INTERVAL_MS" => {
                    parse_into(&mut self.audio_monitor_interval_ms, &value)
                }
                "AUDIO_RECONNECT_MAX_RETRIES" => {
                    parse_into(&mut self.audio_reconnect_max_retries, &value)
                }
                "PAIRING_MIN_FIRMWARE" => parse_into(&mut self.pairing_min_firmware, &value),
                "NAME_REGISTRATION_MIN_FIRMWARE" => {
                    parse_into(&mut self.name_registration_min_firmware, &value)
                }
                "AUDIO_FROM_PRIMARY_MIN_FIRMWARE" => {
                    parse_into(&mut self.audio_from_primary_min_firmware, &value)
                }
                _ => {
                    warn!("Unknown setting override: {}", name);
                    continue;
                }
            };

            if applied {
                info!("Setting override applied: {}={}", name, value);
            } else {
                warn!("Ignoring malformed setting override: {}={}", name, value);
            }
        }
    }
}

fn set<T>(slot: &mut T, value: T) -> bool {
    *slot = value;
    true
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_into<T: std::str::FromStr>(slot: &mut T, value: &str) -> bool {
    match value.trim().parse() {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => false,
    }
}

fn parse_bool_into(slot: &mut bool, value: &str) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => set(slot, true),
        "0" | "false" | "no" | "off" => set(slot, false),
        _ => false,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub link: LinkSettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from the user configuration directory, then apply
    /// environment overrides.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let mut service = Self::from_path(settings_path);
        service.settings.link.apply_env_overrides();
        Ok(service)
    }

    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let settings_path = path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                info!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("HeadsetLink");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}
