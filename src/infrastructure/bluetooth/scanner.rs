//! Scan Session Module
//!
//! Filters raw scan results down to the one headset a connection attempt
//! should target. Shared by the drivers that discover devices by radio scan.

use crate::domain::models::ScannedDevice;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Name matching rule for scan results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    name: Option<String>,
    prefix: String,
}

impl ScanFilter {
    /// An explicit `name` must match exactly; otherwise names must start
    /// with `prefix`.
    pub fn new(name: Option<&str>, prefix: &str) -> Self {
        Self {
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
            prefix: prefix.to_string(),
        }
    }

    pub fn matches(&self, device_name: &str) -> bool {
        if device_name.is_empty() {
            return false;
        }
        match &self.name {
            Some(name) => device_name == name,
            None => device_name.starts_with(&self.prefix),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    filter: Option<ScanFilter>,
    reported: bool,
}

/// One scan at a time; reports at most one matching device per scan.
#[derive(Debug, Clone, Default)]
pub struct ScanSession {
    state: Arc<Mutex<SessionState>>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accepting results for `filter`, replacing any earlier scan.
    pub fn begin(&self, filter: ScanFilter) {
        info!("Scanning for headsets ({:?})", filter);
        let mut state = self.lock();
        state.filter = Some(filter);
        state.reported = false;
    }

    /// Stop accepting results. Returns `true` if a scan was active.
    pub fn end(&self) -> bool {
        let mut state = self.lock();
        let was_active = state.filter.take().is_some();
        if was_active {
            info!("Scan stopped");
        }
        was_active
    }

    pub fn is_active(&self) -> bool {
        self.lock().filter.is_some()
    }

    /// Returns `device` if it is the first match of the active scan.
    pub fn offer(&self, device: ScannedDevice) -> Option<ScannedDevice> {
        let mut state = self.lock();
        let filter = state.filter.as_ref()?;
        if state.reported || !filter.matches(&device.name) {
            debug!("Ignoring scan result {:?} ({})", device.name, device.address);
            return None;
        }
        state.reported = true;
        info!(
            "Found headset {} ({}, {} dBm)",
            device.name, device.address, device.signal_strength
        );
        Some(device)
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
