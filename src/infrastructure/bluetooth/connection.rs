//! Connection Handshake
//!
//! Maps the current [`ConnectionState`] to the driver operation that moves
//! it forward. Each call to [`Worker::advance`] performs one step; the
//! worker queues a `Continue` job after every successful step, so requests
//! submitted meanwhile interleave with the handshake in FIFO order.

use crate::domain::models::{InfoKind, LinkEvent, Transport};
use crate::domain::state::ConnectionState;
use crate::error::{CommandError, LinkError};
use crate::infrastructure::bluetooth::driver::DriverEvent;
use crate::infrastructure::bluetooth::protocol::{
    decode_audio_address, AudioConnectStatus, DeviceCommand,
};
use crate::infrastructure::bluetooth::scheduler::{Awaited, CommandFailure, Job, Worker};
use tracing::{debug, error, info, warn};

/// Why a handshake step did not complete.
#[derive(Debug)]
pub(crate) enum StepError {
    Failed(LinkError),
    /// A disconnect-with-interruption is already queued ahead of everything else.
    Interrupted,
}

type StepResult = Result<(), StepError>;

/// Map the end of a wait to a step error, given the failure to use on timeout.
fn unexpected(outcome: Awaited, on_timeout: LinkError, on_failure: LinkError) -> StepError {
    match outcome {
        Awaited::Interrupted => StepError::Interrupted,
        Awaited::LinkLost => StepError::Failed(LinkError::ConnectionLost),
        Awaited::TimedOut => StepError::Failed(on_timeout),
        other => {
            debug!("Step ended with {:?}", other);
            StepError::Failed(on_failure)
        }
    }
}

impl Worker {
    /// Perform the step that follows the current state.
    pub(crate) fn advance(&mut self) {
        let state = self.state();
        let result = match state {
            ConnectionState::Idle => self.check_prerequisites(),
            ConnectionState::ReadyForOperation => self.scan(),
            ConnectionState::DeviceFound => self.establish_link(),
            ConnectionState::LinkEstablished => self.discover(),
            ConnectionState::DiscoverySucceeded
            | ConnectionState::ReadingFirmwareVersion
            | ConnectionState::ReadingHardwareVersion
            | ConnectionState::ReadingSerialNumber => self.read_next(state),
            ConnectionState::ReadingModelNumber => {
                self.transition_to(ConnectionState::ReadingSucceeded);
                Ok(())
            }
            ConnectionState::ReadingSucceeded => self.pair(),
            ConnectionState::Paired => self.register_name(),
            ConnectionState::NameRegistered => {
                self.transition_to(ConnectionState::ReadyForUse);
                Ok(())
            }
            ConnectionState::ReadyForUse => {
                if !self.audio_attempted {
                    self.audio_attempted = true;
                    self.connect_audio();
                }
                Ok(())
            }
            // A step is already waiting, or the handshake ended in a failure.
            _ => {
                debug!("Nothing to advance in {}", state);
                return;
            }
        };

        match result {
            Ok(()) => {
                let now = self.state();
                if now.is_in_progress() || (now.is_terminal() && !self.audio_attempted) {
                    self.shared.enqueue(Job::Continue);
                }
            }
            Err(StepError::Interrupted) => {
                info!("Step in {} interrupted", state);
            }
            Err(StepError::Failed(cause)) => self.fail(cause),
        }
    }

    fn check_prerequisites(&mut self) -> StepResult {
        self.primary
            .prerequisites()
            .check(&self.settings)
            .map_err(StepError::Failed)?;
        if let Some(audio) = self.audio.as_ref() {
            // Only hard environment failures matter for the audio side.
            let prerequisites = audio.prerequisites();
            if !prerequisites.adapter_present || !prerequisites.adapter_enabled {
                warn!("Audio transport unavailable, continuing without it");
            }
        }
        self.transition_to(ConnectionState::ReadyForOperation);
        Ok(())
    }

    fn scan(&mut self) -> StepResult {
        self.transition_to(ConnectionState::Scanning);
        let primary = self.primary.transport();
        let waiter = self.shared.arm(move |transport, event| {
            transport == primary
                && matches!(event, DriverEvent::DeviceFound(_) | DriverEvent::ScanFailed)
        });

        let filter = self.settings.device_name_filter.clone();
        let prefix = self.settings.device_name_prefix.clone();
        let wanted = filter.clone().unwrap_or_else(|| format!("{}*", prefix));
        info!("Scanning for {}", wanted);
        if !self.primary.start_scan(filter.as_deref(), &prefix) {
            self.shared.disarm();
            return Err(StepError::Failed(LinkError::ScanFailed));
        }

        let outcome = self.await_step(&waiter, self.settings.scan_timeout());
        self.primary.stop_scan();
        match outcome {
            Awaited::Event(DriverEvent::DeviceFound(device)) => {
                info!("Found {} ({})", device.name, device.address);
                self.shared.registry.record_target(&device);
                self.target = Some(device);
                self.transition_to(ConnectionState::DeviceFound);
                Ok(())
            }
            outcome => Err(unexpected(
                outcome,
                LinkError::ScanTimeout,
                LinkError::ScanFailed,
            )),
        }
    }

    fn establish_link(&mut self) -> StepResult {
        let Some(target) = self.target.clone() else {
            error!("No scan result to connect to");
            return Err(StepError::Failed(LinkError::LinkFailed));
        };
        let primary = self.primary.transport();
        let waiter = self.shared.arm(move |transport, event| {
            transport == primary
                && matches!(event, DriverEvent::Connected | DriverEvent::ConnectFailed)
        });
        info!("Connecting to {}", target.address);
        if !self.primary.connect(&target) {
            self.shared.disarm();
            return Err(StepError::Failed(LinkError::LinkFailed));
        }

        match self.await_step(&waiter, self.settings.connection_timeout()) {
            Awaited::Event(DriverEvent::Connected) => {
                self.transition_to(ConnectionState::LinkEstablished);
                Ok(())
            }
            // The link never came up, so a drop here is a failed connect.
            Awaited::LinkLost => Err(StepError::Failed(LinkError::LinkFailed)),
            outcome => Err(unexpected(
                outcome,
                LinkError::ConnectionTimeout,
                LinkError::LinkFailed,
            )),
        }
    }

    fn discover(&mut self) -> StepResult {
        self.transition_to(ConnectionState::DiscoveringCapabilities);
        let waiter = self.shared.arm(|_, event| {
            matches!(
                event,
                DriverEvent::CapabilitiesDiscovered | DriverEvent::DiscoveryFailed
            )
        });
        if !self.primary.discover_capabilities() {
            self.shared.disarm();
            return Err(StepError::Failed(LinkError::DiscoveryFailed));
        }

        match self.await_step(&waiter, self.settings.discovery_timeout()) {
            Awaited::Event(DriverEvent::CapabilitiesDiscovered) => {
                self.transition_to(ConnectionState::DiscoverySucceeded);
                Ok(())
            }
            outcome => Err(unexpected(
                outcome,
                LinkError::DiscoveryTimeout,
                LinkError::DiscoveryFailed,
            )),
        }
    }

    /// Enter the reading state after `state` and read its value.
    fn read_next(&mut self, state: ConnectionState) -> StepResult {
        let Some(next) = state.next() else {
            return Err(StepError::Failed(LinkError::ReadFailed));
        };
        let kind = match next {
            ConnectionState::ReadingFirmwareVersion => InfoKind::FirmwareVersion,
            ConnectionState::ReadingHardwareVersion => InfoKind::HardwareVersion,
            ConnectionState::ReadingSerialNumber => InfoKind::SerialNumber,
            ConnectionState::ReadingModelNumber => InfoKind::ModelNumber,
            other => {
                error!("{} is not a reading state", other);
                return Err(StepError::Failed(LinkError::ReadFailed));
            }
        };
        self.transition_to(next);

        let waiter = self.shared.arm(move |_, event| match event {
            DriverEvent::InfoRead { kind: read, .. } => *read == kind,
            DriverEvent::InfoReadFailed(read) => *read == kind,
            _ => false,
        });
        if !self.primary.read_info(kind) {
            self.shared.disarm();
            return Err(StepError::Failed(LinkError::ReadFailed));
        }

        match self.await_step(&waiter, self.settings.read_timeout()) {
            Awaited::Event(DriverEvent::InfoRead { value, .. }) => {
                info!("{:?}: {}", kind, value);
                Ok(())
            }
            outcome => Err(unexpected(outcome, LinkError::ReadFailed, LinkError::ReadFailed)),
        }
    }

    fn pair(&mut self) -> StepResult {
        let info = self.shared.registry.snapshot();
        if !info.firmware_supports(&self.settings.pairing_min_firmware) {
            info!(
                "Firmware {} below {}, skipping pairing",
                info.firmware_version.as_deref().unwrap_or("unknown"),
                self.settings.pairing_min_firmware
            );
            return self.register_name();
        }

        self.transition_to(ConnectionState::Pairing);
        let waiter = self
            .shared
            .arm(|_, event| matches!(event, DriverEvent::Bonded | DriverEvent::BondFailed));
        if !self.primary.bond() {
            self.shared.disarm();
            return Err(StepError::Failed(LinkError::PairingFailed));
        }

        match self.await_step(&waiter, self.settings.bonding_timeout()) {
            Awaited::Event(DriverEvent::Bonded) => {
                self.transition_to(ConnectionState::Paired);
                Ok(())
            }
            outcome => Err(unexpected(
                outcome,
                LinkError::PairingTimeout,
                LinkError::PairingFailed,
            )),
        }
    }

    /// Write the configured external name, or go straight to `ReadyForUse`
    /// when there is nothing to write or the firmware cannot store it.
    fn register_name(&mut self) -> StepResult {
        let info = self.shared.registry.snapshot();
        let Some(name) = self.settings.external_name.clone() else {
            self.transition_to(ConnectionState::ReadyForUse);
            return Ok(());
        };
        if !info.firmware_supports(&self.settings.name_registration_min_firmware) {
            info!(
                "Firmware below {}, skipping name registration",
                self.settings.name_registration_min_firmware
            );
            self.transition_to(ConnectionState::ReadyForUse);
            return Ok(());
        }
        if info.external_name.as_deref() == Some(name.as_str()) {
            debug!("External name already registered");
            self.transition_to(ConnectionState::ReadyForUse);
            return Ok(());
        }

        self.transition_to(ConnectionState::RegisteringName);
        match self.run_command(DeviceCommand::set_external_name(&name)) {
            Ok(_) => {
                self.shared.publish_info(InfoKind::ExternalName, &name);
                self.transition_to(ConnectionState::NameRegistered);
                Ok(())
            }
            Err(CommandFailure::Interrupted) => Err(StepError::Interrupted),
            Err(CommandFailure::LinkLost) => Err(StepError::Failed(LinkError::ConnectionLost)),
            Err(CommandFailure::Command(e)) => {
                warn!("Registering name {:?} failed: {}", name, e);
                Err(StepError::Failed(LinkError::NameRegistrationFailed))
            }
        }
    }

    /// Bring up the audio link once the headset is ready. Failures here
    /// leave the primary link untouched.
    fn connect_audio(&mut self) {
        if !self.settings.connect_audio_if_compatible {
            return;
        }
        let info = self.shared.registry.snapshot();
        if info.firmware_supports(&self.settings.audio_from_primary_min_firmware) {
            self.connect_audio_from_headset();
        } else if self.audio.is_some() {
            self.connect_audio_profile();
        } else {
            debug!("No audio transport available");
        }
    }

    fn connect_audio_from_headset(&mut self) {
        info!("Asking the headset to connect audio");
        match self.run_command(DeviceCommand::connect_audio()) {
            Ok(payload) => {
                let status = payload.first().copied().and_then(AudioConnectStatus::from_u8);
                match status {
                    Some(status) if status.is_connected() => {
                        match decode_audio_address(&payload) {
                            Some(address) => {
                                self.shared.publish_info(InfoKind::AudioAddress, &address)
                            }
                            None => info!("Audio connected ({:?})", status),
                        }
                    }
                    other => warn!("Audio connection failed: {:?}", other),
                }
            }
            Err(CommandFailure::LinkLost) => self.fail(LinkError::ConnectionLost),
            Err(CommandFailure::Interrupted) => {}
            Err(CommandFailure::Command(e)) => warn!("Audio connect command failed: {}", e),
        }
    }

    fn connect_audio_profile(&mut self) {
        let Some(target) = self.target.clone() else {
            return;
        };
        let waiter = self.shared.arm(|transport, event| {
            transport == Transport::AudioProfile
                && matches!(
                    event,
                    DriverEvent::AudioConnected(_) | DriverEvent::ConnectFailed
                )
        });
        let started = match self.audio.as_mut() {
            Some(audio) => audio.connect(&target),
            None => false,
        };
        if !started {
            self.shared.disarm();
            warn!("Audio connection could not be started");
            return;
        }

        match self.await_step(&waiter, self.settings.connection_timeout()) {
            Awaited::Event(DriverEvent::AudioConnected(address)) => {
                info!("Audio connected to {}", address)
            }
            Awaited::LinkLost => self.fail(LinkError::ConnectionLost),
            Awaited::Interrupted => {}
            other => warn!("Audio connection failed: {:?}", other),
        }
    }

    /// Publish a move along the handshake.
    pub(crate) fn transition_to(&self, state: ConnectionState) {
        let previous = self.state();
        self.shared.state.set(state);
        info!("Connection state {} -> {}", previous, state);
        self.shared
            .publish(LinkEvent::ConnectionStateChanged { state, cause: None });
    }

    /// Publish the failure state for `cause`.
    pub(crate) fn transition_failed(&self, cause: LinkError) {
        let state = ConnectionState::failure_for(&cause);
        self.shared.state.set(state);
        warn!("Connection failed in {}: {}", state, cause);
        self.shared.publish(LinkEvent::ConnectionStateChanged {
            state,
            cause: Some(cause),
        });
    }

    /// Abandon the handshake: publish the failure, then tear the link down.
    pub(crate) fn fail(&mut self, cause: LinkError) {
        self.transition_failed(cause);
        self.primary.stop_scan();
        self.disconnect_primary();
        self.shared.router.cancel_all(CommandError::Cancelled);
        self.shared.registry.clear();
        self.target = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_maps_wait_outcomes() {
        assert!(matches!(
            unexpected(Awaited::TimedOut, LinkError::ScanTimeout, LinkError::ScanFailed),
            StepError::Failed(LinkError::ScanTimeout)
        ));
        assert!(matches!(
            unexpected(
                Awaited::Event(DriverEvent::ScanFailed),
                LinkError::ScanTimeout,
                LinkError::ScanFailed
            ),
            StepError::Failed(LinkError::ScanFailed)
        ));
        assert!(matches!(
            unexpected(Awaited::LinkLost, LinkError::ReadFailed, LinkError::ReadFailed),
            StepError::Failed(LinkError::ConnectionLost)
        ));
        assert!(matches!(
            unexpected(Awaited::Interrupted, LinkError::ReadFailed, LinkError::ReadFailed),
            StepError::Interrupted
        ));
    }
}
