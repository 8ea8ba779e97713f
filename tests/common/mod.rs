//! Shared helpers for the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use headset_link::infrastructure::bluetooth::simulated::{
    SimulatedAudio, SimulatedGatt, SimulatedHeadset, SimulatedSerial, SimulationLog,
};
use headset_link::{ConnectionState, LinkEvent, LinkService, LinkSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings with timeouts short enough for tests.
pub fn fast_settings() -> LinkSettings {
    LinkSettings {
        scan_timeout_ms: 400,
        connection_timeout_ms: 1_000,
        discovery_timeout_ms: 1_000,
        read_timeout_ms: 500,
        bonding_timeout_ms: 1_000,
        command_timeout_ms: 400,
        disconnect_timeout_ms: 500,
        audio_monitor_interval_ms: 20,
        ..LinkSettings::default()
    }
}

pub struct Harness {
    pub service: LinkService,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
    pub log: Arc<SimulationLog>,
    pub gatt: Arc<SimulatedGatt>,
    pub serial: Arc<SimulatedSerial>,
    pub audio: Arc<SimulatedAudio>,
}

fn platforms(
    profile: &SimulatedHeadset,
) -> (
    Arc<SimulationLog>,
    Arc<SimulatedGatt>,
    Arc<SimulatedSerial>,
    Arc<SimulatedAudio>,
) {
    let log = SimulationLog::new();
    (
        log.clone(),
        SimulatedGatt::new(profile.clone(), log.clone()),
        SimulatedSerial::new(profile.clone(), log.clone()),
        SimulatedAudio::new(profile.clone(), log),
    )
}

/// Low-energy service without audio.
pub fn low_energy(profile: SimulatedHeadset, settings: LinkSettings) -> Harness {
    let (log, gatt, serial, audio) = platforms(&profile);
    let (tx, events) = mpsc::unbounded_channel();
    let service = LinkService::low_energy(tx, settings, gatt.clone()).unwrap();
    Harness {
        service,
        events,
        log,
        gatt,
        serial,
        audio,
    }
}

/// Serial-profile service without audio.
pub fn serial(profile: SimulatedHeadset, settings: LinkSettings) -> Harness {
    let (log, gatt, serial, audio) = platforms(&profile);
    let (tx, events) = mpsc::unbounded_channel();
    let service = LinkService::serial(tx, settings, serial.clone()).unwrap();
    Harness {
        service,
        events,
        log,
        gatt,
        serial,
        audio,
    }
}

/// Low-energy service with the audio transport and monitor.
pub fn low_energy_with_audio(profile: SimulatedHeadset, settings: LinkSettings) -> Harness {
    let (log, gatt, serial, audio) = platforms(&profile);
    let (tx, events) = mpsc::unbounded_channel();
    let primary = Box::new(headset_link::infrastructure::bluetooth::le::LeDriver::new(
        gatt.clone(),
    ));
    let service = LinkService::with_audio(tx, settings, primary, audio.clone()).unwrap();
    Harness {
        service,
        events,
        log,
        gatt,
        serial,
        audio,
    }
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
    timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for a link event")
        .expect("event channel closed")
}

/// Collect events up to and including the first one matching `stop`.
pub async fn events_until(
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    stop: impl Fn(&LinkEvent) -> bool,
) -> Vec<LinkEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Published states up to and including the first one matching `stop`.
pub async fn states_until(
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    stop: impl Fn(ConnectionState) -> bool,
) -> Vec<ConnectionState> {
    events_until(events, |event| {
        matches!(event, LinkEvent::ConnectionStateChanged { state, .. } if stop(*state))
    })
    .await
    .into_iter()
    .filter_map(|event| match event {
        LinkEvent::ConnectionStateChanged { state, .. } => Some(state),
        _ => None,
    })
    .collect()
}

/// Run the handshake to an end state and return the states seen.
pub async fn connect(harness: &mut Harness) -> Vec<ConnectionState> {
    harness.service.connect();
    states_until(&mut harness.events, |s| s.is_terminal() || s.is_failure()).await
}

pub fn is_state(event: &LinkEvent, wanted: ConnectionState) -> bool {
    matches!(event, LinkEvent::ConnectionStateChanged { state, .. } if *state == wanted)
}
