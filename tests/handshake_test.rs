//! End-to-end handshake tests against the simulated headset.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{connect, events_until, fast_settings, is_state, low_energy, serial, states_until};
use headset_link::infrastructure::bluetooth::driver::Prerequisites;
use headset_link::infrastructure::bluetooth::protocol::SECURITY_BYTES;
use headset_link::infrastructure::bluetooth::simulated::SimulatedHeadset;
use headset_link::{ConnectionState, InfoKind, LinkError, LinkEvent};
use std::time::{Duration, Instant};

use ConnectionState::*;

const FULL_HANDSHAKE: [ConnectionState; 14] = [
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
    ReadyForUse,
];

fn assert_monotonic(states: &[ConnectionState]) {
    for pair in states.windows(2) {
        assert!(
            pair[0].precedes(&pair[1]),
            "{} does not precede {}",
            pair[0],
            pair[1]
        );
    }
}

#[tokio::test]
async fn test_cold_start_low_energy() {
    let mut harness = low_energy(SimulatedHeadset::default(), fast_settings());
    assert_eq!(harness.service.state(), Idle);

    let states = connect(&mut harness).await;
    assert_eq!(states, FULL_HANDSHAKE.to_vec());
    assert_monotonic(&states);
    assert_eq!(harness.service.state(), ReadyForUse);

    let info = harness.service.device_info();
    assert_eq!(info.device_name.as_deref(), Some("melo_2220100001"));
    assert_eq!(info.firmware_version.as_deref(), Some("1.7.4"));
    assert_eq!(info.hardware_version.as_deref(), Some("2.1.0"));
    assert_eq!(info.serial_number.as_deref(), Some("2220100001"));
    assert_eq!(info.model_number.as_deref(), Some("melomind"));
    assert!(harness.log.contains("le:bond"));
}

#[tokio::test]
async fn test_audio_connects_through_headset_after_ready() {
    let mut harness = low_energy(SimulatedHeadset::default(), fast_settings());
    connect(&mut harness).await;

    // The headset answers "in progress" first, then the final status.
    let events = events_until(&mut harness.events, |event| {
        matches!(event, LinkEvent::DeviceInfoReceived { kind: InfoKind::AudioAddress, .. })
    })
    .await;
    assert_eq!(
        events.last(),
        Some(&LinkEvent::DeviceInfoReceived {
            kind: InfoKind::AudioAddress,
            value: "00:1A:7D:DA:71:13".to_string(),
        })
    );
    assert!(harness.log.writes().contains(&vec![0x0A]));
    assert_eq!(harness.service.state(), ReadyForUse);
}

#[tokio::test]
async fn test_cold_start_serial_profile() {
    let mut harness = serial(SimulatedHeadset::default(), fast_settings());

    let states = connect(&mut harness).await;
    assert_eq!(states, FULL_HANDSHAKE.to_vec());
    assert!(harness.log.contains("spp:read:FirmwareVersion"));
    assert!(harness.log.contains("spp:read:ModelNumber"));
    assert_eq!(
        harness.service.device_info().model_number.as_deref(),
        Some("melomind")
    );
}

#[tokio::test]
async fn test_old_firmware_skips_pairing_and_naming() {
    let mut settings = fast_settings();
    settings.external_name = Some("QR 0042".to_string());
    let profile = SimulatedHeadset::default().with_firmware("1.6.2");
    let mut harness = low_energy(profile, settings);

    let states = connect(&mut harness).await;
    assert_eq!(states.last(), Some(&ReadyForUse));
    assert_eq!(
        &states[states.len() - 2..],
        &[ReadingSucceeded, ReadyForUse]
    );
    assert_monotonic(&states);
    for skipped in [Pairing, Paired, RegisteringName, NameRegistered] {
        assert!(!states.contains(&skipped), "{} should be skipped", skipped);
    }
    assert!(!harness.log.contains("le:bond"));
    assert!(!harness.log.writes().iter().any(|frame| frame[0] == 0x09));
}

#[tokio::test]
async fn test_name_registration_when_supported() {
    let mut settings = fast_settings();
    settings.external_name = Some("QR 0042".to_string());
    let mut harness = low_energy(SimulatedHeadset::default(), settings);

    harness.service.connect();
    let events = events_until(&mut harness.events, |event| is_state(event, ReadyForUse)).await;

    let states: Vec<ConnectionState> = events
        .iter()
        .filter_map(|event| match event {
            LinkEvent::ConnectionStateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        &states[states.len() - 5..],
        &[Pairing, Paired, RegisteringName, NameRegistered, ReadyForUse]
    );
    assert!(events.contains(&LinkEvent::DeviceInfoReceived {
        kind: InfoKind::ExternalName,
        value: "QR 0042".to_string(),
    }));

    let name_frame = harness
        .log
        .writes()
        .into_iter()
        .find(|frame| frame[0] == 0x09)
        .expect("name was written");
    assert_eq!(&name_frame[1..3], &SECURITY_BYTES[..]);
    assert_eq!(&name_frame[3..], &b"QR 0042"[..]);
}

#[tokio::test]
async fn test_scan_timeout() {
    let profile = SimulatedHeadset {
        discoverable: false,
        ..Default::default()
    };
    let mut harness = low_energy(profile, fast_settings());

    harness.service.connect();
    let events = events_until(&mut harness.events, |event| {
        matches!(event, LinkEvent::ConnectionStateChanged { state, .. } if state.is_failure())
    })
    .await;
    assert_eq!(
        events.last(),
        Some(&LinkEvent::ConnectionStateChanged {
            state: ScanTimeout,
            cause: Some(LinkError::ScanTimeout),
        })
    );
    assert!(harness.log.contains("le:stop-scan"));
    assert_eq!(harness.service.state(), ScanTimeout);

    // No automatic retry, even well past a second scan window.
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(harness.service.state(), ScanTimeout);
    assert_eq!(
        harness
            .log
            .operations()
            .iter()
            .filter(|op| op.as_str() == "le:scan")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_prerequisite_failure_skips_radio() {
    let profile = SimulatedHeadset {
        prerequisites: Prerequisites {
            adapter_enabled: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut harness = low_energy(profile, fast_settings());

    let states = connect(&mut harness).await;
    assert_eq!(states, vec![AdapterDisabled]);
    assert!(harness.log.operations().is_empty());
}

#[tokio::test]
async fn test_other_headset_connected_is_reported() {
    let profile = SimulatedHeadset {
        prerequisites: Prerequisites {
            connected_headset: Some("melo_0000000007".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut harness = low_energy(profile, fast_settings());

    harness.service.connect();
    let event = common::next_event(&mut harness.events).await;
    assert_eq!(
        event,
        LinkEvent::ConnectionStateChanged {
            state: AnotherDeviceConnected,
            cause: Some(LinkError::AnotherDeviceConnected(
                "melo_0000000007".to_string()
            )),
        }
    );
}

#[tokio::test]
async fn test_rejected_connection() {
    let profile = SimulatedHeadset {
        accept_connection: false,
        ..Default::default()
    };
    let mut harness = low_energy(profile, fast_settings());

    let states = connect(&mut harness).await;
    assert_eq!(states.last(), Some(&LinkFailed));
    assert!(!states.contains(&LinkEstablished));
}

#[tokio::test]
async fn test_failed_read() {
    let profile = SimulatedHeadset {
        failing_read: Some(InfoKind::SerialNumber),
        ..Default::default()
    };
    let mut harness = low_energy(profile, fast_settings());

    let states = connect(&mut harness).await;
    assert_eq!(&states[states.len() - 2..], &[ReadingSerialNumber, ReadFailed]);
    // The link is torn down with the failure.
    assert!(harness.log.contains("le:disconnect"));
    assert_eq!(harness.service.device_info().firmware_version, None);
}

#[tokio::test]
async fn test_rejected_bond() {
    let profile = SimulatedHeadset {
        reject_bond: true,
        ..Default::default()
    };
    let mut harness = low_energy(profile, fast_settings());

    let states = connect(&mut harness).await;
    assert_eq!(&states[states.len() - 2..], &[Pairing, PairingFailed]);
}

#[tokio::test]
async fn test_continue_is_idempotent_once_ready() {
    let mut harness = low_energy(SimulatedHeadset::default(), fast_settings());
    connect(&mut harness).await;

    harness.service.connect();
    let states = states_until(&mut harness.events, |s| s == ReadyForUse).await;
    assert_eq!(states, vec![ReadyForUse]);
    assert_eq!(
        harness
            .log
            .operations()
            .iter()
            .filter(|op| op.starts_with("le:connect"))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_interrupt_during_scan() {
    let profile = SimulatedHeadset {
        discoverable: false,
        ..Default::default()
    };
    let mut settings = fast_settings();
    settings.scan_timeout_ms = 10_000;
    let mut harness = low_energy(profile, settings);

    harness.service.connect();
    states_until(&mut harness.events, |s| s == Scanning).await;
    let started = Instant::now();
    harness.service.interrupt();

    let events = events_until(&mut harness.events, |event| {
        matches!(event, LinkEvent::ConnectionStateChanged { state, .. } if state.is_failure())
    })
    .await;
    assert_eq!(
        events.last(),
        Some(&LinkEvent::ConnectionStateChanged {
            state: ConnectionInterrupted,
            cause: Some(LinkError::Interrupted),
        })
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(harness.log.contains("le:stop-scan"));
}

#[tokio::test]
async fn test_interrupt_during_pairing() {
    let profile = SimulatedHeadset {
        bond_settles: false,
        ..Default::default()
    };
    let mut settings = fast_settings();
    settings.bonding_timeout_ms = 10_000;
    let mut harness = low_energy(profile, settings);

    harness.service.connect();
    states_until(&mut harness.events, |s| s == Pairing).await;
    let started = Instant::now();
    harness.service.interrupt();

    let events = events_until(&mut harness.events, |event| {
        matches!(event, LinkEvent::ConnectionStateChanged { state, .. } if state.is_failure())
    })
    .await;
    assert_eq!(
        events.last(),
        Some(&LinkEvent::ConnectionStateChanged {
            state: ConnectionInterrupted,
            cause: Some(LinkError::Interrupted),
        })
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(harness.log.contains("le:bond"));
    assert!(harness.log.contains("le:disconnect"));
    assert_eq!(harness.service.state(), ConnectionInterrupted);
    assert_eq!(harness.service.device_info(), Default::default());
}

#[tokio::test]
async fn test_link_loss_and_reconnect() {
    let mut harness = low_energy(SimulatedHeadset::default(), fast_settings());
    connect(&mut harness).await;
    // Let the audio step finish so the worker is idle.
    events_until(&mut harness.events, |event| {
        matches!(event, LinkEvent::DeviceInfoReceived { kind: InfoKind::AudioAddress, .. })
    })
    .await;

    harness.gatt.drop_link();
    let events = events_until(&mut harness.events, |event| {
        matches!(event, LinkEvent::ConnectionStateChanged { state, .. } if state.is_failure())
    })
    .await;
    assert_eq!(
        events.last(),
        Some(&LinkEvent::ConnectionStateChanged {
            state: ConnectionLost,
            cause: Some(LinkError::ConnectionLost),
        })
    );
    assert_eq!(harness.service.device_info().firmware_version, None);

    // A fresh request starts over from idle.
    let states = connect(&mut harness).await;
    assert_eq!(states.first(), Some(&Idle));
    assert_eq!(states.last(), Some(&ReadyForUse));
}

#[tokio::test]
async fn test_disconnect_returns_to_idle() {
    let mut harness = low_energy(SimulatedHeadset::default(), fast_settings());
    connect(&mut harness).await;

    harness.service.disconnect();
    states_until(&mut harness.events, |s| s == Idle).await;
    assert!(harness.log.contains("le:disconnect"));
    assert_eq!(harness.service.device_info(), Default::default());
}

#[tokio::test]
async fn test_at_most_one_operation_in_flight() {
    let mut harness = low_energy(SimulatedHeadset::default(), fast_settings());
    connect(&mut harness).await;

    harness.service.read(InfoKind::Battery);
    harness.service.start_stream(true);
    harness.service.stop_stream();
    harness.service.disconnect();
    states_until(&mut harness.events, |s| s == Idle).await;

    assert!(harness.log.contains("le:read:Battery"));
    assert_eq!(harness.log.max_in_flight(), 1);
}
