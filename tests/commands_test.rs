//! Mailbox commands, reads, streaming and interruption against the
//! simulated headset.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{connect, events_until, fast_settings, low_energy, next_event, states_until, Harness};
use headset_link::domain::models::NotchFilter;
use headset_link::infrastructure::bluetooth::protocol::{MailboxCode, SystemStatus};
use headset_link::infrastructure::bluetooth::simulated::SimulatedHeadset;
use headset_link::{
    CommandError, ConnectionState, DeviceCommand, DeviceConfig, InfoKind, LinkEvent, LinkSettings,
    StreamState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

type Response = Result<Vec<u8>, CommandError>;

/// Command whose response lands in the returned receiver.
fn observed(command: DeviceCommand) -> (DeviceCommand, oneshot::Receiver<Response>) {
    let (tx, rx) = oneshot::channel();
    let command = command.on_response(move |result| {
        let _ = tx.send(result);
    });
    (command, rx)
}

type Sent = Result<(), CommandError>;

/// Command that only reports its write, recording every invocation.
fn sent_only(command: DeviceCommand) -> (DeviceCommand, Arc<Mutex<Vec<Sent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let command = command.on_sent(move |result| sink.lock().unwrap().push(result));
    (command, seen)
}

async fn response(rx: oneshot::Receiver<Response>) -> Response {
    timeout(Duration::from_secs(5), rx)
        .await
        .expect("timed out waiting for the command callback")
        .expect("command callback dropped without firing")
}

fn without_audio(mut settings: LinkSettings) -> LinkSettings {
    settings.connect_audio_if_compatible = false;
    settings
}

async fn ready(profile: SimulatedHeadset, settings: LinkSettings) -> Harness {
    let mut harness = low_energy(profile, without_audio(settings));
    let states = connect(&mut harness).await;
    assert_eq!(states.last(), Some(&ConnectionState::ReadyForUse));
    harness
}

#[tokio::test]
async fn test_system_status_round_trip() {
    let harness = ready(SimulatedHeadset::default(), fast_settings()).await;

    let (command, rx) = observed(DeviceCommand::get_system_status());
    harness.service.send_command(command);
    let payload = response(rx).await.unwrap();
    let status = SystemStatus::decode(&payload).expect("well-formed status");
    assert!(status.all_ok());
    assert!(harness.log.writes().contains(&vec![0x0C]));
}

#[tokio::test]
async fn test_invalid_command_never_written() {
    let harness = ready(SimulatedHeadset::default(), fast_settings()).await;
    let writes_before = harness.log.writes().len();

    let (command, rx) = observed(DeviceCommand::set_external_name("this name is far too long"));
    harness.service.send_command(command);
    assert!(matches!(response(rx).await, Err(CommandError::Invalid(_))));

    let (command, rx) = observed(DeviceCommand::set_external_name("tab\there"));
    harness.service.send_command(command);
    assert!(matches!(response(rx).await, Err(CommandError::Invalid(_))));

    assert_eq!(harness.log.writes().len(), writes_before);
}

#[tokio::test]
async fn test_invalid_command_reported_while_disconnected() {
    let harness = low_energy(SimulatedHeadset::default(), fast_settings());

    let (command, rx) = observed(DeviceCommand::set_external_name(""));
    harness.service.send_command(command);
    assert!(matches!(response(rx).await, Err(CommandError::Invalid(_))));

    let (command, rx) = observed(DeviceCommand::get_system_status());
    harness.service.send_command(command);
    assert_eq!(response(rx).await, Err(CommandError::NotConnected));
    assert!(harness.log.writes().is_empty());
}

#[tokio::test]
async fn test_sent_only_invalid_command_while_connected() {
    let harness = ready(SimulatedHeadset::default(), fast_settings()).await;
    let writes_before = harness.log.writes().len();

    let (command, seen) = sent_only(DeviceCommand::set_serial_number(""));
    harness.service.send_command(command);
    // Reported before the request ever reaches the worker.
    assert!(matches!(
        seen.lock().unwrap().as_slice(),
        [Err(CommandError::Invalid(_))]
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(harness.log.writes().len(), writes_before);
}

#[tokio::test]
async fn test_sent_only_write_failure_reported_once() {
    let profile = SimulatedHeadset {
        mailbox_writable: false,
        ..Default::default()
    };
    let harness = ready(profile, fast_settings()).await;

    let (command, seen) = sent_only(DeviceCommand::get_system_status());
    harness.service.send_command(command);
    for _ in 0..50 {
        if !seen.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // Past the command timeout, so a late second report would show up.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[Err(CommandError::WriteFailed)]
    );
    assert_eq!(harness.service.state(), ConnectionState::ReadyForUse);
}

#[tokio::test]
async fn test_invalid_command_fails_while_scan_blocks_worker() {
    let profile = SimulatedHeadset {
        discoverable: false,
        ..Default::default()
    };
    let mut settings = fast_settings();
    settings.scan_timeout_ms = 10_000;
    let mut harness = low_energy(profile, settings);

    harness.service.connect();
    states_until(&mut harness.events, |s| s == ConnectionState::Scanning).await;

    let (command, mut rx) = observed(DeviceCommand::set_external_name("tab\there"));
    harness.service.send_command(command);
    assert!(matches!(rx.try_recv(), Ok(Err(CommandError::Invalid(_)))));
    assert_eq!(harness.service.state(), ConnectionState::Scanning);

    harness.service.interrupt();
}

#[tokio::test]
async fn test_rejected_command() {
    let profile = SimulatedHeadset {
        rejected_commands: vec![MailboxCode::GetEegConfig],
        ..Default::default()
    };
    let harness = ready(profile, fast_settings()).await;

    let (command, rx) = observed(DeviceCommand::get_eeg_config());
    harness.service.send_command(command);
    assert_eq!(response(rx).await, Err(CommandError::Rejected(0xFF)));
    assert_eq!(harness.service.state(), ConnectionState::ReadyForUse);
}

#[tokio::test]
async fn test_unanswered_command_times_out() {
    let profile = SimulatedHeadset {
        respond_to_commands: false,
        ..Default::default()
    };
    let harness = ready(profile, fast_settings()).await;

    let (command, rx) = observed(DeviceCommand::get_system_status());
    harness.service.send_command(command);
    assert_eq!(response(rx).await, Err(CommandError::Timeout));

    // The worker moved on: a later command still goes out.
    let (command, rx) = observed(DeviceCommand::get_eeg_config());
    harness.service.send_command(command);
    assert_eq!(response(rx).await, Err(CommandError::Timeout));
    assert!(harness.log.writes().contains(&vec![0x04]));
}

#[tokio::test]
async fn test_audio_connect_reports_final_status_once() {
    let harness = ready(SimulatedHeadset::default(), fast_settings()).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let (tx, rx) = oneshot::channel();
    let command = DeviceCommand::connect_audio().on_response(move |result| {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(result);
    });
    harness.service.send_command(command);

    let payload = response(rx).await.unwrap();
    assert_eq!(payload, vec![0x00, 0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);

    // Give a stray second invocation time to show up.
    harness.service.read(InfoKind::Battery);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reconfigure_writes_settings_and_name() {
    let mut harness = ready(SimulatedHeadset::default(), fast_settings()).await;

    harness.service.reconfigure(DeviceConfig {
        notch_filter: Some(NotchFilter::Hz50),
        dc_offset: Some(true),
        external_name: Some("QR 0042".to_string()),
        ..Default::default()
    });
    let events = events_until(&mut harness.events, |event| {
        matches!(event, LinkEvent::DeviceInfoReceived { kind: InfoKind::ExternalName, .. })
    })
    .await;
    assert_eq!(
        events.last(),
        Some(&LinkEvent::DeviceInfoReceived {
            kind: InfoKind::ExternalName,
            value: "QR 0042".to_string(),
        })
    );

    let writes = harness.log.writes();
    let notch = writes.iter().position(|w| w == &vec![0x01, 0x01]).expect("notch written");
    let dc = writes.iter().position(|w| w == &vec![0x06, 0x01]).expect("dc offset written");
    let name = writes.iter().position(|w| w[0] == 0x09).expect("name written");
    assert!(notch < dc && dc < name);
    assert_eq!(
        harness.service.device_info().external_name.as_deref(),
        Some("QR 0042")
    );
}

#[tokio::test]
async fn test_read_battery() {
    let mut harness = ready(SimulatedHeadset::default(), fast_settings()).await;

    harness.service.read(InfoKind::Battery);
    let events = events_until(&mut harness.events, |event| {
        matches!(event, LinkEvent::DeviceInfoReceived { kind: InfoKind::Battery, .. })
    })
    .await;
    assert_eq!(
        events.last(),
        Some(&LinkEvent::DeviceInfoReceived {
            kind: InfoKind::Battery,
            value: "87".to_string(),
        })
    );
    assert_eq!(harness.service.device_info().battery_level, Some(87));
}

#[tokio::test]
async fn test_stream_start_and_stop() {
    let mut harness = ready(SimulatedHeadset::default(), fast_settings()).await;

    harness.service.start_stream(false);
    let mut started = false;
    let mut data = false;
    while !(started && data) {
        match next_event(&mut harness.events).await {
            LinkEvent::StreamStateChanged(StreamState::Started) => started = true,
            LinkEvent::RawStreamData(payload) => {
                assert!(!payload.is_empty());
                data = true;
            }
            _ => {}
        }
    }

    harness.service.stop_stream();
    events_until(&mut harness.events, |event| {
        *event == LinkEvent::StreamStateChanged(StreamState::Stopped)
    })
    .await;
    assert_eq!(harness.log.max_in_flight(), 1);
}

#[tokio::test]
async fn test_stream_request_while_disconnected() {
    let mut harness = low_energy(SimulatedHeadset::default(), fast_settings());

    harness.service.start_stream(true);
    assert_eq!(
        next_event(&mut harness.events).await,
        LinkEvent::StreamStateChanged(StreamState::Disconnected)
    );
}

#[tokio::test]
async fn test_interrupt_preempts_queued_work() {
    let profile = SimulatedHeadset {
        respond_to_commands: false,
        ..Default::default()
    };
    let mut settings = fast_settings();
    settings.command_timeout_ms = 10_000;
    let mut harness = ready(profile, settings).await;

    let (command, rx) = observed(DeviceCommand::get_system_status());
    harness.service.send_command(command);
    harness.service.read(InfoKind::Battery);
    // Let the command reach the headset before interrupting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.service.interrupt();

    assert_eq!(response(rx).await, Err(CommandError::Cancelled));
    states_until(&mut harness.events, |s| s == ConnectionState::Idle).await;

    // The queued read found no link and never reached the platform.
    harness.service.disconnect();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!harness.log.contains("le:read:Battery"));
    assert!(harness.log.contains("le:disconnect"));
}
