use headset_link::infrastructure::bluetooth::protocol::SystemStatus;
use headset_link::infrastructure::bluetooth::service::primary_driver;
use headset_link::infrastructure::bluetooth::simulated::{
    SimulatedAudio, SimulatedGatt, SimulatedHeadset, SimulatedSerial, SimulationLog,
};
use headset_link::infrastructure::logging::init_logger;
use headset_link::{DeviceCommand, LinkEvent, LinkService, SettingsService};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

const EVENT_WAIT: Duration = Duration::from_secs(5);

/// Print events until one satisfies `done` or nothing arrives for a while.
async fn pump(
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    mut done: impl FnMut(&LinkEvent) -> bool,
) -> bool {
    while let Ok(Some(event)) = timeout(EVENT_WAIT, events.recv()).await {
        match &event {
            LinkEvent::ConnectionStateChanged { state, cause: None } => println!("state  {}", state),
            LinkEvent::ConnectionStateChanged {
                state,
                cause: Some(cause),
            } => println!("state  {} ({})", state, cause),
            LinkEvent::DeviceInfoReceived { kind, value } => println!("info   {:?} = {}", kind, value),
            LinkEvent::StreamStateChanged(stream) => println!("stream {:?}", stream),
            LinkEvent::RawStreamData(data) => println!("eeg    {} bytes", data.len()),
            LinkEvent::RawStatusMeasurement(data) => println!("status {:02X?}", data),
        }
        if done(&event) {
            return true;
        }
    }
    false
}

fn is_state(event: &LinkEvent, predicate: impl Fn(&headset_link::ConnectionState) -> bool) -> bool {
    matches!(event, LinkEvent::ConnectionStateChanged { state, .. } if predicate(state))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _logging = init_logger(&settings.log_settings)?;
    info!(
        "Starting headset link demo ({:?}, settings at {})",
        settings.link.transport,
        settings_service.path().display()
    );

    let log = SimulationLog::new();
    let profile = SimulatedHeadset::default();
    let gatt = SimulatedGatt::new(profile.clone(), log.clone());
    let serial = SimulatedSerial::new(profile.clone(), log.clone());
    let audio = SimulatedAudio::new(profile, log.clone());
    let primary = primary_driver(settings.link.transport, gatt, serial)?;

    let (event_sender, mut events) = mpsc::unbounded_channel();
    let service = LinkService::with_audio(event_sender, settings.link.clone(), primary, audio)?;

    service.connect();
    let mut ready = false;
    pump(&mut events, |event| {
        ready = is_state(event, |s| s.is_terminal());
        ready || is_state(event, |s| s.is_failure())
    })
    .await;

    if ready {
        // Audio is attempted right after ReadyForUse.
        pump(&mut events, |event| {
            matches!(event, LinkEvent::DeviceInfoReceived { kind: headset_link::InfoKind::AudioAddress, .. })
        })
        .await;

        service.send_command(DeviceCommand::get_system_status().on_response(|result| {
            match result.map(|payload| SystemStatus::decode(&payload)) {
                Ok(Some(status)) => println!("self-test {:?}", status),
                Ok(None) => warn!("Malformed system status"),
                Err(e) => warn!("System status failed: {}", e),
            }
        }));
        service.read(headset_link::InfoKind::Battery);
        service.start_stream(true);
        pump(&mut events, |event| matches!(event, LinkEvent::RawStreamData(_))).await;
        service.stop_stream();
        pump(&mut events, |event| {
            matches!(event, LinkEvent::StreamStateChanged(headset_link::StreamState::Stopped))
        })
        .await;
    } else {
        warn!("Headset did not become ready");
    }

    service.disconnect();
    pump(&mut events, |event| is_state(event, |s| *s == headset_link::ConnectionState::Idle)).await;

    info!("{} platform calls made", log.operations().len());
    // Joining the worker blocks.
    tokio::task::spawn_blocking(move || drop(service)).await?;
    Ok(())
}
