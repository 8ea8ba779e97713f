//! Link Service Module
//!
//! Public entry point of the connection core: wires drivers to the request
//! scheduler, optionally runs the audio monitor, and turns caller intents
//! into [`LinkRequest`]s.

use crate::domain::models::{ConnectedDeviceInfo, DeviceConfig, InfoKind, LinkEvent, Transport};
use crate::domain::settings::LinkSettings;
use crate::domain::state::{ConnectionState, StateCell};
use crate::infrastructure::bluetooth::audio::{AudioDriver, AudioMonitor, AudioPlatform, MonitorConfig};
use crate::infrastructure::bluetooth::driver::TransportDriver;
use crate::infrastructure::bluetooth::le::{GattPlatform, LeDriver};
use crate::infrastructure::bluetooth::protocol::DeviceCommand;
use crate::infrastructure::bluetooth::scanner::ScanFilter;
use crate::infrastructure::bluetooth::scheduler::{LinkRequest, RequestHandle, RequestScheduler};
use crate::infrastructure::bluetooth::spp::{SerialPlatform, SppDriver};
use anyhow::{bail, Result};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Build the primary driver selected by `transport`.
pub fn primary_driver<G, S>(
    transport: Transport,
    gatt: Arc<G>,
    serial: Arc<S>,
) -> Result<Box<dyn TransportDriver>>
where
    G: GattPlatform + 'static,
    S: SerialPlatform + 'static,
{
    match transport {
        Transport::LowEnergy => Ok(Box::new(LeDriver::new(gatt))),
        Transport::SerialProfile => Ok(Box::new(SppDriver::new(serial))),
        Transport::AudioProfile => bail!("the audio profile cannot carry the primary link"),
    }
}

/// Connection core for one headset
pub struct LinkService {
    // Declared first so it stops before the scheduler goes away.
    monitor: Option<AudioMonitor>,
    scheduler: RequestScheduler,
}

impl LinkService {
    /// Start the service over `primary` with no audio transport.
    pub fn new(
        event_sender: mpsc::UnboundedSender<LinkEvent>,
        settings: LinkSettings,
        primary: Box<dyn TransportDriver>,
    ) -> Result<Self> {
        info!("Starting link service ({:?})", primary.transport());
        let scheduler = RequestScheduler::spawn(settings, primary, None, event_sender)?;
        Ok(Self {
            monitor: None,
            scheduler,
        })
    }

    /// Start the service with an audio transport and its connection monitor.
    pub fn with_audio<A: AudioPlatform + 'static>(
        event_sender: mpsc::UnboundedSender<LinkEvent>,
        settings: LinkSettings,
        primary: Box<dyn TransportDriver>,
        audio: Arc<A>,
    ) -> Result<Self> {
        info!(
            "Starting link service ({:?} with audio)",
            primary.transport()
        );
        let driver = AudioDriver::new(audio);
        let state = Arc::new(StateCell::default());

        // The monitor starts before the scheduler exists; reconnects wait for it.
        let requests: Arc<OnceLock<RequestHandle>> = Arc::new(OnceLock::new());
        let reconnect = requests.clone();
        let monitor = driver.spawn_monitor(
            MonitorConfig {
                interval: settings.audio_monitor_interval(),
                max_retries: settings.audio_reconnect_max_retries,
                filter: ScanFilter::new(
                    settings.device_name_filter.as_deref(),
                    &settings.device_name_prefix,
                ),
            },
            state.clone(),
            Box::new(move || {
                if let Some(requests) = reconnect.get() {
                    requests.submit(LinkRequest::StartOrContinueConnection);
                }
            }),
        )?;

        let scheduler = RequestScheduler::spawn_with_state(
            settings,
            primary,
            Some(Box::new(driver)),
            event_sender,
            state,
        )?;
        if requests.set(scheduler.handle()).is_err() {
            warn!("Audio monitor already has a request handle");
        }

        Ok(Self {
            monitor: Some(monitor),
            scheduler,
        })
    }

    /// Low-energy service without audio.
    pub fn low_energy<P: GattPlatform + 'static>(
        event_sender: mpsc::UnboundedSender<LinkEvent>,
        settings: LinkSettings,
        platform: Arc<P>,
    ) -> Result<Self> {
        Self::new(event_sender, settings, Box::new(LeDriver::new(platform)))
    }

    /// Serial-profile service without audio.
    pub fn serial<P: SerialPlatform + 'static>(
        event_sender: mpsc::UnboundedSender<LinkEvent>,
        settings: LinkSettings,
        platform: Arc<P>,
    ) -> Result<Self> {
        Self::new(event_sender, settings, Box::new(SppDriver::new(platform)))
    }

    pub fn submit(&self, request: LinkRequest) {
        self.scheduler.submit(request);
    }

    /// Start the handshake, or continue it from where it stopped.
    pub fn connect(&self) {
        self.submit(LinkRequest::StartOrContinueConnection);
    }

    /// Queued disconnect: runs after everything submitted before it.
    pub fn disconnect(&self) {
        self.submit(LinkRequest::Disconnect { interrupted: false });
    }

    /// Abandon whatever is running and disconnect ahead of the queue.
    pub fn interrupt(&self) {
        self.submit(LinkRequest::Disconnect { interrupted: true });
    }

    pub fn read(&self, kind: InfoKind) {
        self.submit(LinkRequest::Read(kind));
    }

    pub fn start_stream(&self, monitor_status: bool) {
        self.submit(LinkRequest::Stream {
            start: true,
            monitor_status,
        });
    }

    pub fn stop_stream(&self) {
        self.submit(LinkRequest::Stream {
            start: false,
            monitor_status: false,
        });
    }

    pub fn reconfigure(&self, config: DeviceConfig) {
        self.submit(LinkRequest::Reconfigure(config));
    }

    pub fn send_command(&self, command: DeviceCommand) {
        self.submit(LinkRequest::SendCommand(command));
    }

    pub fn state(&self) -> ConnectionState {
        self.scheduler.state()
    }

    pub fn device_info(&self) -> ConnectedDeviceInfo {
        self.scheduler.registry().snapshot()
    }

    /// Cloneable submitter for other threads.
    pub fn handle(&self) -> RequestHandle {
        self.scheduler.handle()
    }

    /// Stop the monitor, tear the link down and join the worker.
    pub fn shutdown(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        self.scheduler.shutdown();
    }
}

impl Drop for LinkService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
