//! Request Scheduler
//!
//! One worker thread owns the drivers and processes requests strictly one at
//! a time. Callers and platform callback threads only enqueue jobs or fulfil
//! the wait handle of the step the worker is blocked on.
//!
//! ```text
//!  submit() ──► normal queue ────┐
//!                                ├─► worker (biased select) ─► dispatch ─► driver
//!  interrupt ─► priority queue ──┘          ▲                         │
//!                                           │     WaitHandle          │
//!                                           └──── on_driver_event ◄───┘
//! ```

use crate::domain::models::{
    DeviceConfig, InfoKind, LinkEvent, ScannedDevice, StreamState, Transport,
};
use crate::domain::registry::DeviceRegistry;
use crate::domain::settings::LinkSettings;
use crate::domain::state::{ConnectionState, StateCell};
use crate::error::CommandError;
use crate::infrastructure::bluetooth::driver::{DriverEvent, EventSink, TransportDriver};
use crate::infrastructure::bluetooth::mailbox::{CommandRouter, FrameDisposition};
use crate::infrastructure::bluetooth::protocol::{
    DeviceCommand, MailboxCode, SentCallback, AUDIO_CONNECT_IN_PROGRESS,
};
use crate::infrastructure::sync::WaitHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Work a caller can ask the connection core to do.
#[derive(Debug)]
pub enum LinkRequest {
    StartOrContinueConnection,
    Read(InfoKind),
    Disconnect { interrupted: bool },
    Stream { start: bool, monitor_status: bool },
    Reconfigure(DeviceConfig),
    SendCommand(DeviceCommand),
}

#[derive(Debug)]
pub(crate) enum Job {
    Request(LinkRequest),
    /// Drive the handshake one step further.
    Continue,
    /// The primary link dropped while no step was waiting for it.
    LinkLost,
    Shutdown,
}

/// What releases a blocked step.
#[derive(Debug)]
pub(crate) enum StepSignal {
    Event(DriverEvent),
    Command(Result<Vec<u8>, CommandError>),
    Interrupted,
}

type Accepts = Box<dyn Fn(Transport, &DriverEvent) -> bool + Send>;

struct ArmedStep {
    waiter: Arc<WaitHandle<StepSignal>>,
    accepts: Accepts,
}

/// State shared between the worker, callers and driver callbacks.
pub(crate) struct LinkShared {
    pub(crate) state: Arc<StateCell>,
    pub(crate) registry: Arc<DeviceRegistry>,
    pub(crate) router: Arc<CommandRouter>,
    events: mpsc::UnboundedSender<LinkEvent>,
    jobs: mpsc::UnboundedSender<Job>,
    priority: mpsc::UnboundedSender<Job>,
    primary: Transport,
    armed: Mutex<Option<ArmedStep>>,
    interrupted: AtomicBool,
    disconnecting: AtomicBool,
}

impl LinkShared {
    pub(crate) fn publish(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            debug!("No listener for link events");
        }
    }

    pub(crate) fn publish_info(&self, kind: InfoKind, value: &str) {
        self.registry.record(kind, value);
        self.publish(LinkEvent::DeviceInfoReceived {
            kind,
            value: value.to_string(),
        });
    }

    pub(crate) fn enqueue(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            warn!("Scheduler worker is gone, dropping job");
        }
    }

    fn armed(&self) -> MutexGuard<'_, Option<ArmedStep>> {
        match self.armed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Install the wait handle for the next step. Must be called before the
    /// driver operation is started so an early completion is not lost.
    ///
    /// Primary-link `Disconnected` events are always accepted.
    pub(crate) fn arm<F>(&self, accepts: F) -> Arc<WaitHandle<StepSignal>>
    where
        F: Fn(Transport, &DriverEvent) -> bool + Send + 'static,
    {
        let waiter = Arc::new(WaitHandle::new());
        *self.armed() = Some(ArmedStep {
            waiter: waiter.clone(),
            accepts: Box::new(accepts),
        });
        if self.interrupted.load(Ordering::SeqCst) {
            waiter.notify(StepSignal::Interrupted);
        }
        waiter
    }

    pub(crate) fn disarm(&self) {
        self.armed().take();
    }

    pub(crate) fn clear_interrupt(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }

    pub(crate) fn set_disconnecting(&self, disconnecting: bool) {
        self.disconnecting.store(disconnecting, Ordering::SeqCst);
    }

    /// Flag an interruption and release whatever step is blocked.
    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Some(step) = self.armed().as_ref() {
            step.waiter.notify(StepSignal::Interrupted);
        }
    }

    /// Entry point for every driver event, on whatever thread raised it.
    pub(crate) fn on_driver_event(&self, transport: Transport, event: DriverEvent) {
        debug!("{:?} event: {:?}", transport, event);
        match &event {
            DriverEvent::InfoRead { kind, value } => self.publish_info(*kind, value),
            DriverEvent::StatusMeasurement(payload) => {
                self.publish(LinkEvent::RawStatusMeasurement(payload.clone()))
            }
            DriverEvent::StreamData(payload) => {
                self.publish(LinkEvent::RawStreamData(payload.clone()))
            }
            DriverEvent::StreamStarted => {
                self.publish(LinkEvent::StreamStateChanged(StreamState::Started))
            }
            DriverEvent::StreamStopped => {
                self.publish(LinkEvent::StreamStateChanged(StreamState::Stopped))
            }
            DriverEvent::StreamFailed => {
                self.publish(LinkEvent::StreamStateChanged(StreamState::Failed))
            }
            DriverEvent::MailboxFrame(frame) => match self.router.on_frame(frame) {
                FrameDisposition::Unsolicited(code, payload) => {
                    info!("Unsolicited {:?} frame: {:02X?}", code, payload)
                }
                other => debug!("Mailbox frame: {:?}", other),
            },
            DriverEvent::AudioConnected(address) => {
                self.publish_info(InfoKind::AudioAddress, address)
            }
            DriverEvent::AudioDisconnected => self.registry.clear_audio(),
            _ => {}
        }

        let is_link_loss = transport == self.primary && event == DriverEvent::Disconnected;
        let delivered = {
            let armed = self.armed();
            match armed.as_ref() {
                Some(step) if is_link_loss || (step.accepts)(transport, &event) => {
                    step.waiter.notify(StepSignal::Event(event));
                    true
                }
                _ => false,
            }
        };

        if is_link_loss && !delivered && !self.disconnecting.load(Ordering::SeqCst) {
            if self.priority.send(Job::LinkLost).is_err() {
                warn!("Scheduler worker is gone, link loss not handled");
            }
        }
    }
}

/// How a blocked step ended.
#[derive(Debug)]
pub(crate) enum Awaited {
    Event(DriverEvent),
    Command(Result<Vec<u8>, CommandError>),
    Interrupted,
    LinkLost,
    TimedOut,
}

/// Why a command run by the worker did not produce a response.
#[derive(Debug)]
pub(crate) enum CommandFailure {
    Command(CommandError),
    Interrupted,
    LinkLost,
}

/// The single worker. Owns the drivers; the only writer of the state cell.
pub(crate) struct Worker {
    pub(crate) shared: Arc<LinkShared>,
    pub(crate) settings: LinkSettings,
    pub(crate) primary: Box<dyn TransportDriver>,
    pub(crate) audio: Option<Box<dyn TransportDriver>>,
    pub(crate) target: Option<ScannedDevice>,
    pub(crate) audio_attempted: bool,
}

impl Worker {
    /// Wire the drivers to a fresh shared state. The receivers feed
    /// [`Worker::run`].
    fn new(
        settings: LinkSettings,
        mut primary: Box<dyn TransportDriver>,
        mut audio: Option<Box<dyn TransportDriver>>,
        events: mpsc::UnboundedSender<LinkEvent>,
        state: Arc<StateCell>,
    ) -> (Self, mpsc::UnboundedReceiver<Job>, mpsc::UnboundedReceiver<Job>) {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (priority_tx, priority_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(LinkShared {
            state,
            registry: Arc::new(DeviceRegistry::new()),
            router: Arc::new(CommandRouter::new()),
            events,
            jobs: jobs_tx,
            priority: priority_tx,
            primary: primary.transport(),
            armed: Mutex::new(None),
            interrupted: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
        });

        let sink_shared = shared.clone();
        let sink: EventSink =
            Arc::new(move |transport, event| sink_shared.on_driver_event(transport, event));
        primary.attach(sink.clone());
        if let Some(audio) = audio.as_mut() {
            audio.attach(sink);
        }

        let worker = Worker {
            shared,
            settings,
            primary,
            audio,
            target: None,
            audio_attempted: false,
        };
        (worker, jobs_rx, priority_rx)
    }

    async fn run(
        mut self,
        mut jobs: mpsc::UnboundedReceiver<Job>,
        mut priority: mpsc::UnboundedReceiver<Job>,
    ) {
        info!("Scheduler worker started ({:?})", self.primary.transport());
        loop {
            let job = tokio::select! {
                biased;
                Some(job) = priority.recv() => job,
                Some(job) = jobs.recv() => job,
                else => break,
            };
            if matches!(job, Job::Shutdown) {
                self.teardown();
                break;
            }
            self.dispatch(job);
        }
        info!("Scheduler worker stopped");
    }

    fn dispatch(&mut self, job: Job) {
        debug!("Dispatching {:?} in {}", job, self.state());
        match job {
            Job::Continue => self.advance(),
            Job::LinkLost => self.on_link_lost(),
            Job::Shutdown => {}
            Job::Request(request) => match request {
                LinkRequest::StartOrContinueConnection => self.start_or_continue(),
                LinkRequest::Read(kind) => self.read(kind),
                LinkRequest::Disconnect { interrupted } => self.disconnect(interrupted),
                LinkRequest::Stream {
                    start,
                    monitor_status,
                } => self.stream(start, monitor_status),
                LinkRequest::Reconfigure(config) => self.reconfigure(config),
                LinkRequest::SendCommand(command) => self.send_command(command),
            },
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Block on `waiter` for at most `timeout`, then disarm it.
    pub(crate) fn await_step(
        &self,
        waiter: &WaitHandle<StepSignal>,
        timeout: Duration,
    ) -> Awaited {
        let signal = waiter.wait(timeout);
        self.resolve(signal)
    }

    /// Like [`Worker::await_step`], but a provisional in-progress status on
    /// `progress` grants `extended` more time.
    fn await_extended(
        &self,
        waiter: &WaitHandle<StepSignal>,
        timeout: Duration,
        progress: Option<&WaitHandle<u8>>,
        extended: Duration,
    ) -> Awaited {
        let signal = match waiter.wait(timeout) {
            None if progress.and_then(|p| p.wait(Duration::ZERO))
                == Some(AUDIO_CONNECT_IN_PROGRESS) =>
            {
                info!("Headset is connecting audio");
                waiter.wait(extended)
            }
            signal => signal,
        };
        self.resolve(signal)
    }

    fn resolve(&self, signal: Option<StepSignal>) -> Awaited {
        self.shared.disarm();
        match signal {
            // Only primary drivers raise `Disconnected`.
            Some(StepSignal::Event(DriverEvent::Disconnected)) => Awaited::LinkLost,
            Some(StepSignal::Event(event)) => Awaited::Event(event),
            Some(StepSignal::Command(result)) => Awaited::Command(result),
            Some(StepSignal::Interrupted) => Awaited::Interrupted,
            None => Awaited::TimedOut,
        }
    }

    fn start_or_continue(&mut self) {
        let state = self.state();
        if state == ConnectionState::Idle || state.is_failure() {
            info!("Starting connection from {}", state);
            self.target = None;
            self.audio_attempted = false;
            if state.is_failure() {
                self.transition_to(ConnectionState::Idle);
            }
            self.advance();
        } else if state.is_terminal() {
            // Re-confirm for the caller.
            self.shared.publish(LinkEvent::ConnectionStateChanged { state, cause: None });
        } else {
            debug!("Handshake already running in {}", state);
        }
    }

    fn read(&mut self, kind: InfoKind) {
        if !kind.is_readable() {
            warn!("{:?} is not readable", kind);
            return;
        }
        if !self.primary.is_connected() {
            warn!("Cannot read {:?}: not connected", kind);
            return;
        }
        let waiter = self.shared.arm(move |_, event| match event {
            DriverEvent::InfoRead { kind: read, .. } => *read == kind,
            DriverEvent::InfoReadFailed(read) => *read == kind,
            _ => false,
        });
        if !self.primary.read_info(kind) {
            self.shared.disarm();
            return;
        }
        match self.await_step(&waiter, self.settings.read_timeout()) {
            Awaited::Event(DriverEvent::InfoRead { value, .. }) => {
                debug!("Read {:?} = {}", kind, value)
            }
            Awaited::LinkLost => self.on_link_lost(),
            Awaited::TimedOut => warn!("Reading {:?} timed out", kind),
            other => warn!("Reading {:?} failed: {:?}", kind, other),
        }
    }

    fn stream(&mut self, start: bool, monitor_status: bool) {
        if !self.primary.is_connected() {
            warn!("Cannot change streaming: not connected");
            self.shared
                .publish(LinkEvent::StreamStateChanged(StreamState::Disconnected));
            return;
        }
        if start == self.primary.is_streaming() {
            debug!("Stream already {}", if start { "started" } else { "stopped" });
            return;
        }
        let waiter = self.shared.arm(move |_, event| match event {
            DriverEvent::StreamStarted => start,
            DriverEvent::StreamStopped => !start,
            DriverEvent::StreamFailed => true,
            _ => false,
        });
        let initiated = if start {
            self.primary.start_stream(monitor_status)
        } else {
            self.primary.stop_stream()
        };
        if !initiated {
            self.shared.disarm();
            self.shared
                .publish(LinkEvent::StreamStateChanged(StreamState::Failed));
            return;
        }
        match self.await_step(&waiter, self.settings.command_timeout()) {
            Awaited::Event(_) => {}
            Awaited::LinkLost => self.on_link_lost(),
            Awaited::Interrupted => {}
            other => {
                warn!("Stream change did not complete: {:?}", other);
                self.shared
                    .publish(LinkEvent::StreamStateChanged(StreamState::Failed));
            }
        }
    }

    fn reconfigure(&mut self, config: DeviceConfig) {
        let mut commands = Vec::new();
        if let Some(filter) = config.notch_filter {
            commands.push(DeviceCommand::set_notch_filter(filter));
        }
        if let Some(gain) = config.amplifier_gain {
            commands.push(DeviceCommand::set_amplifier_gain(gain));
        }
        if let Some(enable) = config.dc_offset {
            commands.push(DeviceCommand::enable_dc_offset(enable));
        }
        if let Some(enable) = config.p300 {
            commands.push(DeviceCommand::enable_p300(enable));
        }
        let external_name = config.external_name.clone();
        if let Some(name) = &external_name {
            commands.push(DeviceCommand::set_external_name(name));
        }

        info!("Applying {} configuration command(s)", commands.len());
        for command in commands {
            let code = command.code();
            match self.run_command(command) {
                Ok(_) => {
                    if code == MailboxCode::SetExternalName {
                        if let Some(name) = &external_name {
                            self.shared.publish_info(InfoKind::ExternalName, name);
                        }
                    }
                }
                Err(CommandFailure::Command(e)) => warn!("{:?} failed: {}", code, e),
                Err(CommandFailure::Interrupted) => return,
                Err(CommandFailure::LinkLost) => {
                    self.on_link_lost();
                    return;
                }
            }
        }
    }

    fn send_command(&mut self, command: DeviceCommand) {
        let code = command.code();
        match self.run_command(command) {
            Ok(payload) => debug!("{:?} completed: {:02X?}", code, payload),
            Err(CommandFailure::LinkLost) => self.on_link_lost(),
            Err(failure) => debug!("{:?} did not complete: {:?}", code, failure),
        }
    }

    /// Send `command` and wait for its completion.
    ///
    /// The caller's callbacks fire exactly once whatever happens here.
    pub(crate) fn run_command(
        &mut self,
        mut command: DeviceCommand,
    ) -> Result<Vec<u8>, CommandFailure> {
        let code = command.code();
        let rejected = match command.validate() {
            Err(reason) => Some(CommandError::Invalid(reason)),
            Ok(()) if !self.primary.is_connected() => Some(CommandError::NotConnected),
            Ok(()) => None,
        };
        if let Some(error) = rejected {
            warn!("Not sending {:?}: {}", code, error);
            command.take_callback().fail(error.clone());
            return Err(CommandFailure::Command(error));
        }

        let waiter = self.shared.arm(|_, _| false);
        let callback = command.take_callback();
        let done = waiter.clone();
        command = if callback.expects_response() {
            let (on_sent, on_response) = callback.into_parts();
            let command = command.on_response(move |result| {
                if let Some(on_response) = on_response {
                    on_response(result.clone());
                }
                done.notify(StepSignal::Command(result));
            });
            match on_sent {
                Some(on_sent) => command.on_sent(on_sent),
                None => command,
            }
        } else {
            // The caller only hears about the write, so a failed write is
            // reported through `on_sent` even when a response was expected.
            let (on_sent, _) = callback.into_parts();
            let sent = Arc::new(Mutex::new(on_sent));
            let unsent = sent.clone();
            command
                .on_response(move |result| {
                    if let Err(CommandError::WriteFailed) = &result {
                        if let Some(on_sent) = take_sent(&unsent) {
                            on_sent(Err(CommandError::WriteFailed));
                        }
                    }
                    done.notify(StepSignal::Command(result));
                })
                .on_sent(move |result| {
                    if let Some(on_sent) = take_sent(&sent) {
                        on_sent(result);
                    }
                })
        };

        let primary = &mut self.primary;
        let ticket = match self.shared.router.send(command, |frame| primary.write_command(frame)) {
            Ok(ticket) => ticket,
            Err(error) => {
                self.shared.disarm();
                return Err(CommandFailure::Command(error));
            }
        };

        // Audio pairing answers with a provisional frame first; the final one
        // can take as long as a connection.
        let progress = ticket
            .as_ref()
            .filter(|t| t.code() == MailboxCode::ConnectAudio)
            .map(|t| t.progress());
        let outcome = self.await_extended(
            &waiter,
            self.settings.command_timeout(),
            progress,
            self.settings.connection_timeout(),
        );
        match outcome {
            Awaited::Command(Ok(payload)) => Ok(payload),
            Awaited::Command(Err(error)) => Err(CommandFailure::Command(error)),
            Awaited::TimedOut => {
                if let Some(ticket) = &ticket {
                    self.shared.router.expire(ticket);
                }
                Err(CommandFailure::Command(CommandError::Timeout))
            }
            Awaited::Interrupted => {
                self.shared.router.cancel_all(CommandError::Cancelled);
                Err(CommandFailure::Interrupted)
            }
            Awaited::LinkLost => Err(CommandFailure::LinkLost),
            Awaited::Event(event) => {
                error!("Unexpected event while waiting for {:?}: {:?}", code, event);
                Err(CommandFailure::Command(CommandError::Cancelled))
            }
        }
    }

    fn disconnect(&mut self, interrupted: bool) {
        // An interrupt raised before this job is dequeued must still release
        // any step armed in between, so the flag is only cleared here.
        if interrupted {
            self.shared.clear_interrupt();
        }
        let state = self.state();
        info!(
            "Disconnect requested in {} (interrupted: {})",
            state, interrupted
        );
        self.primary.stop_scan();

        if interrupted && state.is_in_progress() {
            self.fail(crate::error::LinkError::Interrupted);
            return;
        }

        if let Some(audio) = self.audio.as_mut() {
            if audio.is_connected() && !audio.disconnect() {
                warn!("Audio disconnect could not be started");
            }
        }
        self.disconnect_primary();
        self.shared.router.cancel_all(CommandError::Cancelled);
        self.shared.registry.clear();
        self.target = None;
        self.audio_attempted = false;
        if state != ConnectionState::Idle && !state.is_failure() {
            self.transition_to(ConnectionState::Idle);
        }
    }

    /// Tear down the primary link and wait for the platform to confirm.
    pub(crate) fn disconnect_primary(&mut self) {
        if !self.primary.is_connected() {
            // Abandons a connect still in flight, if any.
            self.primary.disconnect();
            return;
        }
        self.shared.set_disconnecting(true);
        let waiter = self
            .shared
            .arm(|_, event| *event == DriverEvent::Disconnected);
        if self.primary.disconnect() {
            match self.await_step(&waiter, self.settings.disconnect_timeout()) {
                Awaited::LinkLost => debug!("Primary link closed"),
                other => warn!("Disconnect not confirmed: {:?}", other),
            }
        } else {
            self.shared.disarm();
        }
        self.shared.set_disconnecting(false);
    }

    fn on_link_lost(&mut self) {
        let state = self.state();
        if !state.has_link() {
            debug!("Link loss reported in {}, nothing to do", state);
            return;
        }
        warn!("Link to the headset lost in {}", state);
        self.shared.router.cancel_all(CommandError::Cancelled);
        self.shared.registry.clear();
        self.target = None;
        self.transition_failed(crate::error::LinkError::ConnectionLost);
    }

    fn teardown(&mut self) {
        info!("Shutting down scheduler");
        self.primary.stop_scan();
        self.shared.clear_interrupt();
        self.disconnect_primary();
        self.shared.router.cancel_all(CommandError::Cancelled);
    }
}

fn take_sent(slot: &Mutex<Option<SentCallback>>) -> Option<SentCallback> {
    match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

/// Cloneable submission side of the scheduler. Never blocks on the worker.
#[derive(Clone)]
pub struct RequestHandle {
    shared: Arc<LinkShared>,
}

impl RequestHandle {
    /// Queue `request` for the worker. An interrupting disconnect skips the
    /// queue and releases the step currently blocking the worker.
    pub fn submit(&self, request: LinkRequest) {
        debug!("Submitting {:?}", request);
        match request {
            LinkRequest::Disconnect { interrupted: true } => {
                self.shared.interrupt();
                let job = Job::Request(LinkRequest::Disconnect { interrupted: true });
                if self.shared.priority.send(job).is_err() {
                    warn!("Scheduler worker is gone, dropping interrupt");
                }
            }
            LinkRequest::SendCommand(mut command) => {
                if let Err(reason) = command.validate() {
                    warn!("Rejecting invalid {:?} command: {}", command.code(), reason);
                    command.take_callback().fail(CommandError::Invalid(reason));
                    return;
                }
                self.shared
                    .enqueue(Job::Request(LinkRequest::SendCommand(command)));
            }
            request => self.shared.enqueue(Job::Request(request)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }
}

/// Owns the worker thread; shutting it down tears the link down.
pub struct RequestScheduler {
    handle: RequestHandle,
    worker: Option<JoinHandle<()>>,
}

impl RequestScheduler {
    /// Start the worker thread. Drivers are attached to the scheduler's
    /// event handling and move onto the worker.
    pub fn spawn(
        settings: LinkSettings,
        primary: Box<dyn TransportDriver>,
        audio: Option<Box<dyn TransportDriver>>,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> anyhow::Result<Self> {
        Self::spawn_with_state(
            settings,
            primary,
            audio,
            events,
            Arc::new(StateCell::default()),
        )
    }

    /// Like [`RequestScheduler::spawn`], publishing into an existing `state`.
    pub fn spawn_with_state(
        settings: LinkSettings,
        primary: Box<dyn TransportDriver>,
        audio: Option<Box<dyn TransportDriver>>,
        events: mpsc::UnboundedSender<LinkEvent>,
        state: Arc<StateCell>,
    ) -> anyhow::Result<Self> {
        let (worker, jobs_rx, priority_rx) = Worker::new(settings, primary, audio, events, state);
        let shared = worker.shared.clone();

        let handle = std::thread::Builder::new()
            .name("headset-link-worker".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("Failed to create runtime for the scheduler: {}", e);
                        return;
                    }
                };
                rt.block_on(worker.run(jobs_rx, priority_rx));
            })?;

        Ok(Self {
            handle: RequestHandle { shared },
            worker: Some(handle),
        })
    }

    pub fn handle(&self) -> RequestHandle {
        self.handle.clone()
    }

    pub fn submit(&self, request: LinkRequest) {
        self.handle.submit(request);
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn state_cell(&self) -> Arc<StateCell> {
        self.handle.shared.state.clone()
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.handle.shared.registry.clone()
    }

    /// Interrupt any running step, tear the link down and join the worker.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let shared = &self.handle.shared;
        shared.interrupt();
        if shared.priority.send(Job::Shutdown).is_err() {
            debug!("Scheduler worker already stopped");
        }
        if worker.join().is_err() {
            error!("Scheduler worker panicked");
        }
    }
}

impl Drop for RequestScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
