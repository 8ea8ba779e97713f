//! Mailbox command routing.
//!
//! Outbound commands are validated, registered and written; inbound frames
//! are matched on their identifier byte to the pending command and the rest
//! of the frame is handed to its callback unchanged.

use crate::error::CommandError;
use crate::infrastructure::bluetooth::protocol::{
    CommandCallback, DeviceCommand, MailboxCode, SentCallback, AUDIO_CONNECT_IN_PROGRESS,
};
use crate::infrastructure::sync::WaitHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// What the router did with an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Completed the pending command with this identifier.
    Completed(MailboxCode),
    /// Intermediate response; the command is still pending.
    Provisional(MailboxCode),
    /// Known identifier with nobody waiting for it.
    Unsolicited(MailboxCode, Vec<u8>),
    /// Identifier not in the table.
    Unknown(u8),
    Empty,
}

/// Handle on a command that is awaiting its response.
#[derive(Debug, Clone)]
pub struct CommandTicket {
    code: MailboxCode,
    sequence: u64,
    progress: Arc<WaitHandle<u8>>,
}

impl CommandTicket {
    pub fn code(&self) -> MailboxCode {
        self.code
    }

    /// Released with the status byte of a provisional response, or without
    /// a value once the command has finished.
    pub fn progress(&self) -> &WaitHandle<u8> {
        &self.progress
    }
}

struct PendingCommand {
    sequence: u64,
    on_response: Box<dyn FnOnce(Result<Vec<u8>, CommandError>) + Send>,
    progress: Arc<WaitHandle<u8>>,
}

impl PendingCommand {
    fn finish(self, result: Result<Vec<u8>, CommandError>) {
        (self.on_response)(result);
        self.progress.signal();
    }
}

#[derive(Default)]
pub struct CommandRouter {
    pending: Mutex<HashMap<MailboxCode, PendingCommand>>,
    sequence: AtomicU64,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate, register and transmit `command` through `write`.
    ///
    /// An invalid command is never handed to `write`: its callback receives
    /// [`CommandError::Invalid`] before this returns. A ticket is returned
    /// only when the command waits for a response.
    pub fn send<W>(
        &self,
        mut command: DeviceCommand,
        write: W,
    ) -> Result<Option<CommandTicket>, CommandError>
    where
        W: FnOnce(&[u8]) -> bool,
    {
        let code = command.code();
        let callback = command.take_callback();

        if let Err(reason) = command.validate() {
            warn!("Rejecting invalid {:?} command: {}", code, reason);
            let error = CommandError::Invalid(reason);
            callback.fail(error.clone());
            return Err(error);
        }

        let frame = command.serialize();
        let (on_sent, ticket) = match callback {
            CommandCallback::Response {
                on_sent,
                on_response,
            } if code.has_response() => {
                let ticket = self.register(code, on_response);
                (on_sent, Some(ticket))
            }
            CommandCallback::Response {
                on_sent,
                on_response,
            } => {
                // The headset never answers this identifier.
                debug!("{:?} has no response frame, completing on write", code);
                let on_sent: SentCallback = Box::new(move |result| {
                    if let Some(on_sent) = on_sent {
                        on_sent(result.clone());
                    }
                    on_response(result.map(|_| Vec::new()));
                });
                (Some(on_sent), None)
            }
            CommandCallback::Sent(on_sent) => (Some(on_sent), None),
            CommandCallback::None => (None, None),
        };

        debug!("Writing {:?} frame: {:02X?}", code, frame);
        if !write(&frame) {
            warn!("Failed to write {:?} command", code);
            if let Some(ticket) = &ticket {
                self.finish(code, Some(ticket.sequence), Err(CommandError::WriteFailed));
            }
            if let Some(on_sent) = on_sent {
                if ticket.is_none() {
                    on_sent(Err(CommandError::WriteFailed));
                }
            }
            return Err(CommandError::WriteFailed);
        }

        if let Some(on_sent) = on_sent {
            on_sent(Ok(()));
        }
        Ok(ticket)
    }

    fn register(
        &self,
        code: MailboxCode,
        on_response: Box<dyn FnOnce(Result<Vec<u8>, CommandError>) + Send>,
    ) -> CommandTicket {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let progress = Arc::new(WaitHandle::new());
        let previous = self.lock().insert(
            code,
            PendingCommand {
                sequence,
                on_response,
                progress: progress.clone(),
            },
        );
        if let Some(previous) = previous {
            info!("{:?} superseded by a newer command", code);
            previous.finish(Err(CommandError::Superseded));
        }
        CommandTicket {
            code,
            sequence,
            progress,
        }
    }

    /// Route an inbound mailbox frame.
    pub fn on_frame(&self, frame: &[u8]) -> FrameDisposition {
        let Some((&identifier, payload)) = frame.split_first() else {
            return FrameDisposition::Empty;
        };
        let Some(code) = MailboxCode::from_u8(identifier) else {
            warn!("Unknown mailbox identifier {:#04X}", identifier);
            return FrameDisposition::Unknown(identifier);
        };

        if code == MailboxCode::BadCommand {
            let rejected = payload.first().copied().and_then(MailboxCode::from_u8);
            return match rejected {
                Some(original) if self.finish(original, None, Err(CommandError::Rejected(identifier))) => {
                    warn!("Headset rejected {:?}", original);
                    FrameDisposition::Completed(original)
                }
                _ => FrameDisposition::Unsolicited(code, payload.to_vec()),
            };
        }

        if code == MailboxCode::ConnectAudio && payload.first() == Some(&AUDIO_CONNECT_IN_PROGRESS) {
            let pending = self.lock();
            if let Some(command) = pending.get(&code) {
                debug!("Audio connection in progress");
                command.progress.notify(AUDIO_CONNECT_IN_PROGRESS);
                return FrameDisposition::Provisional(code);
            }
            drop(pending);
            return FrameDisposition::Unsolicited(code, payload.to_vec());
        }

        if self.finish(code, None, Ok(payload.to_vec())) {
            debug!("{:?} response: {:02X?}", code, payload);
            FrameDisposition::Completed(code)
        } else {
            FrameDisposition::Unsolicited(code, payload.to_vec())
        }
    }

    /// Fail the pending command for `ticket` with [`CommandError::Timeout`].
    /// Does nothing if it already completed or was replaced.
    pub fn expire(&self, ticket: &CommandTicket) -> bool {
        let expired = self.finish(ticket.code, Some(ticket.sequence), Err(CommandError::Timeout));
        if expired {
            warn!("{:?} timed out waiting for a response", ticket.code);
        }
        expired
    }

    /// Fail every pending command with `error`.
    pub fn cancel_all(&self, error: CommandError) {
        let drained: Vec<PendingCommand> = self.lock().drain().map(|(_, c)| c).collect();
        if !drained.is_empty() {
            info!("Cancelling {} pending command(s): {}", drained.len(), error);
        }
        for command in drained {
            command.finish(Err(error.clone()));
        }
    }

    pub fn is_pending(&self, code: MailboxCode) -> bool {
        self.lock().contains_key(&code)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn finish(
        &self,
        code: MailboxCode,
        sequence: Option<u64>,
        result: Result<Vec<u8>, CommandError>,
    ) -> bool {
        let command = {
            let mut pending = self.lock();
            match pending.get(&code) {
                Some(command) if sequence.map_or(true, |s| s == command.sequence) => {
                    pending.remove(&code)
                }
                _ => None,
            }
        };
        // Callbacks run without the lock held so they may send again.
        match command {
            Some(command) => {
                command.finish(result);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MailboxCode, PendingCommand>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    type Responses = Arc<Mutex<Vec<Result<Vec<u8>, CommandError>>>>;

    fn recording_command(command: DeviceCommand) -> (DeviceCommand, Responses) {
        let responses: Responses = Arc::new(Mutex::new(Vec::new()));
        let sink = responses.clone();
        let command = command.on_response(move |result| sink.lock().unwrap().push(result));
        (command, responses)
    }

    #[test]
    fn test_invalid_command_is_never_written() {
        let router = CommandRouter::new();
        let writes = AtomicUsize::new(0);
        let (command, responses) = recording_command(DeviceCommand::set_serial_number(""));

        let result = router.send(command, |_| {
            writes.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert!(matches!(result, Err(CommandError::Invalid(_))));
        assert_eq!(writes.load(Ordering::SeqCst), 0);
        let responses = responses.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert!(matches!(responses[0], Err(CommandError::Invalid(_))));
        assert_eq!(router.pending_count(), 0);
    }

    #[test]
    fn test_response_is_routed_by_identifier() {
        let router = CommandRouter::new();
        let (command, responses) = recording_command(DeviceCommand::get_system_status());
        let ticket = router.send(command, |_| true).unwrap().unwrap();
        assert_eq!(ticket.code(), MailboxCode::GetSystemStatus);

        let disposition = router.on_frame(&[0x0C, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(disposition, FrameDisposition::Completed(MailboxCode::GetSystemStatus));
        assert_eq!(*responses.lock().unwrap(), vec![Ok(vec![0, 0, 0, 0])]);
        assert!(ticket.progress().is_signalled());
    }

    #[test]
    fn test_provisional_audio_response_is_not_terminal() {
        let router = CommandRouter::new();
        let (command, responses) = recording_command(DeviceCommand::connect_audio());
        let ticket = router.send(command, |_| true).unwrap().unwrap();

        let disposition = router.on_frame(&[0x0A, AUDIO_CONNECT_IN_PROGRESS]);
        assert_eq!(disposition, FrameDisposition::Provisional(MailboxCode::ConnectAudio));
        assert!(responses.lock().unwrap().is_empty());
        assert!(router.is_pending(MailboxCode::ConnectAudio));
        assert_eq!(
            ticket.progress().wait(Duration::from_millis(10)),
            Some(AUDIO_CONNECT_IN_PROGRESS)
        );

        router.on_frame(&[0x0A, 0x00]);
        assert_eq!(*responses.lock().unwrap(), vec![Ok(vec![0x00])]);
        assert!(!router.is_pending(MailboxCode::ConnectAudio));
    }

    #[test]
    fn test_write_failure_reports_once() {
        let router = CommandRouter::new();
        let sent = Arc::new(AtomicUsize::new(0));
        let sent_counter = sent.clone();
        let (command, responses) = recording_command(
            DeviceCommand::get_eeg_config().on_sent(move |_| {
                sent_counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(router.send(command, |_| false).unwrap_err(), CommandError::WriteFailed);
        assert_eq!(*responses.lock().unwrap(), vec![Err(CommandError::WriteFailed)]);
        assert_eq!(sent.load(Ordering::SeqCst), 0);
        assert_eq!(router.pending_count(), 0);
    }

    #[test]
    fn test_newer_command_supersedes_pending() {
        let router = CommandRouter::new();
        let (first, first_responses) = recording_command(DeviceCommand::get_eeg_config());
        let (second, second_responses) = recording_command(DeviceCommand::get_eeg_config());
        let first_ticket = router.send(first, |_| true).unwrap().unwrap();
        router.send(second, |_| true).unwrap();

        assert_eq!(*first_responses.lock().unwrap(), vec![Err(CommandError::Superseded)]);
        // The stale ticket must not expire the replacement.
        assert!(!router.expire(&first_ticket));
        router.on_frame(&[0x04, 0x01]);
        assert_eq!(*second_responses.lock().unwrap(), vec![Ok(vec![0x01])]);
    }

    #[test]
    fn test_rejection_and_unsolicited_frames() {
        let router = CommandRouter::new();
        let (command, responses) = recording_command(DeviceCommand::get_eeg_config());
        router.send(command, |_| true).unwrap();

        assert_eq!(
            router.on_frame(&[0xFF, 0x04]),
            FrameDisposition::Completed(MailboxCode::GetEegConfig)
        );
        assert_eq!(*responses.lock().unwrap(), vec![Err(CommandError::Rejected(0xFF))]);

        assert_eq!(
            router.on_frame(&[0x10, 0x03]),
            FrameDisposition::Unsolicited(MailboxCode::LeadOffEvent, vec![0x03])
        );
        assert_eq!(router.on_frame(&[0x02]), FrameDisposition::Unknown(0x02));
        assert_eq!(router.on_frame(&[]), FrameDisposition::Empty);
    }

    #[test]
    fn test_expire_and_cancel() {
        let router = CommandRouter::new();
        let (first, first_responses) = recording_command(DeviceCommand::get_eeg_config());
        let (second, second_responses) = recording_command(DeviceCommand::get_system_status());
        let ticket = router.send(first, |_| true).unwrap().unwrap();
        router.send(second, |_| true).unwrap();

        assert!(router.expire(&ticket));
        assert_eq!(*first_responses.lock().unwrap(), vec![Err(CommandError::Timeout)]);

        router.cancel_all(CommandError::Cancelled);
        assert_eq!(*second_responses.lock().unwrap(), vec![Err(CommandError::Cancelled)]);
        assert_eq!(router.pending_count(), 0);
    }

    #[test]
    fn test_response_without_frame_completes_on_write() {
        let router = CommandRouter::new();
        let (command, responses) = recording_command(DeviceCommand::reboot());
        assert!(router.send(command, |_| true).unwrap().is_none());
        assert_eq!(*responses.lock().unwrap(), vec![Ok(Vec::new())]);
    }
}
