//! Blocking hand-off between platform callbacks and the scheduler worker.
//!
//! A [`WaitHandle`] is armed before an asynchronous operation is started.
//! The callback side calls [`WaitHandle::notify`] (or [`WaitHandle::signal`])
//! whenever completion arrives, and the worker blocks in
//! [`WaitHandle::wait`] with an upper bound. A notification that lands before
//! the wait starts is kept and returned by the next wait without blocking.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// A value was delivered.
    Value(T),
    /// Unblocked without a value.
    Signalled,
    /// Nothing arrived before the deadline.
    TimedOut,
}

impl<T> WaitOutcome<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            WaitOutcome::Value(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    signalled: bool,
}

#[derive(Debug)]
pub struct WaitHandle<T> {
    slot: Mutex<Slot<T>>,
    condvar: Condvar,
}

impl<T> Default for WaitHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WaitHandle<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                signalled: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Deliver `value` and wake the waiter.
    ///
    /// The first value delivered is kept until consumed; later values are
    /// dropped. Returns `false` when a value was already pending.
    pub fn notify(&self, value: T) -> bool {
        let mut slot = self.lock();
        let accepted = slot.value.is_none();
        if accepted {
            slot.value = Some(value);
        }
        slot.signalled = true;
        drop(slot);
        self.condvar.notify_all();
        accepted
    }

    /// Wake the waiter without a value.
    pub fn signal(&self) {
        let mut slot = self.lock();
        slot.signalled = true;
        drop(slot);
        self.condvar.notify_all();
    }

    /// Block for at most `timeout`; returns the delivered value, if any.
    pub fn wait(&self, timeout: Duration) -> Option<T> {
        self.wait_for(timeout).into_value()
    }

    /// Block for at most `timeout` and report how the wait ended.
    pub fn wait_for(&self, timeout: Duration) -> WaitOutcome<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();

        while !slot.signalled {
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            slot = match self.condvar.wait_timeout(slot, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        slot.signalled = false;
        match slot.value.take() {
            Some(value) => WaitOutcome::Value(value),
            None => WaitOutcome::Signalled,
        }
    }

    /// `true` if a notification is waiting to be consumed.
    pub fn is_signalled(&self) -> bool {
        self.lock().signalled
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_notify_before_wait_is_not_lost() {
        let handle = WaitHandle::new();
        handle.notify(7u32);
        let started = Instant::now();
        assert_eq!(handle.wait(Duration::from_secs(5)), Some(7));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_notify_from_another_thread() {
        let handle = Arc::new(WaitHandle::new());
        let notifier = handle.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            notifier.notify("done");
        });
        assert_eq!(handle.wait(Duration::from_secs(5)), Some("done"));
        worker.join().unwrap();
    }

    #[test]
    fn test_timeout_returns_empty() {
        let handle: WaitHandle<u8> = WaitHandle::new();
        let timeout = Duration::from_millis(50);
        let started = Instant::now();
        assert_eq!(handle.wait_for(timeout), WaitOutcome::TimedOut);
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(500));
    }

    #[test]
    fn test_signal_unblocks_without_value() {
        let handle: WaitHandle<u8> = WaitHandle::new();
        handle.signal();
        assert_eq!(handle.wait_for(Duration::from_secs(1)), WaitOutcome::Signalled);
        // consumed
        assert_eq!(
            handle.wait_for(Duration::from_millis(10)),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_first_value_wins() {
        let handle = WaitHandle::new();
        assert!(handle.notify(1));
        assert!(!handle.notify(2));
        assert_eq!(handle.wait(Duration::from_millis(10)), Some(1));
        assert_eq!(handle.wait(Duration::from_millis(10)), None);
    }
}
