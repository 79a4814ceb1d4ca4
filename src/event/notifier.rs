//! Event object trait and the default `Notify`-backed implementation

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use super::error::NotifierError;

/// Shared handle to a node's event object
///
/// The node owns the event; descriptors hold a clone of the same handle so a
/// consumer can wait on it.
pub type EventHandle = Arc<dyn EventObject>;

/// How a wait on an event object ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The event was signaled
    Signaled,
    /// The caller's timeout elapsed first
    TimedOut,
    /// The event was destroyed while (or before) waiting
    Destroyed,
}

/// A waitable signaling primitive
pub trait EventObject: Send + Sync + fmt::Debug {
    /// Wake a waiter, or leave a pending wake-up if nobody is waiting yet
    fn signal(&self) -> Result<(), NotifierError>;

    /// Release the event. Waiters observe [`WaitOutcome::Destroyed`].
    fn destroy(&self) -> Result<(), NotifierError>;

    /// Wait until the event is signaled or destroyed
    ///
    /// Dropping the returned future cancels the wait.
    fn wait(&self) -> Pin<Box<dyn Future<Output = WaitOutcome> + Send + '_>>;
}

/// Default event object backed by `tokio::sync::Notify`
///
/// A signal raised with no waiter present is kept as a single permit, so a
/// consumer that starts waiting after the producer vanished still wakes.
#[derive(Debug, Default)]
pub struct DataEvent {
    notify: Notify,
    destroyed: AtomicBool,
    signal_count: AtomicU64,
}

impl DataEvent {
    /// Create a new event object
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new event object behind a shareable handle
    pub fn create() -> EventHandle {
        Arc::new(Self::new())
    }

    /// Number of successful signals so far
    pub fn signal_count(&self) -> u64 {
        self.signal_count.load(Ordering::Relaxed)
    }

    /// Whether `destroy` has been called
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl EventObject for DataEvent {
    fn signal(&self) -> Result<(), NotifierError> {
        if self.is_destroyed() {
            return Err(NotifierError::AlreadyDestroyed);
        }

        self.signal_count.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        Ok(())
    }

    fn destroy(&self) -> Result<(), NotifierError> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(NotifierError::AlreadyDestroyed);
        }

        // Wake current waiters and leave a permit for a late one
        self.notify.notify_waiters();
        self.notify.notify_one();
        Ok(())
    }

    fn wait(&self) -> Pin<Box<dyn Future<Output = WaitOutcome> + Send + '_>> {
        Box::pin(async move {
            if self.is_destroyed() {
                return WaitOutcome::Destroyed;
            }

            self.notify.notified().await;

            if self.is_destroyed() {
                WaitOutcome::Destroyed
            } else {
                WaitOutcome::Signaled
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;

    #[tokio::test]
    async fn test_signal_wakes_waiter() {
        let event = Arc::new(DataEvent::new());

        let waiter = {
            let event = Arc::clone(&event);
            tokio::spawn(async move { event.wait().await })
        };

        // Give the waiter a chance to park
        tokio::task::yield_now().await;
        event.signal().unwrap();

        assert_eq!(waiter.await.unwrap(), WaitOutcome::Signaled);
        assert_eq!(event.signal_count(), 1);
    }

    #[tokio::test]
    async fn test_signal_before_wait_is_kept() {
        let event = DataEvent::new();
        event.signal().unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(100), event.wait())
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Signaled);
    }

    #[test]
    fn test_wait_pending_until_signaled() {
        let event = DataEvent::new();
        let mut wait = task::spawn(event.wait());

        assert_pending!(wait.poll());

        event.signal().unwrap();
        assert!(wait.is_woken());
        assert_ready_eq!(wait.poll(), WaitOutcome::Signaled);
    }

    #[test]
    fn test_destroy_wakes_waiter() {
        let event = DataEvent::new();
        let mut wait = task::spawn(event.wait());

        assert_pending!(wait.poll());

        event.destroy().unwrap();
        assert_ready_eq!(wait.poll(), WaitOutcome::Destroyed);
    }

    #[test]
    fn test_destroy_twice_fails() {
        let event = DataEvent::new();

        assert!(event.destroy().is_ok());
        assert_eq!(event.destroy(), Err(NotifierError::AlreadyDestroyed));
        assert!(event.is_destroyed());
    }

    #[test]
    fn test_signal_after_destroy_fails() {
        let event = DataEvent::new();
        event.destroy().unwrap();

        assert_eq!(event.signal(), Err(NotifierError::AlreadyDestroyed));
        assert_eq!(event.signal_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_after_destroy_returns_immediately() {
        let event = DataEvent::new();
        event.destroy().unwrap();

        assert_eq!(event.wait().await, WaitOutcome::Destroyed);
    }

    #[test]
    fn test_repeated_signals_collapse_to_one_permit() {
        let event = DataEvent::new();
        for _ in 0..5 {
            event.signal().unwrap();
        }
        assert_eq!(event.signal_count(), 5);

        let mut first = task::spawn(event.wait());
        assert_ready_eq!(first.poll(), WaitOutcome::Signaled);
        drop(first);

        let mut second = task::spawn(event.wait());
        assert_pending!(second.poll());
    }
}
