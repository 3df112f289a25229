//! Notification bridge: ring callbacks in, blocking waits out.
//!
//! Callbacks run on whichever thread changed the ring. They only set
//! [`TransferFlags`] and post a wake token; the pipeline thread is the
//! only one that touches ring state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use ringprims_attr::NotifyCode;
use ringprims_ring::{NotifyCallback, NotifyMode, NotifyMsg, RingChannel, RingError};
use tracing::trace;

/// Flags set from notification callbacks.
#[derive(Debug, Default)]
pub struct TransferFlags {
    data_start_seen: AtomicBool,
    data_end_seen: AtomicBool,
    remote_shutdown: AtomicBool,
}

impl TransferFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a notification message.
    pub fn record(&self, msg: NotifyMsg) -> NotifyCode {
        let code = NotifyCode::from_msg(msg);
        match code {
            NotifyCode::DataStart => self.data_start_seen.store(true, Ordering::Release),
            NotifyCode::DataEnd => self.data_end_seen.store(true, Ordering::Release),
            NotifyCode::RemoteShutdown => self.remote_shutdown.store(true, Ordering::Release),
            NotifyCode::Wake => {}
        }
        code
    }

    /// Clear and return the data-start flag.
    pub fn take_data_start(&self) -> bool {
        self.data_start_seen.swap(false, Ordering::AcqRel)
    }

    /// Clear and return the data-end flag.
    pub fn take_data_end(&self) -> bool {
        self.data_end_seen.swap(false, Ordering::AcqRel)
    }

    pub fn remote_shutdown(&self) -> bool {
        self.remote_shutdown.load(Ordering::Acquire)
    }

    pub fn set_remote_shutdown(&self) {
        self.remote_shutdown.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy)]
struct Wake;

/// Handle that interrupts a [`NotificationBridge::wait`].
#[derive(Debug, Clone)]
pub struct Waker {
    tx: Sender<Wake>,
}

impl Waker {
    /// Post a wake token. A full queue already holds one, so the token is dropped.
    pub fn wake(&self) {
        let _ = self.tx.try_send(Wake);
    }
}

/// Global stop flag shared by every pipeline of a set.
///
/// Triggering it also wakes every registered bridge.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug, Default)]
struct ShutdownInner {
    requested: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Set the flag and wake every registered waiter.
    pub fn trigger(&self) {
        self.inner.requested.store(true, Ordering::Release);
        let wakers = self
            .inner
            .wakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for waker in wakers.iter() {
            waker.wake();
        }
    }

    /// Wake `waker` when the signal is triggered.
    pub fn register(&self, waker: Waker) {
        if self.is_set() {
            waker.wake();
        }
        self.inner
            .wakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(waker);
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A wake token arrived.
    Woken,
    /// The poll interval elapsed; treated as a spurious wake.
    TimedOut,
    /// Shutdown was requested, locally or by the remote side.
    Shutdown,
}

/// Blocking wait primitive for one ring endpoint.
pub struct NotificationBridge {
    tx: Sender<Wake>,
    rx: Receiver<Wake>,
    flags: Arc<TransferFlags>,
    /// Woken in addition to this bridge when the remote side shuts down.
    linked: Vec<Waker>,
    poll_interval: Duration,
}

impl NotificationBridge {
    pub fn new(flags: Arc<TransferFlags>, poll_interval: Duration) -> Self {
        let (tx, rx) = bounded(1);
        Self {
            tx,
            rx,
            flags,
            linked: Vec::new(),
            poll_interval,
        }
    }

    pub fn flags(&self) -> &Arc<TransferFlags> {
        &self.flags
    }

    pub fn waker(&self) -> Waker {
        Waker {
            tx: self.tx.clone(),
        }
    }

    /// Also wake `waker` whenever a remote shutdown notification arrives here.
    pub fn link(&mut self, waker: Waker) {
        self.linked.push(waker);
    }

    /// Callback to register on a ring endpoint.
    pub fn callback(&self) -> NotifyCallback {
        let flags = Arc::clone(&self.flags);
        let waker = self.waker();
        let linked = self.linked.clone();
        Arc::new(move |msg| {
            if flags.record(msg) == NotifyCode::RemoteShutdown {
                for other in &linked {
                    other.wake();
                }
            }
            waker.wake();
        })
    }

    /// Re-arm the one-shot watermark trigger on `ring`.
    pub fn arm(&self, ring: &mut RingChannel, watermark: usize) -> Result<(), RingError> {
        ring.set_notifier(NotifyMode::Once, watermark, self.callback())
    }

    /// Register a trigger on `ring` that fires on every peer update reaching
    /// `watermark`; it never needs re-arming.
    pub fn subscribe(&self, ring: &mut RingChannel, watermark: usize) -> Result<(), RingError> {
        ring.set_notifier(NotifyMode::Always, watermark, self.callback())
    }

    /// True once local or remote shutdown has been requested.
    pub fn should_stop(&self, shutdown: &ShutdownSignal) -> bool {
        shutdown.is_set() || self.flags.remote_shutdown()
    }

    /// Block until woken, the poll interval elapses, or shutdown.
    pub fn wait(&self, shutdown: &ShutdownSignal) -> WaitOutcome {
        if self.should_stop(shutdown) {
            return WaitOutcome::Shutdown;
        }
        let outcome = match self.rx.recv_timeout(self.poll_interval) {
            Ok(Wake) => WaitOutcome::Woken,
            Err(RecvTimeoutError::Timeout) => WaitOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => WaitOutcome::Shutdown,
        };
        if self.should_stop(shutdown) {
            return WaitOutcome::Shutdown;
        }
        trace!(?outcome, "bridge wait returned");
        outcome
    }
}

impl std::fmt::Debug for NotificationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBridge")
            .field("flags", &self.flags)
            .field("linked", &self.linked.len())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use ringprims_attr::{NOTIFY_DATA_END, NOTIFY_DATA_START, NOTIFY_REMOTE_SHUTDOWN};
    use ringprims_ring::{OpenFlags, RingAttrs, RingRegistry, Role};

    use super::*;

    fn bridge() -> NotificationBridge {
        NotificationBridge::new(Arc::new(TransferFlags::new()), Duration::from_secs(5))
    }

    #[test]
    fn callback_sets_flags_and_wakes() {
        let bridge = bridge();
        let shutdown = ShutdownSignal::new();
        let callback = bridge.callback();

        callback(NOTIFY_DATA_START);
        assert_eq!(bridge.wait(&shutdown), WaitOutcome::Woken);
        assert!(bridge.flags().take_data_start());
        assert!(!bridge.flags().take_data_start());

        callback(NOTIFY_DATA_END);
        assert!(bridge.flags().take_data_end());
    }

    #[test]
    fn subscription_wakes_on_every_write() {
        let registry = RingRegistry::new();
        registry.create("sub", RingAttrs::default()).unwrap();
        let mut writer = registry.open("sub", Role::Writer, OpenFlags::empty()).unwrap();
        let mut reader = registry.open("sub", Role::Reader, OpenFlags::empty()).unwrap();
        let bridge = NotificationBridge::new(Arc::new(TransferFlags::new()), Duration::from_millis(10));
        let shutdown = ShutdownSignal::new();
        bridge.subscribe(&mut reader, 0).unwrap();

        for round in 0..2u8 {
            let grant = writer.acquire(4).unwrap();
            writer.with_grant_mut(|buf| buf.fill(round)).unwrap();
            writer.release(grant.len).unwrap();
            assert_eq!(bridge.wait(&shutdown), WaitOutcome::Woken);

            let grant = reader.acquire(4).unwrap();
            reader.release(grant.len).unwrap();
        }
        assert_eq!(bridge.wait(&shutdown), WaitOutcome::TimedOut);
    }

    #[test]
    fn wakes_coalesce() {
        let bridge = NotificationBridge::new(Arc::new(TransferFlags::new()), Duration::from_millis(10));
        let shutdown = ShutdownSignal::new();
        let waker = bridge.waker();
        waker.wake();
        waker.wake();
        waker.wake();
        assert_eq!(bridge.wait(&shutdown), WaitOutcome::Woken);
        assert_eq!(bridge.wait(&shutdown), WaitOutcome::TimedOut);
    }

    #[test]
    fn remote_shutdown_wakes_linked_bridges() {
        let flags = Arc::new(TransferFlags::new());
        let writer_side = NotificationBridge::new(Arc::clone(&flags), Duration::from_secs(5));
        let mut reader_side = NotificationBridge::new(Arc::clone(&flags), Duration::from_secs(5));
        reader_side.link(writer_side.waker());

        let shutdown = ShutdownSignal::new();
        let callback = reader_side.callback();
        let waiter = thread::spawn(move || {
            let started = Instant::now();
            let outcome = writer_side.wait(&shutdown);
            (outcome, started.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        callback(NOTIFY_REMOTE_SHUTDOWN);

        let (outcome, elapsed) = waiter.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Shutdown);
        assert!(elapsed < Duration::from_secs(2));
        assert!(flags.remote_shutdown());
    }

    #[test]
    fn shutdown_signal_interrupts_wait() {
        let bridge = bridge();
        let shutdown = ShutdownSignal::new();
        shutdown.register(bridge.waker());

        let trigger = shutdown.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.trigger();
        });
        let started = Instant::now();
        assert_eq!(bridge.wait(&shutdown), WaitOutcome::Shutdown);
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }
}
