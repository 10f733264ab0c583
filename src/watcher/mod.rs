//! A generic periodic-poll watcher: single-flight refresh, non-blocking
//! peek, and deadline-bounded fan-out to subscribers. One implementation
//! backs both the classic and the portfolio-margin account, parameterized
//! by the snapshot type and its builder.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

const FAN_OUT_DEADLINE: Duration = Duration::from_secs(1);
const POLL_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("watcher is already closed")]
    Closed,
    #[error("watcher is already running")]
    AlreadyStarted,
}

/// Outcome of a non-blocking peek/update attempt.
pub enum Refresh<S, E> {
    /// A refresh was already in progress; nothing new to report.
    Updating,
    Ok(Arc<S>),
    Err(E),
}

type BuildFuture<'a, S, E> = Pin<Box<dyn Future<Output = Result<S, E>> + Send + 'a>>;

/// Anything that can build a fresh snapshot of type `S`, fallibly with
/// error type `E`.
pub trait SnapshotBuilder<S, E>: Send + Sync {
    fn build<'a>(&'a self) -> BuildFuture<'a, S, E>;
}

struct Subscriber<S, E> {
    id: u64,
    sender: mpsc::Sender<Result<Arc<S>, Arc<E>>>,
}

/// A single subscription handle; `unsubscribe` removes exactly this
/// subscriber by identity, never by a degenerate index range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

struct SlotInner<S> {
    latest: Option<Arc<S>>,
}

pub struct Watcher<S, E> {
    builder: Arc<dyn SnapshotBuilder<S, E>>,
    slot: Arc<Mutex<SlotInner<S>>>,
    subscribers: Arc<std::sync::Mutex<Vec<Subscriber<S, E>>>>,
    next_subscriber_id: AtomicU64,
    closed: Arc<AtomicBool>,
    started: AtomicBool,
    close_notify: Arc<Notify>,
    poll_period: Duration,
}

impl<S, E> Watcher<S, E>
where
    S: Send + Sync + 'static,
    E: std::fmt::Debug + Send + Sync + 'static,
{
    pub fn new(builder: Arc<dyn SnapshotBuilder<S, E>>) -> Self {
        Self::with_poll_period(builder, POLL_PERIOD)
    }

    pub fn with_poll_period(builder: Arc<dyn SnapshotBuilder<S, E>>, poll_period: Duration) -> Self {
        Self {
            builder,
            slot: Arc::new(Mutex::new(SlotInner { latest: None })),
            subscribers: Arc::new(std::sync::Mutex::new(Vec::new())),
            next_subscriber_id: AtomicU64::new(1),
            closed: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            close_notify: Arc::new(Notify::new()),
            poll_period,
        }
    }

    /// Single-flight refresh: if another `update()` is already in progress,
    /// returns `Refresh::Updating` immediately rather than queueing.
    pub async fn update(&self) -> Refresh<S, E> {
        let guard = match self.slot.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Refresh::Updating,
        };
        self.do_update(guard).await
    }

    async fn do_update<'a>(
        &self,
        mut guard: tokio::sync::MutexGuard<'a, SlotInner<S>>,
    ) -> Refresh<S, E> {
        match self.builder.build().await {
            Ok(snapshot) => {
                let arc = Arc::new(snapshot);
                guard.latest = Some(arc.clone());
                Refresh::Ok(arc)
            }
            Err(e) => Refresh::Err(e),
        }
    }

    /// Non-blocking peek at the latest slot. `Updating` if a refresh is
    /// currently in flight.
    pub async fn peek(&self) -> Option<Arc<S>> {
        match self.slot.try_lock() {
            Ok(guard) => guard.latest.clone(),
            Err(_) => None,
        }
    }

    pub fn subscribe(&self, buffer: usize) -> (SubscriberId, mpsc::Receiver<Result<Arc<S>, Arc<E>>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push(Subscriber { id, sender: tx });
        (SubscriberId(id), rx)
    }

    /// Removes exactly the matching subscriber by identity. Idempotent: a
    /// second call with the same id is a no-op.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .retain(|s| s.id != id.0);
    }

    /// Starts the background poll loop. May only be called once; returns
    /// an error if already started or already closed.
    pub fn start(self: &Arc<Self>) -> Result<(), WatcherError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WatcherError::Closed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WatcherError::AlreadyStarted);
        }

        let this = self.clone();
        tokio::spawn(async move { this.run_loop().await });
        Ok(())
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            let sleep = tokio::time::sleep(self.poll_period);
            tokio::select! {
                _ = self.close_notify.notified() => {
                    info!("watcher loop exiting on close");
                    return;
                }
                _ = sleep => {}
            }

            let result = self.update().await;
            match result {
                Refresh::Updating => continue,
                Refresh::Ok(snapshot) => self.fan_out(Ok(snapshot)).await,
                Refresh::Err(e) => self.fan_out(Err(Arc::new(e))).await,
            }
        }
    }

    /// Delivers one message to every subscriber concurrently, each bound
    /// by a 1-second send deadline. A stuck subscriber is logged and
    /// skipped for this tick; it stays registered for the next one.
    async fn fan_out(&self, msg: Result<Arc<S>, Arc<E>>) {
        let senders: Vec<(u64, mpsc::Sender<Result<Arc<S>, Arc<E>>>)> = self
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .iter()
            .map(|s| (s.id, s.sender.clone()))
            .collect();

        let mut tasks = Vec::with_capacity(senders.len());
        for (id, sender) in senders {
            let msg = msg.clone();
            tasks.push(tokio::spawn(async move {
                match timeout(FAN_OUT_DEADLINE, sender.send(msg)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        warn!(subscriber_id = id, "subscriber channel closed during fan-out");
                    }
                    Err(_) => {
                        warn!(subscriber_id = id, "no reader of account channel within 1 second");
                    }
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Idempotent; cancels the poll loop after the in-flight update (if
    /// any) finishes. Calling `start()` after `close()` fails.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration as StdDuration;

    #[derive(Debug, Clone)]
    struct Dummy(u32);

    struct CountingBuilder {
        count: AtomicU32,
    }

    impl SnapshotBuilder<Dummy, String> for CountingBuilder {
        fn build<'a>(&'a self) -> BuildFuture<'a, Dummy, String> {
            Box::pin(async move {
                let n = self.count.fetch_add(1, Ordering::SeqCst);
                Ok(Dummy(n))
            })
        }
    }

    #[tokio::test]
    async fn single_flight_update_returns_updating_when_locked() {
        let watcher = Arc::new(Watcher::<Dummy, String>::new(Arc::new(CountingBuilder {
            count: AtomicU32::new(0),
        })));

        let guard = watcher.slot.try_lock().unwrap();
        match watcher.update().await {
            Refresh::Updating => {}
            _ => panic!("expected Updating while slot is held"),
        }
        drop(guard);
    }

    #[tokio::test]
    async fn update_populates_slot_and_peek_reads_it() {
        let watcher = Watcher::<Dummy, String>::new(Arc::new(CountingBuilder {
            count: AtomicU32::new(0),
        }));
        match watcher.update().await {
            Refresh::Ok(s) => assert_eq!(s.0, 0),
            _ => panic!("expected Ok"),
        }
        let peeked = watcher.peek().await.unwrap();
        assert_eq!(peeked.0, 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_removes_by_identity() {
        let watcher = Watcher::<Dummy, String>::new(Arc::new(CountingBuilder {
            count: AtomicU32::new(0),
        }));
        let (id_a, _rx_a) = watcher.subscribe(4);
        let (id_b, _rx_b) = watcher.subscribe(4);

        watcher.unsubscribe(id_a);
        assert_eq!(watcher.subscribers.lock().unwrap().len(), 1);
        assert_eq!(watcher.subscribers.lock().unwrap()[0].id, id_b.0);

        // Idempotent: removing again is a no-op, not an error.
        watcher.unsubscribe(id_a);
        assert_eq!(watcher.subscribers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_delivery_to_others() {
        let watcher = Arc::new(Watcher::<Dummy, String>::with_poll_period(
            Arc::new(CountingBuilder {
                count: AtomicU32::new(0),
            }),
            StdDuration::from_millis(50),
        ));

        let (_fast_id, mut fast_rx) = watcher.subscribe(1);
        let (_slow_id, _slow_rx) = watcher.subscribe(0);

        watcher.update().await;
        watcher
            .fan_out(Ok(Arc::new(Dummy(1))))
            .await;

        let received = timeout(StdDuration::from_millis(200), fast_rx.recv())
            .await
            .expect("fast subscriber should receive promptly")
            .expect("channel open");
        assert!(matches!(received, Ok(d) if d.0 == 1));
    }
}
