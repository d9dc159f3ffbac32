//! Time-ordered retry queue with a lazily started poller.

use super::RetryDescriptor;
use crate::cancellation::CancellationToken;
use crate::dispatch::DispatchItem;
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

struct ScheduledRetry {
    due: Instant,
    seq: u64,
    descriptor: RetryDescriptor,
}

impl PartialEq for ScheduledRetry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledRetry {}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRetry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct QueueState {
    entries: BinaryHeap<Reverse<ScheduledRetry>>,
    next_seq: u64,
    polling: bool,
}

/// Holds retry descriptors until they are due and writes them back into the
/// dispatch queue.
///
/// A single poller task runs while the queue is non-empty. It wakes every
/// `tick`, releases every entry due within `tolerance`, and exits once the
/// queue drains or the broker is cancelled.
pub struct RetryQueue {
    state: Mutex<QueueState>,
    sender: UnboundedSender<DispatchItem>,
    cancellation: CancellationToken,
    tick: Duration,
    tolerance: Duration,
}

impl RetryQueue {
    /// Creates an idle queue writing into `sender`.
    #[must_use]
    pub fn new(
        sender: UnboundedSender<DispatchItem>,
        cancellation: CancellationToken,
        tick: Duration,
        tolerance: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            sender,
            cancellation,
            tick,
            tolerance,
        }
    }

    /// Schedules a descriptor for redelivery after `delay`.
    ///
    /// Starts the poller if it is not running. Must be called from within a
    /// tokio runtime.
    pub fn schedule(self: &Arc<Self>, descriptor: RetryDescriptor, delay: Duration) {
        let start_poller = {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push(Reverse(ScheduledRetry {
                due: Instant::now() + delay,
                seq,
                descriptor,
            }));
            !std::mem::replace(&mut state.polling, true)
        };

        if start_poller {
            debug!(
                tick_ms = u64::try_from(self.tick.as_millis()).unwrap_or(u64::MAX),
                "Starting retry poller"
            );
            tokio::spawn(Arc::clone(self).poll());
        }
    }

    /// Returns the number of scheduled retries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Returns true while the poller task is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.state.lock().polling
    }

    async fn poll(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.cancellation.cancelled() => {
                    self.state.lock().polling = false;
                    debug!("Retry poller cancelled");
                    return;
                }
                _ = interval.tick() => {}
            }

            let (due, drained) = self.take_due(Instant::now() + self.tolerance);
            for descriptor in due {
                trace!(
                    event_type = %descriptor.event().key(),
                    pipeline = %descriptor.pipeline().name(),
                    attempt = descriptor.attempt(),
                    "Releasing retry"
                );
                if self.sender.send(DispatchItem::Retry(descriptor)).is_err() {
                    warn!("Dispatch queue closed, dropping due retry");
                }
            }

            if drained {
                debug!("Retry queue drained, stopping poller");
                return;
            }
        }
    }

    /// Pops every entry due by `horizon`. Clears the polling flag in the same
    /// critical section when nothing is left.
    fn take_due(&self, horizon: Instant) -> (Vec<RetryDescriptor>, bool) {
        let mut state = self.state.lock();
        let mut due = Vec::new();
        while state
            .entries
            .peek()
            .is_some_and(|Reverse(entry)| entry.due <= horizon)
        {
            if let Some(Reverse(entry)) = state.entries.pop() {
                due.push(entry.descriptor);
            }
        }

        let drained = state.entries.is_empty();
        if drained {
            state.polling = false;
        }
        (due, drained)
    }
}

impl std::fmt::Debug for RetryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RetryQueue")
            .field("pending", &state.entries.len())
            .field("polling", &state.polling)
            .field("tick", &self.tick)
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::PublishedEvent;
    use crate::pipeline::PipelineBuilder;
    use crate::pool::ObjectPool;
    use crate::retry::RetryPolicy;
    use tokio::sync::mpsc;

    struct Ping(u32);

    fn descriptor(pool: &Arc<ObjectPool<Arc<RetryPolicy>>>, value: u32) -> RetryDescriptor {
        let pipeline = PipelineBuilder::for_event::<Ping>()
            .handler(|_: Arc<Ping>| async { anyhow::Ok(()) })
            .build()
            .unwrap();
        RetryDescriptor::new(PublishedEvent::new(Ping(value)), pool.rent(), Arc::new(pipeline))
    }

    fn queue() -> (Arc<RetryQueue>, mpsc::UnboundedReceiver<DispatchItem>, CancellationToken) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancellation = CancellationToken::new();
        let queue = RetryQueue::new(
            tx,
            cancellation.clone(),
            Duration::from_millis(10),
            Duration::from_millis(5),
        );
        (Arc::new(queue), rx, cancellation)
    }

    fn ping_value(item: &DispatchItem) -> Option<u32> {
        match item {
            DispatchItem::Retry(d) => d.event().downcast::<Ping>().map(|p| p.0),
            DispatchItem::Event(_) => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_releases_in_due_order_then_stops() {
        let pool = Arc::new(ObjectPool::new(4));
        let (queue, mut rx, _cancel) = queue();

        queue.schedule(descriptor(&pool, 2), Duration::from_millis(200));
        queue.schedule(descriptor(&pool, 1), Duration::from_millis(100));
        assert_eq!(queue.len(), 2);
        assert!(queue.is_polling());

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();

        assert_eq!(ping_value(&first), Some(1));
        assert_eq!(ping_value(&second), Some(2));
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!queue.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_released_before_due() {
        let pool = Arc::new(ObjectPool::new(4));
        let (queue, mut rx, _cancel) = queue();

        let started = Instant::now();
        queue.schedule(descriptor(&pool, 1), Duration::from_millis(100));
        let _ = rx.recv().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(95));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_poller() {
        let pool = Arc::new(ObjectPool::new(4));
        let (queue, mut rx, cancel) = queue();

        queue.schedule(descriptor(&pool, 1), Duration::from_secs(10));
        cancel.cancel("shutdown");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!queue.is_polling());
        assert_eq!(queue.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_after_draining() {
        let pool = Arc::new(ObjectPool::new(4));
        let (queue, mut rx, _cancel) = queue();

        queue.schedule(descriptor(&pool, 1), Duration::from_millis(20));
        let _ = rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!queue.is_polling());

        queue.schedule(descriptor(&pool, 2), Duration::from_millis(20));
        let item = rx.recv().await.unwrap();
        assert_eq!(ping_value(&item), Some(2));
    }
}
