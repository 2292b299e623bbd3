//! In-flight deliveries and the queue between worker threads and the host.
//!
//! The queue is a single lock-protected FIFO shared by N producers and the one
//! host consumer, so deliveries from one worker keep their submission order.
//! Producers wake the host through a condvar (blocking hosts) and a
//! [`tokio::sync::Notify`] (async hosts).

use super::reply::Completer;
use crate::error::DeliveryError;
use crate::events::EventType;
use crate::marshal::OwnedPayload;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// One event waiting for the host thread
#[derive(Debug)]
pub struct PendingDelivery {
    /// Submission sequence number
    pub seq: u64,
    /// Event kind
    pub event_type: EventType,
    /// Cookie the engine callback was registered with
    pub cookie: Option<usize>,
    /// Deep-copied payload
    pub payload: OwnedPayload,
    /// Reply completer for request kinds
    pub reply: Option<Completer>,
    /// Worker thread that submitted the event
    pub origin: ThreadId,
}

impl PendingDelivery {
    /// Create a delivery from the current thread
    pub fn new(
        seq: u64,
        event_type: EventType,
        cookie: Option<usize>,
        payload: OwnedPayload,
        reply: Option<Completer>,
    ) -> Self {
        Self {
            seq,
            event_type,
            cookie,
            payload,
            reply,
            origin: thread::current().id(),
        }
    }

    /// Whether a worker is blocked on this delivery
    pub fn is_request(&self) -> bool {
        self.reply.is_some()
    }
}

struct QueueState {
    items: VecDeque<PendingDelivery>,
    closed: bool,
}

/// FIFO of pending deliveries
pub struct DeliveryQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    notify: Notify,
    capacity: usize,
}

impl DeliveryQueue {
    /// Create a queue holding at most `capacity` deliveries (0 = unbounded)
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue a delivery, returning the depth after insertion.
    ///
    /// A rejected delivery is dropped here, which completes its reply slot
    /// with `HostUnavailable`.
    pub fn push(&self, delivery: PendingDelivery) -> Result<usize, DeliveryError> {
        let depth = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(DeliveryError::HostUnavailable);
            }
            if self.capacity > 0 && state.items.len() >= self.capacity {
                return Err(DeliveryError::QueueFull(state.items.len()));
            }
            state.items.push_back(delivery);
            state.items.len()
        };
        self.available.notify_one();
        self.notify.notify_one();
        Ok(depth)
    }

    /// Take up to `max` deliveries in submission order (0 = all)
    pub fn pop_batch(&self, max: usize) -> Vec<PendingDelivery> {
        let mut state = self.state.lock();
        let n = if max == 0 {
            state.items.len()
        } else {
            max.min(state.items.len())
        };
        state.items.drain(..n).collect()
    }

    /// Refuse further deliveries and take everything still queued
    pub fn close(&self) -> Vec<PendingDelivery> {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.available.notify_all();
        self.notify.notify_waiters();
        drained
    }

    /// Whether the queue was closed
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued deliveries
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Block until something is queued, the queue closes, or `timeout` expires
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.closed {
            if self.available.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        !state.items.is_empty()
    }

    /// Resolve once something is queued (or the queue closes)
    pub async fn work_available(&self) {
        loop {
            // register before checking, so a close in between still wakes us
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.state.lock();
                if !state.items.is_empty() || state.closed {
                    return;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::reply::ReplySlot;
    use crate::events::Discovery;
    use std::sync::Arc;

    fn delivery(seq: u64) -> PendingDelivery {
        PendingDelivery::new(
            seq,
            EventType::DiscoveryAdvertisementAlive,
            None,
            OwnedPayload::Discovery(Some(Discovery::default())),
            None,
        )
    }

    #[test]
    fn test_fifo_order() {
        let queue = DeliveryQueue::new(0);
        for seq in 0..5 {
            queue.push(delivery(seq)).unwrap();
        }
        let seqs: Vec<u64> = queue.pop_batch(0).iter().map(|d| d.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_batch_limit() {
        let queue = DeliveryQueue::new(0);
        for seq in 0..5 {
            queue.push(delivery(seq)).unwrap();
        }
        assert_eq!(queue.pop_batch(2).len(), 2);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_capacity() {
        let queue = DeliveryQueue::new(1);
        assert_eq!(queue.push(delivery(0)), Ok(1));
        assert_eq!(queue.push(delivery(1)), Err(DeliveryError::QueueFull(1)));
    }

    #[test]
    fn test_rejected_request_completes_host_unavailable() {
        let queue = DeliveryQueue::new(0);
        queue.close();
        let (slot, completer) = ReplySlot::pair();
        let mut d = delivery(0);
        d.reply = Some(completer);
        assert_eq!(queue.push(d), Err(DeliveryError::HostUnavailable));
        assert_eq!(slot.wait(None), Err(DeliveryError::HostUnavailable));
    }

    #[test]
    fn test_wait_for_work() {
        let queue = Arc::new(DeliveryQueue::new(0));
        assert!(!queue.wait_for_work(Duration::from_millis(5)));

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                queue.push(delivery(0)).unwrap();
            })
        };
        assert!(queue.wait_for_work(Duration::from_secs(5)));
        producer.join().unwrap();
    }

    #[tokio::test]
    async fn test_work_available_async() {
        let queue = Arc::new(DeliveryQueue::new(0));
        let producer = {
            let queue = Arc::clone(&queue);
            tokio::task::spawn_blocking(move || {
                std::thread::sleep(Duration::from_millis(10));
                queue.push(delivery(7)).unwrap();
            })
        };
        tokio::time::timeout(Duration::from_secs(5), queue.work_available())
            .await
            .unwrap();
        producer.await.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_work_available_resolves_on_close() {
        let queue = Arc::new(DeliveryQueue::new(0));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.work_available().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();

        // already closed: resolves without waiting
        tokio::time::timeout(Duration::from_secs(5), queue.work_available())
            .await
            .unwrap();
    }
}
