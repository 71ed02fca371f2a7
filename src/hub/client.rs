//! Per-client outbound queue with drop-oldest back-pressure.
//!
//! Publishers never block: when a queue is full the oldest unsent
//! message is discarded and the drop counter advances. The consumer side
//! is the front-end task draining the session socket.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use super::messages::ServerMessage;

/// What happened to a pushed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The queue was full; the oldest unsent message was discarded to
    /// make room.
    DroppedOldest,
    /// The client is gone; the message went nowhere.
    Closed,
}

/// Bounded single-consumer queue feeding one client session.
pub struct OutboundQueue {
    capacity: usize,
    inner: Mutex<VecDeque<ServerMessage>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue without blocking the publisher.
    pub async fn push(&self, message: ServerMessage) -> PushOutcome {
        if self.closed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }

        let outcome = {
            let mut queue = self.inner.lock().await;
            let outcome = if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Queued
            };
            queue.push_back(message);
            outcome
        };

        self.notify.notify_one();
        outcome
    }

    /// Receive the next message; `None` once the queue is closed and
    /// drained.
    pub async fn recv(&self) -> Option<ServerMessage> {
        loop {
            if let Some(message) = self.inner.lock().await.pop_front() {
                return Some(message);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Next message if one is already queued.
    pub async fn try_recv(&self) -> Option<ServerMessage> {
        self.inner.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Total messages discarded to make room.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the queue; wakes a blocked consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Consumer handle for one connected session.
///
/// Dropping the handle does not disconnect; call `TrackingHub::disconnect`
/// so topic membership is released too.
#[derive(Clone)]
pub struct ClientHandle {
    session_id: Uuid,
    queue: Arc<OutboundQueue>,
}

impl ClientHandle {
    pub(super) fn new(session_id: Uuid, queue: Arc<OutboundQueue>) -> Self {
        Self { session_id, queue }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Next outbound message; `None` after disconnect.
    pub async fn recv(&self) -> Option<ServerMessage> {
        self.queue.recv().await
    }

    /// Non-blocking variant for tests and polling drains.
    pub async fn try_recv(&self) -> Option<ServerMessage> {
        self.queue.try_recv().await
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(n: usize) -> ServerMessage {
        ServerMessage::SystemNotification {
            message: format!("m{n}"),
            severity: crate::domain::EventSeverity::Info,
        }
    }

    fn body(message: &ServerMessage) -> String {
        match message {
            ServerMessage::SystemNotification { message, .. } => message.clone(),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = OutboundQueue::new(8);
        for n in 0..3 {
            assert_eq!(queue.push(message(n)).await, PushOutcome::Queued);
        }
        assert_eq!(body(&queue.recv().await.unwrap()), "m0");
        assert_eq!(body(&queue.recv().await.unwrap()), "m1");
        assert_eq!(body(&queue.recv().await.unwrap()), "m2");
    }

    #[tokio::test]
    async fn test_drop_oldest_on_overflow() {
        let queue = OutboundQueue::new(2);
        queue.push(message(0)).await;
        queue.push(message(1)).await;
        assert_eq!(queue.push(message(2)).await, PushOutcome::DroppedOldest);
        assert_eq!(queue.dropped(), 1);

        // m0 is gone; m1 and m2 survive in order.
        assert_eq!(body(&queue.recv().await.unwrap()), "m1");
        assert_eq!(body(&queue.recv().await.unwrap()), "m2");
    }

    #[tokio::test]
    async fn test_close_wakes_consumer() {
        let queue = Arc::new(OutboundQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.recv().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.close();

        assert!(consumer.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_after_close_is_discarded() {
        let queue = OutboundQueue::new(4);
        queue.close();
        assert_eq!(queue.push(message(0)).await, PushOutcome::Closed);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_drain_then_none_after_close() {
        let queue = OutboundQueue::new(4);
        queue.push(message(0)).await;
        queue.close();
        assert!(queue.recv().await.is_some());
        assert!(queue.recv().await.is_none());
    }
}
