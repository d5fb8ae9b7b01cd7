//! Target queues and fan-out
//!
//! Every enabled target owns one bounded queue, created at start-up and never
//! resized. Producers deliver the same [`Event`] to every queue whose target
//! name matches the event's routing filter. A full queue is waited on for a
//! bounded time, after which the event is dropped for that target only.

use std::time::Duration;

use tracing::{trace, warn};

use crate::printable::{Event, Target};

/// How long a producer waits on a full target queue before dropping
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// One bounded queue feeding one target writer
#[derive(Debug, Clone)]
pub struct TargetQueue {
    pub target: Target,
    sender: flume::Sender<Event>,
    capacity: usize,
}

impl TargetQueue {
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill level between 0.0 and 1.0
    pub fn load(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.len() as f64 / self.capacity as f64
    }

    /// Offer an event, waiting at most `timeout` for free space.
    ///
    /// Returns whether the event was enqueued.
    pub async fn offer(&self, event: Event, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.sender.send_async(event)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                warn!(target_name = %self.target, "target queue closed, dropping event");
                false
            }
            Err(_) => {
                warn!(target_name = %self.target, "could not write to target queue within {timeout:?}, dropping event");
                false
            }
        }
    }
}

/// The set of all target queues
#[derive(Debug, Clone, Default)]
pub struct TargetQueues {
    queues: Vec<TargetQueue>,
}

impl TargetQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the queue for a target and return its receiving end
    pub fn register(&mut self, target: Target, capacity: usize) -> flume::Receiver<Event> {
        let (sender, receiver) = flume::bounded(capacity);
        self.queues.push(TargetQueue {
            target,
            sender,
            capacity,
        });
        receiver
    }

    pub fn queues(&self) -> &[TargetQueue] {
        &self.queues
    }

    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.queues.iter().map(|queue| &queue.target)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Highest fill level over all queues
    pub fn max_load(&self) -> f64 {
        self.queues
            .iter()
            .map(TargetQueue::load)
            .fold(0.0, f64::max)
    }

    /// Deliver an event to every matching queue.
    ///
    /// Queues are served one after another so a single producer keeps its
    /// order within each queue. Returns the number of queues that accepted it.
    pub async fn fan_out(&self, event: Event, timeout: Duration) -> usize {
        let mut delivered = 0;
        for queue in &self.queues {
            if !event.test_target_filter(&queue.target.name) {
                trace!(target_name = %queue.target, "routing filter does not match");
                continue;
            }
            if queue.offer(event.clone(), timeout).await {
                delivered += 1;
            }
        }
        delivered
    }
}
