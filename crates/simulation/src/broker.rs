use crate::state::BrokerState;
use crate::InMemoryChannel;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

pub(crate) struct Shared {
    pub(crate) state: Mutex<BrokerState>,
    /// Signalled on every change a waiting consumer could care about.
    pub(crate) changed: Notify,
}

impl Shared {
    pub(crate) fn notify(&self) {
        self.changed.notify_waiters();
    }
}

/// An in-process message broker.
///
/// Cheap to clone; clones share the same exchanges and queues. Open one
/// [`InMemoryChannel`] per producer or consumer.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("epoch", &self.shared.state.lock().epoch)
            .finish_non_exhaustive()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                changed: Notify::new(),
            }),
        }
    }

    pub fn channel(&self) -> InMemoryChannel {
        let (id, epoch) = {
            let mut state = self.shared.state.lock();
            (state.open_channel(), state.epoch)
        };
        InMemoryChannel::new(id, epoch, Arc::clone(&self.shared))
    }

    /// Mark a queue as closed: once it is drained and nothing delivered from
    /// it is awaiting acknowledgement, its consumers end. Returns false if
    /// the queue does not exist.
    pub fn close_queue(&self, queue: &str) -> bool {
        let closed = self.shared.state.lock().close_queue(queue);
        self.shared.notify();
        closed
    }

    /// Simulate a broker restart.
    ///
    /// Every open channel is disconnected; their unacknowledged deliveries
    /// are returned first. Only durable exchanges, durable queues, and
    /// persistent messages inside durable queues survive.
    pub fn restart(&self) {
        self.shared.state.lock().restart();
        self.shared.notify();
    }

    /// Ready messages in a queue; `None` if the queue does not exist.
    pub fn queue_len(&self, queue: &str) -> Option<usize> {
        self.shared.state.lock().queue_len(queue)
    }

    /// Delivered but not yet acknowledged messages from a queue.
    pub fn unacked_len(&self, queue: &str) -> Option<usize> {
        self.shared.state.lock().outstanding(queue)
    }

    pub fn consumer_count(&self, queue: &str) -> Option<usize> {
        self.shared.state.lock().consumer_count(queue)
    }

    pub fn binding_count(&self, exchange: &str) -> Option<usize> {
        self.shared.state.lock().binding_count(exchange)
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.queue_len(queue).is_some()
    }

    pub fn exchange_exists(&self, exchange: &str) -> bool {
        self.shared.state.lock().has_exchange(exchange)
    }
}
