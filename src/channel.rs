//! Multicast channels connecting the session to its observers.
//!
//! - [`DataChannel`]: received chunks, fan-out to every current subscriber.
//!   Late subscribers miss earlier chunks.
//! - [`StatusChannel`]: lifecycle events, fan-out plus replay of the most
//!   recent event to a new subscriber.
//! - [`ResponseChannel`]: the single latest [`CommandResponse`], replaced
//!   atomically by each command.
//!
//! Publishing never blocks. A subscriber that falls more than its capacity
//! behind loses the oldest events; [`Subscription::dropped`] counts them.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};

use crate::event::{CommandResponse, DataChunk, StatusEvent};

/// Receiving end of the data or status channel.
#[derive(Debug)]
pub struct Subscription<T> {
    replay: Option<T>,
    rx: broadcast::Receiver<T>,
    dropped: u64,
}

impl<T: Clone> Subscription<T> {
    fn new(rx: broadcast::Receiver<T>, replay: Option<T>) -> Self {
        Self {
            replay,
            rx,
            dropped: 0,
        }
    }

    /// Wait for the next event. Returns `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(value) = self.replay.take() {
            return Some(value);
        }
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(n)) => self.note_lag(n),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        if let Some(value) = self.replay.take() {
            return Some(value);
        }
        loop {
            match self.rx.try_recv() {
                Ok(value) => return Some(value),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.note_lag(n),
                Err(_) => return None,
            }
        }
    }

    /// Number of events this subscriber lost by falling behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn note_lag(&mut self, n: u64) {
        log::warn!("Subscriber lagged, dropped {} oldest events", n);
        self.dropped += n;
    }
}

/// Fan-out of received data chunks.
#[derive(Debug)]
pub struct DataChannel {
    tx: broadcast::Sender<DataChunk>,
}

impl DataChannel {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver a chunk to all current subscribers. Returns how many
    /// subscribers it reached.
    pub(crate) fn publish(&self, chunk: DataChunk) -> usize {
        self.tx.send(chunk).unwrap_or(0)
    }

    /// Subscribe to chunks published from now on.
    pub fn subscribe(&self) -> Subscription<DataChunk> {
        Subscription::new(self.tx.subscribe(), None)
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Fan-out of status events with last-value replay.
#[derive(Debug)]
pub struct StatusChannel {
    tx: broadcast::Sender<StatusEvent>,
    // Held across send so subscribe() sees either the old value and the
    // new event, or only the new value.
    last: Mutex<Option<StatusEvent>>,
}

impl StatusChannel {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            last: Mutex::new(None),
        }
    }

    pub(crate) fn publish(&self, event: StatusEvent) {
        log::debug!("Status {:?}: {}", event.kind, event.message);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        *last = Some(event.clone());
        let _ = self.tx.send(event);
    }

    /// Subscribe; the first event received is the most recent one published
    /// before subscribing, if any.
    pub fn subscribe(&self) -> Subscription<StatusEvent> {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        Subscription::new(self.tx.subscribe(), last.clone())
    }

    /// The most recently published event.
    pub fn latest(&self) -> Option<StatusEvent> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Latest-value slot for command responses.
#[derive(Debug)]
pub struct ResponseChannel {
    tx: watch::Sender<Option<CommandResponse>>,
}

impl ResponseChannel {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub(crate) fn publish(&self, response: CommandResponse) {
        self.tx.send_replace(Some(response));
    }

    /// Watch the response slot. The receiver always observes a complete
    /// response, never a partially updated one.
    pub fn subscribe(&self) -> watch::Receiver<Option<CommandResponse>> {
        self.tx.subscribe()
    }

    /// The latest response.
    pub fn latest(&self) -> Option<CommandResponse> {
        self.tx.borrow().clone()
    }
}

/// The three session channels, shared with the poller.
#[derive(Debug, Clone)]
pub(crate) struct Channels {
    pub data: Arc<DataChannel>,
    pub status: Arc<StatusChannel>,
    pub responses: Arc<ResponseChannel>,
}

impl Channels {
    pub(crate) fn new(data_capacity: usize, status_capacity: usize) -> Self {
        Self {
            data: Arc::new(DataChannel::new(data_capacity)),
            status: Arc::new(StatusChannel::new(status_capacity)),
            responses: Arc::new(ResponseChannel::new()),
        }
    }
}
