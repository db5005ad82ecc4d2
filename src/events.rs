//! Live event stream with a bounded replay buffer.
//!
//! Every pushed message gets a strictly increasing id, is kept in a ring buffer of
//! fixed capacity and is sent to all attached [`ReadStream`]s. A stream that is
//! created with a `last_id` first receives the buffered messages after that id.

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{Arc, OnceLock, Weak},
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_lite::{stream::Boxed, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Default number of buffered messages.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// A message of an [`EventStream`].
#[derive(Debug, Serialize, Deserialize)]
pub struct Message {
    /// Id, strictly increasing per stream, starting at 1.
    pub id: u64,
    /// Event name.
    pub event: String,
    /// Payload.
    pub data: Value,
    #[serde(skip)]
    encoded: OnceLock<Bytes>,
}

impl Message {
    /// Create a message.
    pub fn new(id: u64, event: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            event: event.into(),
            data,
            encoded: OnceLock::new(),
        }
    }

    /// The JSON encoding of this message.
    ///
    /// Encoded once, later calls return the cached bytes.
    pub fn encoded(&self) -> Result<Bytes> {
        if let Some(bytes) = self.encoded.get() {
            return Ok(bytes.clone());
        }
        let bytes = Bytes::from(serde_json::to_vec(self)?);
        Ok(self.encoded.get_or_init(|| bytes).clone())
    }
}

/// Options for [`EventStream::create_read_stream`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOpts {
    /// Replay buffered messages with an id greater than this.
    pub last_id: Option<u64>,
}

impl ReadOpts {
    /// Resume after `last_id`.
    pub fn after(last_id: u64) -> Self {
        Self {
            last_id: Some(last_id),
        }
    }
}

#[derive(Debug)]
struct Inner {
    capacity: usize,
    next_id: u64,
    buffer: VecDeque<Arc<Message>>,
    subscribers: Vec<(u64, flume::Sender<Arc<Message>>)>,
    next_subscriber: u64,
    closed: bool,
}

/// A broadcast stream of messages with a replay buffer.
#[derive(Debug, Clone)]
pub struct EventStream {
    inner: Arc<Mutex<Inner>>,
}

impl EventStream {
    /// Create a stream buffering up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                capacity: capacity.max(1),
                next_id: 1,
                buffer: VecDeque::new(),
                subscribers: Vec::new(),
                next_subscriber: 0,
                closed: false,
            })),
        }
    }

    /// Push a message to the buffer and all attached read streams.
    ///
    /// Returns the id of the message.
    pub fn push(&self, event: impl Into<String>, data: Value) -> Result<u64> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Closed);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let message = Arc::new(Message::new(id, event, data));
        if inner.buffer.len() >= inner.capacity {
            inner.buffer.pop_front();
        }
        inner.buffer.push_back(message.clone());
        // unbounded channels: sending never waits for a slow reader
        inner
            .subscribers
            .retain(|(_, tx)| tx.send(message.clone()).is_ok());
        trace!(id, subscribers = inner.subscribers.len(), "push");
        Ok(id)
    }

    /// Attach a new read stream.
    pub fn create_read_stream(&self, opts: ReadOpts) -> ReadStream<Arc<Message>> {
        self.create_read_stream_with(opts, |message| message)
    }

    /// Attach a new read stream that transforms every message with `map`.
    ///
    /// If `opts.last_id` is older than the oldest buffered message, the whole buffer
    /// is replayed. Replayed messages are always delivered before live ones.
    pub fn create_read_stream_with<T, F>(&self, opts: ReadOpts, map: F) -> ReadStream<T>
    where
        T: Send + 'static,
        F: Fn(Arc<Message>) -> T + Send + 'static,
    {
        let (tx, rx) = flume::unbounded();
        let mut inner = self.inner.lock();
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        if let Some(last_id) = opts.last_id {
            for message in inner.buffer.iter().filter(|m| m.id > last_id) {
                tx.send(message.clone()).ok();
            }
        }
        if inner.closed {
            drop(tx);
        } else {
            inner.subscribers.push((id, tx));
        }
        debug!(subscriber = id, last_id = ?opts.last_id, "attach read stream");
        ReadStream {
            id,
            inner: rx.into_stream().map(map).boxed(),
            events: Arc::downgrade(&self.inner),
        }
    }

    /// Number of attached read streams.
    pub fn subscribers(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Id of the most recently pushed message, or 0.
    pub fn last_id(&self) -> u64 {
        self.inner.lock().next_id - 1
    }

    /// Detach all read streams and reject further messages.
    ///
    /// Attached streams end after delivering what they already received.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let detached = inner.subscribers.len();
        inner.subscribers.clear();
        debug!(detached, "close event stream");
    }
}

/// A live stream of messages from an [`EventStream`].
///
/// Dropping it detaches it from the event stream.
pub struct ReadStream<T> {
    id: u64,
    inner: Boxed<T>,
    events: Weak<Mutex<Inner>>,
}

impl<T> std::fmt::Debug for ReadStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadStream").field("id", &self.id).finish()
    }
}

impl<T> Stream for ReadStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next(cx)
    }
}

impl<T> Drop for ReadStream<T> {
    fn drop(&mut self) {
        if let Some(events) = self.events.upgrade() {
            events.lock().subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}
