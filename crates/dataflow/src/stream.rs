//! Difference streams
//!
//! A stream connects one operator's output to any number of downstream
//! readers. Each reader owns a private queue: a message sent by the writer
//! is delivered to every reader exactly once, and each reader consumes its
//! copy at most once. Fan-out (`tee`) is just subscribing a second reader.
//!
//! Messages are never dropped. Readers that fall behind accumulate queue
//! depth until the scheduler drains them.

use crate::multiset::MultiSet;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct ReaderQueue<T> {
    messages: Mutex<VecDeque<MultiSet<T>>>,
}

impl<T> ReaderQueue<T> {
    fn new() -> Self {
        ReaderQueue {
            messages: Mutex::new(VecDeque::new()),
        }
    }
}

/// Reading end of a stream. Owned by exactly one operator input.
pub struct StreamReader<T> {
    queue: Arc<ReaderQueue<T>>,
}

impl<T> StreamReader<T> {
    /// True when at least one message is waiting
    pub fn has_pending(&self) -> bool {
        !self.queue.messages.lock().is_empty()
    }

    /// Number of waiting messages
    pub fn pending(&self) -> usize {
        self.queue.messages.lock().len()
    }

    /// Take the oldest waiting message, if any
    pub fn recv(&self) -> Option<MultiSet<T>> {
        self.queue.messages.lock().pop_front()
    }

    /// Take every waiting message
    pub fn drain(&self) -> Vec<MultiSet<T>> {
        self.queue.messages.lock().drain(..).collect()
    }
}

/// Writing end of a stream. Cloneable: a cloned writer feeds the same
/// readers.
pub struct StreamWriter<T> {
    readers: Arc<Mutex<Vec<Arc<ReaderQueue<T>>>>>,
}

impl<T> Clone for StreamWriter<T> {
    fn clone(&self) -> Self {
        StreamWriter {
            readers: Arc::clone(&self.readers),
        }
    }
}

impl<T> Default for StreamWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StreamWriter<T> {
    /// New writer with no readers yet
    pub fn new() -> Self {
        StreamWriter {
            readers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Attach a new reader. Messages sent before the reader subscribed are
    /// not replayed.
    pub fn subscribe(&self) -> StreamReader<T> {
        let queue = Arc::new(ReaderQueue::new());
        self.readers.lock().push(Arc::clone(&queue));
        StreamReader { queue }
    }

    /// Number of subscribed readers
    pub fn reader_count(&self) -> usize {
        self.readers.lock().len()
    }
}

impl<T: Clone> StreamWriter<T> {
    /// Deliver a message to every reader. Empty messages are suppressed;
    /// they carry no information and would only burn scheduler steps.
    pub fn send(&self, message: MultiSet<T>) {
        if message.is_empty() {
            return;
        }
        let readers = self.readers.lock();
        match readers.len() {
            0 => {}
            1 => readers[0].messages.lock().push_back(message),
            _ => {
                for reader in readers.iter() {
                    reader.messages.lock().push_back(message.clone());
                }
            }
        }
    }
}
