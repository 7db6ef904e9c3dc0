//! The shared key-event queue.
//!
//! Drivers push from their worker threads, the application thread drains
//! with a bounded wait.  Built on the daemon's own re-entrant mutex and
//! condition variable; `put` broadcasts so every consumer wakes, and
//! [`wake`](KeyQueue::wake) broadcasts without enqueuing so a shutdown
//! handler can interrupt a blocked `get`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use remote_core::{KeyId, KeyPress, KeySink};
use tracing::warn;

use crate::infrastructure::sync::{CondVar, ReentrantMutex};

/// Default capacity; outruns any human on a remote control.
pub const DEFAULT_CAPACITY: usize = 64;

/// Bounded FIFO of normalized key events.
pub struct KeyQueue {
    buffer: ReentrantMutex<RefCell<VecDeque<KeyPress>>>,
    ready: CondVar,
    capacity: usize,
}

impl KeyQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer: ReentrantMutex::new(RefCell::new(VecDeque::with_capacity(capacity))),
            ready: CondVar::new(),
            capacity,
        })
    }

    /// Waits up to `timeout` for the next event.
    ///
    /// Returns `None` on timeout — and also when woken with an empty
    /// queue (see [`wake`](Self::wake)), so the caller re-checks its run
    /// flag either way.
    pub fn get(&self, timeout: Duration) -> Option<KeyPress> {
        let guard = self.buffer.lock();
        if let Some(press) = guard.borrow_mut().pop_front() {
            return Some(press);
        }
        let (guard, _signalled) = self.ready.wait_timeout(guard, timeout);
        let press = guard.borrow_mut().pop_front();
        press
    }

    /// Interrupts a blocked [`get`](Self::get) without enqueuing.
    pub fn wake(&self) {
        self.ready.broadcast();
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.buffer.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeySink for KeyQueue {
    fn put(&self, id: KeyId, repeat: bool, release: bool) {
        {
            let guard = self.buffer.lock();
            let mut buffer = guard.borrow_mut();
            if buffer.len() >= self.capacity {
                warn!("key queue full, dropping oldest event");
                buffer.pop_front();
            }
            buffer.push_back(KeyPress { id, repeat, release });
        }
        self.ready.broadcast();
    }
}
