//! Per-session asynchronous response queue (spec §4.7): server-pushed
//! packets (change notify, oplock break) that must never be written
//! between an earlier request's header and its reply.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::pool::Packet;

/// FIFO of prepared response packets awaiting a drain point. The
/// dispatcher may enqueue at any time; only the session's write path
/// drains it, and only at the two points spec §4.7 allows: between
/// request/response cycles, and right after sending a direct response.
///
/// Backed by a shared, synchronously-lockable queue so a collaborator
/// completing on another task (e.g. a [`crate::collaborators::ChangeNotifyHandler`]
/// firing a change notification) can push a reply without holding a
/// `&mut Session` -- see [`AsyncQueue::handle`].
#[derive(Default)]
pub struct AsyncQueue {
    queue: Arc<Mutex<VecDeque<Packet>>>,
}

impl AsyncQueue {
    pub fn new() -> Self {
        AsyncQueue::default()
    }

    pub fn push(&mut self, packet: Packet) {
        self.queue.lock().unwrap().push_back(packet);
    }

    pub fn pop(&mut self) -> Option<Packet> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn drain(&mut self) -> Vec<Packet> {
        self.queue.lock().unwrap().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Returns a cloneable, `Send + Sync` handle onto this queue, for
    /// handing to a collaborator at registration time so it can push a
    /// completion from whatever task it runs on.
    pub fn handle(&self) -> AsyncQueueHandle {
        AsyncQueueHandle { queue: self.queue.clone() }
    }
}

/// A cloneable handle that can push onto a session's [`AsyncQueue`]
/// without needing `&mut Session`.
#[derive(Clone)]
pub struct AsyncQueueHandle {
    queue: Arc<Mutex<VecDeque<Packet>>>,
}

impl AsyncQueueHandle {
    pub fn push(&self, packet: Packet) {
        self.queue.lock().unwrap().push_back(packet);
    }
}
