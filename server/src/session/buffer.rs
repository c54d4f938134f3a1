//! Bounded per-session history used to replay recent state on join.
//!
//! Each sequence is a sliding window: once full, the oldest entry is dropped
//! to make room, so appends never fail and never grow memory past the
//! configured capacity.

use std::collections::VecDeque;

use crate::ws::protocol::Envelope;

/// Default chat history capacity per session.
pub const DEFAULT_CHAT_CAPACITY: usize = 200;
/// Default activity/notification history capacity per session.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 100;

/// A fixed-capacity FIFO log.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest one first if the log is full.
    pub fn push(&mut self, entry: T) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// All entries, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Contents of both sequences at one instant.
#[derive(Debug, Clone, Default)]
pub struct BufferSnapshot {
    pub messages: Vec<Envelope>,
    pub activities: Vec<Envelope>,
}

/// Recent chat messages and activity events for one session.
#[derive(Debug, Clone)]
pub struct ActivityBuffer {
    chat: BoundedLog<Envelope>,
    activity: BoundedLog<Envelope>,
}

impl Default for ActivityBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CHAT_CAPACITY, DEFAULT_ACTIVITY_CAPACITY)
    }
}

impl ActivityBuffer {
    pub fn new(chat_capacity: usize, activity_capacity: usize) -> Self {
        Self {
            chat: BoundedLog::new(chat_capacity),
            activity: BoundedLog::new(activity_capacity),
        }
    }

    pub fn append_chat(&mut self, message: Envelope) {
        self.chat.push(message);
    }

    pub fn append_activity(&mut self, event: Envelope) {
        self.activity.push(event);
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            messages: self.chat.snapshot(),
            activities: self.activity.snapshot(),
        }
    }

    pub fn chat_len(&self) -> usize {
        self.chat.len()
    }

    pub fn activity_len(&self) -> usize {
        self.activity.len()
    }
}
