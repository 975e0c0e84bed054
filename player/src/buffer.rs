use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::events::{BufferEventListener, Listeners};
use crate::mpd::Segment;

/// One enqueued segment group: the segment of every selected adaptation set
/// for a single index, playing for the longest duration among them.
#[derive(Debug, Clone)]
pub struct BufferItem {
    pub segments: HashMap<u32, Segment>,
    pub max_duration: f64,
}

struct BufferState {
    queue: VecDeque<BufferItem>,
    level: f64,
}

/// FIFO of downloaded segment groups with a change-condition signal.
///
/// Queue and level are updated under one lock, so a waiter woken by the
/// change signal always observes a consistent head.
pub struct BufferManager {
    state: Mutex<BufferState>,
    changed: Notify,
    listeners: Listeners<dyn BufferEventListener>,
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BufferState { queue: VecDeque::new(), level: 0.0 }),
            changed: Notify::new(),
            listeners: Listeners::new(),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn BufferEventListener>) {
        self.listeners.add(listener);
    }

    /// Seconds of playable media currently queued.
    pub fn buffer_level(&self) -> f64 {
        self.state.lock().unwrap().level
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().queue.is_empty()
    }

    /// Non-destructive peek at the head of the queue.
    pub fn next_item(&self) -> Option<BufferItem> {
        self.state.lock().unwrap().queue.front().cloned()
    }

    /// Append a segment group and raise the level by its longest duration.
    pub async fn enqueue_buffer(&self, segments: HashMap<u32, Segment>) {
        let max_duration = segments.values().map(|s| s.duration).fold(0.0, f64::max);
        let level = {
            let mut state = self.state.lock().unwrap();
            state.queue.push_back(BufferItem { segments, max_duration });
            state.level += max_duration;
            state.level
        };
        self.publish_level(level).await;
        self.changed.notify_waiters();
    }

    /// Remove the head of the queue and lower the level accordingly.
    pub async fn dequeue_buffer(&self) -> Option<BufferItem> {
        let (item, level) = {
            let mut state = self.state.lock().unwrap();
            match state.queue.pop_front() {
                Some(item) => {
                    state.level -= item.max_duration;
                    (Some(item), state.level)
                }
                None => (None, state.level),
            }
        };
        if item.is_some() {
            self.publish_level(level).await;
            self.changed.notify_waiters();
        }
        item
    }

    /// Wait until `pred` holds. The notified future is registered before the
    /// predicate check so a change between check and await is never missed.
    pub async fn wait_until(&self, mut pred: impl FnMut() -> bool) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if pred() {
                return;
            }
            notified.await;
        }
    }

    /// Wake all waiters so they re-check their predicate.
    pub fn notify_change(&self) {
        self.changed.notify_waiters();
    }

    async fn publish_level(&self, level: f64) {
        for listener in self.listeners.snapshot() {
            listener.on_buffer_level_change(level).await;
        }
    }
}
