//! Listener capabilities shared by the playback components.
//!
//! Each component owns a [`Listeners`] fan-out and broadcasts its events to
//! every registered observer. A module gains a capability by implementing the
//! matching trait and registering itself at composition time.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bw_meter::DownloadStats;
use crate::mpd::Segment;
use crate::types::PlaybackState;

/// Observer of transport-level transfer progress.
///
/// Per URL the transport guarantees exactly one `on_transfer_start`, zero or
/// more `on_bytes_transferred` with monotonically increasing `position`, and
/// exactly one terminal event (`on_transfer_end` or `on_transfer_canceled`).
#[async_trait]
pub trait DownloadEventListener: Send + Sync {
    async fn on_transfer_start(&self, _url: &str) {}

    /// `length` bytes arrived for `url`; the stream is now at `position` of
    /// `size` total bytes.
    async fn on_bytes_transferred(&self, _length: usize, _url: &str, _position: usize, _size: usize, _chunk: &Bytes) {}

    async fn on_transfer_end(&self, _size: usize, _url: &str) {}

    async fn on_transfer_canceled(&self, _url: &str, _position: usize, _size: usize) {}
}

/// Observer of the segment scheduler.
#[async_trait]
pub trait SchedulerEventListener: Send + Sync {
    /// A segment group starts downloading. `adap_bw` is the bandwidth
    /// estimate snapshot per adaptation set at selection time.
    async fn on_segment_download_start(&self, _index: u64, _adap_bw: &HashMap<u32, f64>, _segments: &HashMap<u32, Segment>) {}

    async fn on_segment_download_complete(
        &self,
        _index: u64,
        _segments: &HashMap<u32, Segment>,
        _stats: &HashMap<u32, DownloadStats>,
    ) {
    }
}

/// Observer of buffer level changes.
#[async_trait]
pub trait BufferEventListener: Send + Sync {
    async fn on_buffer_level_change(&self, _buffer_level: f64) {}
}

/// Observer of bandwidth estimate updates.
#[async_trait]
pub trait BandwidthUpdateListener: Send + Sync {
    /// `bw` is the latest estimate in bits per second.
    async fn on_bandwidth_update(&self, _bw: f64) {}
}

/// Observer of playback progress.
#[async_trait]
pub trait PlayerEventListener: Send + Sync {
    async fn on_state_change(&self, _position: f64, _old_state: PlaybackState, _new_state: PlaybackState) {}

    async fn on_position_change(&self, _position: f64) {}

    async fn on_segment_playback_start(&self, _segments: &HashMap<u32, Segment>) {}
}

/// Fan-out list of registered listeners.
pub struct Listeners<T: ?Sized> {
    inner: Mutex<Vec<Arc<T>>>,
}

impl<T: ?Sized> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Listeners<T> {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Vec::new()) }
    }

    pub fn add(&self, listener: Arc<T>) {
        self.inner.lock().unwrap().push(listener);
    }

    /// Snapshot of the current listeners, taken so events can be dispatched
    /// without holding the lock across awaits.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.inner.lock().unwrap().clone()
    }
}
