use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::bw_meter::DownloadStats;
use crate::events::{BufferEventListener, PlayerEventListener, SchedulerEventListener};
use crate::mpd::Segment;
use crate::types::PlaybackState;

/// Progress logger: mirrors the session events into the tracing output.
pub struct EventLogger;

#[async_trait]
impl SchedulerEventListener for EventLogger {
    async fn on_segment_download_start(&self, index: u64, _adap_bw: &HashMap<u32, f64>, segments: &HashMap<u32, Segment>) {
        let selections: HashMap<u32, u32> = segments.iter().map(|(as_id, s)| (*as_id, s.repr_id)).collect();
        info!("download start. index: {index}, selections: {selections:?}");
    }

    async fn on_segment_download_complete(
        &self,
        index: u64,
        _segments: &HashMap<u32, Segment>,
        _stats: &HashMap<u32, DownloadStats>,
    ) {
        info!("download complete. index: {index}");
    }
}

#[async_trait]
impl PlayerEventListener for EventLogger {
    async fn on_state_change(&self, position: f64, old_state: PlaybackState, new_state: PlaybackState) {
        info!("switch state. pos: {position:.3}, from {old_state} to {new_state}");
    }

    async fn on_position_change(&self, position: f64) {
        debug!("position: {position:.3}");
    }
}

#[async_trait]
impl BufferEventListener for EventLogger {
    async fn on_buffer_level_change(&self, buffer_level: f64) {
        debug!("buffer level: {buffer_level:.3}");
    }
}
