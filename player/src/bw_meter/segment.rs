use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::bw_meter::{fold_bandwidth, BandwidthMeter, DownloadStats, StatsTracker};
use crate::events::{BandwidthUpdateListener, DownloadEventListener, Listeners, SchedulerEventListener};
use crate::mpd::Segment;
use crate::utils::Clock;

struct MeterState {
    bw: f64,
    total_bytes: usize,
    start_time: Option<f64>,
}

/// The default estimator. Bytes accumulate across a whole segment group;
/// the estimate folds once per scheduler segment completion, so there is no
/// running estimate between completions.
pub struct SegmentBandwidthMeter {
    clock: Clock,
    smoothing_factor: f64,
    state: Mutex<MeterState>,
    tracker: StatsTracker,
    listeners: Listeners<dyn BandwidthUpdateListener>,
}

impl SegmentBandwidthMeter {
    pub fn new(clock: Clock, max_initial_bitrate: f64, smoothing_factor: f64) -> Self {
        Self {
            tracker: StatsTracker::new(clock.clone()),
            clock,
            smoothing_factor,
            state: Mutex::new(MeterState { bw: max_initial_bitrate, total_bytes: 0, start_time: None }),
            listeners: Listeners::new(),
        }
    }
}

impl BandwidthMeter for SegmentBandwidthMeter {
    fn bandwidth(&self) -> f64 {
        self.state.lock().unwrap().bw
    }

    fn stats(&self, url: &str) -> Option<DownloadStats> {
        self.tracker.get(url)
    }

    fn add_listener(&self, listener: Arc<dyn BandwidthUpdateListener>) {
        self.listeners.add(listener);
    }
}

#[async_trait]
impl DownloadEventListener for SegmentBandwidthMeter {
    async fn on_transfer_start(&self, url: &str) {
        let mut state = self.state.lock().unwrap();
        if state.start_time.is_none() {
            state.start_time = Some(self.clock.now());
        }
        drop(state);
        self.tracker.on_start(url);
    }

    async fn on_bytes_transferred(&self, length: usize, url: &str, _position: usize, size: usize, _chunk: &Bytes) {
        self.state.lock().unwrap().total_bytes += length;
        self.tracker.on_bytes(url, length, size);
    }

    async fn on_transfer_end(&self, _size: usize, url: &str) {
        self.tracker.on_end(url);
    }

    async fn on_transfer_canceled(&self, url: &str, _position: usize, _size: usize) {
        self.tracker.on_canceled(url);
    }
}

#[async_trait]
impl SchedulerEventListener for SegmentBandwidthMeter {
    async fn on_segment_download_complete(
        &self,
        _index: u64,
        _segments: &HashMap<u32, Segment>,
        _stats: &HashMap<u32, DownloadStats>,
    ) {
        let bw = {
            let mut state = self.state.lock().unwrap();
            if let Some(start_time) = state.start_time {
                let elapsed = self.clock.now() - start_time;
                if elapsed > 0.0 {
                    let curr_bw = 8.0 * state.total_bytes as f64 / elapsed;
                    state.bw = fold_bandwidth(state.bw, curr_bw, self.smoothing_factor);
                }
            }
            state.total_bytes = 0;
            state.start_time = None;
            state.bw
        };
        debug!(bw, "bandwidth estimate updated");
        for listener in self.listeners.snapshot() {
            listener.on_bandwidth_update(bw).await;
        }
        self.tracker.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// With a paused clock the elapsed time is exact, so the published
    /// estimate must match the recurrence precisely.
    #[tokio::test(start_paused = true)]
    async fn estimate_follows_recurrence() {
        let meter = SegmentBandwidthMeter::new(Clock::new(), 1_000_000.0, 0.5);
        assert_eq!(meter.bandwidth(), 1_000_000.0);

        meter.on_transfer_start("u").await;
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        // 125 kB over one second: curr_bw = 1 Mbit/s
        meter.on_bytes_transferred(125_000, "u", 125_000, 125_000, &Bytes::new()).await;
        meter.on_transfer_end(125_000, "u").await;
        meter.on_segment_download_complete(1, &HashMap::new(), &HashMap::new()).await;
        assert_eq!(meter.bandwidth(), 1_000_000.0);

        // 62.5 kB over one second: curr_bw = 500 kbit/s
        meter.on_transfer_start("v").await;
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        meter.on_bytes_transferred(62_500, "v", 62_500, 62_500, &Bytes::new()).await;
        meter.on_transfer_end(62_500, "v").await;
        meter.on_segment_download_complete(2, &HashMap::new(), &HashMap::new()).await;
        assert_eq!(meter.bandwidth(), 750_000.0);

        // Stats were cleared at the segment boundary
        assert!(meter.stats("v").is_none());
    }

    #[tokio::test]
    async fn estimate_stays_positive_without_samples() {
        let meter = SegmentBandwidthMeter::new(Clock::new(), 1_000_000.0, 0.5);
        meter.on_segment_download_complete(1, &HashMap::new(), &HashMap::new()).await;
        assert!(meter.bandwidth() > 0.0);
    }
}
