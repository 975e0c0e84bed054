//! Bandwidth estimation fed by transport events.

pub mod continuous;
pub mod segment;

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use crate::events::BandwidthUpdateListener;
use crate::utils::Clock;

pub use continuous::ContinuousBandwidthMeter;
pub use segment::SegmentBandwidthMeter;

/// Per-transfer accounting. All times are monotonic seconds on the shared
/// session clock.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadStats {
    pub total_bytes: usize,
    pub received_bytes: usize,
    pub stopped_bytes: usize,
    pub start_time: Option<f64>,
    pub stop_time: Option<f64>,
    pub first_byte_at: Option<f64>,
    pub last_byte_at: Option<f64>,
}

/// Smoothed bandwidth estimate in bits per second, plus per-URL stats.
/// The estimate is always positive; it is seeded with the configured
/// initial bitrate before any sample arrives.
pub trait BandwidthMeter: Send + Sync {
    fn bandwidth(&self) -> f64;

    fn stats(&self, url: &str) -> Option<DownloadStats>;

    fn add_listener(&self, listener: Arc<dyn BandwidthUpdateListener>);
}

/// EWMA fold shared by the estimators:
/// `bw ← α·bw + (1−α)·curr_bw`.
pub(crate) fn fold_bandwidth(bw: f64, curr_bw: f64, smoothing_factor: f64) -> f64 {
    bw * smoothing_factor + curr_bw * (1.0 - smoothing_factor)
}

/// Tracks `DownloadStats` per URL from transport events.
pub(crate) struct StatsTracker {
    clock: Clock,
    stats: DashMap<String, DownloadStats>,
}

impl StatsTracker {
    pub fn new(clock: Clock) -> Self {
        Self { clock, stats: DashMap::new() }
    }

    pub fn on_start(&self, url: &str) {
        self.stats.insert(
            url.to_string(),
            DownloadStats { start_time: Some(self.clock.now()), ..Default::default() },
        );
    }

    pub fn on_bytes(&self, url: &str, length: usize, size: usize) {
        if let Some(mut stats) = self.stats.get_mut(url) {
            let now = self.clock.now();
            stats.received_bytes += length;
            stats.total_bytes = size;
            if stats.first_byte_at.is_none() {
                stats.first_byte_at = Some(now);
            }
            stats.last_byte_at = Some(now);
        }
    }

    /// Normal completion freezes the stop time; `stopped_bytes` stays zero.
    pub fn on_end(&self, url: &str) {
        if let Some(mut stats) = self.stats.get_mut(url) {
            stats.stop_time = Some(self.clock.now());
        }
    }

    pub fn on_canceled(&self, url: &str) {
        if let Some(mut stats) = self.stats.get_mut(url) {
            stats.stopped_bytes = stats.received_bytes;
            stats.stop_time = Some(self.clock.now());
        }
    }

    pub fn get(&self, url: &str) -> Option<DownloadStats> {
        self.stats.get(url).map(|s| s.clone())
    }

    pub fn clear(&self) {
        self.stats.clear();
    }
}
