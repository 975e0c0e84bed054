use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};

use crate::bw_meter::{fold_bandwidth, BandwidthMeter, DownloadStats, StatsTracker};
use crate::events::{BandwidthUpdateListener, DownloadEventListener, Listeners};
use crate::utils::Clock;

const MIN_WINDOW_SAMPLES: usize = 2;

struct ContState {
    bw: f64,
    bytes_transferred: usize,
    transfer_start: Option<f64>,
    last_byte_at: Option<f64>,
    // (interval start, interval end, bytes) per received chunk
    samples: Vec<(f64, f64, usize)>,
    window_bw: Option<f64>,
}

/// Alternative estimator that keeps a per-chunk sliding-window estimate in
/// addition to the per-transfer EWMA. The EWMA folds at every transfer end,
/// not per segment group.
pub struct ContinuousBandwidthMeter {
    clock: Clock,
    smoothing_factor: f64,
    max_packet_delay: f64,
    window: f64,
    state: Mutex<ContState>,
    tracker: StatsTracker,
    listeners: Listeners<dyn BandwidthUpdateListener>,
}

impl ContinuousBandwidthMeter {
    pub fn new(
        clock: Clock,
        max_initial_bitrate: f64,
        smoothing_factor: f64,
        max_packet_delay: f64,
        window: f64,
    ) -> Self {
        Self {
            tracker: StatsTracker::new(clock.clone()),
            clock,
            smoothing_factor,
            max_packet_delay,
            window,
            state: Mutex::new(ContState {
                bw: max_initial_bitrate,
                bytes_transferred: 0,
                transfer_start: None,
                last_byte_at: None,
                samples: Vec::new(),
                window_bw: None,
            }),
            listeners: Listeners::new(),
        }
    }

    /// The latest sliding-window estimate, if enough chunks arrived.
    pub fn window_bandwidth(&self) -> Option<f64> {
        self.state.lock().unwrap().window_bw
    }

    fn record_chunk(state: &mut ContState, length: usize, now: f64, max_packet_delay: f64, window: f64) {
        if let Some(last_byte_at) = state.last_byte_at {
            // A long gap means the link was idle, not slow
            if now - last_byte_at <= max_packet_delay {
                state.samples.push((last_byte_at, now, length));
                if state.samples.len() >= MIN_WINDOW_SAMPLES {
                    let window_start = now - window;
                    let mut total_bytes = 0usize;
                    let mut total_time = 0.0f64;
                    let mut counted = 0usize;
                    for (from, to, bytes) in state.samples.iter().rev() {
                        if *to < window_start && counted >= MIN_WINDOW_SAMPLES {
                            break;
                        }
                        total_bytes += bytes;
                        total_time += to - from;
                        counted += 1;
                    }
                    if total_time > 0.0 {
                        state.window_bw = Some(8.0 * total_bytes as f64 / total_time);
                    }
                }
                // Drop samples that fell out of the window
                while state.samples.len() > MIN_WINDOW_SAMPLES {
                    if state.samples[0].1 < now - window {
                        state.samples.remove(0);
                    } else {
                        break;
                    }
                }
            }
        }
        state.last_byte_at = Some(now);
    }
}

impl BandwidthMeter for ContinuousBandwidthMeter {
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
impl DownloadEventListener for ContinuousBandwidthMeter {
    async fn on_transfer_start(&self, url: &str) {
        let mut state = self.state.lock().unwrap();
        state.transfer_start = Some(self.clock.now());
        state.bytes_transferred = 0;
        drop(state);
        self.tracker.on_start(url);
    }

    async fn on_bytes_transferred(&self, length: usize, url: &str, _position: usize, size: usize, _chunk: &Bytes) {
        self.tracker.on_bytes(url, length, size);
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        state.bytes_transferred += length;
        Self::record_chunk(&mut state, length, now, self.max_packet_delay, self.window);
    }

    async fn on_transfer_end(&self, _size: usize, url: &str) {
        self.tracker.on_end(url);
        let bw = {
            let mut state = self.state.lock().unwrap();
            if let Some(start) = state.transfer_start {
                let elapsed = self.clock.now() - start;
                if elapsed > 0.0 && state.bytes_transferred > 0 {
                    let curr_bw = 8.0 * state.bytes_transferred as f64 / elapsed;
                    state.bw = fold_bandwidth(state.bw, curr_bw, self.smoothing_factor);
                }
            }
            state.bytes_transferred = 0;
            state.bw
        };
        for listener in self.listeners.snapshot() {
            listener.on_bandwidth_update(bw).await;
        }
    }

    async fn on_transfer_canceled(&self, url: &str, _position: usize, _size: usize) {
        self.tracker.on_canceled(url);
    }
}
