//! Observers. The playback analyzer subscribes to scheduler, player,
//! bandwidth and buffer events and distils them into per-segment records,
//! stall intervals and a serializable report.

pub mod event_log;

use async_trait::async_trait;
use prometheus::IntGauge;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::bw_meter::DownloadStats;
use crate::events::{BandwidthUpdateListener, BufferEventListener, PlayerEventListener, SchedulerEventListener};
use crate::mpd::{MpdProvider, Segment};
use crate::types::PlaybackState;
use crate::utils::Clock;

pub use event_log::EventLogger;

/// Everything recorded about one downloaded segment.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerSegment {
    pub index: u64,
    pub url: String,
    pub repr_id: u32,
    pub adap_set_id: u32,
    pub bitrate: u64,
    /// Quality rank within the adaptation set (0 = lowest representation id).
    pub quality: u32,
    /// Bandwidth estimate snapshot when this segment was selected.
    pub adaptation_throughput: f64,
    pub start_time: Option<f64>,
    pub stop_time: Option<f64>,
    pub first_byte_at: Option<f64>,
    pub last_byte_at: Option<f64>,
    /// Measured throughput of this transfer in bits per second.
    pub segment_throughput: Option<f64>,
    pub total_bytes: Option<usize>,
    pub received_bytes: Option<usize>,
    pub stopped_bytes: Option<usize>,
}

impl AnalyzerSegment {
    /// Received over announced bytes.
    pub fn ratio(&self) -> Option<f64> {
        match (self.received_bytes, self.total_bytes) {
            (Some(received), Some(total)) if total > 0 => Some(received as f64 / total as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stall {
    pub time_start: f64,
    pub time_end: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferLevelSample {
    pub time: f64,
    pub level: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BandwidthSample {
    pub time: f64,
    pub bandwidth: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSample {
    pub time: f64,
    pub state: PlaybackState,
    pub position: f64,
}

/// The full session record.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerReport {
    pub segments: Vec<AnalyzerSegment>,
    pub stalls: Vec<Stall>,
    pub num_stall: usize,
    pub dur_stall: f64,
    pub avg_bitrate: f64,
    pub num_quality_switches: usize,
    pub states: Vec<StateSample>,
    pub bandwidth_estimate: Vec<BandwidthSample>,
    pub buffer_level: Vec<BufferLevelSample>,
}

#[derive(Default)]
struct AnalyzerState {
    segments_by_url: HashMap<String, AnalyzerSegment>,
    states: Vec<StateSample>,
    buffer_levels: Vec<BufferLevelSample>,
    throughputs: Vec<BandwidthSample>,
    position: f64,
    seen_ready: bool,
}

struct Gauges {
    bandwidth_bps: IntGauge,
    buffer_level_ms: IntGauge,
    segments_downloaded: IntGauge,
    stalls_total: IntGauge,
    quality: IntGauge,
}

impl Gauges {
    fn try_create() -> Option<Self> {
        let metrics = metrics::try_get_metrics()?;
        Some(Self {
            bandwidth_bps: metrics
                .get_or_create_gauge("bandwidth_estimate_bps", "Smoothed bandwidth estimate")
                .ok()?,
            buffer_level_ms: metrics
                .get_or_create_gauge("buffer_level_ms", "Buffered media ahead of playback")
                .ok()?,
            segments_downloaded: metrics
                .get_or_create_gauge("segments_downloaded_total", "Completed segment downloads")
                .ok()?,
            stalls_total: metrics
                .get_or_create_gauge("stalls_total", "Rebuffering events during playback")
                .ok()?,
            quality: metrics
                .get_or_create_gauge("current_quality", "Quality rank of the latest selection")
                .ok()?,
        })
    }
}

/// Collects per-segment stats, stalls and state history.
pub struct PlaybackAnalyzer {
    clock: Clock,
    mpd_provider: Arc<MpdProvider>,
    inner: Mutex<AnalyzerState>,
    gauges: Option<Gauges>,
}

impl PlaybackAnalyzer {
    pub fn new(clock: Clock, mpd_provider: Arc<MpdProvider>) -> Self {
        Self {
            clock,
            mpd_provider,
            inner: Mutex::new(AnalyzerState::default()),
            gauges: Gauges::try_create(),
        }
    }

    /// Snapshot the collected data into a report.
    pub fn report(&self) -> AnalyzerReport {
        let inner = self.inner.lock().unwrap();

        let mut segments: Vec<AnalyzerSegment> = inner.segments_by_url.values().cloned().collect();
        segments.sort_by_key(|s| s.index);

        let mut states = inner.states.clone();
        if states.last().map(|s| s.state) != Some(PlaybackState::End) && !states.is_empty() {
            states.push(StateSample {
                time: self.clock.now(),
                state: PlaybackState::End,
                position: inner.position,
            });
        }

        let mut stalls = Vec::new();
        let mut buffering_start = None;
        for sample in &states {
            match sample.state {
                PlaybackState::Buffering if buffering_start.is_none() => buffering_start = Some(sample.time),
                PlaybackState::Ready => {
                    if let Some(start) = buffering_start.take() {
                        stalls.push(Stall { time_start: start, time_end: sample.time });
                    }
                }
                _ => {}
            }
        }
        let dur_stall = stalls.iter().map(|s| s.time_end - s.time_start).sum();

        let mut quality_switches = 0;
        let mut last_quality: Option<u32> = None;
        for segment in &segments {
            match last_quality {
                Some(quality) if quality != segment.quality => {
                    quality_switches += 1;
                    last_quality = Some(segment.quality);
                }
                Some(_) => {}
                None => last_quality = Some(segment.quality),
            }
        }

        let avg_bitrate = if segments.is_empty() {
            0.0
        } else {
            segments.iter().map(|s| s.bitrate as f64).sum::<f64>() / segments.len() as f64
        };

        AnalyzerReport {
            num_stall: stalls.len(),
            dur_stall,
            avg_bitrate,
            num_quality_switches: quality_switches,
            segments,
            stalls,
            states,
            bandwidth_estimate: inner.throughputs.clone(),
            buffer_level: inner.buffer_levels.clone(),
        }
    }

    /// Write the per-segment table, the stall table and the summary.
    pub fn save(&self, out: &mut dyn Write) -> io::Result<()> {
        let report = self.report();

        writeln!(
            out,
            "{:<10}{:<10}{:<10}{:<10}{:<10}{:<10}{:<10}{:<10}{:<20}",
            "Index", "Start", "End", "Quality", "Bitrate", "Adap-Th", "Seg-Th", "Ratio", "URL"
        )?;
        for segment in &report.segments {
            writeln!(
                out,
                "{:<10}{:<10.2}{:<10.2}{:<10}{:<10}{:<10.0}{:<10.0}{:<10.2}{:<20}",
                segment.index,
                segment.start_time.unwrap_or(0.0),
                segment.stop_time.unwrap_or(0.0),
                segment.quality,
                segment.bitrate,
                segment.adaptation_throughput,
                segment.segment_throughput.unwrap_or(0.0),
                segment.ratio().unwrap_or(0.0),
                segment.url,
            )?;
        }
        writeln!(out)?;

        writeln!(out, "Stalls:")?;
        writeln!(out, "{:<6}{:<6}{:<6}", "Start", "End", "Duration")?;
        for stall in &report.stalls {
            writeln!(
                out,
                "{:<6.2}{:<6.2}{:<6.2}",
                stall.time_start,
                stall.time_end,
                stall.time_end - stall.time_start
            )?;
        }
        writeln!(out)?;

        writeln!(out, "Number of Stalls: {}", report.num_stall)?;
        writeln!(out, "Total seconds of stalls: {}", report.dur_stall)?;
        writeln!(out, "Average bitrate: {:.2} bps", report.avg_bitrate)?;
        writeln!(out, "Number of quality switches: {}", report.num_quality_switches)?;
        Ok(())
    }
}

#[async_trait]
impl SchedulerEventListener for PlaybackAnalyzer {
    async fn on_segment_download_start(&self, index: u64, adap_bw: &HashMap<u32, f64>, segments: &HashMap<u32, Segment>) {
        let Some(mpd) = self.mpd_provider.mpd() else { return };
        let mut inner = self.inner.lock().unwrap();
        for (as_id, segment) in segments {
            let Some(set) = mpd.adaptation_sets.get(as_id) else { continue };
            let min_repr_id = set.representations.keys().min().copied().unwrap_or(0);
            let quality = segment.repr_id.saturating_sub(min_repr_id);
            let bitrate = set
                .representations
                .get(&segment.repr_id)
                .map(|r| r.bandwidth)
                .unwrap_or(0);
            inner.segments_by_url.insert(
                segment.url.clone(),
                AnalyzerSegment {
                    index,
                    url: segment.url.clone(),
                    repr_id: segment.repr_id,
                    adap_set_id: *as_id,
                    bitrate,
                    quality,
                    adaptation_throughput: adap_bw.get(as_id).copied().unwrap_or(0.0),
                    start_time: None,
                    stop_time: None,
                    first_byte_at: None,
                    last_byte_at: None,
                    segment_throughput: None,
                    total_bytes: None,
                    received_bytes: None,
                    stopped_bytes: None,
                },
            );
            if let Some(gauges) = &self.gauges {
                gauges.quality.set(quality as i64);
            }
        }
    }

    async fn on_segment_download_complete(
        &self,
        _index: u64,
        segments: &HashMap<u32, Segment>,
        stats: &HashMap<u32, DownloadStats>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        for (as_id, segment) in segments {
            let Some(stat) = stats.get(as_id) else { continue };
            let Some(record) = inner.segments_by_url.get_mut(&segment.url) else { continue };
            record.start_time = stat.start_time;
            record.stop_time = stat.stop_time;
            record.first_byte_at = stat.first_byte_at;
            record.last_byte_at = stat.last_byte_at;
            record.total_bytes = Some(stat.total_bytes);
            record.received_bytes = Some(stat.received_bytes);
            record.stopped_bytes = Some(stat.stopped_bytes);
            if let (Some(start), Some(stop)) = (stat.start_time, stat.stop_time) {
                if stop > start {
                    record.segment_throughput = Some(stat.received_bytes as f64 * 8.0 / (stop - start));
                }
            }
            if let Some(gauges) = &self.gauges {
                gauges.segments_downloaded.inc();
            }
        }
    }
}

#[async_trait]
impl PlayerEventListener for PlaybackAnalyzer {
    async fn on_state_change(&self, position: f64, _old_state: PlaybackState, new_state: PlaybackState) {
        let mut inner = self.inner.lock().unwrap();
        let rebuffering = new_state == PlaybackState::Buffering && inner.seen_ready;
        if new_state == PlaybackState::Ready {
            inner.seen_ready = true;
        }
        inner.states.push(StateSample { time: self.clock.now(), state: new_state, position });
        drop(inner);
        if rebuffering {
            if let Some(gauges) = &self.gauges {
                gauges.stalls_total.inc();
            }
        }
    }

    async fn on_position_change(&self, position: f64) {
        self.inner.lock().unwrap().position = position;
    }
}

#[async_trait]
impl BandwidthUpdateListener for PlaybackAnalyzer {
    async fn on_bandwidth_update(&self, bw: f64) {
        self.inner
            .lock()
            .unwrap()
            .throughputs
            .push(BandwidthSample { time: self.clock.now(), bandwidth: bw });
        if let Some(gauges) = &self.gauges {
            gauges.bandwidth_bps.set(bw as i64);
        }
    }
}

#[async_trait]
impl BufferEventListener for PlaybackAnalyzer {
    async fn on_buffer_level_change(&self, buffer_level: f64) {
        self.inner
            .lock()
            .unwrap()
            .buffer_levels
            .push(BufferLevelSample { time: self.clock.now(), level: buffer_level });
        if let Some(gauges) = &self.gauges {
            gauges.buffer_level_ms.set((buffer_level * 1000.0) as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abr::test_support::{adaptation_set, sets};
    use crate::downloader::local::LocalDownloader;
    use crate::mpd::{ContentType, Mpd, MpdType};

    fn make_analyzer() -> PlaybackAnalyzer {
        let downloader = Arc::new(LocalDownloader::new(1_000_000, 20_000, 0.0));
        let provider = Arc::new(MpdProvider::new("test.mpd", 0.05, downloader));
        provider.install(Mpd {
            url: "test.mpd".into(),
            mpd_type: MpdType::Static,
            media_presentation_duration: 4.0,
            max_segment_duration: 1.0,
            min_buffer_time: 2.0,
            adaptation_sets: sets(vec![adaptation_set(0, ContentType::Video, &[100_000, 300_000], 4)]),
        });
        PlaybackAnalyzer::new(Clock::new(), provider)
    }

    fn segment(repr_id: u32, num: u64) -> Segment {
        Segment {
            url: format!("as0-rep{repr_id}-{num}.m4s"),
            init_url: "init.mp4".into(),
            duration: 1.0,
            start_time: (num - 1) as f64,
            as_id: 0,
            repr_id,
        }
    }

    async fn record_download(analyzer: &PlaybackAnalyzer, repr_id: u32, num: u64, received: usize, seconds: f64) {
        let mut group = HashMap::new();
        group.insert(0, segment(repr_id, num));
        let mut adap_bw = HashMap::new();
        adap_bw.insert(0, 500_000.0);
        analyzer.on_segment_download_start(num, &adap_bw, &group).await;
        let mut stats = HashMap::new();
        stats.insert(
            0,
            DownloadStats {
                total_bytes: received,
                received_bytes: received,
                stopped_bytes: 0,
                start_time: Some(0.0),
                stop_time: Some(seconds),
                first_byte_at: Some(0.0),
                last_byte_at: Some(seconds),
            },
        );
        analyzer.on_segment_download_complete(num, &group, &stats).await;
    }

    #[tokio::test]
    async fn records_quality_bitrate_and_throughput() {
        let analyzer = make_analyzer();
        record_download(&analyzer, 1, 1, 125_000, 2.0).await;

        let report = analyzer.report();
        assert_eq!(report.segments.len(), 1);
        let segment = &report.segments[0];
        assert_eq!(segment.quality, 1);
        assert_eq!(segment.bitrate, 300_000);
        assert_eq!(segment.adaptation_throughput, 500_000.0);
        assert_eq!(segment.segment_throughput, Some(500_000.0));
        assert_eq!(segment.ratio(), Some(1.0));
        assert_eq!(report.avg_bitrate, 300_000.0);
    }

    #[tokio::test]
    async fn counts_quality_switches() {
        let analyzer = make_analyzer();
        record_download(&analyzer, 0, 1, 1000, 1.0).await;
        record_download(&analyzer, 1, 2, 1000, 1.0).await;
        record_download(&analyzer, 1, 3, 1000, 1.0).await;
        record_download(&analyzer, 0, 4, 1000, 1.0).await;
        assert_eq!(analyzer.report().num_quality_switches, 2);
    }

    #[tokio::test]
    async fn stalls_are_buffering_ready_pairs() {
        let analyzer = make_analyzer();
        analyzer.on_state_change(0.0, PlaybackState::Idle, PlaybackState::Buffering).await;
        analyzer.on_state_change(0.0, PlaybackState::Buffering, PlaybackState::Ready).await;
        analyzer.on_state_change(2.0, PlaybackState::Ready, PlaybackState::Buffering).await;
        analyzer.on_state_change(2.0, PlaybackState::Buffering, PlaybackState::Ready).await;
        analyzer.on_state_change(4.0, PlaybackState::Ready, PlaybackState::End).await;

        let report = analyzer.report();
        assert_eq!(report.num_stall, 2);
        assert_eq!(report.states.last().unwrap().state, PlaybackState::End);
    }

    #[tokio::test]
    async fn report_serializes_with_expected_fields() {
        let analyzer = make_analyzer();
        record_download(&analyzer, 0, 1, 1000, 1.0).await;
        let json = serde_json::to_value(analyzer.report()).unwrap();
        for field in [
            "segments",
            "stalls",
            "num_stall",
            "dur_stall",
            "avg_bitrate",
            "num_quality_switches",
            "states",
            "bandwidth_estimate",
            "buffer_level",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
    }
}
