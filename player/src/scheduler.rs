use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::abr::{self, AbrController};
use crate::buffer::BufferManager;
use crate::bw_meter::{BandwidthMeter, DownloadStats};
use crate::config::PlayerConfig;
use crate::downloader::{DownloadManager, DownloadRequest, DownloadType};
use crate::error::{PlayerError, Result};
use crate::events::{Listeners, SchedulerEventListener};
use crate::mpd::{AdaptationSet, Mpd, MpdProvider, MpdType, Segment};

struct CurrentDownload {
    index: u64,
    urls: Vec<String>,
}

/// The producer loop: decides which segment group to fetch next, drives the
/// transport and hands completed groups to the buffer.
pub struct Scheduler {
    max_buffer_duration: f64,
    update_interval: f64,
    time_factor: f64,
    selected_as: (Option<u32>, Option<u32>),
    downloader: Arc<dyn DownloadManager>,
    bandwidth_meter: Arc<dyn BandwidthMeter>,
    buffer: Arc<BufferManager>,
    mpd_provider: Arc<MpdProvider>,
    abr: Mutex<Box<dyn AbrController>>,
    listeners: Listeners<dyn SchedulerEventListener>,
    end: AtomicBool,
    dropped_index: Mutex<Option<u64>>,
    current: Mutex<Option<CurrentDownload>>,
}

impl Scheduler {
    pub fn new(
        config: &PlayerConfig,
        downloader: Arc<dyn DownloadManager>,
        bandwidth_meter: Arc<dyn BandwidthMeter>,
        buffer: Arc<BufferManager>,
        mpd_provider: Arc<MpdProvider>,
        abr: Box<dyn AbrController>,
    ) -> Result<Self> {
        Ok(Self {
            max_buffer_duration: config.buffer_duration,
            update_interval: config.update_interval,
            time_factor: config.time_factor,
            selected_as: parse_select_as(&config.select_as)?,
            downloader,
            bandwidth_meter,
            buffer,
            mpd_provider,
            abr: Mutex::new(abr),
            listeners: Listeners::new(),
            end: AtomicBool::new(false),
            dropped_index: Mutex::new(None),
            current: Mutex::new(None),
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn SchedulerEventListener>) {
        self.listeners.add(listener);
    }

    /// True once the last available segment was scheduled (or the loop gave
    /// up); the player drains the buffer and stops.
    pub fn is_end(&self) -> bool {
        self.end.load(Ordering::SeqCst)
    }

    /// Record `index` as dropped: its next selection falls back to the
    /// lowest quality.
    pub fn drop_index(&self, index: u64) {
        *self.dropped_index.lock().unwrap() = Some(index);
    }

    /// Stop the in-flight downloads, but only if `index` is the segment
    /// currently being fetched. The very first segment is never cancelled.
    pub async fn cancel_task(&self, index: u64) {
        let urls = {
            let current = self.current.lock().unwrap();
            match current.as_ref() {
                Some(current) if current.index == index && index != 0 => current.urls.clone(),
                _ => return,
            }
        };
        for url in urls {
            debug!(%url, "stopping in-flight download");
            if let Err(e) = self.downloader.stop(&url).await {
                warn!(%url, error = %e, "could not stop download");
            }
        }
    }

    pub async fn stop(&self) {
        self.downloader.close().await;
    }

    /// Run until the presentation ends. Any exit marks the end flag and
    /// wakes buffer waiters so the player can terminate.
    pub async fn run(&self) -> Result<()> {
        let result = self.run_inner().await;
        self.end.store(true, Ordering::SeqCst);
        self.buffer.notify_change();
        result
    }

    async fn run_inner(&self) -> Result<()> {
        let mpd = self.mpd_provider.available().await;
        let mut mpd_type = mpd.mpd_type;
        let mut adaptation_sets = self.select_adaptation_sets(&mpd);
        if adaptation_sets.is_empty() {
            return Err(PlayerError::Config("no adaptation sets matched select_as".into()));
        }

        let mut initialized: HashSet<(u32, u32)> = HashSet::new();
        // Start from the lowest segment number across the selected sets
        let Some((mut index, _)) = segment_limits(&adaptation_sets) else {
            return Ok(());
        };

        loop {
            if self.buffer.buffer_level() > self.max_buffer_duration {
                sleep(Duration::from_secs_f64(self.time_factor * self.update_interval)).await;
                continue;
            }

            if mpd_type == MpdType::Dynamic {
                self.mpd_provider.update().await?;
                let mpd = self.mpd_provider.available().await;
                mpd_type = mpd.mpd_type;
                adaptation_sets = self.select_adaptation_sets(&mpd);
            }

            let Some((first_segment, last_segment)) = segment_limits(&adaptation_sets) else {
                info!("selected adaptation sets carry no segments");
                return Ok(());
            };
            debug!(first_segment, last_segment, index);

            if index < first_segment {
                info!("segment {index} is gone from the manifest, moving to the next one");
                index += 1;
                continue;
            }

            if mpd_type == MpdType::Dynamic && index > last_segment {
                debug!("waiting for the manifest to grow past segment {index}");
                sleep(Duration::from_secs_f64(self.time_factor * self.update_interval)).await;
                continue;
            }

            let selections = {
                let dropped_index = *self.dropped_index.lock().unwrap();
                if dropped_index == Some(index) {
                    abr::lowest_selections(&adaptation_sets)
                } else {
                    self.abr.lock().unwrap().update_selection(&adaptation_sets, index)
                }
            };
            info!("downloading index {index} at {selections:?}");

            // Every adaptation set is attributed the same estimate snapshot
            let adap_bw: HashMap<u32, f64> = selections
                .keys()
                .map(|&as_id| (as_id, self.bandwidth_meter.bandwidth()))
                .collect();

            let Some(segments) = gather_segments(&adaptation_sets, &selections, index) else {
                info!("no more segments left");
                return Ok(());
            };

            {
                let urls = segments.values().map(|s| s.url.clone()).collect();
                *self.current.lock().unwrap() = Some(CurrentDownload { index, urls });
            }

            for listener in self.listeners.snapshot() {
                listener.on_segment_download_start(index, &adap_bw, &segments).await;
            }

            if !self.download_initializations(&segments, &mut initialized).await? {
                *self.dropped_index.lock().unwrap() = Some(index);
                continue;
            }

            for segment in segments.values() {
                self.downloader
                    .download(DownloadRequest::new(segment.url.clone(), DownloadType::Segment))
                    .await?;
            }
            debug!("waiting for completion of segment group {index}");
            let mut any_dropped = false;
            for segment in segments.values() {
                if self.downloader.wait_complete(&segment.url).await?.is_dropped() {
                    any_dropped = true;
                }
            }
            *self.current.lock().unwrap() = None;

            if any_dropped {
                info!("segment group {index} was dropped, retrying at lowest quality");
                *self.dropped_index.lock().unwrap() = Some(index);
                continue;
            }

            let stats: HashMap<u32, DownloadStats> = segments
                .iter()
                .map(|(as_id, segment)| {
                    (*as_id, self.bandwidth_meter.stats(&segment.url).unwrap_or_default())
                })
                .collect();
            for listener in self.listeners.snapshot() {
                listener.on_segment_download_complete(index, &segments, &stats).await;
            }
            self.buffer.enqueue_buffer(segments).await;
            index += 1;
        }
    }

    /// Fetch the init segment of every representation seen for the first
    /// time. Returns false if any of them was dropped.
    async fn download_initializations(
        &self,
        segments: &HashMap<u32, Segment>,
        initialized: &mut HashSet<(u32, u32)>,
    ) -> Result<bool> {
        for (as_id, segment) in segments {
            if initialized.contains(&(*as_id, segment.repr_id)) {
                continue;
            }
            self.downloader
                .download(DownloadRequest::new(segment.init_url.clone(), DownloadType::StreamInit))
                .await?;
            let outcome = self.downloader.wait_complete(&segment.init_url).await?;
            if outcome.is_dropped() {
                warn!(url = %segment.init_url, "initialization segment dropped");
                return Ok(false);
            }
            debug!(url = %segment.init_url, "representation initialized");
            initialized.insert((*as_id, segment.repr_id));
        }
        Ok(true)
    }

    fn select_adaptation_sets(&self, mpd: &Mpd) -> IndexMap<u32, AdaptationSet> {
        let ids: Vec<u32> = mpd.adaptation_sets.keys().copied().collect();
        let start = self.selected_as.0.or_else(|| ids.iter().min().copied());
        let end = self.selected_as.1.or_else(|| ids.iter().max().copied());
        let (Some(start), Some(end)) = (start, end) else {
            return IndexMap::new();
        };
        mpd.adaptation_sets
            .iter()
            .filter(|(id, _)| **id >= start && **id <= end)
            .map(|(id, set)| (*id, set.clone()))
            .collect()
    }
}

/// The segment of every selected adaptation set for `index`, or None when a
/// selection or segment lookup fails (end of stream).
fn gather_segments(
    adaptation_sets: &IndexMap<u32, AdaptationSet>,
    selections: &HashMap<u32, u32>,
    index: u64,
) -> Option<HashMap<u32, Segment>> {
    let mut segments = HashMap::new();
    for set in adaptation_sets.values() {
        let segment = selections
            .get(&set.id)
            .and_then(|repr_id| set.representations.get(repr_id))
            .and_then(|representation| representation.segments.get(&index))?;
        segments.insert(set.id, segment.clone());
    }
    Some(segments)
}

/// Lowest and highest segment number across all representations.
fn segment_limits(adaptation_sets: &IndexMap<u32, AdaptationSet>) -> Option<(u64, u64)> {
    let mut limits: Option<(u64, u64)> = None;
    for set in adaptation_sets.values() {
        for representation in set.representations.values() {
            if let (Some(first), Some(last)) =
                (representation.segments.keys().next(), representation.segments.keys().next_back())
            {
                limits = Some(match limits {
                    Some((lo, hi)) => (lo.min(*first), hi.max(*last)),
                    None => (*first, *last),
                });
            }
        }
    }
    limits
}

/// Parse an adaptation-set range: `"a-b"`, `"a-"`, `"-b"`, `"-"` or `"a"`.
fn parse_select_as(select_as: &str) -> Result<(Option<u32>, Option<u32>)> {
    let invalid = || PlayerError::Config(format!("select_as must be '<uint>-<uint>' or '<uint>', got {select_as:?}"));
    let parse_bound = |bound: &str| -> Result<Option<u32>> {
        if bound.is_empty() {
            Ok(None)
        } else {
            bound.parse().map(Some).map_err(|_| invalid())
        }
    };

    let parts: Vec<&str> = select_as.split('-').collect();
    match parts.as_slice() {
        [single] if !single.is_empty() => {
            let id = single.parse().map_err(|_| invalid())?;
            Ok((Some(id), Some(id)))
        }
        [start, end] => Ok((parse_bound(start)?, parse_bound(end)?)),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abr::test_support::{adaptation_set, sets};
    use crate::downloader::TransferOutcome;
    use crate::events::{BandwidthUpdateListener, DownloadEventListener};
    use crate::mpd::{ContentType, MpdProvider};
    use async_trait::async_trait;
    use bytes::Bytes;
    use dashmap::DashSet;

    struct FixedMeter(f64);

    impl BandwidthMeter for FixedMeter {
        fn bandwidth(&self) -> f64 {
            self.0
        }

        fn stats(&self, _url: &str) -> Option<DownloadStats> {
            Some(DownloadStats::default())
        }

        fn add_listener(&self, _listener: Arc<dyn BandwidthUpdateListener>) {}
    }

    /// Always asks for the highest bitrate.
    struct GreedyAbr;

    impl AbrController for GreedyAbr {
        fn update_selection(&mut self, adaptation_sets: &IndexMap<u32, AdaptationSet>, _index: u64) -> HashMap<u32, u32> {
            adaptation_sets
                .values()
                .filter_map(|set| {
                    set.representations
                        .values()
                        .max_by_key(|r| r.bandwidth)
                        .map(|r| (set.id, r.id))
                })
                .collect()
        }
    }

    /// In-memory transport: completes everything instantly, except URLs in
    /// `drop_once` which are dropped on their first attempt.
    #[derive(Default)]
    struct ScriptedDownloader {
        drop_once: DashSet<String>,
        completed: Mutex<Vec<String>>,
        stopped: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DownloadManager for ScriptedDownloader {
        async fn download(&self, _request: DownloadRequest) -> Result<()> {
            Ok(())
        }

        async fn wait_complete(&self, url: &str) -> Result<TransferOutcome> {
            if self.drop_once.remove(url).is_some() {
                return Ok(TransferOutcome::Dropped);
            }
            self.completed.lock().unwrap().push(url.to_string());
            Ok(TransferOutcome::Complete { content: Bytes::from_static(b"data"), size: 4 })
        }

        async fn stop(&self, url: &str) -> Result<()> {
            self.stopped.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn drop_url(&self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn close(&self) {}

        fn add_listener(&self, _listener: Arc<dyn DownloadEventListener>) {}
    }

    fn make_provider(adaptation_sets: IndexMap<u32, AdaptationSet>) -> Arc<MpdProvider> {
        let downloader = Arc::new(ScriptedDownloader::default());
        let provider = Arc::new(MpdProvider::new("test.mpd", 0.05, downloader));
        provider.install(Mpd {
            url: "test.mpd".into(),
            mpd_type: MpdType::Static,
            media_presentation_duration: 4.0,
            max_segment_duration: 1.0,
            min_buffer_time: 2.0,
            adaptation_sets,
        });
        provider
    }

    fn make_scheduler(downloader: Arc<ScriptedDownloader>, provider: Arc<MpdProvider>) -> (Arc<Scheduler>, Arc<BufferManager>) {
        let config = PlayerConfig {
            input: "test.mpd".into(),
            // Keep the whole presentation below the high watermark
            buffer_duration: 100.0,
            time_factor: 0.0,
            ..Default::default()
        };
        let buffer = Arc::new(BufferManager::new());
        let scheduler = Arc::new(
            Scheduler::new(
                &config,
                downloader,
                Arc::new(FixedMeter(1_000_000.0)),
                buffer.clone(),
                provider,
                Box::new(GreedyAbr),
            )
            .unwrap(),
        );
        (scheduler, buffer)
    }

    #[tokio::test]
    async fn downloads_every_segment_in_order() {
        let set = adaptation_set(0, ContentType::Video, &[100_000, 900_000], 4);
        let provider = make_provider(sets(vec![set]));
        let downloader = Arc::new(ScriptedDownloader::default());
        let (scheduler, buffer) = make_scheduler(downloader.clone(), provider);

        scheduler.run().await.unwrap();
        assert!(scheduler.is_end());

        // Greedy ABR stays on representation 1; init fetched exactly once
        let completed = downloader.completed.lock().unwrap().clone();
        assert_eq!(
            completed,
            vec![
                "as0-rep1-init.mp4",
                "as0-rep1-1.m4s",
                "as0-rep1-2.m4s",
                "as0-rep1-3.m4s",
                "as0-rep1-4.m4s",
            ]
        );
        assert_eq!(buffer.buffer_level(), 4.0);
    }

    #[tokio::test]
    async fn dropped_segment_is_retried_at_lowest_quality() {
        let set = adaptation_set(0, ContentType::Video, &[100_000, 900_000], 4);
        let provider = make_provider(sets(vec![set]));
        let downloader = Arc::new(ScriptedDownloader::default());
        // The greedy selection for index 3 fails once
        downloader.drop_once.insert("as0-rep1-3.m4s".to_string());
        let (scheduler, _buffer) = make_scheduler(downloader.clone(), provider);

        scheduler.run().await.unwrap();

        let completed = downloader.completed.lock().unwrap().clone();
        // Retry of index 3 runs at the lowest quality, which also pulls the
        // init segment of representation 0, then playback moves on to 4.
        assert_eq!(
            completed,
            vec![
                "as0-rep1-init.mp4",
                "as0-rep1-1.m4s",
                "as0-rep1-2.m4s",
                "as0-rep0-init.mp4",
                "as0-rep0-3.m4s",
                "as0-rep1-4.m4s",
            ]
        );
    }

    #[tokio::test]
    async fn drop_index_forces_lowest_selection() {
        let set = adaptation_set(0, ContentType::Video, &[100_000, 900_000], 2);
        let provider = make_provider(sets(vec![set]));
        let downloader = Arc::new(ScriptedDownloader::default());
        let (scheduler, _buffer) = make_scheduler(downloader.clone(), provider);

        scheduler.drop_index(1);
        scheduler.run().await.unwrap();

        let completed = downloader.completed.lock().unwrap().clone();
        assert_eq!(
            completed,
            vec![
                "as0-rep0-init.mp4",
                "as0-rep0-1.m4s",
                "as0-rep1-init.mp4",
                "as0-rep1-2.m4s",
            ]
        );
    }

    #[tokio::test]
    async fn selects_adaptation_sets_by_range() {
        let provider = make_provider(sets(vec![
            adaptation_set(0, ContentType::Video, &[100_000], 2),
            adaptation_set(1, ContentType::Video, &[100_000], 2),
            adaptation_set(2, ContentType::Video, &[100_000], 2),
        ]));
        let downloader = Arc::new(ScriptedDownloader::default());
        let config = PlayerConfig {
            input: "test.mpd".into(),
            select_as: "1-2".into(),
            buffer_duration: 100.0,
            time_factor: 0.0,
            ..Default::default()
        };
        let buffer = Arc::new(BufferManager::new());
        let scheduler = Scheduler::new(
            &config,
            downloader.clone(),
            Arc::new(FixedMeter(1_000_000.0)),
            buffer,
            provider,
            Box::new(GreedyAbr),
        )
        .unwrap();

        scheduler.run().await.unwrap();
        let completed = downloader.completed.lock().unwrap().clone();
        assert!(completed.iter().all(|url| !url.starts_with("as0")));
        assert!(completed.iter().any(|url| url.starts_with("as1")));
        assert!(completed.iter().any(|url| url.starts_with("as2")));
    }

    #[tokio::test]
    async fn cancel_task_ignores_indices_that_are_not_in_flight() {
        let set = adaptation_set(0, ContentType::Video, &[100_000], 2);
        let provider = make_provider(sets(vec![set]));
        let downloader = Arc::new(ScriptedDownloader::default());
        let (scheduler, _buffer) = make_scheduler(downloader.clone(), provider);

        // Nothing is downloading yet, so there is nothing to stop
        scheduler.cancel_task(1).await;
        assert!(downloader.stopped.lock().unwrap().is_empty());

        scheduler.run().await.unwrap();
        // After the run nothing is in flight either
        scheduler.cancel_task(1).await;
        assert!(downloader.stopped.lock().unwrap().is_empty());
    }

    #[test]
    fn select_as_range_parsing() {
        assert_eq!(parse_select_as("-").unwrap(), (None, None));
        assert_eq!(parse_select_as("3").unwrap(), (Some(3), Some(3)));
        assert_eq!(parse_select_as("1-4").unwrap(), (Some(1), Some(4)));
        assert_eq!(parse_select_as("2-").unwrap(), (Some(2), None));
        assert_eq!(parse_select_as("-5").unwrap(), (None, Some(5)));
        assert!(parse_select_as("").is_err());
        assert!(parse_select_as("a-b").is_err());
        assert!(parse_select_as("1-2-3").is_err());
    }
}
