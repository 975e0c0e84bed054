use std::sync::Arc;
use tracing::{error, info};

use crate::abr::{AbrController, BandwidthAbr, BufferAbr, DashAbr, FixedAbr, HybridAbr};
use crate::analyzer::{AnalyzerReport, EventLogger, PlaybackAnalyzer};
use crate::buffer::BufferManager;
use crate::bw_meter::{BandwidthMeter, ContinuousBandwidthMeter, SegmentBandwidthMeter};
use crate::config::{AbrPolicy, BwEstimatorKind, PlayerConfig, TransportKind};
use crate::downloader::http::HttpDownloader;
use crate::downloader::local::LocalDownloader;
use crate::downloader::DownloadManager;
use crate::error::{PlayerError, Result};
use crate::mpd::MpdProvider;
use crate::player::DashPlayer;
use crate::scheduler::Scheduler;
use crate::utils::Clock;

/// A fully wired playback core. Construction resolves the typed
/// configuration into concrete components and connects every listener once;
/// afterwards the parts talk through their stable handles.
pub struct PlayerSession {
    downloader: Arc<dyn DownloadManager>,
    mpd_provider: Arc<MpdProvider>,
    buffer: Arc<BufferManager>,
    scheduler: Arc<Scheduler>,
    player: Arc<DashPlayer>,
    analyzer: Arc<PlaybackAnalyzer>,
}

impl PlayerSession {
    pub fn new(config: PlayerConfig) -> Result<Self> {
        config.validate()?;
        let clock = Clock::new();

        let downloader: Arc<dyn DownloadManager> = match config.resolved_transport() {
            TransportKind::Local => {
                Arc::new(LocalDownloader::new(config.local_bw, config.max_packet_size, config.time_factor))
            }
            TransportKind::Http1 => Arc::new(HttpDownloader::new_http1()?),
            TransportKind::Http3 => http3_downloader()?,
            TransportKind::Auto => unreachable!("resolved_transport never returns Auto"),
        };

        let mpd_provider = Arc::new(MpdProvider::new(
            config.input.clone(),
            config.update_interval,
            downloader.clone(),
        ));
        let buffer = Arc::new(BufferManager::new());

        // The segment meter also listens to the scheduler; keep that handle
        // so it can be registered before the analyzer and publish first.
        let bandwidth_meter: Arc<dyn BandwidthMeter>;
        let mut meter_as_scheduler_listener: Option<Arc<dyn crate::events::SchedulerEventListener>> = None;
        match config.bw_estimator {
            BwEstimatorKind::Segment => {
                let meter = Arc::new(SegmentBandwidthMeter::new(
                    clock.clone(),
                    config.max_initial_bitrate,
                    config.smoothing_factor,
                ));
                downloader.add_listener(meter.clone());
                meter_as_scheduler_listener = Some(meter.clone());
                bandwidth_meter = meter;
            }
            BwEstimatorKind::Continuous => {
                let meter = Arc::new(ContinuousBandwidthMeter::new(
                    clock.clone(),
                    config.max_initial_bitrate,
                    config.smoothing_factor,
                    config.max_packet_delay,
                    config.cont_bw_window,
                ));
                downloader.add_listener(meter.clone());
                bandwidth_meter = meter;
            }
        }

        let abr: Box<dyn AbrController> = match config.abr {
            AbrPolicy::Dash => Box::new(DashAbr::new(
                bandwidth_meter.clone(),
                buffer.clone(),
                mpd_provider.clone(),
                config.panic_buffer_level,
                config.safe_buffer_level,
            )),
            AbrPolicy::Hybrid => Box::new(HybridAbr::new(
                bandwidth_meter.clone(),
                buffer.clone(),
                config.panic_buffer_level,
                config.safe_buffer_level,
            )),
            AbrPolicy::Bandwidth => Box::new(BandwidthAbr::new(bandwidth_meter.clone())),
            AbrPolicy::Buffer => Box::new(BufferAbr::new(buffer.clone(), config.buffer_duration)),
            AbrPolicy::Fixed => Box::new(FixedAbr::new(config.abr_quality)),
        };

        let scheduler = Arc::new(Scheduler::new(
            &config,
            downloader.clone(),
            bandwidth_meter.clone(),
            buffer.clone(),
            mpd_provider.clone(),
            abr,
        )?);
        if let Some(meter) = meter_as_scheduler_listener {
            scheduler.add_listener(meter);
        }

        let player = Arc::new(DashPlayer::new(&config, buffer.clone(), scheduler.clone(), mpd_provider.clone()));

        let analyzer = Arc::new(PlaybackAnalyzer::new(clock, mpd_provider.clone()));
        bandwidth_meter.add_listener(analyzer.clone());
        scheduler.add_listener(analyzer.clone());
        player.add_listener(analyzer.clone());
        buffer.add_listener(analyzer.clone());

        let event_logger = Arc::new(EventLogger);
        scheduler.add_listener(event_logger.clone());
        player.add_listener(event_logger.clone());
        buffer.add_listener(event_logger);

        Ok(Self {
            downloader,
            mpd_provider,
            buffer,
            scheduler,
            player,
            analyzer,
        })
    }

    /// Fetch the manifest, run the scheduler and player loops to completion
    /// and return the analytics report.
    pub async fn run(&self) -> Result<AnalyzerReport> {
        self.mpd_provider.update().await?;
        info!("manifest available, starting playback");

        let scheduler = self.scheduler.clone();
        let scheduler_task = tokio::spawn(async move { scheduler.run().await });

        let playback = self.player.run().await;
        if playback.is_err() {
            scheduler_task.abort();
        }
        let scheduling = match scheduler_task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(PlayerError::Transport(format!("scheduler task failed: {e}"))),
        };

        self.downloader.close().await;

        if let Err(e) = &scheduling {
            error!("scheduling failed: {e}");
        }
        playback?;
        scheduling?;
        Ok(self.analyzer.report())
    }

    pub fn analyzer(&self) -> &Arc<PlaybackAnalyzer> {
        &self.analyzer
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn buffer(&self) -> &Arc<BufferManager> {
        &self.buffer
    }
}

#[cfg(feature = "http3")]
fn http3_downloader() -> Result<Arc<dyn DownloadManager>> {
    Ok(Arc::new(HttpDownloader::new_http3()?))
}

#[cfg(not(feature = "http3"))]
fn http3_downloader() -> Result<Arc<dyn DownloadManager>> {
    Err(PlayerError::Config(
        "this build has no HTTP/3 support; enable the `http3` feature".into(),
    ))
}
