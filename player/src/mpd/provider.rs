use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::downloader::{DownloadManager, DownloadRequest, DownloadType, TransferOutcome};
use crate::error::{PlayerError, Result};
use crate::mpd::{parser, Mpd};

/// Owns the parsed manifest and refreshes it through the transport.
///
/// Consumers block on [`MpdProvider::available`] until the first parse
/// completes; refreshes are rate limited to the update interval so the
/// scheduler can call [`MpdProvider::update`] every iteration.
pub struct MpdProvider {
    url: String,
    update_interval: f64,
    downloader: Arc<dyn DownloadManager>,
    mpd: RwLock<Option<Arc<Mpd>>>,
    available: Notify,
    last_updated: Mutex<Option<Instant>>,
}

impl MpdProvider {
    pub fn new(url: impl Into<String>, update_interval: f64, downloader: Arc<dyn DownloadManager>) -> Self {
        Self {
            url: url.into(),
            update_interval,
            downloader,
            mpd: RwLock::new(None),
            available: Notify::new(),
            last_updated: Mutex::new(None),
        }
    }

    /// The latest manifest, if one was parsed already.
    pub fn mpd(&self) -> Option<Arc<Mpd>> {
        self.mpd.read().unwrap().clone()
    }

    /// Wait until a manifest is available. Returns immediately once the
    /// first parse completed.
    pub async fn available(&self) -> Arc<Mpd> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(mpd) = self.mpd() {
                return mpd;
            }
            notified.await;
        }
    }

    /// Fetch and re-parse the manifest. Calls within the update interval of
    /// the previous parse are no-ops.
    pub async fn update(&self) -> Result<()> {
        {
            let last_updated = self.last_updated.lock().unwrap();
            if self.mpd.read().unwrap().is_some() {
                if let Some(at) = *last_updated {
                    if at.elapsed().as_secs_f64() < self.update_interval {
                        return Ok(());
                    }
                }
            }
        }

        self.downloader
            .download(DownloadRequest::new(self.url.clone(), DownloadType::Mpd))
            .await?;
        let outcome = self.downloader.wait_complete(&self.url).await?;
        let content = match outcome {
            TransferOutcome::Complete { content, .. } => content,
            TransferOutcome::Dropped => {
                return Err(PlayerError::Transport(format!("manifest download dropped: {}", self.url)));
            }
        };
        let text = String::from_utf8(content.to_vec())
            .map_err(|e| PlayerError::MpdParse(format!("manifest is not UTF-8: {e}")))?;
        let mpd = parser::parse_mpd(&text, &self.url)?;
        debug!(
            adaptation_sets = mpd.adaptation_sets.len(),
            duration = mpd.media_presentation_duration,
            "manifest parsed"
        );
        self.install(mpd);
        Ok(())
    }

    pub(crate) fn install(&self, mpd: Mpd) {
        *self.mpd.write().unwrap() = Some(Arc::new(mpd));
        *self.last_updated.lock().unwrap() = Some(Instant::now());
        self.available.notify_waiters();
    }

    pub async fn stop(&self) {
        info!("stopping manifest provider");
        self.downloader.close().await;
    }
}
