use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use crate::downloader::{DownloadManager, DownloadRequest, TransferOutcome, TransferPhase, Transfers};
use crate::error::{PlayerError, Result};
use crate::events::{DownloadEventListener, Listeners};

/// Filesystem pseudo-transport. Files are read eagerly and their bytes are
/// delivered through one shared pacing task that emulates a link of `bw`
/// bits per second with packets of at most `max_packet_size` bytes.
pub struct LocalDownloader {
    max_packet_size: usize,
    transfers: Arc<Transfers>,
    listeners: Arc<Listeners<dyn DownloadEventListener>>,
    queue: mpsc::UnboundedSender<(String, Option<Bytes>)>,
    pacer: Mutex<Option<JoinHandle<()>>>,
}

impl LocalDownloader {
    pub fn new(bw: u64, max_packet_size: usize, time_factor: f64) -> Self {
        let transfers = Arc::new(Transfers::new());
        let listeners: Arc<Listeners<dyn DownloadEventListener>> = Arc::new(Listeners::new());
        let (queue, rx) = mpsc::unbounded_channel();
        let pacer = tokio::spawn(Self::paced_delivery(rx, transfers.clone(), listeners.clone(), bw, time_factor));
        Self {
            max_packet_size,
            transfers,
            listeners,
            queue,
            pacer: Mutex::new(Some(pacer)),
        }
    }

    /// Drain the shared queue at link speed. All transfers share the link,
    /// so a chunk of `n` bytes occupies it for `8·n / bw` seconds.
    async fn paced_delivery(
        mut rx: mpsc::UnboundedReceiver<(String, Option<Bytes>)>,
        transfers: Arc<Transfers>,
        listeners: Arc<Listeners<dyn DownloadEventListener>>,
        bw: u64,
        time_factor: f64,
    ) {
        while let Some((url, chunk)) = rx.recv().await {
            match chunk {
                Some(chunk) => {
                    let (position, size) = transfers.append(&url, &chunk);
                    for listener in listeners.snapshot() {
                        listener.on_bytes_transferred(chunk.len(), &url, position, size, &chunk).await;
                    }
                    let delay = time_factor * (chunk.len() as f64 * 8.0) / bw as f64;
                    if delay > 0.0 {
                        sleep(Duration::from_secs_f64(delay)).await;
                    }
                }
                None => {
                    let (_, size) = transfers.progress(&url);
                    transfers.finish(&url, TransferPhase::Complete);
                    for listener in listeners.snapshot() {
                        listener.on_transfer_end(size, &url).await;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl DownloadManager for LocalDownloader {
    async fn download(&self, request: DownloadRequest) -> Result<()> {
        let url = request.url;
        let content = tokio::fs::read(&url).await?;
        debug!(%url, bytes = content.len(), "queueing local file");
        self.transfers.begin(&url, content.len());
        for listener in self.listeners.snapshot() {
            listener.on_transfer_start(&url).await;
        }
        for chunk in content.chunks(self.max_packet_size) {
            let _ = self.queue.send((url.clone(), Some(Bytes::copy_from_slice(chunk))));
        }
        let _ = self.queue.send((url, None));
        Ok(())
    }

    async fn wait_complete(&self, url: &str) -> Result<TransferOutcome> {
        self.transfers.wait_complete(url).await
    }

    async fn stop(&self, _url: &str) -> Result<()> {
        Err(PlayerError::TransportUnsupported("local transport cannot stop a transfer"))
    }

    async fn drop_url(&self, _url: &str) -> Result<()> {
        Err(PlayerError::TransportUnsupported("local transport cannot drop a transfer"))
    }

    async fn close(&self) {
        if let Some(pacer) = self.pacer.lock().unwrap().take() {
            pacer.abort();
        }
    }

    fn add_listener(&self, listener: Arc<dyn DownloadEventListener>) {
        self.listeners.add(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::DownloadType;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingListener {
        events: StdMutex<Vec<String>>,
        positions: StdMutex<HashMap<String, Vec<usize>>>,
    }

    #[async_trait]
    impl DownloadEventListener for RecordingListener {
        async fn on_transfer_start(&self, url: &str) {
            self.events.lock().unwrap().push(format!("start {url}"));
        }

        async fn on_bytes_transferred(&self, _length: usize, url: &str, position: usize, _size: usize, _chunk: &Bytes) {
            self.positions.lock().unwrap().entry(url.to_string()).or_default().push(position);
        }

        async fn on_transfer_end(&self, _size: usize, url: &str) {
            self.events.lock().unwrap().push(format!("end {url}"));
        }

        async fn on_transfer_canceled(&self, url: &str, _position: usize, _size: usize) {
            self.events.lock().unwrap().push(format!("canceled {url}"));
        }
    }

    #[tokio::test]
    async fn delivers_file_content_with_ordered_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.m4s");
        let payload = vec![7u8; 45_000];
        std::fs::File::create(&path).unwrap().write_all(&payload).unwrap();
        let url = path.to_str().unwrap().to_string();

        let downloader = LocalDownloader::new(1_000_000_000, 20_000, 0.0);
        let listener = Arc::new(RecordingListener::default());
        downloader.add_listener(listener.clone());

        downloader.download(DownloadRequest::new(url.clone(), DownloadType::Segment)).await.unwrap();
        let (content, size) = downloader.wait_complete(&url).await.unwrap().into_bytes().unwrap();
        assert_eq!(content.len(), 45_000);
        assert_eq!(size, 45_000);

        // Exactly one start followed by exactly one terminal event
        let events = listener.events.lock().unwrap().clone();
        assert_eq!(events, vec![format!("start {url}"), format!("end {url}")]);
        // Positions grow monotonically in packet-sized steps
        let positions = listener.positions.lock().unwrap()[&url].clone();
        assert_eq!(positions, vec![20_000, 40_000, 45_000]);

        downloader.close().await;
    }

    #[tokio::test]
    async fn cancellation_is_unsupported() {
        let downloader = LocalDownloader::new(1_000_000, 20_000, 0.0);
        assert!(matches!(
            downloader.stop("x").await,
            Err(PlayerError::TransportUnsupported(_))
        ));
        downloader.close().await;
    }

    #[tokio::test]
    async fn concurrent_downloads_both_complete() {
        let dir = tempfile::tempdir().unwrap();
        let mut urls = Vec::new();
        for i in 0..2 {
            let path = dir.path().join(format!("seg-{i}.m4s"));
            std::fs::write(&path, vec![i as u8; 10_000]).unwrap();
            urls.push(path.to_str().unwrap().to_string());
        }

        let downloader = LocalDownloader::new(1_000_000_000, 4_000, 0.0);
        for url in &urls {
            downloader.download(DownloadRequest::new(url.clone(), DownloadType::Segment)).await.unwrap();
        }
        for url in &urls {
            let (content, _) = downloader.wait_complete(url).await.unwrap().into_bytes().unwrap();
            assert_eq!(content.len(), 10_000);
        }
        downloader.close().await;
    }
}
