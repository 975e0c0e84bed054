use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::downloader::{DownloadManager, DownloadRequest, TransferOutcome, TransferPhase, Transfers};
use crate::error::{PlayerError, Result};
use crate::events::{DownloadEventListener, Listeners};

struct UrlTokens {
    stop: CancellationToken,
    drop: CancellationToken,
}

/// Streaming HTTP transport. Each transfer runs in its own task, so
/// concurrent downloads of distinct URLs multiplex over the client's
/// connection pool (HTTP/1.1) or a single QUIC connection (HTTP/3).
pub struct HttpDownloader {
    client: reqwest::Client,
    transfers: Arc<Transfers>,
    listeners: Arc<Listeners<dyn DownloadEventListener>>,
    tokens: Arc<DashMap<String, UrlTokens>>,
    session: CancellationToken,
}

impl HttpDownloader {
    /// HTTP/1.1 over TLS. Lab origins often run self-signed certificates,
    /// so verification is disabled.
    pub fn new_http1() -> Result<Self> {
        let client = reqwest::Client::builder()
            .http1_only()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self::with_client(client))
    }

    /// HTTP/3 over QUIC (ALPN h3).
    #[cfg(feature = "http3")]
    pub fn new_http3() -> Result<Self> {
        let client = reqwest::Client::builder()
            .http3_prior_knowledge()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self::with_client(client))
    }

    fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            transfers: Arc::new(Transfers::new()),
            listeners: Arc::new(Listeners::new()),
            tokens: Arc::new(DashMap::new()),
            session: CancellationToken::new(),
        }
    }

    async fn run_transfer(
        client: reqwest::Client,
        url: String,
        transfers: Arc<Transfers>,
        listeners: Arc<Listeners<dyn DownloadEventListener>>,
        tokens: Arc<DashMap<String, UrlTokens>>,
        stop: CancellationToken,
        drop: CancellationToken,
        session: CancellationToken,
    ) {
        let finish = |phase: TransferPhase| {
            transfers.finish(&url, phase);
            tokens.remove(&url);
        };

        let response = tokio::select! {
            _ = session.cancelled() => None,
            response = client.get(&url).send() => Some(response),
        };
        let response = match response {
            Some(Ok(response)) if response.status().is_success() => response,
            Some(Ok(response)) => {
                warn!(%url, status = %response.status(), "request failed");
                finish(TransferPhase::Dropped);
                for listener in listeners.snapshot() {
                    listener.on_transfer_canceled(&url, 0, 0).await;
                }
                return;
            }
            Some(Err(e)) => {
                warn!(%url, error = %e, "request failed");
                finish(TransferPhase::Dropped);
                for listener in listeners.snapshot() {
                    listener.on_transfer_canceled(&url, 0, 0).await;
                }
                return;
            }
            None => {
                finish(TransferPhase::Dropped);
                for listener in listeners.snapshot() {
                    listener.on_transfer_canceled(&url, 0, 0).await;
                }
                return;
            }
        };

        let size = response.content_length().unwrap_or(0) as usize;
        transfers.set_size(&url, size);
        let mut stream = response.bytes_stream();

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    let (position, size) = transfers.progress(&url);
                    debug!(%url, position, "transfer stopped");
                    finish(TransferPhase::Stopped);
                    for listener in listeners.snapshot() {
                        listener.on_transfer_canceled(&url, position, size).await;
                    }
                    return;
                }
                _ = drop.cancelled() => {
                    let (position, size) = transfers.progress(&url);
                    debug!(%url, position, "transfer dropped");
                    finish(TransferPhase::Dropped);
                    for listener in listeners.snapshot() {
                        listener.on_transfer_canceled(&url, position, size).await;
                    }
                    return;
                }
                _ = session.cancelled() => {
                    let (position, size) = transfers.progress(&url);
                    finish(TransferPhase::Dropped);
                    for listener in listeners.snapshot() {
                        listener.on_transfer_canceled(&url, position, size).await;
                    }
                    return;
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(chunk)) => {
                        let (position, size) = transfers.append(&url, &chunk);
                        for listener in listeners.snapshot() {
                            listener.on_bytes_transferred(chunk.len(), &url, position, size, &chunk).await;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(%url, error = %e, "stream failed");
                        let (position, size) = transfers.progress(&url);
                        finish(TransferPhase::Dropped);
                        for listener in listeners.snapshot() {
                            listener.on_transfer_canceled(&url, position, size).await;
                        }
                        return;
                    }
                    None => {
                        let (position, mut size) = transfers.progress(&url);
                        if size == 0 {
                            // No Content-Length header; the stream defines the size
                            transfers.set_size(&url, position);
                            size = position;
                        }
                        finish(TransferPhase::Complete);
                        for listener in listeners.snapshot() {
                            listener.on_transfer_end(size, &url).await;
                        }
                        return;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl DownloadManager for HttpDownloader {
    async fn download(&self, request: DownloadRequest) -> Result<()> {
        let url = request.url;
        self.transfers.begin(&url, 0);
        let stop = CancellationToken::new();
        let drop = CancellationToken::new();
        self.tokens.insert(url.clone(), UrlTokens { stop: stop.clone(), drop: drop.clone() });

        for listener in self.listeners.snapshot() {
            listener.on_transfer_start(&url).await;
        }

        tokio::spawn(Self::run_transfer(
            self.client.clone(),
            url,
            self.transfers.clone(),
            self.listeners.clone(),
            self.tokens.clone(),
            stop,
            drop,
            self.session.clone(),
        ));
        Ok(())
    }

    async fn wait_complete(&self, url: &str) -> Result<TransferOutcome> {
        self.transfers.wait_complete(url).await
    }

    async fn stop(&self, url: &str) -> Result<()> {
        match self.tokens.get(url) {
            Some(tokens) => {
                tokens.stop.cancel();
                Ok(())
            }
            None => Err(PlayerError::UnknownTransfer(url.to_string())),
        }
    }

    async fn drop_url(&self, url: &str) -> Result<()> {
        match self.tokens.get(url) {
            Some(tokens) => {
                tokens.drop.cancel();
                Ok(())
            }
            None => Err(PlayerError::UnknownTransfer(url.to_string())),
        }
    }

    async fn close(&self) {
        self.session.cancel();
    }

    fn add_listener(&self, listener: Arc<dyn DownloadEventListener>) {
        self.listeners.add(listener);
    }
}
