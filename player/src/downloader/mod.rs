//! Transports. A [`DownloadManager`] starts transfers, fans progress out to
//! listeners and lets the caller await, stop or drop individual URLs.

pub mod http;
pub mod local;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{PlayerError, Result};
use crate::events::DownloadEventListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadType {
    Mpd,
    StreamInit,
    Segment,
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub req_type: DownloadType,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, req_type: DownloadType) -> Self {
        Self { url: url.into(), req_type }
    }
}

/// Terminal result of a transfer. A stopped transfer completes with its
/// partial bytes and the logical total size; a dropped transfer yields
/// nothing.
#[derive(Debug)]
pub enum TransferOutcome {
    Complete { content: Bytes, size: usize },
    Dropped,
}

impl TransferOutcome {
    pub fn is_dropped(&self) -> bool {
        matches!(self, TransferOutcome::Dropped)
    }

    pub fn into_bytes(self) -> Option<(Bytes, usize)> {
        match self {
            TransferOutcome::Complete { content, size } => Some((content, size)),
            TransferOutcome::Dropped => None,
        }
    }
}

/// Uniform download/cancel/drop API over the HTTP and local transports.
#[async_trait]
pub trait DownloadManager: Send + Sync {
    /// Begin the transfer of `request.url`. Returns promptly; progress is
    /// delivered through the registered listeners.
    async fn download(&self, request: DownloadRequest) -> Result<()>;

    /// Await the terminal state of a URL.
    async fn wait_complete(&self, url: &str) -> Result<TransferOutcome>;

    /// Graceful cancel: close the stream, keep the partial bytes readable.
    async fn stop(&self, url: &str) -> Result<()>;

    /// Abortive cancel: discard the transfer.
    async fn drop_url(&self, url: &str) -> Result<()>;

    /// Tear down the whole session.
    async fn close(&self);

    fn add_listener(&self, listener: Arc<dyn DownloadEventListener>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferPhase {
    Active,
    Complete,
    Stopped,
    Dropped,
}

struct TransferEntry {
    content: BytesMut,
    size: usize,
    phase: watch::Sender<TransferPhase>,
}

/// Per-URL transfer registry shared by the transport implementations.
/// Content accumulates under the map entry; terminal phases are signalled
/// through a watch channel so waiters never miss the transition.
pub(crate) struct Transfers {
    map: DashMap<String, TransferEntry>,
}

impl Transfers {
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Register a fresh transfer. A stale entry for the same URL is replaced.
    pub fn begin(&self, url: &str, size: usize) {
        let (phase, _) = watch::channel(TransferPhase::Active);
        self.map.insert(
            url.to_string(),
            TransferEntry { content: BytesMut::new(), size, phase },
        );
    }

    pub fn set_size(&self, url: &str, size: usize) {
        if let Some(mut entry) = self.map.get_mut(url) {
            entry.size = size;
        }
    }

    /// Append a chunk, returning the new position and the logical size.
    pub fn append(&self, url: &str, chunk: &[u8]) -> (usize, usize) {
        match self.map.get_mut(url) {
            Some(mut entry) => {
                entry.content.extend_from_slice(chunk);
                (entry.content.len(), entry.size)
            }
            None => (0, 0),
        }
    }

    /// Current position and logical size of a transfer.
    pub fn progress(&self, url: &str) -> (usize, usize) {
        match self.map.get(url) {
            Some(entry) => (entry.content.len(), entry.size),
            None => (0, 0),
        }
    }

    /// Move a transfer into a terminal phase, waking any waiter.
    pub fn finish(&self, url: &str, phase: TransferPhase) {
        if let Some(entry) = self.map.get(url) {
            entry.phase.send_replace(phase);
        }
    }

    pub async fn wait_complete(&self, url: &str) -> Result<TransferOutcome> {
        let mut rx = {
            let entry = self
                .map
                .get(url)
                .ok_or_else(|| PlayerError::UnknownTransfer(url.to_string()))?;
            entry.phase.subscribe()
        };
        loop {
            let phase = *rx.borrow_and_update();
            if phase != TransferPhase::Active {
                break;
            }
            rx.changed()
                .await
                .map_err(|_| PlayerError::Transport(format!("transfer task for {url} vanished")))?;
        }

        let (_, entry) = self
            .map
            .remove(url)
            .ok_or_else(|| PlayerError::UnknownTransfer(url.to_string()))?;
        let phase = *entry.phase.borrow();
        match phase {
            TransferPhase::Complete | TransferPhase::Stopped => Ok(TransferOutcome::Complete {
                content: entry.content.freeze(),
                size: entry.size,
            }),
            _ => Ok(TransferOutcome::Dropped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transfer_completes_with_accumulated_bytes() {
        let transfers = Transfers::new();
        transfers.begin("u", 6);
        assert_eq!(transfers.append("u", b"abc"), (3, 6));
        assert_eq!(transfers.append("u", b"def"), (6, 6));
        transfers.finish("u", TransferPhase::Complete);
        let outcome = transfers.wait_complete("u").await.unwrap();
        let (content, size) = outcome.into_bytes().unwrap();
        assert_eq!(&content[..], b"abcdef");
        assert_eq!(size, 6);
    }

    #[tokio::test]
    async fn dropped_transfer_yields_nothing() {
        let transfers = Transfers::new();
        transfers.begin("u", 10);
        transfers.append("u", b"abc");
        transfers.finish("u", TransferPhase::Dropped);
        assert!(transfers.wait_complete("u").await.unwrap().is_dropped());
    }

    #[tokio::test]
    async fn stopped_transfer_keeps_partial_bytes() {
        let transfers = Transfers::new();
        transfers.begin("u", 10);
        transfers.append("u", b"abc");
        transfers.finish("u", TransferPhase::Stopped);
        let (content, size) = transfers.wait_complete("u").await.unwrap().into_bytes().unwrap();
        assert_eq!(&content[..], b"abc");
        assert_eq!(size, 10);
    }

    #[tokio::test]
    async fn waiting_for_unknown_url_is_an_error() {
        let transfers = Transfers::new();
        assert!(transfers.wait_complete("nope").await.is_err());
    }
}
