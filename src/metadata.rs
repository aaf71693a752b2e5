use crate::backend::MediaBackend;
use crate::models::{EntryUpdate, Metadata};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Looks up titles and thumbnails off the interface loop.
#[derive(Clone)]
pub struct MetadataFetcher {
    backend: Arc<dyn MediaBackend>,
    update_tx: mpsc::UnboundedSender<(Uuid, EntryUpdate)>,
}

impl MetadataFetcher {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        update_tx: mpsc::UnboundedSender<(Uuid, EntryUpdate)>,
    ) -> Self {
        Self { backend, update_tx }
    }

    /// Returns immediately. The result arrives on the update channel as
    /// `EntryUpdate::Metadata`, unless `cancel` fires first.
    pub fn fetch_async(&self, id: Uuid, url: String, cancel: CancellationToken) -> JoinHandle<()> {
        let backend = self.backend.clone();
        let update_tx = self.update_tx.clone();

        tokio::spawn(async move {
            let metadata = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%id, "metadata fetch dropped for removed entry");
                    return;
                }
                metadata = fetch(backend.as_ref(), &url) => metadata,
            };
            let _ = update_tx.send((id, EntryUpdate::Metadata(metadata)));
        })
    }
}

async fn fetch(backend: &dyn MediaBackend, url: &str) -> Metadata {
    let info = match backend.probe(url).await {
        Ok(info) => info,
        Err(e) => {
            warn!(%url, error = %e, "metadata unavailable");
            return Metadata::default();
        }
    };

    let thumbnail = match info.thumbnail_url() {
        Some(thumb_url) => match backend.fetch_thumbnail(thumb_url).await {
            Ok(thumbnail) => Some(thumbnail),
            Err(e) => {
                warn!(%url, error = %e, "thumbnail unavailable");
                None
            }
        },
        None => None,
    };

    Metadata {
        title: info.title.filter(|t| !t.trim().is_empty()),
        thumbnail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DownloadRequest, ProgressSink, VideoInfo};
    use crate::error::ToolError;
    use crate::models::Thumbnail;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubBackend {
        probes: AtomicUsize,
        fail_probe: bool,
        fail_thumbnail: bool,
        delay: Duration,
    }

    impl StubBackend {
        fn new() -> Self {
            Self {
                probes: AtomicUsize::new(0),
                fail_probe: false,
                fail_thumbnail: false,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl MediaBackend for StubBackend {
        async fn probe(&self, _url: &str) -> Result<VideoInfo, ToolError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_probe {
                return Err(ToolError::Parse("no json".into()));
            }
            Ok(VideoInfo {
                title: Some("A Clip".into()),
                thumbnail: Some("https://img/clip.jpg".into()),
                thumbnails: Vec::new(),
            })
        }

        async fn fetch_thumbnail(&self, _url: &str) -> Result<Thumbnail, ToolError> {
            if self.fail_thumbnail {
                return Err(ToolError::OutputNotFound);
            }
            Ok(Thumbnail(vec![0xff, 0xd8, 0xff]))
        }

        async fn download(
            &self,
            _request: DownloadRequest,
            _progress: ProgressSink,
            _cancel: CancellationToken,
        ) -> Result<PathBuf, ToolError> {
            Err(ToolError::OutputNotFound)
        }
    }

    async fn run(backend: StubBackend) -> Option<Metadata> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fetcher = MetadataFetcher::new(Arc::new(backend), tx);
        let id = Uuid::new_v4();
        fetcher
            .fetch_async(id, "https://youtu.be/x".into(), CancellationToken::new())
            .await
            .unwrap();
        match rx.try_recv() {
            Ok((got, EntryUpdate::Metadata(metadata))) if got == id => Some(metadata),
            _ => None,
        }
    }

    #[tokio::test]
    async fn delivers_title_and_thumbnail() {
        let metadata = run(StubBackend::new()).await.unwrap();
        assert_eq!(metadata.title.as_deref(), Some("A Clip"));
        assert_eq!(metadata.thumbnail.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn probe_failure_degrades_to_empty() {
        let mut backend = StubBackend::new();
        backend.fail_probe = true;
        assert!(run(backend).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn thumbnail_failure_keeps_title() {
        let mut backend = StubBackend::new();
        backend.fail_thumbnail = true;
        let metadata = run(backend).await.unwrap();
        assert_eq!(metadata.title.as_deref(), Some("A Clip"));
        assert!(metadata.thumbnail.is_none());
    }

    #[tokio::test]
    async fn cancelled_fetch_sends_nothing() {
        let mut backend = StubBackend::new();
        backend.delay = Duration::from_secs(30);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fetcher = MetadataFetcher::new(Arc::new(backend), tx);
        let cancel = CancellationToken::new();

        let handle = fetcher.fetch_async(Uuid::new_v4(), "https://youtu.be/x".into(), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn same_url_is_fetched_twice() {
        let backend = Arc::new(StubBackend::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let fetcher = MetadataFetcher::new(backend.clone(), tx);
        let a = fetcher.fetch_async(Uuid::new_v4(), "https://youtu.be/x".into(), CancellationToken::new());
        let b = fetcher.fetch_async(Uuid::new_v4(), "https://youtu.be/x".into(), CancellationToken::new());
        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(backend.probes.load(Ordering::SeqCst), 2);
    }
}
