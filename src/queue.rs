use crate::backend::{DownloadRequest, MediaBackend, ProgressSink};
use crate::error::ToolError;
use crate::models::{EntryStatus, EntryUpdate};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Runs downloads as independent tasks, at most `max_concurrent` at a time.
pub struct DownloadQueue {
    semaphore: Arc<Semaphore>,
    backend: Arc<dyn MediaBackend>,
    update_tx: mpsc::UnboundedSender<(Uuid, EntryUpdate)>,
}

impl DownloadQueue {
    pub fn new(
        max_concurrent: usize,
        backend: Arc<dyn MediaBackend>,
        update_tx: mpsc::UnboundedSender<(Uuid, EntryUpdate)>,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            backend,
            update_tx,
        }
    }

    pub fn start(
        &self,
        id: Uuid,
        request: DownloadRequest,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let semaphore = self.semaphore.clone();
        let backend = self.backend.clone();
        let sink = ProgressSink::new(id, self.update_tx.clone());

        tokio::spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    sink.send(EntryUpdate::Status(EntryStatus::Cancelled));
                    return;
                }
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            sink.send(EntryUpdate::Status(EntryStatus::Downloading));
            sink.send(EntryUpdate::Progress(0.0));

            let url = request.url.clone();
            match backend.download(request, sink.clone(), cancel).await {
                Ok(path) => {
                    info!(%url, path = %path.display(), "download complete");
                    sink.send(EntryUpdate::OutputPath(path));
                    sink.send(EntryUpdate::Progress(100.0));
                    sink.send(EntryUpdate::Status(EntryStatus::Complete));
                }
                Err(ToolError::Cancelled) => {
                    info!(%url, "download cancelled");
                    sink.send(EntryUpdate::Status(EntryStatus::Cancelled));
                }
                Err(e) => {
                    warn!(%url, error = %e, "download failed");
                    sink.send(EntryUpdate::Error(e.summary()));
                    sink.send(EntryUpdate::Status(EntryStatus::Failed));
                }
            }
        })
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}
