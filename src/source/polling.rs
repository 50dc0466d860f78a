use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event;
use crate::pipeline::Pipeline;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Long-polling event source.
///
/// The cursor only tracks consumption: it moves past every update handed to
/// the pipeline, whether or not the relay for it succeeded.
pub struct Poller {
    pipeline: Arc<Pipeline>,
    timeout_secs: u32,
    cursor: Option<i64>,
    backoff: Duration,
}

impl Poller {
    pub fn new(pipeline: Arc<Pipeline>, timeout_secs: u32) -> Self {
        Self {
            pipeline,
            timeout_secs,
            cursor: None,
            backoff: INITIAL_BACKOFF,
        }
    }

    /// Last consumed `update_id`.
    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(timeout_secs = self.timeout_secs, "Polling for updates");
        while !cancel.is_cancelled() {
            self.poll_once(&cancel).await;
        }
        info!(cursor = ?self.cursor, "Polling stopped");
    }

    /// One fetch-and-handle cycle. Returns the number of updates handed on.
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> usize {
        let offset = self.cursor.map(|c| c + 1);
        let fetch = self.pipeline.api().get_updates(offset, self.timeout_secs);

        let batch = tokio::select! {
            _ = cancel.cancelled() => return 0,
            res = fetch => res,
        };

        let updates = match batch {
            Ok(updates) => {
                self.backoff = INITIAL_BACKOFF;
                updates
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?self.backoff, "Fetching updates failed");
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.backoff) => {}
                }
                self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
                return 0;
            }
        };

        let mut handled = 0;
        for raw in updates {
            if cancel.is_cancelled() {
                break;
            }
            let update_id = event::peek_update_id(&raw);
            if let (Some(id), Some(cursor)) = (update_id, self.cursor) {
                if id <= cursor {
                    debug!(update_id = id, "Skipping already consumed update");
                    continue;
                }
            }

            self.pipeline.handle_raw(raw).await;
            handled += 1;

            if let Some(id) = update_id {
                self.cursor = Some(self.cursor.map_or(id, |c| c.max(id)));
            }
        }
        handled
    }
}

/// Clear any webhook (Telegram refuses getUpdates while one is set), then poll
/// until cancelled. Clearing also drops the backlog when asked to.
pub async fn run(
    pipeline: Arc<Pipeline>,
    timeout_secs: u32,
    drop_pending_updates: bool,
    cancel: CancellationToken,
) {
    match pipeline.api().delete_webhook(drop_pending_updates).await {
        Ok(()) => info!(drop_pending_updates, "Webhook cleared for polling"),
        Err(e) => warn!(error = %e, "Failed to clear webhook; polling anyway"),
    }

    Poller::new(pipeline, timeout_secs).run(cancel).await;
}
