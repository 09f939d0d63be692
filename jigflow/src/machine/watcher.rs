//! Configuration watcher and the pending-stage handoff cell.

use crate::config::StageId;
use crate::report::LogSink;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Watcher-owned cell for the pending stage change.
///
/// The watcher is the only writer; the state machine reads it at phase
/// boundaries (and while idle in the ready state). This is the single point
/// of contact between the two tasks; nothing else is shared.
#[derive(Default)]
pub struct PendingStageCell {
    cell: Mutex<Option<StageId>>,
    notify: Notify,
}

impl PendingStageCell {
    /// Creates an empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pending stage change.
    pub fn set(&self, stage: StageId) {
        *self.cell.lock() = Some(stage);
        self.notify.notify_waiters();
    }

    /// Takes the pending change, clearing the cell.
    #[must_use]
    pub fn take(&self) -> Option<StageId> {
        self.cell.lock().take()
    }

    /// The pending change without clearing it.
    #[must_use]
    pub fn peek(&self) -> Option<StageId> {
        *self.cell.lock()
    }

    /// Resolves once a change is pending (immediately if one already is).
    pub async fn changed(&self) -> StageId {
        loop {
            let notified = self.notify.notified();
            if let Some(stage) = self.peek() {
                return stage;
            }
            notified.await;
        }
    }
}

/// Polls the remote configuration and signals stage changes.
///
/// Runs as its own task on its own schedule; it only ever writes to the
/// [`PendingStageCell`], never to the state machine's state.
pub struct ConfigWatcher {
    sink: Arc<dyn LogSink>,
    jig_id: String,
    interval: Duration,
    current: StageId,
    cell: Arc<PendingStageCell>,
}

impl ConfigWatcher {
    /// Creates a watcher for one jig.
    #[must_use]
    pub fn new(
        sink: Arc<dyn LogSink>,
        jig_id: impl Into<String>,
        current: StageId,
        interval: Duration,
        cell: Arc<PendingStageCell>,
    ) -> Self {
        Self { sink, jig_id: jig_id.into(), interval, current, cell }
    }

    /// Spawns the polling task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(jig = %self.jig_id, interval_ms = self.interval.as_millis() as u64, "config watcher started");
        loop {
            self.poll_once().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn poll_once(&mut self) {
        match self.sink.fetch_jig_config(&self.jig_id).await {
            Ok(Some(document)) => {
                let stage = document
                    .get("stage")
                    .and_then(serde_json::Value::as_u64)
                    .and_then(|n| u8::try_from(n).ok())
                    .and_then(|n| StageId::try_from(n).ok());
                if let Some(stage) = stage {
                    if stage != self.current {
                        info!(
                            from = self.current.number(),
                            to = stage.number(),
                            "stage change detected"
                        );
                        self.cell.set(stage);
                        self.current = stage;
                    }
                }
            }
            Ok(None) => debug!(jig = %self.jig_id, "no remote config for jig"),
            Err(e) => warn!(error = %e, "config poll failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSink;

    #[tokio::test]
    async fn watcher_signals_only_on_change() {
        let sink = Arc::new(MockSink::online());
        let cell = Arc::new(PendingStageCell::new());
        let mut watcher = ConfigWatcher::new(
            sink.clone(),
            "jig-01",
            StageId::Two,
            Duration::from_millis(10),
            cell.clone(),
        );

        sink.set_config(serde_json::json!({ "stage": 2 }));
        watcher.poll_once().await;
        assert_eq!(cell.peek(), None);

        sink.set_config(serde_json::json!({ "stage": 3 }));
        watcher.poll_once().await;
        assert_eq!(cell.peek(), Some(StageId::Three));

        // Same stage again: no re-signal after take.
        assert_eq!(cell.take(), Some(StageId::Three));
        watcher.poll_once().await;
        assert_eq!(cell.peek(), None);
    }

    #[tokio::test]
    async fn malformed_stage_is_ignored() {
        let sink = Arc::new(MockSink::online());
        let cell = Arc::new(PendingStageCell::new());
        let mut watcher = ConfigWatcher::new(
            sink.clone(),
            "jig-01",
            StageId::One,
            Duration::from_millis(10),
            cell.clone(),
        );

        sink.set_config(serde_json::json!({ "stage": 9 }));
        watcher.poll_once().await;
        assert_eq!(cell.peek(), None);
    }

    #[tokio::test]
    async fn changed_resolves_on_set() {
        let cell = Arc::new(PendingStageCell::new());
        let waiter = cell.clone();
        let handle = tokio::spawn(async move { waiter.changed().await });
        tokio::task::yield_now().await;

        cell.set(StageId::One);
        let stage = handle.await.unwrap();
        assert_eq!(stage, StageId::One);
    }
}
