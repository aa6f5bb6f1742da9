//! Hot reload of queue configuration files

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reader::{ConfigError, QueueConfigsReader};
use crate::service::{QueueService, ServiceError};
use crate::settings::QueueId;

/// Reload failures; the live settings stay as they were
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

type FileStamp = Option<(SystemTime, u64)>;

/// Watches the reader's files and pushes changes into a [`QueueService`]
///
/// Files are polled for modification time and size every `interval`; any
/// change re-reads all of them.
pub struct QueueConfigsReloader {
    reader: QueueConfigsReader,
    service: Arc<QueueService>,
    interval: Duration,
}

impl QueueConfigsReloader {
    pub fn new(reader: QueueConfigsReader, service: Arc<QueueService>) -> Self {
        Self {
            reader,
            service,
            interval: Duration::from_secs(1),
        }
    }

    /// Set how often files are checked
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Watch until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut stamps = self.stamps();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        info!(files = ?self.reader.files(), interval = ?self.interval, "Watching queue configs");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let current = self.stamps();
            if current == stamps {
                continue;
            }
            stamps = current;
            debug!("Queue config files changed");
            // Failures are logged by reload and leave the live settings in place
            let _ = self.reload();
        }
        debug!("Queue config watcher stopped");
    }

    /// Re-read every file and apply the result
    pub fn reload(&self) -> Result<BTreeMap<QueueId, String>, ReloadError> {
        let result = self
            .reader
            .read()
            .map_err(ReloadError::from)
            .and_then(|configs| Ok(self.service.update_queue_configs(configs)?));

        match &result {
            Ok(diffs) if diffs.is_empty() => debug!("Queue configs reloaded without changes"),
            Ok(diffs) => {
                for (queue_id, diff) in diffs {
                    info!(queue_id = %queue_id, diff = %diff, "Queue config reloaded");
                }
            }
            Err(e) => warn!(error = %e, "Queue config reload failed; keeping current settings"),
        }
        result
    }

    fn stamps(&self) -> Vec<FileStamp> {
        self.reader
            .files()
            .iter()
            .map(|path| {
                let metadata = std::fs::metadata(path).ok()?;
                Some((metadata.modified().ok()?, metadata.len()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TaskExecutionResult;
    use crate::persistence::{InMemoryQueueDao, QueueShard, QueueShardId};
    use crate::worker::testing::CountingConsumer;
    use tempfile::NamedTempFile;

    fn config_file(text: &str) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), text).unwrap();
        file
    }

    fn service_with(consumer: Arc<CountingConsumer>) -> Arc<QueueService> {
        let service = QueueService::new(vec![QueueShard::new(
            QueueShardId::new("main"),
            Arc::new(InMemoryQueueDao::new()),
        )]);
        service.register_queue(consumer).unwrap();
        Arc::new(service)
    }

    #[tokio::test]
    async fn test_reload_applies_changes() {
        let consumer = CountingConsumer::new("q", TaskExecutionResult::finish());
        let file = config_file("tablequeue.q.table=queue_tasks\n");
        let reloader = QueueConfigsReloader::new(
            QueueConfigsReader::new(vec![file.path().to_path_buf()]),
            service_with(consumer.clone()),
        );

        assert!(reloader.reload().unwrap().is_empty());

        std::fs::write(
            file.path(),
            "tablequeue.q.table=queue_tasks\ntablequeue.q.no-task-timeout=PT7S\n",
        )
        .unwrap();
        let diffs = reloader.reload().unwrap();
        assert!(diffs[&QueueId::new("q")].starts_with("poll("));
        assert_eq!(
            consumer.config.settings.poll.get().no_task_timeout,
            Duration::from_secs(7)
        );
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_settings() {
        let consumer = CountingConsumer::new("q", TaskExecutionResult::finish());
        let file = config_file("tablequeue.q.table=queue_tasks\ntablequeue.q.thread-count=many\n");
        let reloader = QueueConfigsReloader::new(
            QueueConfigsReader::new(vec![file.path().to_path_buf()]),
            service_with(consumer.clone()),
        );

        assert!(matches!(reloader.reload(), Err(ReloadError::Config(_))));
        assert_eq!(consumer.config.settings.processing.get().thread_count, 1);

        std::fs::write(file.path(), "tablequeue.other.table=queue_tasks\n").unwrap();
        assert!(matches!(reloader.reload(), Err(ReloadError::Service(_))));
    }

    #[tokio::test]
    async fn test_watcher_picks_up_file_change() {
        let consumer = CountingConsumer::new("q", TaskExecutionResult::finish());
        let file = config_file("tablequeue.q.table=queue_tasks\n");
        let reloader = QueueConfigsReloader::new(
            QueueConfigsReader::new(vec![file.path().to_path_buf()]),
            service_with(consumer.clone()),
        )
        .with_interval(Duration::from_millis(10));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reloader.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        std::fs::write(
            file.path(),
            "tablequeue.q.table=queue_tasks\ntablequeue.q.retry-interval=PT5M\n",
        )
        .unwrap();
        let mut applied = false;
        for _ in 0..200 {
            if consumer.config.settings.failure.get().retry_interval == Duration::from_secs(300) {
                applied = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(applied);

        cancel.cancel();
        handle.await.unwrap();
    }
}
