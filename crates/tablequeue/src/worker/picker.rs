//! Claims the next task of a queue

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{instrument, trace};

use crate::api::TaskRecord;
use crate::listener::TaskLifecycleListener;
use crate::persistence::{QueueShardId, ShardTransaction, StoreError};
use crate::settings::{DynamicSetting, FailureSettings, QueueLocation};

/// Picks one row per call inside the caller's transaction
pub struct TaskPicker {
    shard_id: QueueShardId,
    location: QueueLocation,
    failure: Arc<DynamicSetting<FailureSettings>>,
    listener: Arc<dyn TaskLifecycleListener>,
}

impl TaskPicker {
    pub fn new(
        shard_id: QueueShardId,
        location: QueueLocation,
        failure: Arc<DynamicSetting<FailureSettings>>,
        listener: Arc<dyn TaskLifecycleListener>,
    ) -> Self {
        Self {
            shard_id,
            location,
            failure,
            listener,
        }
    }

    /// Claim the next visible row, if any. The failure settings are read
    /// fresh on every call so reloads apply to the next pick.
    #[instrument(skip(self, tx), fields(queue_id = %self.location.queue_id(), shard_id = %self.shard_id))]
    pub async fn pick(
        &self,
        tx: &mut dyn ShardTransaction,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let started = Instant::now();
        let failure = self.failure.get();
        let record = tx.pick_task(&self.location, &failure).await?;

        match &record {
            Some(record) => {
                self.listener
                    .picked(&self.shard_id, &self.location, record, started.elapsed());
            }
            None => trace!("no task to pick"),
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{EnqueueRecord, InMemoryQueueDao, QueueDao};
    use crate::settings::QueueId;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct PickRecorder {
        picked: Mutex<Vec<i64>>,
    }

    impl TaskLifecycleListener for PickRecorder {
        fn picked(
            &self,
            _shard_id: &QueueShardId,
            _location: &QueueLocation,
            record: &TaskRecord,
            _pick_time: Duration,
        ) {
            self.picked.lock().unwrap().push(record.id);
        }
    }

    #[tokio::test]
    async fn test_pick_notifies_listener_only_on_task() {
        let dao = InMemoryQueueDao::new();
        let location = QueueLocation::new(QueueId::new("picker"), "queue_tasks");
        let recorder = Arc::new(PickRecorder::default());
        let picker = TaskPicker::new(
            QueueShardId::new("main"),
            location.clone(),
            Arc::new(DynamicSetting::new(FailureSettings::default())),
            recorder.clone(),
        );

        let mut tx = dao.begin().await.unwrap();
        assert!(picker.pick(tx.as_mut()).await.unwrap().is_none());

        let id = tx
            .enqueue(&location, EnqueueRecord::default())
            .await
            .unwrap();
        let record = picker.pick(tx.as_mut()).await.unwrap().unwrap();
        tx.commit().await.unwrap();

        assert_eq!(record.id, id);
        assert_eq!(record.attempts_count, 1);
        assert_eq!(*recorder.picked.lock().unwrap(), vec![id]);
    }
}
