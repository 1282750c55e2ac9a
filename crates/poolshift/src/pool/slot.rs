//! A task together with everything needed to run or move it

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::ids::TaskId;
use crate::task::{TaskRecord, TaskStatus, Work};

/// Live bookkeeping for one task inside a pool.
///
/// When pending work migrates, the whole slot moves: the record keeps its
/// id, the stop signal stays connected, and status subscribers keep
/// receiving updates from the same channel.
pub struct TaskSlot {
    pub(crate) record: TaskRecord,
    pub(crate) work: Work,
    pub(crate) cancel: CancellationToken,
    status_tx: watch::Sender<TaskStatus>,
}

impl TaskSlot {
    pub(crate) fn new(record: TaskRecord, work: Work) -> Self {
        let (status_tx, _) = watch::channel(record.status);
        Self {
            record,
            work,
            cancel: CancellationToken::new(),
            status_tx,
        }
    }

    pub fn id(&self) -> TaskId {
        self.record.id
    }

    pub fn status(&self) -> TaskStatus {
        self.record.status
    }

    pub fn record(&self) -> &TaskRecord {
        &self.record
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status_tx.subscribe()
    }

    /// Push the record's current status to subscribers
    pub(crate) fn publish_status(&self) {
        self.status_tx.send_replace(self.record.status);
    }
}

impl std::fmt::Debug for TaskSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSlot")
            .field("record", &self.record)
            .field("stop_requested", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
