use std::sync::Mutex;

use crate::provisioner::{LoadSnapshot, LoadSource, QueueItemId};
use crate::{Label, Map};

/// Load source with fixed snapshots per label.
#[derive(Default)]
pub struct TestLoad {
    snapshots: Mutex<Map<Option<Label>, LoadSnapshot>>,
    items: Mutex<Map<Option<Label>, Vec<QueueItemId>>>,
}

impl TestLoad {
    pub fn set(&self, label: Option<Label>, snapshot: LoadSnapshot) {
        self.snapshots.lock().unwrap().insert(label, snapshot);
    }

    /// Sets `queue_length` waiting items and `available` idle executors for `label`.
    pub fn set_queue(&self, label: Option<Label>, queue_length: u32, available: u32) {
        self.set(
            label,
            LoadSnapshot {
                defined_executors: available,
                online_executors: available,
                idle_executors: available,
                available_executors: available,
                queue_length,
                ..Default::default()
            },
        );
    }
}

impl TestLoad {
    pub fn set_items(&self, label: Option<Label>, items: Vec<QueueItemId>) {
        self.items.lock().unwrap().insert(label, items);
    }
}

impl LoadSource for TestLoad {
    fn labels(&self) -> Vec<Option<Label>> {
        let mut labels: Vec<_> = self.snapshots.lock().unwrap().keys().cloned().collect();
        labels.sort();
        labels
    }

    fn snapshot(&self, label: Option<&Label>) -> LoadSnapshot {
        self.snapshots
            .lock()
            .unwrap()
            .get(&label.cloned())
            .copied()
            .unwrap_or_default()
    }

    fn queue_items(&self, label: Option<&Label>) -> Vec<QueueItemId> {
        self.items
            .lock()
            .unwrap()
            .get(&label.cloned())
            .cloned()
            .unwrap_or_default()
    }
}
