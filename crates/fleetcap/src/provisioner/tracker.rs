use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::Map;

/// Identifier of a queued work item, as reported by the [`LoadSource`](super::LoadSource).
pub type QueueItemId = u64;

/// `(cloud name, node display name)`
type NodeKey = (String, String);

#[derive(Default)]
struct TrackerState {
    item_to_nodes: Map<QueueItemId, Vec<NodeKey>>,
    node_to_item: Map<NodeKey, QueueItemId>,
}

/// Remembers which queued items caused which planned nodes to be launched.
///
/// An item stays pending while at least one of its nodes has not finished launching.
#[derive(Default)]
pub struct QueueItemTracker {
    state: Mutex<TrackerState>,
}

impl QueueItemTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Links every item to all `nodes` planned by `cloud_name`.
    ///
    /// A node is reported as caused by the last item it was linked to.
    pub fn link_items_to_nodes(&self, items: &[QueueItemId], cloud_name: &str, nodes: &[String]) {
        if items.is_empty() || nodes.is_empty() {
            return;
        }
        log::debug!(
            "Linking {} queue item(s) to {} planned node(s) of cloud {cloud_name}",
            items.len(),
            nodes.len()
        );
        let keys: Vec<NodeKey> = nodes
            .iter()
            .map(|node| (cloud_name.to_string(), node.clone()))
            .collect();
        let mut state = self.lock();
        for &item in items {
            let linked = state.item_to_nodes.entry(item).or_default();
            for key in &keys {
                if !linked.contains(key) {
                    linked.push(key.clone());
                }
            }
            for key in &keys {
                state.node_to_item.insert(key.clone(), item);
            }
        }
    }

    /// Forgets `item`, e.g. because it left the queue. Returns the display names of its nodes.
    pub fn unlink_item(&self, item: QueueItemId) -> Vec<String> {
        let mut state = self.lock();
        let nodes = state.item_to_nodes.remove(&item).unwrap_or_default();
        state.node_to_item.retain(|_, linked| *linked != item);
        if !nodes.is_empty() {
            log::debug!(
                "Unlinked queue item {item} from {} planned node(s)",
                nodes.len()
            );
        }
        nodes.into_iter().map(|(_, node)| node).collect()
    }

    /// Forgets a node whose launch finished. Items without any remaining node are dropped.
    ///
    /// Returns the item that the node was reported for.
    pub fn unlink_node(&self, cloud_name: &str, node: &str) -> Option<QueueItemId> {
        let key = (cloud_name.to_string(), node.to_string());
        let mut state = self.lock();
        let item = state.node_to_item.remove(&key);
        state.item_to_nodes.retain(|_, nodes| {
            nodes.retain(|linked| *linked != key);
            !nodes.is_empty()
        });
        if let Some(item) = item {
            log::debug!("Unlinked planned node {node} of cloud {cloud_name} from queue item {item}");
        }
        item
    }

    pub fn is_item_pending(&self, item: QueueItemId) -> bool {
        self.lock().item_to_nodes.contains_key(&item)
    }

    /// Display names of the nodes linked to `item`.
    pub fn linked_nodes(&self, item: QueueItemId) -> Vec<String> {
        self.lock()
            .item_to_nodes
            .get(&item)
            .map(|nodes| nodes.iter().map(|(_, node)| node.clone()).collect())
            .unwrap_or_default()
    }

    pub fn linked_item(&self, cloud_name: &str, node: &str) -> Option<QueueItemId> {
        self.lock()
            .node_to_item
            .get(&(cloud_name.to_string(), node.to_string()))
            .copied()
    }

    pub fn tracked_item_count(&self) -> usize {
        self.lock().item_to_nodes.len()
    }

    pub fn tracked_node_count(&self) -> usize {
        self.lock().node_to_item.len()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::QueueItemTracker;

    fn nodes(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn item_is_pending_until_its_nodes_finish() {
        let tracker = QueueItemTracker::new();
        tracker.link_items_to_nodes(&[7], "aws", &nodes(&["aws-node-1", "aws-node-2"]));
        assert!(tracker.is_item_pending(7));
        assert_eq!(tracker.linked_nodes(7), nodes(&["aws-node-1", "aws-node-2"]));
        assert_eq!(tracker.linked_item("aws", "aws-node-2"), Some(7));
        assert_eq!(tracker.linked_item("gcp", "aws-node-2"), None);

        assert_eq!(tracker.unlink_node("aws", "aws-node-1"), Some(7));
        assert!(tracker.is_item_pending(7));
        assert_eq!(tracker.unlink_node("aws", "aws-node-2"), Some(7));
        assert!(!tracker.is_item_pending(7));
        assert_eq!(tracker.tracked_item_count(), 0);
        assert_eq!(tracker.tracked_node_count(), 0);
    }

    #[test]
    fn several_items_share_nodes() {
        let tracker = QueueItemTracker::new();
        tracker.link_items_to_nodes(&[1, 2], "aws", &nodes(&["n1"]));
        assert_eq!(tracker.tracked_item_count(), 2);
        assert_eq!(tracker.tracked_node_count(), 1);
        assert_eq!(tracker.linked_item("aws", "n1"), Some(2));

        assert_eq!(tracker.unlink_node("aws", "n1"), Some(2));
        assert!(!tracker.is_item_pending(1));
        assert!(!tracker.is_item_pending(2));
    }

    #[test]
    fn unlinking_item_forgets_its_nodes() {
        let tracker = QueueItemTracker::new();
        tracker.link_items_to_nodes(&[1], "aws", &nodes(&["n1", "n2"]));
        tracker.link_items_to_nodes(&[2], "gcp", &nodes(&["n3"]));
        assert_eq!(tracker.unlink_item(1), nodes(&["n1", "n2"]));
        assert_eq!(tracker.linked_item("aws", "n1"), None);
        assert_eq!(tracker.tracked_node_count(), 1);
        assert!(tracker.unlink_item(1).is_empty());
        assert_eq!(tracker.unlink_node("aws", "n2"), None);
        assert!(tracker.is_item_pending(2));
    }

    #[test]
    fn empty_links_are_ignored() {
        let tracker = QueueItemTracker::new();
        tracker.link_items_to_nodes(&[], "aws", &nodes(&["n1"]));
        tracker.link_items_to_nodes(&[1], "aws", &[]);
        assert_eq!(tracker.tracked_item_count(), 0);
    }
}
