use std::sync::{Arc, PoisonError, RwLock};

use crate::cloud::Cloud;

pub type CloudRef = Arc<dyn Cloud>;

/// Ordered collection of the configured clouds.
///
/// Clones share the same underlying list, so a reconfiguration is visible to the control loop and
/// to the reconciler at once. Readers always work with a snapshot.
#[derive(Clone, Default)]
pub struct CloudSet {
    clouds: Arc<RwLock<Vec<CloudRef>>>,
}

impl CloudSet {
    pub fn new(clouds: Vec<CloudRef>) -> Self {
        Self {
            clouds: Arc::new(RwLock::new(clouds)),
        }
    }

    /// Returns the clouds in their configured order.
    pub fn snapshot(&self) -> Vec<CloudRef> {
        self.clouds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, clouds: Vec<CloudRef>) {
        *self.clouds.write().unwrap_or_else(PoisonError::into_inner) = clouds;
    }

    pub fn add(&self, cloud: CloudRef) {
        self.clouds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cloud);
    }

    /// Removes the cloud with the given unique id. Returns false if there was no such cloud.
    pub fn remove(&self, unique_id: &str) -> bool {
        let mut clouds = self.clouds.write().unwrap_or_else(PoisonError::into_inner);
        let len = clouds.len();
        clouds.retain(|cloud| cloud.identity().unique_id() != unique_id);
        clouds.len() != len
    }

    /// Finds the first cloud with the given display name.
    pub fn find_by_name(&self, name: &str) -> Option<CloudRef> {
        self.clouds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|cloud| cloud.name() == name)
            .cloned()
    }

    pub fn find_by_unique_id(&self, unique_id: &str) -> Option<CloudRef> {
        self.clouds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|cloud| cloud.identity().unique_id() == unique_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.clouds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
