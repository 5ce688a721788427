use serde::{Deserialize, Serialize};

use crate::Label;
use crate::provisioner::tracker::QueueItemId;

/// Point-in-time utilization of the executors that can serve one label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    /// Executors of all agents, including offline ones.
    pub defined_executors: u32,
    pub online_executors: u32,
    /// Executors of agents that are starting up.
    pub connecting_executors: u32,
    pub busy_executors: u32,
    pub idle_executors: u32,
    /// Idle executors that will accept new work.
    pub available_executors: u32,
    /// Queued work items waiting for an executor.
    pub queue_length: u32,
}

/// Supplies load information about the system that the provisioned agents serve.
pub trait LoadSource: Send + Sync {
    /// Labels that currently need evaluation. `None` stands for work without a label.
    fn labels(&self) -> Vec<Option<Label>>;

    fn snapshot(&self, label: Option<&Label>) -> LoadSnapshot;

    /// Queued items that wait for `label`. Launches planned for the label are linked to them.
    fn queue_items(&self, _label: Option<&Label>) -> Vec<QueueItemId> {
        Vec::new()
    }
}

/// Exponential moving average, `latest = decay * latest + (1 - decay) * sample`.
#[derive(Debug, Clone, Copy)]
pub struct MovingAverage {
    decay: f32,
    latest: Option<f32>,
}

impl MovingAverage {
    pub fn new(decay: f32) -> Self {
        Self {
            decay: decay.clamp(0.0, 1.0),
            latest: None,
        }
    }

    /// The first sample initializes the average.
    pub fn update(&mut self, sample: f32) {
        self.latest = Some(match self.latest {
            Some(latest) => self.decay * latest + (1.0 - self.decay) * sample,
            None => sample,
        });
    }

    pub fn latest(&self) -> f32 {
        self.latest.unwrap_or(0.0)
    }
}

/// Moving averages of the load of one label and of the capacity planned for it.
#[derive(Debug, Clone)]
pub struct LoadStatistics {
    available_executors: MovingAverage,
    connecting_executors: MovingAverage,
    online_executors: MovingAverage,
    queue_length: MovingAverage,
    planned_capacity: MovingAverage,
}

impl LoadStatistics {
    pub fn new(decay: f32) -> Self {
        Self {
            available_executors: MovingAverage::new(decay),
            connecting_executors: MovingAverage::new(decay),
            online_executors: MovingAverage::new(decay),
            queue_length: MovingAverage::new(decay),
            planned_capacity: MovingAverage::new(decay),
        }
    }

    pub fn record(&mut self, snapshot: &LoadSnapshot, planned_capacity: u32) {
        self.available_executors
            .update(snapshot.available_executors as f32);
        self.connecting_executors
            .update(snapshot.connecting_executors as f32);
        self.online_executors.update(snapshot.online_executors as f32);
        self.queue_length.update(snapshot.queue_length as f32);
        self.planned_capacity.update(planned_capacity as f32);
    }

    pub fn available_executors(&self) -> f32 {
        self.available_executors.latest()
    }

    pub fn connecting_executors(&self) -> f32 {
        self.connecting_executors.latest()
    }

    pub fn online_executors(&self) -> f32 {
        self.online_executors.latest()
    }

    pub fn queue_length(&self) -> f32 {
        self.queue_length.latest()
    }

    pub fn planned_capacity(&self) -> f32 {
        self.planned_capacity.latest()
    }
}
