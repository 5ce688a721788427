use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::{Label, Map};

const UNLABELED: &str = "unlabeled";

/// Counters of provisioning attempts for one cloud, strategy, label, or for all of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttemptMetrics {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub requested_executors: u64,
    pub provisioned_executors: u64,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Duration,
    pub failure_reasons: BTreeMap<String, u64>,
    /// Executors of agents that came online. Only recorded per cloud and globally.
    pub available_executors: u64,
    pub availability_events: u64,
    pub total_availability_duration: Duration,
}

impl AttemptMetrics {
    pub fn success_rate(&self) -> f64 {
        ratio(self.successes, self.attempts)
    }

    pub fn failure_rate(&self) -> f64 {
        ratio(self.failures, self.attempts)
    }

    pub fn average_duration(&self) -> Duration {
        average(self.total_duration, self.attempts)
    }

    /// Average time from the start of a launch until its agent was added.
    pub fn average_availability_duration(&self) -> Duration {
        average(self.total_availability_duration, self.availability_events)
    }

    fn start(&mut self, requested: u32) {
        self.attempts += 1;
        self.requested_executors += u64::from(requested);
    }

    fn finish(&mut self, duration: Duration) {
        self.total_duration += duration;
        self.min_duration = Some(match self.min_duration {
            Some(min) => min.min(duration),
            None => duration,
        });
        self.max_duration = self.max_duration.max(duration);
    }

    fn succeed(&mut self, provisioned: u32, duration: Duration) {
        self.successes += 1;
        self.provisioned_executors += u64::from(provisioned);
        self.finish(duration);
    }

    fn fail(&mut self, reason: &str, duration: Duration) {
        self.failures += 1;
        *self.failure_reasons.entry(reason.to_string()).or_default() += 1;
        self.finish(duration);
    }

    fn available(&mut self, executors: u32, duration: Duration) {
        self.available_executors += u64::from(executors);
        self.availability_events += 1;
        self.total_availability_duration += duration;
    }
}

fn ratio(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn average(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(count) => total / count,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
    }
}

/// Copy of all provisioning metrics, grouped the same way as they are collected.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub global: AttemptMetrics,
    pub clouds: BTreeMap<String, AttemptMetrics>,
    pub strategies: BTreeMap<String, AttemptMetrics>,
    pub labels: BTreeMap<String, AttemptMetrics>,
}

/// Handle of one provisioning attempt, returned by [`ProvisioningMetrics::start_attempt`].
#[derive(Debug)]
pub struct AttemptContext {
    cloud: String,
    strategy: String,
    label: String,
    requested: u32,
    started: Instant,
}

#[derive(Default)]
struct MetricsState {
    global: AttemptMetrics,
    clouds: Map<String, AttemptMetrics>,
    strategies: Map<String, AttemptMetrics>,
    labels: Map<String, AttemptMetrics>,
}

impl MetricsState {
    fn groups(&mut self, context: &AttemptContext) -> [&mut AttemptMetrics; 4] {
        [
            &mut self.global,
            self.clouds.entry(context.cloud.clone()).or_default(),
            self.strategies.entry(context.strategy.clone()).or_default(),
            self.labels.entry(context.label.clone()).or_default(),
        ]
    }
}

fn sorted(map: &Map<String, AttemptMetrics>) -> BTreeMap<String, AttemptMetrics> {
    map.iter()
        .map(|(key, metrics)| (key.clone(), metrics.clone()))
        .collect()
}

/// Outcome statistics of the calls to [`Cloud::provision`](crate::cloud::Cloud::provision) and of
/// the launches they produce.
#[derive(Default)]
pub struct ProvisioningMetrics {
    state: Mutex<MetricsState>,
}

impl ProvisioningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_attempt(
        &self,
        cloud_name: &str,
        strategy: &str,
        label: Option<&Label>,
        requested: u32,
    ) -> AttemptContext {
        let context = AttemptContext {
            cloud: cloud_name.to_string(),
            strategy: strategy.to_string(),
            label: label.map_or(UNLABELED, |label| label.as_str()).to_string(),
            requested,
            started: Instant::now(),
        };
        for metrics in self.lock().groups(&context) {
            metrics.start(requested);
        }
        log::trace!(
            "Provisioning attempt started: cloud={}, strategy={}, label={}, requested={requested}",
            context.cloud,
            context.strategy,
            context.label
        );
        context
    }

    pub fn record_success(&self, context: AttemptContext, provisioned: u32) {
        let duration = context.started.elapsed();
        for metrics in self.lock().groups(&context) {
            metrics.succeed(provisioned, duration);
        }
        log::debug!(
            "Provisioning attempt succeeded: cloud={}, strategy={}, label={}, requested={}, \
             provisioned={provisioned}, duration={duration:?}",
            context.cloud,
            context.strategy,
            context.label,
            context.requested
        );
    }

    pub fn record_failure(&self, context: AttemptContext, reason: &str) {
        let duration = context.started.elapsed();
        for metrics in self.lock().groups(&context) {
            metrics.fail(reason, duration);
        }
        log::info!(
            "Provisioning attempt failed: cloud={}, strategy={}, label={}, requested={}, \
             reason={reason}, duration={duration:?}",
            context.cloud,
            context.strategy,
            context.label,
            context.requested
        );
    }

    /// An agent of `cloud_name` with `executors` executors was added `duration` after its launch
    /// was planned.
    pub fn record_node_availability(&self, cloud_name: &str, executors: u32, duration: Duration) {
        let mut state = self.lock();
        state.global.available(executors, duration);
        state
            .clouds
            .entry(cloud_name.to_string())
            .or_default()
            .available(executors, duration);
    }

    pub fn summary(&self) -> MetricsSummary {
        let state = self.lock();
        MetricsSummary {
            global: state.global.clone(),
            clouds: sorted(&state.clouds),
            strategies: sorted(&state.strategies),
            labels: sorted(&state.labels),
        }
    }

    pub fn reset(&self) {
        *self.lock() = MetricsState::default();
        log::info!("Provisioning metrics were reset");
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
