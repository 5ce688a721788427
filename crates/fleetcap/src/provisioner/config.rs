use std::time::Duration;

/// Tuning of the provisioning control loop and the standard strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionerConfig {
    /// Delay before the first evaluation cycle.
    pub initial_delay: Duration,
    /// Period of evaluation cycles.
    pub recurrence: Duration,
    /// Margin that the threshold margin converges to for large fleets, in (0, 1).
    pub margin: f32,
    /// Threshold margin of an empty fleet. Never smaller than `margin`.
    pub margin0: f32,
    /// How fast the threshold margin converges from `margin0` to `margin`.
    pub margin_decay: f32,
    /// Decay of the exponential moving averages of load statistics.
    pub load_decay: f32,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(100),
            recurrence: Duration::from_secs(10),
            margin: 0.1,
            margin0: 0.5,
            margin_decay: 0.5,
            load_decay: 0.9,
        }
    }
}

impl ProvisionerConfig {
    /// Default configuration overridden by `FLEETCAP_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars<F: Fn(&str) -> Option<String>>(var: F) -> Self {
        let default = Self::default();
        let duration = |key: &str| {
            var(key)
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        let float = |key: &str| var(key).and_then(|value| value.parse::<f32>().ok());

        // Given in percent
        let margin = var("FLEETCAP_PROVISIONER_MARGIN")
            .and_then(|value| value.parse::<u32>().ok())
            .map(|percent| percent as f32 / 100.0)
            .unwrap_or(default.margin);
        let margin0 = float("FLEETCAP_PROVISIONER_MARGIN0")
            .unwrap_or(default.margin0)
            .max(margin);

        Self {
            initial_delay: duration("FLEETCAP_PROVISIONER_INITIAL_DELAY_MS")
                .unwrap_or(default.initial_delay),
            recurrence: duration("FLEETCAP_PROVISIONER_RECURRENCE_MS")
                .unwrap_or(default.recurrence),
            margin,
            margin0,
            margin_decay: float("FLEETCAP_PROVISIONER_MARGIN_DECAY")
                .unwrap_or(default.margin_decay),
            load_decay: float("FLEETCAP_LOAD_DECAY").unwrap_or(default.load_decay),
        }
    }

    /// Margin `M(t) = margin + (margin0 - margin) * margin_decay^t` for a fleet of
    /// `total_executors`, clamped to [0, 1].
    ///
    /// Excess workload above `1 - M(t)` is rounded up to a whole executor. The margin is large for
    /// small fleets, where waiting for an executor to become free is pointless.
    pub fn threshold_margin(&self, total_executors: u32) -> f32 {
        let margin0 = self.margin0.max(self.margin);
        let exponent = i32::try_from(total_executors).unwrap_or(i32::MAX);
        let m = self.margin + (margin0 - self.margin) * self.margin_decay.powi(exponent);
        m.clamp(0.0, 1.0)
    }
}
