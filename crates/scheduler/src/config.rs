use std::time::Duration;

use docbatch_core::estimation::DEFAULT_ESTIMATED_UNIT_MS;

/// Scheduler tuning. Loaded from the environment by the server binary.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Size of the global concurrency gate.
    pub max_concurrency: usize,
    /// Retries per unit when a task does not set its own.
    pub default_max_retries: u32,
    /// Delay before the first retry; doubles per retry.
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Emit progress after this many settled units...
    pub progress_every_units: u64,
    /// ...or once this much time has passed since the last emission.
    pub progress_interval: Duration,
    /// Per-document duration assumed for up-front estimates.
    pub estimated_unit_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            default_max_retries: 3,
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_millis(5000),
            progress_every_units: 10,
            progress_interval: Duration::from_millis(500),
            estimated_unit_ms: DEFAULT_ESTIMATED_UNIT_MS,
        }
    }
}
