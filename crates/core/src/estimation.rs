//! Duration estimates for batch tasks.

use crate::task::GenerationMode;

/// Default per-document duration used before any unit has been observed.
pub const DEFAULT_ESTIMATED_UNIT_MS: u64 = 2000;

/// Number of units that may run at once for a task.
///
/// Sequential tasks run one unit at a time. Parallel tasks are bounded by both
/// their own cap and the global gate size.
pub fn effective_concurrency(
    mode: GenerationMode,
    task_concurrency: Option<usize>,
    gate_size: usize,
) -> usize {
    match mode {
        GenerationMode::Sequential => 1,
        GenerationMode::Parallel => task_concurrency
            .unwrap_or(gate_size)
            .min(gate_size)
            .max(1),
    }
}

/// Up-front estimate: `ceil(total / concurrency) * unit_ms`.
pub fn estimate_duration_ms(total_units: u64, concurrency: usize, unit_ms: u64) -> u64 {
    let concurrency = concurrency.max(1) as u64;
    total_units.div_ceil(concurrency).saturating_mul(unit_ms)
}

/// Remaining-time estimate from the rate observed during the current run.
///
/// Returns `None` until at least one unit has settled in this run.
pub fn remaining_ms(settled_this_run: u64, elapsed_ms: u64, remaining_units: u64) -> Option<u64> {
    if settled_this_run == 0 {
        return None;
    }
    let per_unit = elapsed_ms as f64 / settled_this_run as f64;
    Some((per_unit * remaining_units as f64).round() as u64)
}
