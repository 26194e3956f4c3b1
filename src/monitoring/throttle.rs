//! CPU quota feedback controller
//!
//! One adjustment per evaluation. A component that saturates its full quota is
//! cut down; any component below its full quota steps back up one rung.

/// Utilization at or above which a sample counts as saturated
pub const SATURATED_UTILIZATION: f64 = 92.0;

/// Share of saturated samples that marks a component as throttling
pub const THROTTLING_SHARE: f64 = 0.8;

/// Current quota as a fraction of the declared CPU, rounded to two decimals.
/// An unlimited container (`nano_cpus == 0`) counts as full quota.
pub fn quota_fraction(nano_cpus: u64, declared_cpu: f64) -> f64 {
    if nano_cpus == 0 || declared_cpu <= 0.0 {
        return 1.0;
    }
    let fraction = nano_cpus as f64 / (declared_cpu * 1e9);
    (fraction * 100.0).round() / 100.0
}

/// Utilization in percent of the current quota
pub fn utilization(cpu_percent: f64, declared_cpu: f64, fraction: f64) -> f64 {
    let quota = declared_cpu * fraction;
    if quota <= 0.0 {
        return 0.0;
    }
    cpu_percent / quota
}

/// Whether most samples saturate the current quota
pub fn is_throttling(cpu_samples: &[f64], declared_cpu: f64, fraction: f64) -> bool {
    if cpu_samples.is_empty() {
        return false;
    }
    let saturated = cpu_samples
        .iter()
        .filter(|cpu| utilization(**cpu, declared_cpu, fraction) >= SATURATED_UTILIZATION)
        .count();
    saturated as f64 >= THROTTLING_SHARE * cpu_samples.len() as f64
}

/// Decide the next quota fraction, or `None` to keep the current one.
///
/// Branches are evaluated in a fixed order: the throttle-down check first, then
/// the step-up rungs 0.85, 0.9, 0.95 and 1.0.
pub fn next_quota(
    cpu_samples: &[f64],
    declared_cpu: f64,
    fraction: f64,
    min_samples: usize,
) -> Option<f64> {
    if cpu_samples.len() < min_samples {
        return None;
    }

    let throttling = is_throttling(cpu_samples, declared_cpu, fraction);
    if throttling && fraction == 1.0 {
        Some(if declared_cpu > 2.0 { 0.8 } else { 0.9 })
    } else if fraction <= 0.8 {
        Some(0.85)
    } else if fraction <= 0.85 {
        Some(0.9)
    } else if fraction <= 0.9 {
        Some(0.95)
    } else if fraction < 1.0 {
        Some(1.0)
    } else {
        None
    }
}

/// Nano-CPUs for `fraction` of the declared CPU
pub fn nano_cpus_for(declared_cpu: f64, fraction: f64) -> u64 {
    (declared_cpu * fraction * 1e9).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturated_full_quota_is_cut() {
        // 2.9 of 3 cores is ~96.7% of the quota
        let samples = vec![290.0; 5];
        assert_eq!(next_quota(&samples, 3.0, 1.0, 5), Some(0.8));
        assert_eq!(nano_cpus_for(3.0, 0.8), 2_400_000_000);

        let small = vec![95.0; 5];
        assert_eq!(next_quota(&small, 1.0, 1.0, 5), Some(0.9));
    }

    #[test]
    fn test_too_few_samples() {
        assert_eq!(next_quota(&[290.0; 4], 3.0, 1.0, 5), None);
    }

    #[test]
    fn test_idle_full_quota_is_kept() {
        assert_eq!(next_quota(&[10.0; 6], 3.0, 1.0, 5), None);
    }

    #[test]
    fn test_step_up_rungs() {
        let idle = [10.0; 5];
        assert_eq!(next_quota(&idle, 3.0, 0.8, 5), Some(0.85));
        assert_eq!(next_quota(&idle, 3.0, 0.85, 5), Some(0.9));
        assert_eq!(next_quota(&idle, 3.0, 0.9, 5), Some(0.95));
        assert_eq!(next_quota(&idle, 3.0, 0.95, 5), Some(1.0));
    }

    #[test]
    fn test_throttling_below_full_quota_still_steps_up() {
        // 2.3 of 2.4 cores saturates the reduced quota, yet the rung is climbed
        let samples = [230.0; 5];
        assert!(is_throttling(&samples, 3.0, 0.8));
        assert_eq!(next_quota(&samples, 3.0, 0.8, 5), Some(0.85));
    }

    #[test]
    fn test_throttling_share() {
        // 4 of 5 saturated samples is exactly 80%
        let samples = [290.0, 290.0, 290.0, 290.0, 10.0];
        assert!(is_throttling(&samples, 3.0, 1.0));
        let samples = [290.0, 290.0, 290.0, 10.0, 10.0];
        assert!(!is_throttling(&samples, 3.0, 1.0));
    }

    #[test]
    fn test_quota_fraction() {
        assert_eq!(quota_fraction(0, 3.0), 1.0);
        assert_eq!(quota_fraction(2_400_000_000, 3.0), 0.8);
        assert_eq!(quota_fraction(2_850_000_000, 3.0), 0.95);
        assert_eq!(quota_fraction(3_000_000_000, 3.0), 1.0);
    }
}
