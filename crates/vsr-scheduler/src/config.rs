//! Scheduler tuning knobs, read from the environment the way the teacher's services
//! read their own config (`*_from_env()`, falling back to documented defaults).

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Assignment loop's bounded sleep when no wake event arrives.
    pub assignment_poll_secs: u64,
    /// Below this many pending batches, remaining idle workers get duplicates of the
    /// oldest in-flight batch instead of sitting idle.
    pub duplicate_threshold: usize,
    /// Interval between timeout-reaper sweeps.
    pub timeout_poll_secs: u64,
    /// Wall-clock ceiling before an assigned/processing batch is reaped as timed out.
    pub batch_timeout_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            assignment_poll_secs: 1,
            duplicate_threshold: 5,
            timeout_poll_secs: 30,
            batch_timeout_secs: 1800,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            assignment_poll_secs: env_u64("SCHEDULER_ASSIGNMENT_POLL_SECS", default.assignment_poll_secs),
            duplicate_threshold: env_usize("SCHEDULER_DUPLICATE_THRESHOLD", default.duplicate_threshold),
            timeout_poll_secs: env_u64("SCHEDULER_TIMEOUT_POLL_SECS", default.timeout_poll_secs),
            batch_timeout_secs: env_i64("SCHEDULER_BATCH_TIMEOUT_SECS", default.batch_timeout_secs),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
