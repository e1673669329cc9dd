//! Windowed health metrics feeding the failure-ratio trip strategy.
//!
//! Buckets are actualised lazily on every increment or read: there is no background eviction.
//! Callers hold the controller lock, so none of these types synchronise internally.

use std::collections::VecDeque;
use std::time::Duration;

use crate::clock::duration_millis;

/// Number of sub-buckets a rolling window is split into.
pub const WINDOW_COUNT: u32 = 10;

/// Successes and failures observed in one time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCount {
    pub successes: u32,
    pub failures: u32,
    /// Start of the bucket, in clock milliseconds.
    pub started_at: u64,
}

impl HealthCount {
    fn starting_at(started_at: u64) -> Self {
        Self { successes: 0, failures: 0, started_at }
    }

    /// Successes plus failures.
    pub fn total(&self) -> u32 {
        self.successes.saturating_add(self.failures)
    }

    /// `failures / total`, or 0 with no traffic.
    pub fn failure_ratio(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => f64::from(self.failures) / f64::from(total),
        }
    }
}

/// One coarse bucket, discarded wholesale once the sampling duration elapses.
#[derive(Debug)]
pub struct SingleWindowMetrics {
    sampling_millis: u64,
    current: Option<HealthCount>,
}

impl SingleWindowMetrics {
    pub fn new(sampling_duration: Duration) -> Self {
        Self { sampling_millis: duration_millis(sampling_duration), current: None }
    }

    fn actualise(&mut self, now: u64) -> &mut HealthCount {
        let sampling = self.sampling_millis;
        let expired = |c: &HealthCount| now.saturating_sub(c.started_at) >= sampling;
        if self.current.as_ref().map_or(true, expired) {
            self.current = Some(HealthCount::starting_at(now));
        }
        self.current.get_or_insert_with(|| HealthCount::starting_at(now))
    }

    pub fn increment_success(&mut self, now: u64) {
        let c = self.actualise(now);
        c.successes = c.successes.saturating_add(1);
    }

    pub fn increment_failure(&mut self, now: u64) {
        let c = self.actualise(now);
        c.failures = c.failures.saturating_add(1);
    }

    pub fn health_count(&mut self, now: u64) -> HealthCount {
        *self.actualise(now)
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// A queue of [`WINDOW_COUNT`] sub-buckets summed on read.
///
/// Sub-buckets older than the sampling duration are evicted, so statistics slide smoothly
/// instead of dropping to zero at a window edge.
#[derive(Debug)]
pub struct RollingWindowMetrics {
    sampling_millis: u64,
    window_millis: u64,
    windows: VecDeque<HealthCount>,
}

impl RollingWindowMetrics {
    pub fn new(sampling_duration: Duration) -> Self {
        let sampling_millis = duration_millis(sampling_duration);
        Self {
            sampling_millis,
            window_millis: (sampling_millis / u64::from(WINDOW_COUNT)).max(1),
            windows: VecDeque::with_capacity(WINDOW_COUNT as usize + 1),
        }
    }

    fn actualise(&mut self, now: u64) {
        let fresh = self
            .windows
            .back()
            .map_or(true, |w| now.saturating_sub(w.started_at) >= self.window_millis);
        if fresh {
            self.windows.push_back(HealthCount::starting_at(now));
        }

        while let Some(front) = self.windows.front() {
            if now.saturating_sub(front.started_at) >= self.sampling_millis {
                self.windows.pop_front();
            } else {
                break;
            }
        }
    }

    fn current(&mut self, now: u64) -> &mut HealthCount {
        self.actualise(now);
        if self.windows.is_empty() {
            self.windows.push_back(HealthCount::starting_at(now));
        }
        let last = self.windows.len() - 1;
        &mut self.windows[last]
    }

    pub fn increment_success(&mut self, now: u64) {
        let w = self.current(now);
        w.successes = w.successes.saturating_add(1);
    }

    pub fn increment_failure(&mut self, now: u64) {
        let w = self.current(now);
        w.failures = w.failures.saturating_add(1);
    }

    pub fn health_count(&mut self, now: u64) -> HealthCount {
        self.actualise(now);
        let started_at = self.windows.front().map_or(now, |w| w.started_at);
        self.windows.iter().fold(HealthCount::starting_at(started_at), |mut acc, w| {
            acc.successes = acc.successes.saturating_add(w.successes);
            acc.failures = acc.failures.saturating_add(w.failures);
            acc
        })
    }

    pub fn reset(&mut self) {
        self.windows.clear();
    }
}

/// Health metrics backing the failure-ratio strategy.
#[derive(Debug)]
pub enum HealthMetrics {
    Single(SingleWindowMetrics),
    Rolling(RollingWindowMetrics),
}

impl HealthMetrics {
    /// Pick the variant for `sampling_duration`.
    ///
    /// Windows shorter than `WINDOW_COUNT` timer ticks cannot be split meaningfully and use a
    /// single bucket.
    pub fn for_sampling(sampling_duration: Duration, timer_resolution: Duration) -> Self {
        if sampling_duration < timer_resolution.saturating_mul(WINDOW_COUNT) {
            Self::Single(SingleWindowMetrics::new(sampling_duration))
        } else {
            Self::Rolling(RollingWindowMetrics::new(sampling_duration))
        }
    }

    pub fn increment_success(&mut self, now: u64) {
        match self {
            Self::Single(m) => m.increment_success(now),
            Self::Rolling(m) => m.increment_success(now),
        }
    }

    pub fn increment_failure(&mut self, now: u64) {
        match self {
            Self::Single(m) => m.increment_failure(now),
            Self::Rolling(m) => m.increment_failure(now),
        }
    }

    pub fn health_count(&mut self, now: u64) -> HealthCount {
        match self {
            Self::Single(m) => m.health_count(now),
            Self::Rolling(m) => m.health_count(now),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::Single(m) => m.reset(),
            Self::Rolling(m) => m.reset(),
        }
    }
}
