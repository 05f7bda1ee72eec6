//! Configuration knobs
//!
//! Plain structs with `Default` impls and builder-style setters. These are
//! deliberately small: one struct per concern, owned by the component that
//! reads it.

use std::time::Duration;

/// Hard caps enforced by the dataflow scheduler
///
/// The scheduler runs operators until quiescence. Pathological graphs
/// (a fixpoint that never converges, an operator that keeps producing) are
/// bounded by two caps; exceeding either logs a warning and truncates,
/// keeping best-effort results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerLimits {
    /// Total operator steps allowed per `run()`
    pub max_steps: usize,
    /// Consecutive steps without any message being produced before the run
    /// is declared stuck
    pub max_idle_steps: usize,
    /// Iterations allowed inside a single `iterate` fixpoint
    pub max_fixpoint_iterations: usize,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        SchedulerLimits {
            max_steps: 100_000,
            max_idle_steps: 10_000,
            max_fixpoint_iterations: 1_000,
        }
    }
}

impl SchedulerLimits {
    /// Override the total step cap
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Override the idle step cap
    pub fn with_max_idle_steps(mut self, max_idle_steps: usize) -> Self {
        self.max_idle_steps = max_idle_steps;
        self
    }

    /// Override the fixpoint iteration budget
    pub fn with_max_fixpoint_iterations(mut self, iterations: usize) -> Self {
        self.max_fixpoint_iterations = iterations;
        self
    }
}

/// Garbage-collection policy for idle collections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcConfig {
    /// How long a collection stays alive after its last subscriber
    /// unsubscribes before cleanup is scheduled
    pub idle_timeout: Duration,
    /// Disable GC entirely (the collection stays live until an explicit
    /// `cleanup()`)
    pub disabled: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            idle_timeout: Duration::from_secs(300),
            disabled: false,
        }
    }
}

impl GcConfig {
    /// Override the idle window
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Turn GC off
    pub fn disabled() -> Self {
        GcConfig {
            disabled: true,
            ..Default::default()
        }
    }
}

/// Thresholds for the dev-mode index advisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvisorConfig {
    /// Collections below this size never trigger suggestions
    pub min_collection_size: usize,
    /// Full scans of the same unindexed expression before a suggestion is
    /// emitted
    pub scan_threshold: usize,
    /// Master switch; off by default in release-style usage
    pub enabled: bool,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        AdvisorConfig {
            min_collection_size: 1_000,
            scan_threshold: 10,
            enabled: cfg!(debug_assertions),
        }
    }
}

impl AdvisorConfig {
    /// Override the minimum collection size
    pub fn with_min_collection_size(mut self, size: usize) -> Self {
        self.min_collection_size = size;
        self
    }

    /// Override the scan threshold
    pub fn with_scan_threshold(mut self, scans: usize) -> Self {
        self.scan_threshold = scans;
        self
    }

    /// Force the advisor on or off
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
