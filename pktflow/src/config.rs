use crate::error::{Error, Result};
use crate::ring::MAX_BURST_SIZE;

/// Runtime configuration, consumed by [`GraphBuilder::new`](crate::GraphBuilder::new).
///
/// Every field has a tested default; construct with struct-update syntax:
///
/// ```
/// use pktflow::Config;
///
/// let config = Config {
///     cpu_cores: 4,
///     disable_scheduler: true,
///     ..Config::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of CPU cores available to the scheduler for placing stages and
    /// their clones. Cores `0..cpu_cores` are used; core 0 runs the
    /// scheduler itself. `0` means host parallelism.
    pub cpu_cores: usize,
    /// Skip the control loop entirely; stages keep their initial replicas.
    pub disable_scheduler: bool,
    /// Never retire previously cloned stage replicas.
    pub persistent_clones: bool,
    /// Give the stop drain a dedicated CPU core instead of sharing the
    /// scheduler's core.
    pub stop_on_dedicated_core: bool,
    /// Leave IPv4/UDP/TCP checksum computation to the NIC. Applications that
    /// rewrite packets often should enable this and only prepare
    /// pseudo-header sums in software.
    pub hw_tx_checksum: bool,
    /// Buffers per mempool. One mempool is created per generator or reader
    /// stage.
    pub mempool_size: usize,
    /// Advisory per-core mempool cache size.
    pub mempool_cache: usize,
    /// Ring capacity is `burst_size * ring_size_multiplier` and must come out
    /// a power of two.
    pub ring_size_multiplier: usize,
    /// Replica sampling tick in milliseconds.
    pub schedule_period_ms: u64,
    /// Buffers moved per enqueue/dequeue. The default is tested for
    /// performance and not recommended to change.
    pub burst_size: usize,
    /// Period between scheduler control decisions, in milliseconds. Must not
    /// be shorter than `schedule_period_ms`.
    pub check_period_ms: u64,
    /// Period between statistics reports, in milliseconds.
    pub debug_period_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cpu_cores: 0,
            disable_scheduler: false,
            persistent_clones: false,
            stop_on_dedicated_core: false,
            hw_tx_checksum: false,
            mempool_size: 4 * 8191,
            mempool_cache: 250,
            ring_size_multiplier: 256,
            schedule_period_ms: 1500,
            burst_size: 32,
            check_period_ms: 10_000,
            debug_period_ms: 1000,
        }
    }
}

impl Config {
    /// Resolved core count (`cpu_cores`, or host parallelism when zero).
    pub fn cores(&self) -> usize {
        if self.cpu_cores != 0 {
            self.cpu_cores
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Capacity of every inter-stage ring.
    pub fn ring_capacity(&self) -> usize {
        self.burst_size * self.ring_size_multiplier
    }

    /// Input-queue occupancy above which a queue-fed stage wants another
    /// replica (the ring is approximately 80% full).
    pub fn max_outstanding_for_clone(&self) -> usize {
        self.ring_capacity() * 4 / 5
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.burst_size == 0 || self.burst_size > MAX_BURST_SIZE {
            return Err(Error::InvalidConfig("burst_size must be in 1..=MAX_BURST_SIZE"));
        }
        if !self.ring_capacity().is_power_of_two() {
            return Err(Error::InvalidConfig(
                "burst_size * ring_size_multiplier must be a power of two",
            ));
        }
        if self.mempool_size == 0 {
            return Err(Error::InvalidConfig("mempool_size must be positive"));
        }
        if self.schedule_period_ms == 0 || self.debug_period_ms == 0 {
            return Err(Error::InvalidConfig("periods must be positive"));
        }
        if self.check_period_ms < self.schedule_period_ms {
            return Err(Error::InvalidConfig(
                "check_period_ms must not be shorter than schedule_period_ms",
            ));
        }
        if self.cores() < 2 {
            return Err(Error::InvalidConfig(
                "at least two CPU cores are required (scheduler plus one stage)",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config {
            cpu_cores: 8,
            ..Config::default()
        };
        config.validate().unwrap();
        assert_eq!(config.ring_capacity(), 8192);
        assert_eq!(config.max_outstanding_for_clone(), 6553);
    }

    #[test]
    fn test_ring_capacity_must_be_power_of_two() {
        let config = Config {
            cpu_cores: 8,
            ring_size_multiplier: 100,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_check_period_not_below_schedule_period() {
        let config = Config {
            cpu_cores: 8,
            schedule_period_ms: 500,
            check_period_ms: 100,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
