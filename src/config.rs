//! Configuration surface, validated once at construction time.

use crate::error::{Errno, Error, Result};
use crate::policy::VictimSelectionMethod;
use core::time::Duration;

/// Number of blocks per zone. Fixed for the lifetime of a device in this core.
pub const BLOCKS_PER_ZONE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of conventional (non-zoned) zones. Must be zero; this core only
    /// targets fully zoned devices.
    pub nr_conv_zones: usize,
    /// Percent of total zones reserved as over-provisioning, 0..=100.
    pub op_rate: u8,
    pub class_0_cap: usize,
    pub class_0_optimal: usize,
    pub victim_selection_method: VictimSelectionMethod,
    /// Free-zone percentage at or below which reclaim triggers, 0..=100.
    pub reclaim_limit: u8,
    /// Approximate-CB candidate queue capacity.
    pub q_cap: usize,
    pub idle_period: Duration,
    pub class_0_delta_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nr_conv_zones: 0,
            op_rate: 25,
            class_0_cap: 32,
            class_0_optimal: 16,
            victim_selection_method: VictimSelectionMethod::Greedy,
            reclaim_limit: 20,
            q_cap: 64,
            idle_period: Duration::from_secs(10),
            class_0_delta_period: Duration::from_secs(2),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.nr_conv_zones != 0 {
            return Err(Error::with_msg(
                Errno::InvalidArgs,
                "conventional zones are not supported",
            ));
        }
        if self.op_rate > 100 {
            return Err(Error::with_msg(Errno::InvalidArgs, "op_rate must be 0..=100"));
        }
        if self.reclaim_limit > 100 {
            return Err(Error::with_msg(
                Errno::InvalidArgs,
                "reclaim_limit must be 0..=100",
            ));
        }
        if self.class_0_cap < self.class_0_optimal {
            return Err(Error::with_msg(
                Errno::InvalidArgs,
                "class_0_cap must be >= class_0_optimal",
            ));
        }
        if self.q_cap == 0 {
            return Err(Error::with_msg(Errno::InvalidArgs, "q_cap must be > 0"));
        }
        Ok(())
    }
}
