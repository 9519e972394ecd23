//! Pluggable victim-selection policies.
//!
//! Each policy implements [`VictimPolicy`] against the shared [`ZoneTable`];
//! stateless policies (Greedy, CB) recompute everything from zone fields on
//! every call, the rest maintain their own index alongside the zone table and
//! keep it current through the `on_zone_full`/`on_invalidate`/`on_zone_reset`
//! hooks the disk calls at the matching points in the write and reclaim
//! paths.

mod approx_cb;
mod cb;
mod const_time;
mod fagc_plus;
mod fast_cb;
mod fegc;
mod greedy;
mod heap;

pub use approx_cb::ApproxCbVictimPolicy;
pub use cb::{cb_value, CbVictimPolicy, CB_SCALE_FACTOR};
pub use const_time::{ConstCbVictimPolicy, ConstGreedyVictimPolicy};
pub use fagc_plus::FaGcPlusVictimPolicy;
pub use fast_cb::FastCbVictimPolicy;
pub use fegc::FeGcVictimPolicy;
pub use greedy::GreedyVictimPolicy;

use crate::config::Config;
use crate::zone::{ZoneId, ZoneTable};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Victim {
    pub zone_id: ZoneId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VictimSelectionMethod {
    Greedy,
    Cb,
    FastCb,
    ApproxCb,
    ConstGreedy,
    ConstCb,
    FeGc,
    FaGcPlus,
}

/// A zone became full and must be registered with whatever index this policy
/// maintains; a zone had a block invalidated and the same index may need to
/// move it; a zone was reset by reclaim and must be evicted from the index.
/// Stateless policies (Greedy, CB) use the default no-op implementations.
pub trait VictimPolicy: Send + Sync {
    fn pick_victim(&self, zones: &ZoneTable, threshold: f64) -> Option<Victim>;

    fn on_zone_full(&self, _zones: &ZoneTable, _zone_id: ZoneId) {}
    fn on_invalidate(&self, _zones: &ZoneTable, _zone_id: ZoneId) {}
    fn on_zone_reset(&self, _zone_id: ZoneId) {}
}

pub type VictimPolicyRef = Arc<dyn VictimPolicy>;

pub fn new_policy(method: VictimSelectionMethod, config: &Config) -> VictimPolicyRef {
    match method {
        VictimSelectionMethod::Greedy => Arc::new(GreedyVictimPolicy {}),
        VictimSelectionMethod::Cb => Arc::new(CbVictimPolicy {}),
        VictimSelectionMethod::FastCb => Arc::new(FastCbVictimPolicy::new(
            config.class_0_cap,
            config.class_0_optimal,
            config.class_0_delta_period,
        )),
        VictimSelectionMethod::ApproxCb => Arc::new(ApproxCbVictimPolicy::new(config.q_cap)),
        VictimSelectionMethod::ConstGreedy => Arc::new(ConstGreedyVictimPolicy::new()),
        VictimSelectionMethod::ConstCb => Arc::new(ConstCbVictimPolicy::new()),
        VictimSelectionMethod::FeGc => Arc::new(FeGcVictimPolicy::new()),
        VictimSelectionMethod::FaGcPlus => Arc::new(FaGcPlusVictimPolicy::new()),
    }
}
