use super::cb::{cb_value, CB_SCALE_FACTOR};
use super::{Victim, VictimPolicy};
use crate::zone::{now_millis, ZoneCondition, ZoneId, ZoneTable};
use hashbrown::{HashMap, HashSet};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Predicted instant (ms since epoch) at which a zone's cost-benefit value
/// will cross `threshold_cb`, per the reclaim formula this policy is
/// grounded on: `threshold * 2 * valid / (invalid * K) + age`, guarding the
/// all-invalid case by dropping the `2 * valid` factor.
fn shift_time(invalid: usize, valid: usize, age: u64, threshold_cb: f64) -> u64 {
    let delta = if invalid == 0 {
        0.0
    } else if valid == 0 {
        threshold_cb / CB_SCALE_FACTOR
    } else {
        threshold_cb * 2.0 * valid as f64 / (invalid as f64 * CB_SCALE_FACTOR)
    };
    age + delta as u64
}

struct State {
    class0: HashSet<ZoneId>,
    // (shift_time, zone_id) -> (); zone_id breaks ties so two zones can share
    // a shift_time without colliding in the tree.
    class1: BTreeMap<(u64, ZoneId), ()>,
    zone_shift_time: HashMap<ZoneId, u64>,
    threshold_cb: f64,
}

/// Two-class cost-benefit policy: `class0` holds zones whose CB already
/// exceeds the dynamic threshold (cheap to pick from); `class1` holds the
/// rest, ordered by predicted `shift_time` so zones about to become
/// profitable can be promoted without a full rescan.
pub struct FastCbVictimPolicy {
    class_0_cap: usize,
    class_0_optimal: usize,
    grace_period_ms: u64,
    state: Mutex<State>,
}

impl FastCbVictimPolicy {
    pub fn new(class_0_cap: usize, class_0_optimal: usize, grace_period: std::time::Duration) -> Self {
        Self {
            class_0_cap,
            class_0_optimal,
            grace_period_ms: grace_period.as_millis() as u64,
            state: Mutex::new(State {
                class0: HashSet::new(),
                class1: BTreeMap::new(),
                zone_shift_time: HashMap::new(),
                threshold_cb: CB_SCALE_FACTOR * 15.0,
            }),
        }
    }

    fn insert_class1(state: &mut State, zone_id: ZoneId, shift: u64) {
        state.class1.insert((shift, zone_id), ());
        state.zone_shift_time.insert(zone_id, shift);
    }

    fn remove_class1(state: &mut State, zone_id: ZoneId) {
        if let Some(shift) = state.zone_shift_time.remove(&zone_id) {
            state.class1.remove(&(shift, zone_id));
        }
    }

    /// Recompute CB for every FULL zone, pick the `(Z - class_0_optimal)`-th
    /// largest as the new threshold, and redistribute membership.
    fn adjust_threshold(&self, zones: &ZoneTable, state: &mut State) {
        let blocks_per_zone = zones.blocks_per_zone();
        let now = now_millis();
        let mut cbs: Vec<(ZoneId, f64)> = zones
            .iter()
            .filter(|z| z.cond() == ZoneCondition::Full)
            .map(|z| (z.id(), cb_value(z, now, blocks_per_zone)))
            .collect();
        if cbs.is_empty() {
            return;
        }
        cbs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        let idx = self.class_0_optimal.min(cbs.len()) .saturating_sub(1);
        state.threshold_cb = cbs[idx].1;

        state.class0.clear();
        state.class1.clear();
        state.zone_shift_time.clear();
        for (zone_id, cb) in cbs {
            if cb > state.threshold_cb {
                state.class0.insert(zone_id);
            } else {
                let zone = zones.get(zone_id);
                let invalid = zone.invalid_count();
                let valid = blocks_per_zone - invalid;
                let shift = shift_time(invalid, valid, zone.age(), state.threshold_cb);
                Self::insert_class1(state, zone_id, shift);
            }
        }
    }
}

impl VictimPolicy for FastCbVictimPolicy {
    fn pick_victim(&self, zones: &ZoneTable, _threshold: f64) -> Option<Victim> {
        let mut state = self.state.lock().unwrap();
        let now = now_millis();

        let due: Vec<ZoneId> = state
            .class1
            .range(..=(now, ZoneId::MAX))
            .map(|(&(_, zone_id), _)| zone_id)
            .collect();
        for zone_id in due {
            Self::remove_class1(&mut state, zone_id);
            state.class0.insert(zone_id);
        }

        if state.class0.len() > self.class_0_cap || state.class0.len() < self.class_0_optimal {
            self.adjust_threshold(zones, &mut state);
        }

        let blocks_per_zone = zones.blocks_per_zone();
        state
            .class0
            .iter()
            .filter(|&&zone_id| zones.get(zone_id).invalid_count() > 0)
            .max_by(|&&a, &&b| {
                let ca = cb_value(zones.get(a), now, blocks_per_zone);
                let cb = cb_value(zones.get(b), now, blocks_per_zone);
                ca.partial_cmp(&cb).unwrap()
            })
            .copied()
            .map(|zone_id| Victim { zone_id })
    }

    fn on_zone_full(&self, zones: &ZoneTable, zone_id: ZoneId) {
        let mut state = self.state.lock().unwrap();
        let now = now_millis();
        let blocks_per_zone = zones.blocks_per_zone();
        let zone = zones.get(zone_id);
        let cb = cb_value(zone, now, blocks_per_zone);
        if cb > state.threshold_cb {
            state.class0.insert(zone_id);
        } else {
            let invalid = zone.invalid_count();
            let valid = blocks_per_zone - invalid;
            let shift = shift_time(invalid, valid, zone.age(), state.threshold_cb);
            Self::insert_class1(&mut state, zone_id, shift);
        }
    }

    fn on_invalidate(&self, zones: &ZoneTable, zone_id: ZoneId) {
        let mut state = self.state.lock().unwrap();
        if state.class0.contains(&zone_id) {
            // A grace window protects newly class-0 zones from immediately
            // being recomputed back down on every single invalidation.
            return;
        }
        let now = now_millis();
        let blocks_per_zone = zones.blocks_per_zone();
        let zone = zones.get(zone_id);
        if now.saturating_sub(zone.age()) < self.grace_period_ms {
            return;
        }
        let invalid = zone.invalid_count();
        let valid = blocks_per_zone - invalid;
        let shift = shift_time(invalid, valid, zone.age(), state.threshold_cb);
        Self::remove_class1(&mut state, zone_id);
        Self::insert_class1(&mut state, zone_id, shift);
    }

    fn on_zone_reset(&self, zone_id: ZoneId) {
        let mut state = self.state.lock().unwrap();
        state.class0.remove(&zone_id);
        Self::remove_class1(&mut state, zone_id);
    }
}
