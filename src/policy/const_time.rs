use super::cb::cb_value;
use super::{Victim, VictimPolicy};
use crate::zone::{now_millis, ZoneCondition, ZoneId, ZoneTable};
use hashbrown::HashSet;
use std::sync::Mutex;

/// A FULL zone lives in `buckets[zone.invalid_count()]`; moving a zone
/// between buckets as it accumulates invalid blocks is O(1), and scanning
/// from the top bucket down gives victim selection bounded by the number of
/// buckets rather than the number of zones.
struct Buckets {
    buckets: Vec<HashSet<ZoneId>>,
    zone_bucket: hashbrown::HashMap<ZoneId, usize>,
}

impl Buckets {
    fn new(blocks_per_zone: usize) -> Self {
        Self {
            buckets: (0..=blocks_per_zone).map(|_| HashSet::new()).collect(),
            zone_bucket: hashbrown::HashMap::new(),
        }
    }

    fn insert(&mut self, zone_id: ZoneId, invalid_count: usize) {
        self.remove(zone_id);
        self.buckets[invalid_count].insert(zone_id);
        self.zone_bucket.insert(zone_id, invalid_count);
    }

    fn remove(&mut self, zone_id: ZoneId) {
        if let Some(idx) = self.zone_bucket.remove(&zone_id) {
            self.buckets[idx].remove(&zone_id);
        }
    }
}

pub struct ConstGreedyVictimPolicy {
    state: Mutex<Option<Buckets>>,
}

impl ConstGreedyVictimPolicy {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    fn ensure_init(state: &mut Option<Buckets>, blocks_per_zone: usize) -> &mut Buckets {
        state.get_or_insert_with(|| Buckets::new(blocks_per_zone))
    }
}

impl Default for ConstGreedyVictimPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl VictimPolicy for ConstGreedyVictimPolicy {
    fn pick_victim(&self, zones: &ZoneTable, _threshold: f64) -> Option<Victim> {
        let mut guard = self.state.lock().unwrap();
        let buckets = Self::ensure_init(&mut guard, zones.blocks_per_zone());
        // Walk buckets top-down; no eligibility threshold, matching
        // `dmzap_const_greedy_victim_selection`. Bucket 0 holds zones with no
        // invalid blocks, so stop one short of it.
        for invalid_count in (1..buckets.buckets.len()).rev() {
            if let Some(&zone_id) = buckets.buckets[invalid_count].iter().next() {
                return Some(Victim { zone_id });
            }
        }
        None
    }

    fn on_zone_full(&self, zones: &ZoneTable, zone_id: ZoneId) {
        let mut guard = self.state.lock().unwrap();
        let buckets = Self::ensure_init(&mut guard, zones.blocks_per_zone());
        buckets.insert(zone_id, zones.get(zone_id).invalid_count());
    }

    fn on_invalidate(&self, zones: &ZoneTable, zone_id: ZoneId) {
        if zones.get(zone_id).cond() != ZoneCondition::Full {
            return;
        }
        let mut guard = self.state.lock().unwrap();
        let buckets = Self::ensure_init(&mut guard, zones.blocks_per_zone());
        buckets.insert(zone_id, zones.get(zone_id).invalid_count());
    }

    fn on_zone_reset(&self, zone_id: ZoneId) {
        if let Some(buckets) = self.state.lock().unwrap().as_mut() {
            buckets.remove(zone_id);
        }
    }
}

/// Same bucket index as [`ConstGreedyVictimPolicy`], but scans only the top
/// quarter of buckets and picks the member with the highest cost-benefit
/// value among them — a deliberate bounded-scan approximation, trading
/// victim optimality for a tighter time bound.
pub struct ConstCbVictimPolicy {
    state: Mutex<Option<Buckets>>,
}

impl ConstCbVictimPolicy {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }
}

impl Default for ConstCbVictimPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl VictimPolicy for ConstCbVictimPolicy {
    fn pick_victim(&self, zones: &ZoneTable, _threshold: f64) -> Option<Victim> {
        let mut guard = self.state.lock().unwrap();
        let buckets = guard.get_or_insert_with(|| Buckets::new(zones.blocks_per_zone()));
        let blocks_per_zone = zones.blocks_per_zone();
        let top_quarter_start = buckets.buckets.len() - buckets.buckets.len() / 4;
        let now = now_millis();

        let mut best: Option<(ZoneId, f64)> = None;
        for bucket in &buckets.buckets[top_quarter_start..] {
            for &zone_id in bucket {
                let cb = cb_value(zones.get(zone_id), now, blocks_per_zone);
                if best.map_or(true, |(_, best_cb)| cb > best_cb) {
                    best = Some((zone_id, cb));
                }
            }
        }
        best.map(|(zone_id, _)| Victim { zone_id })
    }

    fn on_zone_full(&self, zones: &ZoneTable, zone_id: ZoneId) {
        let mut guard = self.state.lock().unwrap();
        let buckets = guard.get_or_insert_with(|| Buckets::new(zones.blocks_per_zone()));
        buckets.insert(zone_id, zones.get(zone_id).invalid_count());
    }

    fn on_invalidate(&self, zones: &ZoneTable, zone_id: ZoneId) {
        if zones.get(zone_id).cond() != ZoneCondition::Full {
            return;
        }
        let mut guard = self.state.lock().unwrap();
        let buckets = guard.get_or_insert_with(|| Buckets::new(zones.blocks_per_zone()));
        buckets.insert(zone_id, zones.get(zone_id).invalid_count());
    }

    fn on_zone_reset(&self, zone_id: ZoneId) {
        if let Some(buckets) = self.state.lock().unwrap().as_mut() {
            buckets.remove(zone_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_greedy_picks_from_highest_nonempty_bucket() {
        let t = ZoneTable::new(4, 8, 8);
        let policy = ConstGreedyVictimPolicy::new();
        t.advance_wp(8 * 8).unwrap();
        t.get(0).mark_invalid(2);
        policy.on_zone_full(&t, 0);
        t.advance_wp(8 * 8).unwrap();
        t.get(1).mark_invalid(6);
        policy.on_zone_full(&t, 1);

        let victim = policy.pick_victim(&t, 0.0).unwrap();
        assert_eq!(victim.zone_id, 1);
    }

    #[test]
    fn invalidate_after_full_moves_zone_between_buckets() {
        let t = ZoneTable::new(2, 8, 8);
        let policy = ConstGreedyVictimPolicy::new();
        t.advance_wp(8 * 8).unwrap();
        t.get(0).mark_invalid(1);
        policy.on_zone_full(&t, 0);
        t.get(0).mark_invalid(3);
        policy.on_invalidate(&t, 0);
        let victim = policy.pick_victim(&t, 0.0).unwrap();
        assert_eq!(victim.zone_id, 0);
    }

    #[test]
    fn reset_evicts_zone_from_its_bucket() {
        let t = ZoneTable::new(2, 8, 8);
        let policy = ConstGreedyVictimPolicy::new();
        t.advance_wp(8 * 8).unwrap();
        t.get(0).mark_invalid(4);
        policy.on_zone_full(&t, 0);
        policy.on_zone_reset(0);
        assert!(policy.pick_victim(&t, 0.0).is_none());
    }
}
