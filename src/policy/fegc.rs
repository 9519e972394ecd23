use super::heap::{keyed_key_of, keyed_set_pos, BackpointerHeap, KeyedItem};
use super::{Victim, VictimPolicy};
use crate::zone::{now_millis, ZoneId, ZoneTable};
use std::sync::Mutex;

/// One max-heap per invalid-block count. A FULL zone lives in
/// `heaps[zone.invalid_count()]`, keyed by `cps` — the write-number-based
/// aging accumulator (see the module-level note on `cwa`/`cps` in the crate
/// root). Selection peeks every bucket's root and keeps the global max,
/// bounding the scan by the number of buckets rather than the number of
/// zones.
pub struct FeGcVictimPolicy {
    state: Mutex<Option<State>>,
}

struct State {
    heaps: Vec<BackpointerHeap<KeyedItem>>,
    items: hashbrown::HashMap<ZoneId, KeyedItem>,
    last_update_ms: hashbrown::HashMap<ZoneId, u64>,
}

impl FeGcVictimPolicy {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    fn ensure_init(state: &mut Option<State>, blocks_per_zone: usize) -> &mut State {
        state.get_or_insert_with(|| State {
            heaps: (0..=blocks_per_zone).map(|_| BackpointerHeap::new()).collect(),
            items: hashbrown::HashMap::new(),
            last_update_ms: hashbrown::HashMap::new(),
        })
    }

    fn remove_from_current_bucket(state: &mut State, zone_id: ZoneId, invalid_count: usize) {
        if let Some(item) = state.items.remove(&zone_id) {
            let pos = item.pos.load(std::sync::atomic::Ordering::Acquire);
            if pos >= 1 {
                state.heaps[invalid_count].remove_at(pos as usize, keyed_key_of, keyed_set_pos);
            }
        }
    }
}

impl Default for FeGcVictimPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl VictimPolicy for FeGcVictimPolicy {
    fn pick_victim(&self, zones: &ZoneTable, _threshold: f64) -> Option<Victim> {
        let mut guard = self.state.lock().unwrap();
        let state = Self::ensure_init(&mut guard, zones.blocks_per_zone());
        let mut best: Option<(ZoneId, i64)> = None;
        for heap in state.heaps.iter().rev() {
            if let Some(item) = heap.peek_max() {
                let key = keyed_key_of(item);
                if best.map_or(true, |(_, best_key)| key > best_key) {
                    best = Some((item.zone_id, key));
                }
            }
        }
        let (zone_id, _) = best?;
        let invalid_count = zones.get(zone_id).invalid_count();
        Self::remove_from_current_bucket(state, zone_id, invalid_count);
        Some(Victim { zone_id })
    }

    fn on_zone_full(&self, zones: &ZoneTable, zone_id: ZoneId) {
        let mut guard = self.state.lock().unwrap();
        let state = Self::ensure_init(&mut guard, zones.blocks_per_zone());
        let invalid_count = zones.get(zone_id).invalid_count();
        let item = KeyedItem::new(zone_id, 0);
        state.heaps[invalid_count].insert(item.clone(), keyed_key_of, keyed_set_pos);
        state.items.insert(zone_id, item);
        state.last_update_ms.insert(zone_id, now_millis());
    }

    fn on_invalidate(&self, zones: &ZoneTable, zone_id: ZoneId) {
        let mut guard = self.state.lock().unwrap();
        let state = Self::ensure_init(&mut guard, zones.blocks_per_zone());
        let Some(&last) = state.last_update_ms.get(&zone_id) else {
            return;
        };
        let now = now_millis();
        let delta = now.saturating_sub(last) as i64;
        state.last_update_ms.insert(zone_id, now);

        let old_key = state.items.get(&zone_id).map(keyed_key_of).unwrap_or(0);

        let old_invalid_count = zones.get(zone_id).invalid_count() - 1;
        Self::remove_from_current_bucket(state, zone_id, old_invalid_count);

        let new_invalid_count = old_invalid_count + 1;
        let new_key = old_key + delta;
        let item = KeyedItem::new(zone_id, new_key);
        state.heaps[new_invalid_count].insert(item.clone(), keyed_key_of, keyed_set_pos);
        state.items.insert(zone_id, item);
    }

    fn on_zone_reset(&self, zone_id: ZoneId) {
        let mut guard = self.state.lock().unwrap();
        if let Some(state) = guard.as_mut() {
            if state.items.contains_key(&zone_id) {
                // invalid_count was already reset to 0 by the caller; the
                // bucket the item actually lives in is unknown without a
                // second map, so scan is bounded by bucket count, not zones.
                for heap in state.heaps.iter_mut() {
                    let found = heap.iter().any(|it| it.zone_id == zone_id);
                    if found {
                        let item = state.items.get(&zone_id).unwrap();
                        let pos = item.pos.load(std::sync::atomic::Ordering::Acquire);
                        heap.remove_at(pos as usize, keyed_key_of, keyed_set_pos);
                        break;
                    }
                }
                state.items.remove(&zone_id);
                state.last_update_ms.remove(&zone_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_from_highest_invalid_count_bucket() {
        let t = ZoneTable::new(4, 8, 8);
        let policy = FeGcVictimPolicy::new();
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
    fn repeated_invalidation_accumulates_the_key_instead_of_overwriting() {
        let t = ZoneTable::new(2, 8, 8);
        let policy = FeGcVictimPolicy::new();
        t.advance_wp(8 * 8).unwrap();
        t.get(0).mark_invalid(1);
        policy.on_zone_full(&t, 0);

        // Force a large, known first delta.
        {
            let mut guard = policy.state.lock().unwrap();
            guard.as_mut().unwrap().last_update_ms.insert(0, 0);
        }
        t.get(0).mark_invalid(1);
        policy.on_invalidate(&t, 0);
        let key_after_first = {
            let guard = policy.state.lock().unwrap();
            keyed_key_of(guard.as_ref().unwrap().items.get(&0).unwrap())
        };
        assert!(key_after_first > 0);

        // A second invalidation with a near-zero delta must add to, not
        // replace, the accumulated key.
        t.get(0).mark_invalid(1);
        policy.on_invalidate(&t, 0);
        let key_after_second = {
            let guard = policy.state.lock().unwrap();
            keyed_key_of(guard.as_ref().unwrap().items.get(&0).unwrap())
        };
        assert!(key_after_second >= key_after_first);
    }

    #[test]
    fn reset_removes_zone_from_its_heap() {
        let t = ZoneTable::new(2, 8, 8);
        let policy = FeGcVictimPolicy::new();
        t.advance_wp(8 * 8).unwrap();
        t.get(0).mark_invalid(4);
        policy.on_zone_full(&t, 0);
        policy.on_zone_reset(0);
        assert!(policy.pick_victim(&t, 0.0).is_none());
    }
}
