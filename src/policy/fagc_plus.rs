use super::heap::{keyed_key_of, keyed_set_pos, BackpointerHeap, KeyedItem};
use super::{Victim, VictimPolicy};
use crate::zone::{now_millis, ZoneId, ZoneTable};
use std::sync::atomic::Ordering;
use std::sync::Mutex;

/// Single global max-heap keyed by `cps`, the write-number-based aging
/// accumulator FeGC and FaGC+ share (see the `cwa`/`cps` note in the crate
/// root). Simpler than FeGC's per-bucket arrangement at the cost of O(log Z)
/// instead of O(B) selection.
pub struct FaGcPlusVictimPolicy {
    state: Mutex<State>,
}

struct State {
    heap: BackpointerHeap<KeyedItem>,
    items: hashbrown::HashMap<ZoneId, KeyedItem>,
    last_update_ms: hashbrown::HashMap<ZoneId, u64>,
}

impl FaGcPlusVictimPolicy {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                heap: BackpointerHeap::new(),
                items: hashbrown::HashMap::new(),
                last_update_ms: hashbrown::HashMap::new(),
            }),
        }
    }
}

impl Default for FaGcPlusVictimPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl VictimPolicy for FaGcPlusVictimPolicy {
    fn pick_victim(&self, zones: &ZoneTable, _threshold: f64) -> Option<Victim> {
        let mut state = self.state.lock().unwrap();
        let item = state.heap.pop_max(keyed_key_of, keyed_set_pos)?;
        state.items.remove(&item.zone_id);
        state.last_update_ms.remove(&item.zone_id);
        let _ = zones;
        Some(Victim { zone_id: item.zone_id })
    }

    fn on_zone_full(&self, _zones: &ZoneTable, zone_id: ZoneId) {
        let mut state = self.state.lock().unwrap();
        let item = KeyedItem::new(zone_id, 0);
        state.heap.insert(item.clone(), keyed_key_of, keyed_set_pos);
        state.items.insert(zone_id, item);
        state.last_update_ms.insert(zone_id, now_millis());
    }

    fn on_invalidate(&self, _zones: &ZoneTable, zone_id: ZoneId) {
        let mut state = self.state.lock().unwrap();
        let Some(&last) = state.last_update_ms.get(&zone_id) else {
            return;
        };
        let now = now_millis();
        let delta = now.saturating_sub(last) as i64;
        state.last_update_ms.insert(zone_id, now);

        if let Some(item) = state.items.get(&zone_id).cloned() {
            let new_key = keyed_key_of(&item) + delta;
            item.key.store(new_key, Ordering::Release);
            let pos = item.pos.load(Ordering::Acquire);
            if pos >= 1 {
                state
                    .heap
                    .sift_up(pos as usize, &keyed_key_of, &keyed_set_pos);
                state
                    .heap
                    .sift_down(pos as usize, &keyed_key_of, &keyed_set_pos);
            }
        }
    }

    fn on_zone_reset(&self, zone_id: ZoneId) {
        let mut state = self.state.lock().unwrap();
        if let Some(item) = state.items.remove(&zone_id) {
            let pos = item.pos.load(Ordering::Acquire);
            if pos >= 1 {
                state
                    .heap
                    .remove_at(pos as usize, keyed_key_of, keyed_set_pos);
            }
        }
        state.last_update_ms.remove(&zone_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_cps_zone_is_popped_first() {
        let t = ZoneTable::new(3, 8, 8);
        let policy = FaGcPlusVictimPolicy::new();
        t.advance_wp(8 * 8).unwrap();
        policy.on_zone_full(&t, 0);
        t.advance_wp(8 * 8).unwrap();
        policy.on_zone_full(&t, 1);

        std::thread::sleep(std::time::Duration::from_millis(2));
        policy.on_invalidate(&t, 1);

        let victim = policy.pick_victim(&t, 0.0).unwrap();
        assert_eq!(victim.zone_id, 1);
    }

    #[test]
    fn reset_removes_zone_before_it_can_be_picked() {
        let t = ZoneTable::new(2, 8, 8);
        let policy = FaGcPlusVictimPolicy::new();
        t.advance_wp(8 * 8).unwrap();
        policy.on_zone_full(&t, 0);
        policy.on_zone_reset(0);
        assert!(policy.pick_victim(&t, 0.0).is_none());
    }
}
