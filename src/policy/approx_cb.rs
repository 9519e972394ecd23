use super::cb::cb_value;
use super::{Victim, VictimPolicy};
use crate::zone::{now_millis, ZoneCondition, ZoneId, ZoneTable};
use crossbeam_queue::ArrayQueue;
use std::sync::Mutex;

/// Refills a capped FIFO of the current top-CB zones once it runs dry,
/// trading exact optimality for an O(1) amortized selection: most ticks just
/// scan the queue instead of re-sorting every FULL zone.
pub struct ApproxCbVictimPolicy {
    queue: Mutex<ArrayQueue<ZoneId>>,
    cap: usize,
}

impl ApproxCbVictimPolicy {
    pub fn new(cap: usize) -> Self {
        Self {
            queue: Mutex::new(ArrayQueue::new(cap.max(1))),
            cap: cap.max(1),
        }
    }

    fn refill(&self, zones: &ZoneTable) {
        let blocks_per_zone = zones.blocks_per_zone();
        let now = now_millis();
        let mut cbs: Vec<(ZoneId, f64)> = zones
            .iter()
            .filter(|z| z.cond() == ZoneCondition::Full && z.invalid_count() > 0)
            .map(|z| (z.id(), cb_value(z, now, blocks_per_zone)))
            .collect();
        cbs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        let queue = self.queue.lock().unwrap();
        while queue.pop().is_some() {}
        for (zone_id, _) in cbs.into_iter().take(self.cap) {
            let _ = queue.push(zone_id);
        }
    }
}

impl VictimPolicy for ApproxCbVictimPolicy {
    fn pick_victim(&self, zones: &ZoneTable, _threshold: f64) -> Option<Victim> {
        {
            let queue = self.queue.lock().unwrap();
            if queue.is_empty() {
                drop(queue);
                self.refill(zones);
            }
        }

        let blocks_per_zone = zones.blocks_per_zone();
        let now = now_millis();
        let queue = self.queue.lock().unwrap();
        let mut candidates = Vec::with_capacity(queue.len());
        while let Some(zone_id) = queue.pop() {
            candidates.push(zone_id);
        }
        let best = candidates
            .iter()
            .filter(|&&zone_id| zones.get(zone_id).cond() == ZoneCondition::Full)
            .max_by(|&&a, &&b| {
                let ca = cb_value(zones.get(a), now, blocks_per_zone);
                let cb = cb_value(zones.get(b), now, blocks_per_zone);
                ca.partial_cmp(&cb).unwrap()
            })
            .copied();
        for zone_id in candidates {
            if Some(zone_id) != best {
                let _ = queue.push(zone_id);
            }
        }
        best.map(|zone_id| Victim { zone_id })
    }

    fn on_zone_reset(&self, zone_id: ZoneId) {
        let queue = self.queue.lock().unwrap();
        let mut kept = Vec::with_capacity(queue.len());
        while let Some(id) = queue.pop() {
            if id != zone_id {
                kept.push(id);
            }
        }
        for id in kept {
            let _ = queue.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refills_and_picks_highest_cb() {
        let t = ZoneTable::new(4, 8, 8);
        t.advance_wp(8 * 8).unwrap();
        t.get(0).mark_invalid(2);
        t.advance_wp(8 * 8).unwrap();
        t.get(1).mark_invalid(7);
        let policy = ApproxCbVictimPolicy::new(8);
        let victim = policy.pick_victim(&t, 0.0).unwrap();
        assert_eq!(victim.zone_id, 1);
    }

    #[test]
    fn none_when_no_full_zone_has_invalid_blocks() {
        let t = ZoneTable::new(2, 8, 8);
        let policy = ApproxCbVictimPolicy::new(8);
        assert!(policy.pick_victim(&t, 0.0).is_none());
    }
}
