use super::{Victim, VictimPolicy};
use crate::zone::{ZoneCondition, ZoneTable};

/// Pick the FULL zone with the highest invalid-block count. No eligibility
/// threshold: any FULL zone with at least one invalid block is a candidate,
/// matching `dmzap_victim_selection`'s plain linear scan.
pub struct GreedyVictimPolicy {}

impl VictimPolicy for GreedyVictimPolicy {
    fn pick_victim(&self, zones: &ZoneTable, _threshold: f64) -> Option<Victim> {
        let mut best: Option<(usize, usize)> = None;
        for zone in zones.iter() {
            if zone.cond() != ZoneCondition::Full {
                continue;
            }
            let invalid = zone.invalid_count();
            if invalid == 0 {
                continue;
            }
            if best.map_or(true, |(_, best_invalid)| invalid > best_invalid) {
                best = Some((zone.id(), invalid));
            }
        }
        best.map(|(zone_id, _)| Victim { zone_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::ZoneTable;

    fn full_zone_table_with_invalid(counts: &[usize]) -> ZoneTable {
        let t = ZoneTable::new(counts.len() + 1, 8, 8);
        for (id, &c) in counts.iter().enumerate() {
            t.advance_wp(8 * 8).unwrap();
            t.get(id).mark_invalid(c);
        }
        t
    }

    #[test]
    fn picks_highest_invalid_count_regardless_of_threshold() {
        let t = full_zone_table_with_invalid(&[1, 6, 3]);
        let policy = GreedyVictimPolicy {};
        let victim = policy.pick_victim(&t, 0.9).unwrap();
        assert_eq!(victim.zone_id, 1);
    }

    #[test]
    fn none_when_no_full_zone_has_invalid_blocks() {
        let t = full_zone_table_with_invalid(&[0, 0, 0]);
        let policy = GreedyVictimPolicy {};
        assert!(policy.pick_victim(&t, 0.0).is_none());
    }
}
