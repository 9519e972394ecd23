use super::{Victim, VictimPolicy};
use crate::zone::{Zone, ZoneCondition, ZoneTable};

/// Scale factor applied to cost-benefit and shift-time arithmetic so the
/// result stays meaningful in integer-friendly units; matches the constant
/// the reclaim formulas were grounded on.
pub const CB_SCALE_FACTOR: f64 = 1000.0;

/// `age_delta * invalid * K / (2 * valid)`, falling back to
/// `age_delta * invalid * K` when the zone has no valid blocks left (an
/// all-invalid zone is maximally worth reclaiming regardless of age).
pub fn cb_value(zone: &Zone, now_millis: u64, blocks_per_zone: usize) -> f64 {
    let invalid = zone.invalid_count();
    let valid = blocks_per_zone.saturating_sub(invalid);
    let age_delta = now_millis.saturating_sub(zone.age()) as f64;
    if valid == 0 {
        age_delta * invalid as f64 * CB_SCALE_FACTOR
    } else {
        age_delta * invalid as f64 * CB_SCALE_FACTOR / (2.0 * valid as f64)
    }
}

/// Pick the FULL zone with the highest cost-benefit value. No eligibility
/// threshold: any FULL zone with at least one invalid block is a candidate,
/// matching `dmzap_cb_victim_selection`'s plain linear scan.
pub struct CbVictimPolicy {}

impl VictimPolicy for CbVictimPolicy {
    fn pick_victim(&self, zones: &ZoneTable, _threshold: f64) -> Option<Victim> {
        let blocks_per_zone = zones.blocks_per_zone();
        let now = crate::zone::now_millis();
        let mut best: Option<(usize, f64)> = None;
        for zone in zones.iter() {
            if zone.cond() != ZoneCondition::Full || zone.invalid_count() == 0 {
                continue;
            }
            let cb = cb_value(zone, now, blocks_per_zone);
            if best.map_or(true, |(_, best_cb)| cb > best_cb) {
                best = Some((zone.id(), cb));
            }
        }
        best.map(|(zone_id, _)| Victim { zone_id })
    }
}
