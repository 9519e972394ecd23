//! Zone registry: the array of logical zones and their physical backing,
//! and the write-pointer advance that turns random writes into an
//! append-only stream.

use crate::error::{Errno, Error, Result};
use lazy_static::lazy_static;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

pub type ZoneId = usize;
pub type Sector = u64;

lazy_static! {
    static ref EPOCH: Instant = Instant::now();
}

/// Milliseconds since the process-wide epoch. Used for zone `age`, which only
/// needs to be monotonic and comparable across zones, not wall-clock-correct.
pub fn now_millis() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoneCondition {
    Empty,
    ImplicitOpen,
    Closed,
    Full,
    ReadOnly,
    Offline,
}

/// A single host-managed zone: a contiguous, sequential-write-only region of
/// the backing device plus the bookkeeping the translation layer needs to
/// reclaim it.
pub struct Zone {
    id: ZoneId,
    phys_start: Sector,
    len: Sector,
    wp: AtomicU64,
    cond: Mutex<ZoneCondition>,
    invalid_count: AtomicUsize,
    age: AtomicU64,
}

impl Zone {
    fn new(id: ZoneId, phys_start: Sector, len: Sector) -> Self {
        Self {
            id,
            phys_start,
            len,
            wp: AtomicU64::new(phys_start),
            cond: Mutex::new(ZoneCondition::Empty),
            invalid_count: AtomicUsize::new(0),
            age: AtomicU64::new(now_millis()),
        }
    }

    pub fn id(&self) -> ZoneId {
        self.id
    }

    pub fn phys_start(&self) -> Sector {
        self.phys_start
    }

    pub fn len(&self) -> Sector {
        self.len
    }

    pub fn wp(&self) -> Sector {
        self.wp.load(Ordering::Acquire)
    }

    pub fn cond(&self) -> ZoneCondition {
        *self.cond.lock().unwrap()
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid_count.load(Ordering::Acquire)
    }

    pub fn age(&self) -> u64 {
        self.age.load(Ordering::Acquire)
    }

    pub fn touch(&self) {
        self.age.store(now_millis(), Ordering::Release);
    }

    pub fn remaining(&self) -> Sector {
        self.phys_start + self.len - self.wp()
    }

    pub fn mark_invalid(&self, n: usize) {
        self.invalid_count.fetch_add(n, Ordering::AcqRel);
        self.touch();
    }

    fn set_cond(&self, cond: ZoneCondition) {
        *self.cond.lock().unwrap() = cond;
    }

    fn reset(&self) {
        self.wp.store(self.phys_start, Ordering::Release);
        self.invalid_count.store(0, Ordering::Release);
        self.set_cond(ZoneCondition::Empty);
        self.touch();
        log::debug!("zone {} reset to empty", self.id);
    }

    /// Administratively demote this zone to READONLY, e.g. to reflect a
    /// device reporting the zone is worn out. Writers hitting it as the
    /// active zone must fail with `EROFS`.
    pub fn mark_read_only(&self) {
        self.set_cond(ZoneCondition::ReadOnly);
        log::info!("zone {} marked read-only", self.id);
    }

    /// Administratively take this zone fully out of service.
    pub fn mark_offline(&self) {
        self.set_cond(ZoneCondition::Offline);
        log::info!("zone {} marked offline", self.id);
    }
}

/// The array of zones plus the active write target.
///
/// Zones never move once created; `active` names the current write target by
/// index and is only mutated under `advance_wp`.
pub struct ZoneTable {
    zones: Vec<Zone>,
    blocks_per_zone: usize,
    active: Mutex<ZoneId>,
    free_zones: AtomicUsize,
    // Best-effort instrumentation only, never consulted by any invariant or
    // policy decision; derivable authoritatively by scanning `cond()`.
    clean_zones: AtomicUsize,
    opened_zones: AtomicUsize,
}

impl ZoneTable {
    pub fn new(nr_zones: usize, blocks_per_zone: usize, sectors_per_block: Sector) -> Self {
        let zone_len = blocks_per_zone as Sector * sectors_per_block;
        let zones: Vec<Zone> = (0..nr_zones)
            .map(|id| Zone::new(id, id as Sector * zone_len, zone_len))
            .collect();
        zones[0].set_cond(ZoneCondition::ImplicitOpen);
        Self {
            zones,
            blocks_per_zone,
            active: Mutex::new(0),
            free_zones: AtomicUsize::new(nr_zones - 1),
            clean_zones: AtomicUsize::new(nr_zones - 1),
            opened_zones: AtomicUsize::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn blocks_per_zone(&self) -> usize {
        self.blocks_per_zone
    }

    pub fn get(&self, id: ZoneId) -> &Zone {
        &self.zones[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    pub fn active_id(&self) -> ZoneId {
        *self.active.lock().unwrap()
    }

    pub fn active(&self) -> &Zone {
        self.get(self.active_id())
    }

    pub fn free_zones(&self) -> usize {
        self.free_zones.load(Ordering::Acquire)
    }

    pub fn free_zone_percent(&self) -> u8 {
        ((self.free_zones() * 100) / self.zones.len()) as u8
    }

    /// Zone at `id` which the backing device reports reclaimed. Called by the
    /// reclaim path once the device-level reset has completed.
    pub fn reset_zone(&self, id: ZoneId) {
        self.get(id).reset();
        self.free_zones.fetch_add(1, Ordering::AcqRel);
        self.clean_zones.fetch_add(1, Ordering::Relaxed);
    }

    /// Administratively demote zone `id` to READONLY. Intended for the active
    /// zone, mirroring a device that reports a zone gone bad mid-write; if
    /// applied to a zone still counted in `free_zones` the free count is left
    /// stale, same caveat as `clean_zones`/`opened_zones` above.
    pub fn mark_zone_read_only(&self, id: ZoneId) {
        self.get(id).mark_read_only();
    }

    pub fn mark_zone_offline(&self, id: ZoneId) {
        self.get(id).mark_offline();
    }

    /// Advance the active zone's write pointer by `n_sectors`. If the zone
    /// becomes full, rolls to the next zone with spare capacity and returns
    /// the id of the zone that just transitioned to full, so the caller can
    /// register it with the victim-selection index.
    pub fn advance_wp(&self, n_sectors: Sector) -> Result<Option<ZoneId>> {
        let active_id = self.active_id();
        let active = self.get(active_id);
        let new_wp = active.wp.fetch_add(n_sectors, Ordering::AcqRel) + n_sectors;
        active.set_cond(ZoneCondition::ImplicitOpen);

        if new_wp < active.phys_start + active.len {
            return Ok(None);
        }

        active.set_cond(ZoneCondition::Full);
        self.free_zones.fetch_sub(1, Ordering::AcqRel);
        self.opened_zones.fetch_sub(1, Ordering::Relaxed);
        log::debug!("zone {} full", active_id);

        let mut guard = self.active.lock().unwrap();
        let next = (active_id + 1..active_id + 1 + self.zones.len())
            .map(|i| i % self.zones.len())
            .find(|&i| matches!(self.get(i).cond(), ZoneCondition::Empty));
        match next {
            Some(next_id) => {
                self.get(next_id).set_cond(ZoneCondition::ImplicitOpen);
                self.clean_zones.fetch_sub(1, Ordering::Relaxed);
                self.opened_zones.fetch_add(1, Ordering::Relaxed);
                *guard = next_id;
                log::debug!("active zone rolled from {} to {}", active_id, next_id);
                Ok(Some(active_id))
            }
            None => Err(Error::with_msg(Errno::DeviceFull, "no empty zone available")),
        }
    }
}
