//! Logical-to-device / device-to-logical block mapping.
//!
//! All three tables (`l2d`, `d2l`, `invalid`) are guarded by a single lock;
//! every public method here assumes the caller already holds it (the lock
//! itself lives on `ZapDisk`, which serializes mapping access the same way
//! `AllocTable` serializes the bitmap in the disk layer this is grounded on).

use crate::error::{Errno, Error, Result};

pub type Lba = u64;
pub type Hba = u64;

pub const UNMAPPED: Hba = u64::MAX;
pub const INVALID: Hba = u64::MAX - 1;

pub enum Lookup {
    /// `[user, user+run)` are all unmapped.
    Unmapped { run: usize },
    /// `[user, user+run)` map to a contiguous, valid physical run starting at
    /// `backing`.
    Mapped { backing: Hba, run: usize },
    /// `[user, user+run)` are mapped but every block in the run has been
    /// invalidated by a later write.
    Invalidated { run: usize },
}

/// Bidirectional block map plus per-physical-block validity.
pub struct Map {
    l2d: Vec<Hba>,
    d2l: Vec<Lba>,
    invalid: Vec<bool>,
}

impl Map {
    pub fn new(n_lba: usize, n_phy: usize) -> Self {
        Self {
            l2d: vec![UNMAPPED; n_lba],
            d2l: vec![UNMAPPED; n_phy],
            invalid: vec![false; n_phy],
        }
    }

    pub fn n_lba(&self) -> usize {
        self.l2d.len()
    }

    pub fn n_phy(&self) -> usize {
        self.d2l.len()
    }

    pub fn is_invalid(&self, p: Hba) -> bool {
        self.invalid[p as usize]
    }

    /// Current logical owner of physical block `p`, or `UNMAPPED` if none.
    pub fn owner(&self, p: Hba) -> Lba {
        self.d2l[p as usize]
    }

    fn check_lba_range(&self, user: Lba, len: usize) -> Result<()> {
        if user as usize + len > self.n_lba() {
            return Err(Error::with_msg(Errno::OutOfBounds, "lba range exceeds capacity"));
        }
        Ok(())
    }

    /// Install `len` contiguous mappings starting at `user`, pointing to
    /// `len` contiguous physical blocks starting at `backing`. Any mapping
    /// being superseded is invalidated and returned, so the caller can credit
    /// the owning zone's `invalid_count` and notify the victim-selection
    /// index.
    pub fn update(&mut self, user: Lba, backing: Hba, len: usize) -> Result<Vec<Hba>> {
        self.check_lba_range(user, len)?;
        let mut superseded = Vec::new();
        for i in 0..len {
            let u = (user as usize) + i;
            let old = self.l2d[u];
            if old != UNMAPPED {
                self.invalid[old as usize] = true;
                superseded.push(old);
            }
            let p = backing + i as Hba;
            self.l2d[u] = p;
            self.d2l[p as usize] = user + i as Lba;
        }
        Ok(superseded)
    }

    /// Like `update`, but each per-block step is skipped if the current
    /// mapping for that block does not equal `orig[i]`. Used by the reclaim
    /// path so a concurrent foreground write always wins over a stale copy:
    /// on success the old backing block's reverse pointer is cleared, since
    /// it no longer backs anything.
    pub fn update_if_eq(&mut self, user: Lba, backing: Hba, len: usize, orig: &[Hba]) -> Result<()> {
        self.check_lba_range(user, len)?;
        debug_assert_eq!(orig.len(), len);
        for i in 0..len {
            let u = (user as usize) + i;
            if self.l2d[u] != orig[i] {
                continue;
            }
            let p = backing + i as Hba;
            self.l2d[u] = p;
            self.d2l[orig[i] as usize] = UNMAPPED;
            self.d2l[p as usize] = user + i as Lba;
        }
        Ok(())
    }

    /// Mark `[p, p+n)` invalid. Returns the number of blocks that were not
    /// already invalid, which is what the caller should add to the owning
    /// zone's `invalid_count`.
    pub fn invalidate(&mut self, p: Hba, n: usize) -> usize {
        let mut newly_invalid = 0;
        for i in (0..n).rev() {
            let idx = (p + i as Hba) as usize;
            if !self.invalid[idx] {
                self.invalid[idx] = true;
                newly_invalid += 1;
            }
        }
        newly_invalid
    }

    /// Clear the invalid flag over `[p, p+n)`. Used when resetting a victim
    /// zone, before `unmap_zone` clears the reverse mapping.
    pub fn validate(&mut self, p: Hba, n: usize) {
        for i in 0..n {
            self.invalid[(p + i as Hba) as usize] = false;
        }
    }

    /// Tear down every mapping pointing into `[phys_start, phys_start+len)`.
    /// Called once a zone has been fully reclaimed.
    pub fn unmap_zone(&mut self, phys_start: Hba, len: u64) {
        for i in 0..len {
            let p = (phys_start + i) as usize;
            let u = self.d2l[p];
            if u != UNMAPPED {
                self.l2d[u as usize] = UNMAPPED;
            }
            self.d2l[p] = UNMAPPED;
        }
    }

    /// Longest prefix of `[user, user+len)` sharing one of the three cases:
    /// all-unmapped, all-valid-and-physically-contiguous, or all-invalidated.
    /// The first entry decides the case; the run stops at the first entry
    /// breaking that case's predicate.
    pub fn lookup(&self, user: Lba, len: usize) -> Result<Lookup> {
        self.check_lba_range(user, len)?;
        if len == 0 {
            return Ok(Lookup::Unmapped { run: 0 });
        }
        let first = self.l2d[user as usize];
        if first == UNMAPPED {
            let run = (0..len)
                .take_while(|&i| self.l2d[user as usize + i] == UNMAPPED)
                .count();
            return Ok(Lookup::Unmapped { run });
        }
        if self.invalid[first as usize] {
            let run = (0..len)
                .take_while(|&i| {
                    let p = self.l2d[user as usize + i];
                    p != UNMAPPED && self.invalid[p as usize]
                })
                .count();
            return Ok(Lookup::Invalidated { run });
        }
        let mut run = 1;
        while run < len {
            let p = self.l2d[user as usize + run];
            let expected = first + run as Hba;
            if p != expected || self.invalid[p as usize] {
                break;
            }
            run += 1;
        }
        Ok(Lookup::Mapped { backing: first, run })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_map_is_entirely_unmapped() {
        let map = Map::new(16, 16);
        match map.lookup(0, 16).unwrap() {
            Lookup::Unmapped { run } => assert_eq!(run, 16),
            _ => panic!("expected unmapped"),
        }
    }

    #[test]
    fn update_then_lookup_returns_contiguous_run() {
        let mut map = Map::new(16, 16);
        map.update(0, 0, 8).unwrap();
        match map.lookup(0, 8).unwrap() {
            Lookup::Mapped { backing, run } => {
                assert_eq!(backing, 0);
                assert_eq!(run, 8);
            }
            _ => panic!("expected mapped"),
        }
        assert_eq!(map.d2l[0], 0);
        assert_eq!(map.d2l[7], 7);
    }

    #[test]
    fn overwrite_invalidates_old_mapping() {
        let mut map = Map::new(16, 16);
        map.update(0, 0, 4).unwrap();
        map.update(0, 8, 4).unwrap();
        assert!(map.is_invalid(0));
        assert!(map.is_invalid(3));
        match map.lookup(0, 4).unwrap() {
            Lookup::Mapped { backing, run } => {
                assert_eq!(backing, 8);
                assert_eq!(run, 4);
            }
            _ => panic!("expected mapped"),
        }
    }

    #[test]
    fn invalidate_reports_only_newly_invalid_blocks() {
        let mut map = Map::new(16, 16);
        map.update(0, 0, 4).unwrap();
        let n = map.invalidate(0, 4);
        assert_eq!(n, 4);
        let n2 = map.invalidate(0, 4);
        assert_eq!(n2, 0);
    }

    #[test]
    fn update_if_eq_moves_logical_owner_when_mapping_unchanged() {
        let mut map = Map::new(16, 16);
        map.update(0, 0, 4).unwrap();
        map.update_if_eq(0, 8, 4, &[0, 1, 2, 3]).unwrap();
        assert_eq!(map.l2d[0], 8);
        assert_eq!(map.d2l[8], 0);
        assert_eq!(map.owner(0), UNMAPPED);
        assert!(!map.is_invalid(8));
    }

    #[test]
    fn update_if_eq_skips_block_superseded_since_it_was_read() {
        let mut map = Map::new(16, 16);
        map.update(0, 0, 4).unwrap();
        // A foreground write remaps lba 0 to backing 20 before the stale copy
        // at backing 8 lands; the copy must not clobber the newer mapping.
        map.update(0, 20, 1).unwrap();
        map.update_if_eq(0, 8, 1, &[0]).unwrap();
        assert_eq!(map.l2d[0], 20);
        assert_eq!(map.owner(8), UNMAPPED);
    }

    #[test]
    fn unmap_zone_clears_both_directions() {
        let mut map = Map::new(16, 16);
        map.update(0, 0, 4).unwrap();
        map.unmap_zone(0, 4);
        assert_eq!(map.l2d[0], UNMAPPED);
        assert_eq!(map.d2l[0], UNMAPPED);
    }

    #[test]
    fn out_of_bounds_lba_rejected() {
        let map = Map::new(4, 4);
        assert!(map.lookup(2, 4).is_err());
    }
}
