// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use libc::c_char;
use std::ffi::{CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

/// Seed for the FNV-1a hash of URI bytes. The hash must be deterministic
/// (the probe sequence is part of the table's observable id assignment), so
/// the std randomized hasher is not an option here.
const URID_SEED: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x100_0000_01b3;

#[inline]
fn hash_uri(bytes: &[u8]) -> u32 {
    let mut h = URID_SEED;
    for &b in bytes {
        h ^= u64::from(b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h as u32
}

/// One slot of the table.
///
/// `val` is either null (empty) or the address of an owned, NUL-terminated
/// copy of a URI; once non-null it never changes again. `stat` is nonzero
/// only for slots holding a well-known URI and records its reserved id; it
/// is written during single-threaded construction and read-only afterwards.
struct Slot {
    val: AtomicPtr<c_char>,
    stat: AtomicU32,
}

/// A fixed-capacity, lock-free URI interning table.
///
/// See the crate docs for the id model and the concurrency guarantees.
pub struct UridTable {
    slots: Box<[Slot]>,
    mask: u32,
    nstats: u32,
    well_known: &'static [&'static str],
    usage: AtomicU32,
}

impl UridTable {
    /// Creates a table with room for at least `capacity_hint` dynamic
    /// entries (rounded up to the next power of two) and pre-registers
    /// `well_known` URIs with ids `1..=well_known.len()`.
    ///
    /// # Panics
    /// Panics if the rounded capacity cannot hold the well-known set. That
    /// is a static sizing error in the caller, not a runtime condition.
    pub fn new(capacity_hint: u32, well_known: &'static [&'static str]) -> Self {
        let capacity = capacity_hint.max(1).next_power_of_two();
        assert!(
            (well_known.len() as u64) < u64::from(capacity),
            "capacity {capacity} cannot hold {} well-known URIs",
            well_known.len()
        );

        let mut slots = Vec::with_capacity(capacity as usize);
        for _ in 0..capacity {
            slots.push(Slot {
                val: AtomicPtr::new(ptr::null_mut()),
                stat: AtomicU32::new(0),
            });
        }

        let table = UridTable {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            nstats: well_known.len() as u32 + 1,
            well_known,
            usage: AtomicU32::new(0),
        };

        // Keep the slot array resident; a page fault inside a realtime
        // callback is as bad as a lock. Best effort, needs CAP_IPC_LOCK.
        unsafe {
            let _ = libc::mlock(
                table.slots.as_ptr() as *const libc::c_void,
                table.slots_byte_len(),
            );
        }

        for (i, uri) in well_known.iter().enumerate() {
            let urid = table.intern(uri);
            assert_ne!(urid, 0, "well-known URI {uri:?} does not fit in the table");
            if urid >= table.nstats {
                let idx = (urid - table.nstats) as usize;
                table.slots[idx].stat.store(i as u32 + 1, Ordering::Relaxed);
            }
        }

        table
    }

    /// Returns the stable id for `uri`, interning it if not yet present.
    ///
    /// Returns `0` when the string could not be registered: the probe
    /// sequence is exhausted (table full) or the string cannot be cloned
    /// (interior NUL byte). Callers must treat `0` as "unmapped" and carry
    /// on; a failed `intern` never disturbs existing entries.
    pub fn intern(&self, uri: &str) -> u32 {
        let bytes = uri.as_bytes();
        let hash = hash_uri(bytes);
        let nitems = self.slots.len() as u32;

        // Clone lazily, at most once per call, and only when an empty slot
        // turns up. `clone` is owned by this call until a CAS publishes it.
        let mut clone: *mut c_char = ptr::null_mut();
        let mut urid = 0u32;

        for i in 0..nitems {
            let idx = (hash.wrapping_add(i.wrapping_mul(i)) & self.mask) as usize;
            let slot = &self.slots[idx];

            let val = slot.val.load(Ordering::Acquire);
            if !val.is_null() {
                // SAFETY: a non-null slot holds a NUL-terminated string that
                // lives until the table is dropped.
                if unsafe { CStr::from_ptr(val).to_bytes() } == bytes {
                    urid = self.slot_urid(slot, idx);
                    break;
                }
                continue;
            }

            if clone.is_null() {
                match CString::new(bytes) {
                    Ok(c) => clone = c.into_raw(),
                    Err(_) => return 0,
                }
            }

            match slot.val.compare_exchange(
                ptr::null_mut(),
                clone,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.usage.fetch_add(1, Ordering::Relaxed);
                    clone = ptr::null_mut();
                    urid = self.slot_urid(slot, idx);
                    break;
                }
                Err(winner) => {
                    // SAFETY: the winning CAS published a valid string with
                    // release ordering; our failure load is acquire.
                    if unsafe { CStr::from_ptr(winner).to_bytes() } == bytes {
                        urid = self.slot_urid(slot, idx);
                        break;
                    }
                    // Lost to a different URI; keep probing with the clone.
                }
            }
        }

        if !clone.is_null() {
            // SAFETY: `clone` came from `CString::into_raw` above and was
            // never published.
            drop(unsafe { CString::from_raw(clone) });
        }

        urid
    }

    /// Looks up the URI for an id. `O(1)`, wait-free.
    ///
    /// Returns `None` for the invalid id `0` and for ids outside the
    /// assigned range.
    pub fn resolve(&self, urid: u32) -> Option<&str> {
        if urid == 0 {
            return None;
        }
        if urid < self.nstats {
            return Some(self.well_known[(urid - 1) as usize]);
        }
        let idx = (urid - self.nstats) as usize;
        let slot = self.slots.get(idx)?;
        let val = slot.val.load(Ordering::Acquire);
        if val.is_null() {
            return None;
        }
        // SAFETY: non-null slot values are NUL-terminated strings owned by
        // the table, immutable once published.
        let bytes = unsafe { CStr::from_ptr(val).to_bytes() };
        // Only `&str` input is ever interned.
        Some(unsafe { std::str::from_utf8_unchecked(bytes) })
    }

    /// Approximate count of occupied dynamic slots. Eventually consistent
    /// under concurrent interning.
    pub fn usage(&self) -> u32 {
        self.usage.load(Ordering::Relaxed)
    }

    /// Slot capacity of the table (a power of two, fixed at construction).
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    #[inline]
    fn slot_urid(&self, slot: &Slot, idx: usize) -> u32 {
        let stat = slot.stat.load(Ordering::Relaxed);
        if stat != 0 {
            stat
        } else {
            self.nstats + idx as u32
        }
    }

    fn slots_byte_len(&self) -> usize {
        self.slots.len() * std::mem::size_of::<Slot>()
    }
}

impl Drop for UridTable {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            let val = slot.val.swap(ptr::null_mut(), Ordering::Relaxed);
            if !val.is_null() {
                // SAFETY: every published slot value came from
                // `CString::into_raw` in `intern`.
                drop(unsafe { CString::from_raw(val) });
            }
        }
        unsafe {
            let _ = libc::munlock(
                self.slots.as_ptr() as *const libc::c_void,
                self.slots_byte_len(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // With `URID_SEED`, these eight URIs hash to eight distinct base slots
    // of a capacity-8 table, so each interns on its first probe no matter
    // the submission order or interleaving.
    const STRESS_URIS: [&str; 8] = [
        "urn:pluglint:stress#a",
        "urn:pluglint:stress#b",
        "urn:pluglint:stress#c",
        "urn:pluglint:stress#d",
        "urn:pluglint:stress#e",
        "urn:pluglint:stress#f",
        "urn:pluglint:stress#g",
        "urn:pluglint:stress#h",
    ];

    #[test]
    fn stress_uris_cover_all_base_slots() {
        let mut seen = [false; 8];
        for uri in STRESS_URIS {
            seen[(hash_uri(uri.as_bytes()) & 7) as usize] = true;
        }
        assert_eq!(seen, [true; 8]);
    }

    #[test]
    fn distinct_uris_get_distinct_ids() {
        let table = UridTable::new(64, &[]);
        let a = table.intern("urn:example:a");
        let b = table.intern("urn:example:b");
        let c = table.intern("urn:example:c");
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(c, 0);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn intern_is_idempotent_and_resolves() {
        let table = UridTable::new(64, &[]);
        let id = table.intern("urn:example:thing");
        assert_ne!(id, 0);
        assert_eq!(table.intern("urn:example:thing"), id);
        assert_eq!(table.resolve(id), Some("urn:example:thing"));
        assert_eq!(table.usage(), 1);
    }

    #[test]
    fn pre_registered_uris_get_reserved_ids() {
        let table = UridTable::new(8192, &["urn:wk:A", "urn:wk:B", "urn:wk:C"]);

        assert_eq!(table.intern("urn:wk:A"), 1);
        assert_eq!(table.intern("urn:wk:B"), 2);
        assert_eq!(table.intern("urn:wk:C"), 3);

        let d = table.intern("urn:wk:D");
        assert!(d >= 4);
        assert_eq!(table.intern("urn:wk:D"), d);

        assert_eq!(table.resolve(1), Some("urn:wk:A"));
        assert_eq!(table.resolve(2), Some("urn:wk:B"));
        assert_eq!(table.resolve(3), Some("urn:wk:C"));
        assert_eq!(table.resolve(d), Some("urn:wk:D"));
    }

    #[test]
    fn resolve_rejects_invalid_ids() {
        let table = UridTable::new(8, &["urn:wk:A"]);
        assert_eq!(table.resolve(0), None);
        // In range but never assigned.
        assert_eq!(table.resolve(7), None);
        // Past the slot array.
        assert_eq!(table.resolve(u32::MAX), None);
    }

    #[test]
    fn capacity_exhaustion_returns_zero() {
        let table = UridTable::new(8, &[]);
        assert_eq!(table.capacity(), 8);

        let mut ids = Vec::new();
        for uri in STRESS_URIS {
            let id = table.intern(uri);
            assert_ne!(id, 0);
            ids.push(id);
        }
        let mut dedup = ids.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), 8);
        assert_eq!(table.usage(), 8);

        // Ninth distinct URI: every probe lands on an occupied slot.
        assert_eq!(table.intern("urn:pluglint:stress#overflow"), 0);

        // The failed intern disturbed nothing.
        for (uri, id) in STRESS_URIS.iter().zip(&ids) {
            assert_eq!(table.resolve(*id), Some(*uri));
            assert_eq!(table.intern(uri), *id);
        }
    }

    #[test]
    fn interior_nul_cannot_be_registered() {
        let table = UridTable::new(8, &[]);
        assert_eq!(table.intern("urn:bad\0uri"), 0);
        assert_eq!(table.usage(), 0);
    }

    #[test]
    fn concurrent_intern_agrees_on_ids() {
        let table = UridTable::new(8, &[]);

        let per_thread: Vec<Vec<u32>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let table = &table;
                    s.spawn(move || {
                        // Each thread starts at a different offset so slot
                        // races actually happen.
                        (0..8)
                            .map(|i| table.intern(STRESS_URIS[(t + i) % 8]))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for ids in &per_thread {
            assert!(ids.iter().all(|&id| id != 0));
        }
        // Every thread saw the same id for the same URI. Thread 0 interned
        // STRESS_URIS[i] at position i.
        let baseline: HashMap<&str, u32> = STRESS_URIS
            .iter()
            .zip(&per_thread[0])
            .map(|(&uri, &id)| (uri, id))
            .collect();
        for (t, ids) in per_thread.iter().enumerate() {
            for (i, &id) in ids.iter().enumerate() {
                assert_eq!(id, baseline[STRESS_URIS[(t + i) % 8]]);
            }
        }
        assert_eq!(table.usage(), 8);
    }

    #[test]
    fn fuzz_intern_resolve_roundtrip() {
        let table = UridTable::new(1024, &[]);

        bolero::check!().with_type::<Vec<String>>().for_each(|uris| {
            let mut seen = HashMap::<String, u32>::new();
            for uri in uris {
                let id = table.intern(uri);
                if id == 0 {
                    // Table full or interior NUL; both are legal outcomes.
                    continue;
                }
                assert_eq!(table.resolve(id), Some(uri.as_str()));
                if let Some(&prev) = seen.get(uri) {
                    assert_eq!(id, prev);
                }
                seen.insert(uri.clone(), id);
            }
            for (uri, id) in &seen {
                assert_eq!(table.resolve(*id), Some(uri.as_str()));
            }
        });
    }
}
