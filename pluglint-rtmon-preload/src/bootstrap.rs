// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bump arena serving allocation calls that re-enter the shim while the
//! real allocator symbols are still being resolved.
//!
//! Blocks are never reclaimed; the arena only has to carry the handful of
//! allocations `dlsym` makes on first use. Each block is prefixed with its
//! size so `realloc` can migrate it out once the real allocator is known.
//! The backing storage is zeroed `.bss` and bump-only, so blocks come back
//! zero-filled, which also satisfies `calloc`.

use libc::c_void;
use std::cell::UnsafeCell;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

const ARENA_SIZE: usize = 64 * 1024;
const HEADER: usize = mem::size_of::<usize>();

#[repr(align(16))]
struct Arena(UnsafeCell<[u8; ARENA_SIZE]>);

// SAFETY: handed out regions never overlap (monotonic bump via CAS) and the
// header of a block is written before its address escapes.
unsafe impl Sync for Arena {}

static ARENA: Arena = Arena(UnsafeCell::new([0; ARENA_SIZE]));
static NEXT: AtomicUsize = AtomicUsize::new(0);

fn base() -> usize {
    ARENA.0.get() as usize
}

/// Allocates `size` bytes aligned to `align` (which must be a power of
/// two). Returns null when the arena is exhausted.
pub fn alloc(size: usize, align: usize) -> *mut c_void {
    if !align.is_power_of_two() {
        return ptr::null_mut();
    }
    let base = base();
    loop {
        let cur = NEXT.load(Ordering::Relaxed);
        let hdr_end = match base.checked_add(cur).and_then(|a| a.checked_add(HEADER)) {
            Some(v) => v,
            None => return ptr::null_mut(),
        };
        let payload = (hdr_end + align - 1) & !(align - 1);
        let end = match payload.checked_add(size) {
            Some(v) => v,
            None => return ptr::null_mut(),
        };
        if end > base + ARENA_SIZE {
            return ptr::null_mut();
        }
        if NEXT
            .compare_exchange_weak(cur, end - base, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            continue;
        }
        // SAFETY: [payload - HEADER, end) is exclusively ours now.
        unsafe { ((payload - HEADER) as *mut usize).write_unaligned(size) };
        return payload as *mut c_void;
    }
}

/// `calloc`-shaped entry: checked multiply, zeroed result (bump-only arena,
/// fresh blocks are untouched `.bss`).
pub fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    match nmemb.checked_mul(size) {
        Some(total) => alloc(total, 16),
        None => ptr::null_mut(),
    }
}

/// True if `ptr` points into the arena (and thus must not reach the real
/// `free`/`realloc`).
pub fn contains(ptr: *const c_void) -> bool {
    let addr = ptr as usize;
    addr >= base() && addr < base() + ARENA_SIZE
}

/// Size recorded for an arena block.
///
/// # Safety
/// `ptr` must be a pointer previously returned by [`alloc`] or [`calloc`].
pub unsafe fn size_of(ptr: *const c_void) -> usize {
    ((ptr as usize - HEADER) as *const usize).read_unaligned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_aligned_disjoint_and_zeroed() {
        let a = alloc(24, 16);
        let b = alloc(40, 64);
        assert!(!a.is_null() && !b.is_null());
        assert_eq!(a as usize % 16, 0);
        assert_eq!(b as usize % 64, 0);

        let a_range = a as usize..a as usize + 24;
        assert!(!a_range.contains(&(b as usize)));

        let bytes = unsafe { std::slice::from_raw_parts(a as *const u8, 24) };
        assert!(bytes.iter().all(|&x| x == 0));
    }

    #[test]
    fn recorded_sizes_round_trip() {
        let p = alloc(123, 16);
        assert!(!p.is_null());
        assert_eq!(unsafe { size_of(p) }, 123);
    }

    #[test]
    fn containment_tracks_the_arena() {
        let p = alloc(8, 16);
        assert!(contains(p));
        let outside = &0u8 as *const u8 as *const c_void;
        assert!(!contains(outside));
        assert!(!contains(ptr::null()));
    }

    #[test]
    fn calloc_rejects_overflow() {
        assert!(calloc(usize::MAX, 2).is_null());
        let p = calloc(4, 8);
        assert!(!p.is_null());
        let bytes = unsafe { std::slice::from_raw_parts(p as *const u8, 32) };
        assert!(bytes.iter().all(|&x| x == 0));
    }

    #[test]
    fn exhaustion_returns_null() {
        // More than the arena can ever hold.
        assert!(alloc(ARENA_SIZE + 1, 16).is_null());
    }
}
