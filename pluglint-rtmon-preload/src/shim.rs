// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Symbol resolution, segment attachment, and the observe path shared by
//! every hook.

use libc::{c_uint, c_void};
use pluglint_rtmon::{ForbiddenFn, ViolationRecord, RTMON_SHM_ENV};
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStringExt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

/// Symbol names in [`ForbiddenFn`] catalogue order.
pub(crate) const SYMBOLS: [&CStr; ForbiddenFn::COUNT] = [
    c"malloc",
    c"free",
    c"calloc",
    c"realloc",
    c"posix_memalign",
    c"aligned_alloc",
    c"valloc",
    c"memalign",
    c"pvalloc",
    c"pthread_mutex_lock",
    c"pthread_mutex_unlock",
    c"pthread_mutex_timedlock",
    c"sem_wait",
    c"sem_timedwait",
    c"sleep",
    c"usleep",
    c"nanosleep",
    c"clock_nanosleep",
];

/// Cached real implementations, one per catalogued symbol.
static REAL: [AtomicPtr<c_void>; ForbiddenFn::COUNT] =
    [const { AtomicPtr::new(ptr::null_mut()) }; ForbiddenFn::COUNT];

/// Bits of symbols whose resolution is currently in flight. A hook that
/// re-enters its own symbol while `dlsym` runs sees its bit here and takes
/// the bootstrap path instead of recursing.
static RESOLVING: AtomicU32 = AtomicU32::new(0);

/// Bits of symbols `dlsym` could not resolve. Sticky; doubles as the
/// log-once gate.
static UNRESOLVED: AtomicU32 = AtomicU32::new(0);

/// Returns the real implementation of `f`, resolving and caching it on
/// first use (idempotent if raced). Null while the symbol is being resolved
/// underneath us, or when it cannot be resolved at all.
pub(crate) fn real(f: ForbiddenFn) -> *mut c_void {
    let idx = f as usize;
    let cached = REAL[idx].load(Ordering::Relaxed);
    if !cached.is_null() {
        return cached;
    }
    if UNRESOLVED.load(Ordering::Relaxed) & f.bit() != 0 {
        return ptr::null_mut();
    }
    if RESOLVING.fetch_or(f.bit(), Ordering::Acquire) & f.bit() != 0 {
        // Re-entered from inside our own dlsym call (or a racing thread is
        // mid-resolution); the caller falls back to bootstrap.
        return ptr::null_mut();
    }
    // SAFETY: plain dlsym lookup of a known libc symbol name.
    let p = unsafe { libc::dlsym(libc::RTLD_NEXT, SYMBOLS[idx].as_ptr()) };
    if p.is_null() {
        if UNRESOLVED.fetch_or(f.bit(), Ordering::Relaxed) & f.bit() == 0 {
            write_stderr(b"pluglint-rtmon-preload: dlsym(RTLD_NEXT, \"");
            write_stderr(SYMBOLS[idx].to_bytes());
            write_stderr(b"\") failed, symbol degraded to pass-through\n");
        }
    } else {
        REAL[idx].store(p, Ordering::Relaxed);
    }
    RESOLVING.fetch_and(!f.bit(), Ordering::Release);
    p
}

const SHM_UNATTACHED: u32 = 0;
const SHM_BUSY: u32 = 1;
const SHM_READY: u32 = 2;
const SHM_FAILED: u32 = 3;

static SHM_STATE: AtomicU32 = AtomicU32::new(SHM_UNATTACHED);
static SHM_PTR: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

/// Records `f` into the shared violation record, if it is attached and the
/// current window is armed. Attaches lazily on first use; never blocks.
pub(crate) fn observe(f: ForbiddenFn) {
    if let Some(record) = shared_record() {
        record.record(f);
    }
}

fn shared_record() -> Option<&'static ViolationRecord> {
    match SHM_STATE.load(Ordering::Acquire) {
        // SAFETY: READY is only published after SHM_PTR points at a mapped,
        // page-sized segment that is never unmapped by the shim.
        SHM_READY => Some(unsafe {
            ViolationRecord::from_ptr(SHM_PTR.load(Ordering::Relaxed) as *const u8)
        }),
        SHM_FAILED => None,
        _ => {
            if SHM_STATE
                .compare_exchange(
                    SHM_UNATTACHED,
                    SHM_BUSY,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_err()
            {
                // Reentered from inside attach_segment, or another thread
                // is attaching. Forward without observing.
                return None;
            }
            let mapped = attach_segment();
            match mapped {
                Some(p) => {
                    SHM_PTR.store(p, Ordering::Relaxed);
                    SHM_STATE.store(SHM_READY, Ordering::Release);
                    // SAFETY: as above.
                    Some(unsafe { ViolationRecord::from_ptr(p as *const u8) })
                }
                None => {
                    write_stderr(
                        b"pluglint-rtmon-preload: cannot attach violation segment, \
realtime checks degraded\n",
                    );
                    SHM_STATE.store(SHM_FAILED, Ordering::Release);
                    None
                }
            }
        }
    }
}

/// The segment name: whatever the harness published, else this process's
/// own pid-scoped name. Allocates; only called under the BUSY guard.
fn segment_name() -> Option<CString> {
    match std::env::var_os(RTMON_SHM_ENV) {
        Some(v) => CString::new(v.into_vec()).ok(),
        // SAFETY: getpid has no failure modes.
        None => CString::new(format!("/pluglint-rtmon-{}", unsafe { libc::getpid() })).ok(),
    }
}

/// Opens (or creates) the named segment and maps the record. The shim never
/// initializes an existing record and never unlinks; the harness owns the
/// segment lifecycle.
fn attach_segment() -> Option<*mut c_void> {
    let name = segment_name()?;
    // SAFETY: raw libc segment setup; every descriptor path is closed.
    unsafe {
        let fd = libc::shm_open(
            name.as_ptr(),
            libc::O_RDWR | libc::O_CREAT,
            0o600 as c_uint,
        );
        if fd == -1 {
            return None;
        }
        let size = page_size();
        if libc::ftruncate(fd, size as libc::off_t) == -1 {
            libc::close(fd);
            return None;
        }
        let p = libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        );
        libc::close(fd);
        if p == libc::MAP_FAILED {
            return None;
        }
        Some(p)
    }
}

pub(crate) fn page_size() -> usize {
    // SAFETY: sysconf is async-signal-safe on the page-size query.
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n > 0 {
        n as usize
    } else {
        4096
    }
}

/// One-line diagnostics without touching the allocator or a logger.
fn write_stderr(bytes: &[u8]) {
    // SAFETY: plain write(2) to stderr; a failed write is ignored.
    unsafe {
        let _ = libc::write(2, bytes.as_ptr() as *const c_void, bytes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_table_matches_catalogue() {
        for (f, sym) in ForbiddenFn::ALL.into_iter().zip(SYMBOLS) {
            assert_eq!(f.name().as_bytes(), sym.to_bytes());
        }
        assert_eq!(SYMBOLS.len(), ForbiddenFn::COUNT);
    }

    #[test]
    fn real_resolves_and_caches_libc_symbols() {
        let first = real(ForbiddenFn::Malloc);
        assert!(!first.is_null());
        assert_eq!(real(ForbiddenFn::Malloc), first);
    }

    #[test]
    fn page_size_is_sane() {
        let n = page_size();
        assert!(n >= 4096);
        assert!(n.is_power_of_two());
    }
}
