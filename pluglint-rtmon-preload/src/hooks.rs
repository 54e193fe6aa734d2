// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The exported interpositions. Each one: resolve the real symbol, report
//! into the shared record, forward unchanged. Allocation hooks fall back to
//! the bootstrap arena while their own symbol is still being resolved (or,
//! theoretically, unresolvable); everything else degrades to a benign
//! return value.

use crate::bootstrap;
use crate::shim::{observe, page_size, real};
use libc::{c_int, c_uint, c_void, clockid_t, pthread_mutex_t, sem_t, size_t, timespec, useconds_t};
use pluglint_rtmon::ForbiddenFn;
use std::mem;
use std::ptr;

type MallocFn = unsafe extern "C" fn(size_t) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);
type CallocFn = unsafe extern "C" fn(size_t, size_t) -> *mut c_void;
type ReallocFn = unsafe extern "C" fn(*mut c_void, size_t) -> *mut c_void;
type PosixMemalignFn = unsafe extern "C" fn(*mut *mut c_void, size_t, size_t) -> c_int;
type AlignedAllocFn = unsafe extern "C" fn(size_t, size_t) -> *mut c_void;
type VallocFn = unsafe extern "C" fn(size_t) -> *mut c_void;
type MemalignFn = unsafe extern "C" fn(size_t, size_t) -> *mut c_void;
type PvallocFn = unsafe extern "C" fn(size_t) -> *mut c_void;
type MutexFn = unsafe extern "C" fn(*mut pthread_mutex_t) -> c_int;
type MutexTimedFn = unsafe extern "C" fn(*mut pthread_mutex_t, *const timespec) -> c_int;
type SemFn = unsafe extern "C" fn(*mut sem_t) -> c_int;
type SemTimedFn = unsafe extern "C" fn(*mut sem_t, *const timespec) -> c_int;
type SleepFn = unsafe extern "C" fn(c_uint) -> c_uint;
type UsleepFn = unsafe extern "C" fn(useconds_t) -> c_int;
type NanosleepFn = unsafe extern "C" fn(*const timespec, *mut timespec) -> c_int;
type ClockNanosleepFn =
    unsafe extern "C" fn(clockid_t, c_int, *const timespec, *mut timespec) -> c_int;

/// Allocation without observation, for internal block migration.
fn plain_alloc(size: size_t) -> *mut c_void {
    let f = real(ForbiddenFn::Malloc);
    if f.is_null() {
        return bootstrap::alloc(size, 16);
    }
    // SAFETY: resolved address of malloc.
    unsafe { mem::transmute::<*mut c_void, MallocFn>(f)(size) }
}

#[no_mangle]
pub extern "C" fn malloc(size: size_t) -> *mut c_void {
    let f = real(ForbiddenFn::Malloc);
    observe(ForbiddenFn::Malloc);
    if f.is_null() {
        return bootstrap::alloc(size, 16);
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, MallocFn>(f)(size) }
}

#[no_mangle]
pub extern "C" fn free(ptr_in: *mut c_void) {
    let f = real(ForbiddenFn::Free);
    observe(ForbiddenFn::Free);
    if ptr_in.is_null() || bootstrap::contains(ptr_in) {
        // Bootstrap blocks are never reclaimed.
        return;
    }
    if f.is_null() {
        return;
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, FreeFn>(f)(ptr_in) }
}

#[no_mangle]
pub extern "C" fn calloc(nmemb: size_t, size: size_t) -> *mut c_void {
    let f = real(ForbiddenFn::Calloc);
    observe(ForbiddenFn::Calloc);
    if f.is_null() {
        return bootstrap::calloc(nmemb, size);
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, CallocFn>(f)(nmemb, size) }
}

#[no_mangle]
pub extern "C" fn realloc(ptr_in: *mut c_void, size: size_t) -> *mut c_void {
    let f = real(ForbiddenFn::Realloc);
    observe(ForbiddenFn::Realloc);
    if bootstrap::contains(ptr_in) {
        // Migrate the block out of the arena.
        let new_ptr = plain_alloc(size);
        if !new_ptr.is_null() {
            // SAFETY: `ptr_in` is an arena block with a recorded size;
            // `new_ptr` has room for `size` bytes.
            unsafe {
                let old = bootstrap::size_of(ptr_in);
                ptr::copy_nonoverlapping(
                    ptr_in as *const u8,
                    new_ptr as *mut u8,
                    old.min(size),
                );
            }
        }
        return new_ptr;
    }
    if f.is_null() {
        if ptr_in.is_null() {
            return bootstrap::alloc(size, 16);
        }
        return ptr::null_mut();
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, ReallocFn>(f)(ptr_in, size) }
}

#[no_mangle]
pub extern "C" fn posix_memalign(
    memptr: *mut *mut c_void,
    alignment: size_t,
    size: size_t,
) -> c_int {
    let f = real(ForbiddenFn::PosixMemalign);
    observe(ForbiddenFn::PosixMemalign);
    if f.is_null() {
        if memptr.is_null()
            || !alignment.is_power_of_two()
            || alignment % mem::size_of::<*mut c_void>() != 0
        {
            return libc::EINVAL;
        }
        let p = bootstrap::alloc(size, alignment);
        if p.is_null() {
            return libc::ENOMEM;
        }
        // SAFETY: caller-provided out pointer, checked non-null.
        unsafe { *memptr = p };
        return 0;
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, PosixMemalignFn>(f)(memptr, alignment, size) }
}

#[no_mangle]
pub extern "C" fn aligned_alloc(alignment: size_t, size: size_t) -> *mut c_void {
    let f = real(ForbiddenFn::AlignedAlloc);
    observe(ForbiddenFn::AlignedAlloc);
    if f.is_null() {
        return bootstrap::alloc(size, alignment);
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, AlignedAllocFn>(f)(alignment, size) }
}

#[no_mangle]
pub extern "C" fn valloc(size: size_t) -> *mut c_void {
    let f = real(ForbiddenFn::Valloc);
    observe(ForbiddenFn::Valloc);
    if f.is_null() {
        return bootstrap::alloc(size, page_size());
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, VallocFn>(f)(size) }
}

#[no_mangle]
pub extern "C" fn memalign(alignment: size_t, size: size_t) -> *mut c_void {
    let f = real(ForbiddenFn::Memalign);
    observe(ForbiddenFn::Memalign);
    if f.is_null() {
        return bootstrap::alloc(size, alignment);
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, MemalignFn>(f)(alignment, size) }
}

#[no_mangle]
pub extern "C" fn pvalloc(size: size_t) -> *mut c_void {
    let f = real(ForbiddenFn::Pvalloc);
    observe(ForbiddenFn::Pvalloc);
    if f.is_null() {
        let page = page_size();
        let rounded = size.checked_add(page - 1).map(|s| s & !(page - 1));
        return match rounded {
            Some(r) => bootstrap::alloc(r, page),
            None => ptr::null_mut(),
        };
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, PvallocFn>(f)(size) }
}

#[no_mangle]
pub extern "C" fn pthread_mutex_lock(mutex: *mut pthread_mutex_t) -> c_int {
    let f = real(ForbiddenFn::PthreadMutexLock);
    observe(ForbiddenFn::PthreadMutexLock);
    if f.is_null() {
        return 0;
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, MutexFn>(f)(mutex) }
}

#[no_mangle]
pub extern "C" fn pthread_mutex_unlock(mutex: *mut pthread_mutex_t) -> c_int {
    let f = real(ForbiddenFn::PthreadMutexUnlock);
    observe(ForbiddenFn::PthreadMutexUnlock);
    if f.is_null() {
        return 0;
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, MutexFn>(f)(mutex) }
}

#[no_mangle]
pub extern "C" fn pthread_mutex_timedlock(
    mutex: *mut pthread_mutex_t,
    abstime: *const timespec,
) -> c_int {
    let f = real(ForbiddenFn::PthreadMutexTimedlock);
    observe(ForbiddenFn::PthreadMutexTimedlock);
    if f.is_null() {
        return 0;
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, MutexTimedFn>(f)(mutex, abstime) }
}

#[no_mangle]
pub extern "C" fn sem_wait(sem: *mut sem_t) -> c_int {
    let f = real(ForbiddenFn::SemWait);
    observe(ForbiddenFn::SemWait);
    if f.is_null() {
        return 0;
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, SemFn>(f)(sem) }
}

#[no_mangle]
pub extern "C" fn sem_timedwait(sem: *mut sem_t, abstime: *const timespec) -> c_int {
    let f = real(ForbiddenFn::SemTimedwait);
    observe(ForbiddenFn::SemTimedwait);
    if f.is_null() {
        return 0;
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, SemTimedFn>(f)(sem, abstime) }
}

#[no_mangle]
pub extern "C" fn sleep(seconds: c_uint) -> c_uint {
    let f = real(ForbiddenFn::Sleep);
    observe(ForbiddenFn::Sleep);
    if f.is_null() {
        // As if interrupted immediately.
        return seconds;
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, SleepFn>(f)(seconds) }
}

#[no_mangle]
pub extern "C" fn usleep(usec: useconds_t) -> c_int {
    let f = real(ForbiddenFn::Usleep);
    observe(ForbiddenFn::Usleep);
    if f.is_null() {
        return 0;
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, UsleepFn>(f)(usec) }
}

#[no_mangle]
pub extern "C" fn nanosleep(req: *const timespec, rem: *mut timespec) -> c_int {
    let f = real(ForbiddenFn::Nanosleep);
    observe(ForbiddenFn::Nanosleep);
    if f.is_null() {
        return 0;
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, NanosleepFn>(f)(req, rem) }
}

#[no_mangle]
pub extern "C" fn clock_nanosleep(
    clock_id: clockid_t,
    flags: c_int,
    req: *const timespec,
    rem: *mut timespec,
) -> c_int {
    let f = real(ForbiddenFn::ClockNanosleep);
    observe(ForbiddenFn::ClockNanosleep);
    if f.is_null() {
        return 0;
    }
    // SAFETY: resolved address of the real symbol, unchanged arguments.
    unsafe { mem::transmute::<*mut c_void, ClockNanosleepFn>(f)(clock_id, flags, req, rem) }
}
