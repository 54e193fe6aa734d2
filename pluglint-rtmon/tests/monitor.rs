// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Monitor lifecycle against real `/dev/shm` segments, including the
//! process boundary the record exists to cross.

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use pluglint_rtmon::{detach, ForbiddenFn, RtMonitor, RTMON_SHM_ENV};

fn test_name(tag: &str) -> String {
    format!("/pluglint-rtmon-test-{}-{}", tag, std::process::id())
}

#[test]
fn attach_arm_disarm_cycle() {
    let name = test_name("cycle");
    let monitor = RtMonitor::attach_named(&name).unwrap();
    assert!(!monitor.is_enabled());

    monitor.arm();
    assert!(monitor.is_enabled());
    monitor.record().record(ForbiddenFn::Malloc);
    monitor.record().record(ForbiddenFn::Nanosleep);

    let mask = monitor.disarm();
    assert!(!monitor.is_enabled());
    assert_eq!(
        mask,
        ForbiddenFn::Malloc.bit() | ForbiddenFn::Nanosleep.bit()
    );

    monitor.detach().unwrap();
}

#[test]
fn second_attach_preserves_state() {
    let name = test_name("preserve");
    let first = RtMonitor::attach_named(&name).unwrap();
    first.arm();
    first.record().record(ForbiddenFn::SemWait);

    // A second attacher opens the existing segment; the record must come
    // back armed and with the bit intact, not re-initialized.
    let second = RtMonitor::attach_named(&name).unwrap();
    assert!(second.is_enabled());
    second.record().record(ForbiddenFn::Usleep);

    let mask = first.disarm();
    assert_eq!(mask, ForbiddenFn::SemWait.bit() | ForbiddenFn::Usleep.bit());

    detach(&name).unwrap();
}

#[test]
fn detach_is_idempotent() {
    let name = test_name("detach");
    let monitor = RtMonitor::attach_named(&name).unwrap();
    monitor.detach().unwrap();
    detach(&name).unwrap();
    detach(&name).unwrap();
}

#[test]
fn env_published_name_reaches_the_same_record() {
    let name = test_name("env");
    let monitor = RtMonitor::attach_named(&name).unwrap();
    assert_eq!(monitor.name(), name);
    monitor.arm();

    // What a monitored child does: read the published name, attach to it.
    std::env::set_var(RTMON_SHM_ENV, monitor.name());
    let published = std::env::var(RTMON_SHM_ENV).unwrap();
    let child_view = RtMonitor::attach_named(&published).unwrap();
    assert!(child_view.is_enabled());
    child_view.record().record(ForbiddenFn::Sleep);
    std::env::remove_var(RTMON_SHM_ENV);

    assert_eq!(monitor.disarm(), ForbiddenFn::Sleep.bit());
    monitor.detach().unwrap();
}

#[test]
fn forked_child_violations_survive_the_process_boundary() {
    let name = test_name("fork");
    let monitor = RtMonitor::attach_named(&name).unwrap();
    monitor.arm();

    // SAFETY: the child touches only the inherited mapping (atomic stores)
    // and `_exit`s; no allocation or locking happens between fork and exit,
    // so forking from the threaded test runner is fine.
    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            monitor.record().record(ForbiddenFn::Malloc);
            monitor.record().record(ForbiddenFn::PthreadMutexLock);
            unsafe { libc::_exit(0) };
        }
        ForkResult::Parent { child } => {
            let status = waitpid(child, None).unwrap();
            assert!(matches!(status, WaitStatus::Exited(_, 0)));

            let mask = monitor.disarm();
            assert_eq!(
                mask,
                ForbiddenFn::Malloc.bit() | ForbiddenFn::PthreadMutexLock.bit()
            );
            monitor.detach().unwrap();
        }
    }
}
