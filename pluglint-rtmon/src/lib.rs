// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Realtime-safety violation monitoring.
//!
//! While the linter drives a plugin through a lifecycle phase that must be
//! hard-RT-capable, an interposition shim (the `pluglint-rtmon-preload`
//! cdylib) observes every call the plugin makes into a fixed catalogue of
//! forbidden functions: heap allocation, blocking synchronization, and
//! sleeping. The shim reports through a [`ViolationRecord`] in a named
//! shared memory segment, so the harness can read the verdict even when the
//! plugin ran in a forked (possibly crashed) child process.
//!
//! The harness wraps each monitored phase in [`RtMonitor::arm`] /
//! [`RtMonitor::disarm`] and maps the returned mask to symbol names with
//! [`symbols_in`] for reporting.
//!
//! Segment names are scoped by process identity so concurrent lint runs do
//! not collide. A forked child has a different pid, so the harness passes
//! the exact segment name down through the [`RTMON_SHM_ENV`] environment
//! variable; the shim falls back to its own pid-derived name when the
//! variable is absent.
//!
//! This is a best-effort diagnostic: if the segment cannot be attached the
//! harness downgrades realtime checking for that run instead of aborting,
//! and the shim forwards every call unchanged no matter what.

mod record;

pub use record::{symbols_in, ForbiddenFn, ViolationRecord};

#[cfg(feature = "monitor")]
mod monitor;

#[cfg(feature = "monitor")]
pub use monitor::{detach, segment_name, RtMonitor};

/// Environment variable through which the harness publishes the segment
/// name to monitored child processes.
pub const RTMON_SHM_ENV: &str = "PLUGLINT_RTMON_SHM";
