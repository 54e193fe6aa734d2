// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::record::ViolationRecord;
use anyhow::Context;
use pluglint_shm::{page_aligned_size, FileBackedHandle, MappedMem, NamedShmHandle};
use std::ffi::CString;
use std::io;
use tracing::debug;

/// The segment name for a lint run owned by process `pid`.
pub fn segment_name(pid: u32) -> String {
    format!("/pluglint-rtmon-{pid}")
}

/// Harness-side handle to the shared violation record.
///
/// Attaching creates the named segment if absent (initializing the record)
/// or opens the existing one (preserving its state). Dropping the handle
/// unmaps but does not unlink; the segment stays until [`RtMonitor::detach`]
/// or [`detach`].
pub struct RtMonitor {
    map: MappedMem<NamedShmHandle>,
}

impl RtMonitor {
    /// Attaches to this process's own segment.
    pub fn attach() -> anyhow::Result<RtMonitor> {
        Self::attach_named(&segment_name(std::process::id()))
    }

    /// Attaches to an explicitly named segment (e.g. a name received
    /// through [`RTMON_SHM_ENV`](crate::RTMON_SHM_ENV)).
    pub fn attach_named(name: &str) -> anyhow::Result<RtMonitor> {
        let path = CString::new(name).context("segment name contains a NUL byte")?;
        let size = page_aligned_size(ViolationRecord::SIZE);
        let handle = NamedShmHandle::create_or_open(path, size)
            .with_context(|| format!("failed to attach violation segment {name}"))?;
        let created = handle.created();
        let map = handle
            .map()
            .with_context(|| format!("failed to map violation segment {name}"))?;

        let monitor = RtMonitor { map };
        if created {
            monitor.record().reset();
            debug!(name, "created violation segment");
        } else {
            debug!(name, "opened existing violation segment");
        }
        Ok(monitor)
    }

    /// The shared record inside the segment.
    pub fn record(&self) -> &ViolationRecord {
        // SAFETY: the mapping is at least a page, page aligned, and either
        // fresh zero pages (a valid disabled record) or written exclusively
        // through ViolationRecord's atomics.
        unsafe { ViolationRecord::from_ptr(self.map.as_ptr().as_ptr()) }
    }

    /// The segment name, for publishing to monitored children via
    /// [`RTMON_SHM_ENV`](crate::RTMON_SHM_ENV).
    pub fn name(&self) -> &str {
        self.map.get_path().to_str().unwrap_or_default()
    }

    /// Starts a monitored window. See [`ViolationRecord::arm`].
    pub fn arm(&self) {
        self.record().arm();
    }

    /// Ends a monitored window, returning the accumulated mask.
    pub fn disarm(&self) -> u32 {
        self.record().disarm()
    }

    /// Re-enables recording without clearing the mask.
    pub fn resume(&self) {
        self.record().resume();
    }

    /// Disables recording without snapshotting the mask.
    pub fn pause(&self) {
        self.record().pause();
    }

    pub fn is_enabled(&self) -> bool {
        self.record().is_enabled()
    }

    /// Unlinks this monitor's segment and drops the handle. Idempotent at
    /// the name level: a concurrent or earlier unlink is not an error.
    pub fn detach(self) -> io::Result<()> {
        let path = self.map.get_path().clone();
        drop(self);
        NamedShmHandle::unlink(&path)
    }
}

/// Unlinks a violation segment by name. Idempotent.
pub fn detach(name: &str) -> io::Result<()> {
    let path = CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "segment name contains NUL"))?;
    NamedShmHandle::unlink(&path)
}
