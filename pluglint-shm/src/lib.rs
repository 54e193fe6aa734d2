// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! POSIX shared memory segments and mappings.
//!
//! The linter shares two kinds of state across thread and process
//! boundaries: the realtime-violation record (visible to interposed calls
//! inside the monitored plugin, including in a forked child) and,
//! optionally, ring buffers placed in caller-supplied shared memory. Both
//! sit on the same primitive: a file-backed segment mapped with
//! `MAP_SHARED`.
//!
//! Segment names are owned by the attaching harness. Dropping a handle or
//! a mapping never unlinks the name; unlink is an explicit, idempotent
//! operation ([`NamedShmHandle::unlink`]).

#![cfg(unix)]

mod mem;

pub use mem::{
    page_aligned_size, FileBackedHandle, MappedMem, MemoryHandle, NamedShmHandle, ShmHandle,
};
