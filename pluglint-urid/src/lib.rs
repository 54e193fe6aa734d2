// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lock-free URI interning.
//!
//! Latency-sensitive plugin callbacks compare URIs constantly; comparing
//! strings there is off the table. [`UridTable`] maps each URI to a stable
//! `u32` id once, so every later comparison is an integer compare.
//!
//! # Id model
//!
//! - id `0` is never assigned: it is the "could not be registered" sentinel.
//! - ids `1..nstats` belong to the well-known URIs passed at construction,
//!   in order (`nstats` = number of well-known URIs + 1).
//! - ids `>= nstats` are assigned dynamically as `nstats + slot_index` and
//!   are stable for the lifetime of the table.
//!
//! # Thread / realtime safety
//!
//! - [`intern`](UridTable::intern) is lock-free: a bounded probe over the
//!   slot array with one CAS per candidate slot, no locks, no blocking. It
//!   is safe to call from threads the linter does not control. The one
//!   caveat is the clone of a not-yet-interned string, which goes through
//!   the global allocator; pre-intern on a non-realtime thread when that
//!   matters.
//! - [`resolve`](UridTable::resolve) is wait-free: one atomic load plus a
//!   bounds check.
//! - Capacity is fixed at construction. The table never rehashes, never
//!   grows, and a populated slot never changes for the table's lifetime.

mod table;

pub use table::UridTable;
