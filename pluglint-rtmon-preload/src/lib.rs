// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Interposition shim over the forbidden-in-realtime libc/pthread symbols.
//!
//! Built as a `cdylib` and injected into the monitored process with
//! `LD_PRELOAD`. Every exported symbol resolves the real implementation
//! behind it with `dlsym(RTLD_NEXT, ...)` exactly once, reports the call
//! into the shared `ViolationRecord` when a monitored window is armed, and
//! forwards with unchanged arguments and return value. The shim observes;
//! it never changes the target's behavior.
//!
//! Two reentrancy hazards shape the implementation:
//!
//! - `dlsym` itself may allocate. A hook that re-enters an allocation
//!   symbol while that symbol is still being resolved is served from a
//!   small static bump arena instead of recursing.
//! - Attaching the shared segment allocates too (environment lookup, name
//!   formatting). The attach is guarded by a non-blocking one-shot state
//!   machine — never a mutex, since mutex operations are themselves
//!   intercepted — and any call that finds the guard busy forwards without
//!   observing.
//!
//! This is a best-effort diagnostic. If a symbol cannot be resolved or the
//! segment cannot be attached, the shim logs one line straight to stderr
//! (`write(2)`, no allocation) and degrades to pass-through; the monitored
//! program always keeps running.

#![cfg(unix)]

mod bootstrap;
mod shim;

#[cfg(not(test))]
mod hooks;
