// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lock-free single-producer/single-consumer byte queue with
//! variable-length elements.
//!
//! The linter hands work items from a simulated realtime thread to a worker
//! thread (and results back) through two of these rings, one per direction.
//! Neither side ever blocks: a full ring answers `None` to the producer, an
//! empty ring answers `None` to the consumer, and both simply try again on
//! their own schedule.
//!
//! # Layout
//!
//! A fixed header followed by a power-of-two byte body:
//!
//! ```text
//! +-----------+--------------------------------------------------+
//! | RingHeader|                     body                         |
//! +-----------+--------------------------------------------------+
//! ```
//!
//! Each element is an 8-byte `{size, gap}` header followed by its payload.
//! When a reservation does not fit before the physical end of the body, the
//! producer publishes a `gap` element covering the unusable suffix and the
//! element itself at offset zero; readers skip gaps without surfacing them.
//! Offsets advance in 8-byte steps so element headers stay naturally
//! aligned.
//!
//! Because the header and body are one contiguous block, a ring can live in
//! heap memory ([`channel`]) or in caller-supplied memory such as a shared
//! mapping ([`Ring::init`] / [`Ring::from_raw`]), with
//! [`required_size`] giving the allocation size.
//!
//! # Memory ordering
//!
//! [`OrderingMode`] is fixed at construction: `ReleaseAcquire` publishes
//! head/tail with release stores and reads the opposite index with acquire
//! loads; `Relaxed` uses plain atomic load/store for targets where that is
//! already enough.

mod channel;
mod ring;

pub use channel::{channel, Consumer, Producer, ReadGrant, WriteGrant};
pub use ring::{body_size, required_size, OrderingMode, Ring};
