// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::ring::{body_size, OrderingMode, Ring};
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

/// Heap backing for a ring created by [`channel`]. Freed when the last
/// endpoint drops.
pub(crate) struct OwnedRegion {
    base: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the region is plain bytes; the ring inside it synchronizes itself.
unsafe impl Send for OwnedRegion {}
unsafe impl Sync for OwnedRegion {}

impl Drop for OwnedRegion {
    fn drop(&mut self) {
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

/// The writing endpoint of a ring. One per ring; `Send` but not `Sync`.
pub struct Producer {
    ring: Ring,
    _region: Option<Arc<OwnedRegion>>,
}

/// The reading endpoint of a ring. One per ring; `Send` but not `Sync`.
pub struct Consumer {
    ring: Ring,
    _region: Option<Arc<OwnedRegion>>,
}

// SAFETY: each endpoint is the single handle for its side; the ring's
// atomics order the cross-thread handoff. Neither endpoint is Sync, so the
// single-producer/single-consumer contract holds per endpoint.
unsafe impl Send for Producer {}
unsafe impl Send for Consumer {}

pub(crate) fn producer_from_ring(ring: Ring, region: Option<Arc<OwnedRegion>>) -> Producer {
    Producer {
        ring,
        _region: region,
    }
}

pub(crate) fn consumer_from_ring(ring: Ring, region: Option<Arc<OwnedRegion>>) -> Consumer {
    Consumer {
        ring,
        _region: region,
    }
}

/// Creates a heap-owned ring with at least `minimum` body bytes and returns
/// its two endpoints.
pub fn channel(minimum: usize, mode: OrderingMode) -> (Producer, Consumer) {
    let body = body_size(minimum);
    let total = crate::ring::required_size(minimum);
    let layout = Layout::from_size_align(total, mem::align_of::<usize>())
        .expect("ring size overflows Layout");
    let base = match NonNull::new(unsafe { alloc(layout) }) {
        Some(base) => base,
        None => handle_alloc_error(layout),
    };
    // SAFETY: freshly allocated, correctly sized and aligned, not shared.
    let ring = unsafe { Ring::init(base, body, mode) };
    let region = Arc::new(OwnedRegion { base, layout });
    (
        producer_from_ring(ring, Some(region.clone())),
        consumer_from_ring(ring, Some(region)),
    )
}

/// A reserved, not yet published write region.
///
/// Derefs to the full usable region, which may be larger than the requested
/// minimum; [`commit`](WriteGrant::commit) publishes a prefix of it.
/// Dropping the grant without committing publishes nothing.
pub struct WriteGrant<'a> {
    ring: Ring,
    ptr: *mut u8,
    len: usize,
    _producer: &'a mut Producer,
}

impl WriteGrant<'_> {
    /// Publishes the first `written` bytes of the region as one element.
    ///
    /// # Panics
    /// Panics if `written` exceeds the granted length.
    pub fn commit(self, written: usize) {
        assert!(
            written <= self.len,
            "commit of {written} bytes exceeds grant of {} bytes",
            self.len
        );
        // SAFETY: `self` was minted by the producer holding the exclusive
        // borrow, right after a successful reserve.
        unsafe { self.ring.write_commit(written) };
    }
}

impl Deref for WriteGrant<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the region is reserved for this producer until commit.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl DerefMut for WriteGrant<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; the consumer cannot see unpublished bytes.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

/// A peeked, not yet consumed element. Dropping the grant without
/// [`consume`](ReadGrant::consume) leaves the element in the ring.
pub struct ReadGrant<'a> {
    ring: Ring,
    ptr: *const u8,
    len: usize,
    _consumer: &'a mut Consumer,
}

impl ReadGrant<'_> {
    /// Marks the element consumed, releasing its bytes to the producer.
    pub fn consume(self) {
        // SAFETY: minted right after a successful peek on this consumer.
        unsafe { self.ring.read_commit() };
    }
}

impl Deref for ReadGrant<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: published element bytes; the producer cannot reuse them
        // until the tail advances.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Producer {
    /// Reserves a writable region of at least `minimum` contiguous bytes.
    ///
    /// Returns `None` when no such region is currently free; the caller
    /// retries later or drops the item. A `minimum` larger than
    /// `body_size - 16` can never succeed.
    pub fn reserve(&mut self, minimum: usize) -> Option<WriteGrant<'_>> {
        let ring = self.ring;
        // SAFETY: `&mut self` makes this the producer side's only call.
        let (ptr, len) = unsafe { ring.write_reserve(minimum)? };
        Some(WriteGrant {
            ring,
            ptr,
            len,
            _producer: self,
        })
    }

    /// Convenience for payloads already in a slice: reserve, copy, commit.
    ///
    /// Returns `false` when the ring has no room right now.
    pub fn push(&mut self, payload: &[u8]) -> bool {
        match self.reserve(payload.len()) {
            Some(mut grant) => {
                grant[..payload.len()].copy_from_slice(payload);
                grant.commit(payload.len());
                true
            }
            None => false,
        }
    }
}

impl Consumer {
    /// Returns the next unread element, or `None` if nothing complete is
    /// available. Gap records are skipped internally and never surfaced.
    pub fn peek(&mut self) -> Option<ReadGrant<'_>> {
        let ring = self.ring;
        // SAFETY: `&mut self` makes this the consumer side's only call.
        let (ptr, len) = unsafe { ring.read_peek()? };
        Some(ReadGrant {
            ring,
            ptr,
            len,
            _consumer: self,
        })
    }

    /// Convenience: peek, copy out, consume.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        let grant = self.peek()?;
        let out = grant.to_vec();
        grant.consume();
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_in_order_over_size_range() {
        let (mut tx, mut rx) = channel(8192, OrderingMode::ReleaseAcquire);
        let sizes = [0usize, 1, 7, 8, 9, 63, 64, 65, 1000, 4080];
        for (round, &len) in sizes.iter().enumerate() {
            let payload: Vec<u8> = (0..len).map(|i| (i + round) as u8).collect();
            assert!(tx.push(&payload), "push of {len} bytes failed");
            let got = rx.pop().expect("element must be readable");
            assert_eq!(got, payload);
        }
        assert!(rx.pop().is_none());
    }

    #[test]
    fn relaxed_mode_roundtrip() {
        let (mut tx, mut rx) = channel(256, OrderingMode::Relaxed);
        assert!(tx.push(b"one"));
        assert!(tx.push(b"two"));
        assert_eq!(rx.pop().unwrap(), b"one");
        assert_eq!(rx.pop().unwrap(), b"two");
        assert!(rx.pop().is_none());
    }

    #[test]
    fn reserve_reports_maximum_region() {
        let (mut tx, _rx) = channel(64, OrderingMode::ReleaseAcquire);
        let grant = tx.reserve(8).unwrap();
        // Empty 64-byte ring: one header of separation plus this element's
        // header leaves 48 usable bytes.
        assert_eq!(grant.len(), 48);
    }

    #[test]
    fn commit_less_than_reserved() {
        let (mut tx, mut rx) = channel(64, OrderingMode::ReleaseAcquire);
        let mut grant = tx.reserve(16).unwrap();
        grant[..3].copy_from_slice(b"abc");
        grant.commit(3);
        assert_eq!(rx.pop().unwrap(), b"abc");
    }

    #[test]
    #[should_panic(expected = "exceeds grant")]
    fn overcommit_panics() {
        let (mut tx, _rx) = channel(64, OrderingMode::ReleaseAcquire);
        let grant = tx.reserve(8).unwrap();
        let len = grant.len();
        grant.commit(len + 1);
    }

    #[test]
    fn dropped_grants_publish_and_consume_nothing() {
        let (mut tx, mut rx) = channel(64, OrderingMode::ReleaseAcquire);
        drop(tx.reserve(8).unwrap());
        assert!(rx.pop().is_none());

        assert!(tx.push(b"kept"));
        drop(rx.peek().unwrap());
        assert_eq!(rx.pop().unwrap(), b"kept");
    }

    #[test]
    fn oversized_element_is_permanent_failure() {
        let (mut tx, mut rx) = channel(64, OrderingMode::ReleaseAcquire);
        // 64-byte body can never hold a 49-byte element.
        assert!(tx.reserve(49).is_none());
        // Draining changes nothing; the failure is structural.
        assert!(rx.pop().is_none());
        assert!(tx.reserve(49).is_none());
        // The boundary case does fit.
        assert!(tx.reserve(48).is_some());
    }

    #[test]
    fn full_ring_rejects_then_accepts_after_drain() {
        let (mut tx, mut rx) = channel(64, OrderingMode::ReleaseAcquire);
        assert!(tx.push(&[1u8; 16]));
        assert!(tx.push(&[2u8; 16]));
        // 2 * (8 + 16) = 48 of 56 usable bytes gone; a 16-byte element
        // needs 24 more.
        assert!(!tx.push(&[3u8; 16]));
        assert_eq!(rx.pop().unwrap(), [1u8; 16]);
        // Still no room: 16 bytes remain before the physical end and 16
        // after it, and the element needs 24 contiguous.
        assert!(!tx.push(&[3u8; 16]));
        assert_eq!(rx.pop().unwrap(), [2u8; 16]);
        assert!(tx.push(&[3u8; 16]));
        assert_eq!(rx.pop().unwrap(), [3u8; 16]);
        assert!(rx.pop().is_none());
    }

    #[test]
    fn wraparound_gap_is_never_surfaced() {
        let (mut tx, mut rx) = channel(64, OrderingMode::ReleaseAcquire);

        // Walk head and tail to offset 48.
        for k in 0..3u8 {
            assert!(tx.push(&[k; 8]));
            assert_eq!(rx.pop().unwrap(), [k; 8]);
        }

        // 24 bytes do not fit in the 16-byte suffix, so the producer pays
        // it as a gap and places the element at offset zero.
        let payload: Vec<u8> = (0u8..24).collect();
        let mut grant = tx.reserve(24).expect("wrapped reservation must fit");
        assert_eq!(grant.len(), 32);
        grant[..24].copy_from_slice(&payload);
        grant.commit(24);

        // The reader sees exactly the payload, not the gap.
        let got = rx.pop().unwrap();
        assert_eq!(got, payload);
        assert!(rx.pop().is_none());
    }

    #[test]
    fn endpoints_move_across_threads() {
        let (mut tx, mut rx) = channel(1024, OrderingMode::ReleaseAcquire);
        let writer = std::thread::spawn(move || {
            for i in 0..100u32 {
                while !tx.push(&i.to_le_bytes()) {
                    std::thread::yield_now();
                }
            }
        });
        let mut next = 0u32;
        while next < 100 {
            if let Some(bytes) = rx.pop() {
                assert_eq!(bytes, next.to_le_bytes());
                next += 1;
            } else {
                std::thread::yield_now();
            }
        }
        writer.join().unwrap();
        assert!(rx.pop().is_none());
    }
}
