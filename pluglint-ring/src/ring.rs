// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-element header. `gap != 0` marks an unusable suffix before a
/// wraparound; its `size` counts the skipped bytes past the header.
#[repr(C)]
#[derive(Clone, Copy)]
struct Elmnt {
    size: u32,
    gap: u32,
}

pub(crate) const HDR: usize = mem::size_of::<Elmnt>();

#[inline]
const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Memory-ordering discipline for head/tail publication, fixed at
/// construction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum OrderingMode {
    /// Plain atomic loads and stores. Sufficient on strongly ordered
    /// targets where the caller has measured the difference to matter.
    Relaxed = 0,
    /// Release stores when publishing, acquire loads on the opposite
    /// index. The safe default.
    ReleaseAcquire = 1,
}

impl OrderingMode {
    #[inline]
    fn load(self) -> Ordering {
        match self {
            OrderingMode::Relaxed => Ordering::Relaxed,
            OrderingMode::ReleaseAcquire => Ordering::Acquire,
        }
    }

    #[inline]
    fn store(self) -> Ordering {
        match self {
            OrderingMode::Relaxed => Ordering::Relaxed,
            OrderingMode::ReleaseAcquire => Ordering::Release,
        }
    }
}

/// The fixed-layout control block at the start of a ring allocation.
///
/// `rsvd`/`gapd` are scratch carried from a reserve to its commit; only the
/// producer touches them, with relaxed ordering. They are atomics so the
/// whole header is interior-mutable and shared references to it stay sound.
#[repr(C)]
pub(crate) struct RingHeader {
    size: usize,
    mask: usize,
    rsvd: AtomicUsize,
    gapd: AtomicUsize,
    mode: u32,
    head: AtomicUsize,
    tail: AtomicUsize,
}

/// Rounds `minimum` up to the power-of-two body size actually used.
pub const fn body_size(minimum: usize) -> usize {
    let min = if minimum < 2 * HDR { 2 * HDR } else { minimum };
    min.next_power_of_two()
}

/// Bytes of backing memory a ring of at least `minimum` body bytes needs,
/// header included. For callers placing the ring in caller-supplied (e.g.
/// shared) memory.
pub const fn required_size(minimum: usize) -> usize {
    mem::size_of::<RingHeader>() + body_size(minimum)
}

/// A raw handle to a ring living at some base address.
///
/// All element operations live on [`Producer`](crate::Producer) and
/// [`Consumer`](crate::Consumer); `Ring` only covers placement:
/// initializing a region, attaching to an initialized one, and minting the
/// two endpoint handles.
#[derive(Clone, Copy)]
pub struct Ring {
    hdr: NonNull<RingHeader>,
}

impl Ring {
    /// Initializes a ring in caller-supplied memory and returns a handle
    /// to it.
    ///
    /// # Safety
    /// - `base` must be valid for reads and writes for
    ///   [`required_size`]`(body_size)` bytes, aligned to
    ///   `align_of::<usize>()`, and must stay valid and pinned for the
    ///   lifetime of every handle derived from the returned `Ring`.
    /// - `body_size` must be a power of two of at least 16 bytes (use
    ///   [`body_size`] to compute it).
    /// - No other thread or process may access the region during `init`.
    pub unsafe fn init(base: NonNull<u8>, body_size: usize, mode: OrderingMode) -> Ring {
        debug_assert!(body_size.is_power_of_two() && body_size >= 2 * HDR);
        debug_assert_eq!(base.as_ptr() as usize % mem::align_of::<RingHeader>(), 0);
        let hdr = base.cast::<RingHeader>();
        hdr.as_ptr().write(RingHeader {
            size: body_size,
            mask: body_size - 1,
            rsvd: AtomicUsize::new(0),
            gapd: AtomicUsize::new(0),
            mode: mode as u32,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        });
        Ring { hdr }
    }

    /// Attaches to a ring some other party already initialized at `base`
    /// (typically the creator of a shared mapping).
    ///
    /// # Safety
    /// `base` must point to memory initialized by [`Ring::init`] (in this
    /// process or through a shared mapping) and must stay valid and pinned
    /// for the lifetime of every handle derived from the returned `Ring`.
    pub unsafe fn from_raw(base: NonNull<u8>) -> Ring {
        Ring {
            hdr: base.cast::<RingHeader>(),
        }
    }

    /// Mints the producer endpoint.
    ///
    /// # Safety
    /// At most one live `Producer` may exist per ring, across all threads
    /// and processes attached to it.
    pub unsafe fn producer(self) -> crate::Producer {
        crate::channel::producer_from_ring(self, None)
    }

    /// Mints the consumer endpoint.
    ///
    /// # Safety
    /// At most one live `Consumer` may exist per ring, across all threads
    /// and processes attached to it.
    pub unsafe fn consumer(self) -> crate::Consumer {
        crate::channel::consumer_from_ring(self, None)
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        // SAFETY: construction contracts guarantee an initialized header
        // that outlives the handle; all shared mutation goes through the
        // atomics inside it.
        unsafe { self.hdr.as_ref() }
    }

    #[inline]
    fn body(&self) -> *mut u8 {
        // The body starts right after the header.
        unsafe { self.hdr.as_ptr().add(1) as *mut u8 }
    }

    #[inline]
    fn mode(&self) -> OrderingMode {
        if self.header().mode == OrderingMode::Relaxed as u32 {
            OrderingMode::Relaxed
        } else {
            OrderingMode::ReleaseAcquire
        }
    }

    /// Largest contiguous region the producer may reserve, given `minimum`.
    ///
    /// Returns the payload pointer and the usable payload length
    /// (`>= minimum`), or `None` if no contiguous region of at least
    /// `minimum` bytes is free. A `minimum` greater than
    /// `body - 2 * HDR` can never succeed.
    ///
    /// # Safety
    /// Producer-side call: the caller must be the ring's single producer.
    pub(crate) unsafe fn write_reserve(&self, minimum: usize) -> Option<(*mut u8, usize)> {
        let h = self.header();
        let head = h.head.load(Ordering::Relaxed);
        let tail = h.tail.load(self.mode().load());
        let size = h.size;

        // One element header of separation so head never catches tail.
        let space = if head > tail {
            (tail.wrapping_sub(head) & h.mask) - HDR
        } else if head < tail {
            (tail - head) - HDR
        } else {
            size - HDR
        };

        let need = minimum.checked_add(HDR)?;
        let end = head + space;

        if end > size {
            // The free region wraps past the physical end of the body.
            let len1 = size - head;
            if len1 >= need {
                h.rsvd.store(len1, Ordering::Relaxed);
                h.gapd.store(0, Ordering::Relaxed);
                return Some((self.body().add(head + HDR), len1 - HDR));
            }
            // Too small before the end; retry from offset zero, paying the
            // suffix as a gap element.
            let len2 = end & h.mask;
            if len2 >= need {
                h.rsvd.store(len2, Ordering::Relaxed);
                h.gapd.store(len1, Ordering::Relaxed);
                return Some((self.body().add(HDR), len2 - HDR));
            }
            None
        } else {
            if space >= need {
                h.rsvd.store(space, Ordering::Relaxed);
                h.gapd.store(0, Ordering::Relaxed);
                return Some((self.body().add(head + HDR), space - HDR));
            }
            None
        }
    }

    /// Publishes `written` bytes of the region returned by the matching
    /// [`write_reserve`](Self::write_reserve) as one element.
    ///
    /// # Safety
    /// Producer-side call; must follow a successful `write_reserve` on the
    /// same handle with `written` no larger than the reserved length.
    pub(crate) unsafe fn write_commit(&self, written: usize) {
        let h = self.header();
        let head = h.head.load(Ordering::Relaxed);
        let gapd = h.gapd.load(Ordering::Relaxed);
        let rsvd = h.rsvd.load(Ordering::Relaxed);
        debug_assert!(written + HDR <= rsvd);

        if gapd > 0 {
            // Mark the unusable suffix so the reader can skip it.
            let gap = Elmnt {
                size: (gapd - HDR) as u32,
                gap: 1,
            };
            (self.body().add(head) as *mut Elmnt).write(gap);
        }

        let at = (head + gapd) & h.mask;
        let elmnt = Elmnt {
            size: written as u32,
            gap: 0,
        };
        (self.body().add(at) as *mut Elmnt).write(elmnt);

        let head_new = (head + gapd + align8(HDR + written)) & h.mask;
        h.head.store(head_new, self.mode().store());
    }

    /// Next unread element, with gap records skipped and discarded.
    ///
    /// # Safety
    /// Consumer-side call: the caller must be the ring's single consumer.
    pub(crate) unsafe fn read_peek(&self) -> Option<(*const u8, usize)> {
        let h = self.header();
        loop {
            let head = h.head.load(self.mode().load());
            let tail = h.tail.load(Ordering::Relaxed);
            let space = if head > tail {
                head - tail
            } else {
                head.wrapping_sub(tail) & h.mask
            };
            if space == 0 {
                return None;
            }

            let elmnt = (self.body().add(tail) as *const Elmnt).read();
            if elmnt.gap != 0 {
                // The gap and the element after it were published by one
                // head store, so advancing here always uncovers data.
                let tail_new = (tail + align8(HDR + elmnt.size as usize)) & h.mask;
                h.tail.store(tail_new, self.mode().store());
                continue;
            }

            return Some((self.body().add(tail + HDR), elmnt.size as usize));
        }
    }

    /// Consumes the element returned by the matching
    /// [`read_peek`](Self::read_peek).
    ///
    /// # Safety
    /// Consumer-side call; must follow a successful `read_peek` on the
    /// same handle.
    pub(crate) unsafe fn read_commit(&self) {
        let h = self.header();
        let tail = h.tail.load(Ordering::Relaxed);
        let elmnt = (self.body().add(tail) as *const Elmnt).read();
        debug_assert_eq!(elmnt.gap, 0);
        let tail_new = (tail + align8(HDR + elmnt.size as usize)) & h.mask;
        h.tail.store(tail_new, self.mode().store());
    }
}
