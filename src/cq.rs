use core::sync::atomic::{AtomicU32, Ordering};

use rustix::io_uring::io_cqring_offsets;

use crate::io_uring_cqe;
use crate::mmap::Mapping;

/// User-space half of the completion ring.
pub struct CompletionQueue {
    khead: *const AtomicU32,
    ktail: *const AtomicU32,
    koverflow: *const AtomicU32,
    cqes: *const io_uring_cqe,
    ring_mask: u32,
    ring_entries: u32,
}

impl CompletionQueue {
    /// # Safety
    /// `ring` must be the mapping holding the CQ ring described by `offsets`
    /// and must outlive the returned queue.
    #[must_use]
    pub unsafe fn new(ring: &Mapping, offsets: &io_cqring_offsets) -> Self {
        unsafe {
            Self {
                khead: ring.at::<AtomicU32>(offsets.head),
                ktail: ring.at::<AtomicU32>(offsets.tail),
                koverflow: ring.at::<AtomicU32>(offsets.overflow),
                cqes: ring.at::<io_uring_cqe>(offsets.cqes),
                ring_mask: *ring.at::<u32>(offsets.ring_mask),
                ring_entries: *ring.at::<u32>(offsets.ring_entries),
            }
        }
    }

    #[must_use]
    pub fn ring_entries(&self) -> u32 {
        self.ring_entries
    }

    fn head(&self) -> u32 {
        // Only this side writes the head.
        unsafe { (*self.khead).load(Ordering::Relaxed) }
    }

    fn tail(&self) -> u32 {
        unsafe { (*self.ktail).load(Ordering::Acquire) }
    }

    #[must_use]
    pub fn ready(&self) -> u32 {
        self.tail().wrapping_sub(self.head())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ready() == 0
    }

    /// Copies out the oldest unseen entry without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<io_uring_cqe> {
        let head = self.head();
        if self.tail() == head {
            return None;
        }

        let index = head & self.ring_mask;
        // SAFETY: entries between head and the acquired tail are fully
        // written by the kernel and will not be touched until head moves.
        Some(unsafe { self.cqes.add(index as usize).read() })
    }

    /// Marks `count` entries as seen, handing their slots back to the kernel.
    pub fn advance(&mut self, count: u32) {
        let head = self.head().wrapping_add(count);
        unsafe { (*self.khead).store(head, Ordering::Release) };
    }

    /// Consumes the oldest entry: read, then mark seen.
    pub fn pop(&mut self) -> Option<io_uring_cqe> {
        let cqe = self.peek()?;
        self.advance(1);
        Some(cqe)
    }

    #[must_use]
    pub fn overflow_count(&self) -> u32 {
        unsafe { (*self.koverflow).load(Ordering::Relaxed) }
    }
}
