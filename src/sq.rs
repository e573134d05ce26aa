use core::sync::atomic::{AtomicU32, Ordering};

use rustix::io_uring::io_sqring_offsets;

use crate::io_uring_sqe;
use crate::mmap::Mapping;

/// User-space half of the submission ring.
///
/// Slots are handed out by advancing a private tail; the kernel only sees
/// them once [`SubmissionQueue::flush`] publishes that tail.
pub struct SubmissionQueue {
    khead: *const AtomicU32,
    ktail: *const AtomicU32,
    kflags: *const AtomicU32,
    kdropped: *const AtomicU32,
    sqes: *mut io_uring_sqe,
    ring_mask: u32,
    ring_entries: u32,
    sqe_tail: u32,
}

impl SubmissionQueue {
    /// # Safety
    /// `ring` must be the mapping at `IORING_OFF_SQ_RING` described by
    /// `offsets`, `sqes` the mapping at `IORING_OFF_SQES`, and both must
    /// outlive the returned queue.
    #[must_use]
    pub unsafe fn new(ring: &Mapping, offsets: &io_sqring_offsets, sqes: &Mapping) -> Self {
        unsafe {
            let ring_mask = *ring.at::<u32>(offsets.ring_mask);
            let ring_entries = *ring.at::<u32>(offsets.ring_entries);
            let ktail = ring.at::<AtomicU32>(offsets.tail);

            // Slot i of the SQE array always sits at index i of the
            // indirection array, so it is filled once here.
            let array = ring.at::<u32>(offsets.array);
            for i in 0..ring_entries {
                array.add(i as usize).write_volatile(i);
            }

            Self {
                khead: ring.at::<AtomicU32>(offsets.head),
                ktail,
                kflags: ring.at::<AtomicU32>(offsets.flags),
                kdropped: ring.at::<AtomicU32>(offsets.dropped),
                sqes: sqes.as_ptr().cast(),
                ring_mask,
                ring_entries,
                sqe_tail: (*ktail).load(Ordering::Relaxed),
            }
        }
    }

    #[must_use]
    pub fn ring_entries(&self) -> u32 {
        self.ring_entries
    }

    fn khead(&self) -> u32 {
        unsafe { (*self.khead).load(Ordering::Acquire) }
    }

    /// Entries handed out (published or not) that the kernel has not yet
    /// consumed.
    #[must_use]
    pub fn pending(&self) -> u32 {
        self.sqe_tail.wrapping_sub(self.khead())
    }

    #[must_use]
    pub fn space_left(&self) -> u32 {
        self.ring_entries - self.pending()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.space_left() == 0
    }

    /// Hands out the next free slot, zeroed. `None` when the ring is full.
    pub fn next_slot(&mut self) -> Option<&mut io_uring_sqe> {
        if self.is_full() {
            return None;
        }

        let index = self.sqe_tail & self.ring_mask;
        self.sqe_tail = self.sqe_tail.wrapping_add(1);

        // SAFETY: index is masked into the SQE array and the slot lies
        // between the kernel head and our tail, so the kernel is not reading it.
        let sqe = unsafe { &mut *self.sqes.add(index as usize) };
        *sqe = io_uring_sqe::default();
        Some(sqe)
    }

    /// Hands out a zeroed slot right after the last published entry. Slots
    /// handed out but not yet flushed move back by one to make room, so
    /// [`SubmissionQueue::publish_one`] exposes this entry alone.
    pub fn next_slot_before_unflushed(&mut self) -> Option<&mut io_uring_sqe> {
        if self.is_full() {
            return None;
        }

        // Only this side writes the tail.
        let published = unsafe { (*self.ktail).load(Ordering::Relaxed) };
        let mut pos = self.sqe_tail;
        while pos != published {
            let prev = pos.wrapping_sub(1);
            // SAFETY: both slots lie past the published tail, so the kernel
            // is not reading them.
            unsafe {
                let entry = *self.sqes.add((prev & self.ring_mask) as usize);
                *self.sqes.add((pos & self.ring_mask) as usize) = entry;
            }
            pos = prev;
        }
        self.sqe_tail = self.sqe_tail.wrapping_add(1);

        let sqe = unsafe { &mut *self.sqes.add((published & self.ring_mask) as usize) };
        *sqe = io_uring_sqe::default();
        Some(sqe)
    }

    /// Publishes the single entry after the current published tail.
    pub fn publish_one(&mut self) {
        unsafe {
            let tail = (*self.ktail).load(Ordering::Relaxed);
            debug_assert!(tail != self.sqe_tail);
            (*self.ktail).store(tail.wrapping_add(1), Ordering::Release);
        }
    }

    /// Entries handed out but not yet published.
    #[must_use]
    pub fn unflushed(&self) -> u32 {
        let published = unsafe { (*self.ktail).load(Ordering::Relaxed) };
        self.sqe_tail.wrapping_sub(published)
    }

    /// Publishes every handed-out slot to the kernel and returns how many
    /// entries are waiting to be consumed.
    pub fn flush(&mut self) -> u32 {
        unsafe { (*self.ktail).store(self.sqe_tail, Ordering::Release) };
        self.pending()
    }

    #[must_use]
    pub fn flags(&self) -> u32 {
        unsafe { (*self.kflags).load(Ordering::Relaxed) }
    }

    #[must_use]
    pub fn needs_wakeup(&self) -> bool {
        self.flags() & crate::IORING_SQ_NEED_WAKEUP != 0
    }

    #[must_use]
    pub fn cq_overflow(&self) -> bool {
        self.flags() & crate::IORING_SQ_CQ_OVERFLOW != 0
    }

    /// Entries the kernel discarded as invalid.
    #[must_use]
    pub fn dropped(&self) -> u32 {
        unsafe { (*self.kdropped).load(Ordering::Relaxed) }
    }
}
