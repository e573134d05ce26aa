use core::ffi::c_void;
use core::ptr::NonNull;

use log::trace;
use rustix::fd::AsFd;
use rustix::io::Errno;
use rustix::mm::{MapFlags, ProtFlags};

use crate::err::Error;

/// A shared read/write mapping of one region of the ring file descriptor.
pub struct Mapping {
    ptr: NonNull<c_void>,
    len: usize,
}

impl Mapping {
    /// Maps `len` bytes of the ring at the kernel-defined `offset`
    /// (`IORING_OFF_SQ_RING`, `IORING_OFF_CQ_RING` or `IORING_OFF_SQES`).
    pub fn new<Fd: AsFd>(fd: Fd, offset: u64, len: usize) -> Result<Self, Error> {
        // SAFETY: a fresh shared mapping chosen by the kernel aliases no
        // existing Rust allocation.
        let addr = unsafe {
            rustix::mm::mmap(
                core::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED | MapFlags::POPULATE,
                fd,
                offset,
            )
        }
        .map_err(Error::Mmap)?;

        let ptr = NonNull::new(addr).ok_or(Error::Mmap(Errno::INVAL))?;
        trace!("mapped ring region {offset:#x}: {len} bytes at {ptr:p}");
        Ok(Self { ptr, len })
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }

    /// Pointer to a `T` living `offset` bytes into the mapping.
    ///
    /// # Safety
    /// `offset` must come from the kernel-provided ring offsets for this
    /// mapping, so that it is in bounds and suitably aligned for `T`.
    #[must_use]
    pub unsafe fn at<T>(&self, offset: u32) -> *mut T {
        debug_assert!((offset as usize) < self.len);
        unsafe { self.as_ptr().add(offset as usize).cast() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe a mapping created by `Mapping::new`.
        // Nothing useful can be done with a munmap failure here.
        let _ = unsafe { rustix::mm::munmap(self.ptr.as_ptr(), self.len) };
    }
}
