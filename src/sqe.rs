//! Operation encoders: one [`PrepSqe`] type per operation kind.
//!
//! Adding an operation kind means adding a type here that writes the
//! kernel-defined fields for its opcode, plus a submit method on
//! [`crate::Ring`] if the operation needs resources kept alive.

use core::ffi::c_void;

use crate::handle::{open_how, OpenHow, SockAddr};
use crate::{io_uring_sqe, PrepSqe, Timespec};

/// Offset meaning "the descriptor's current position".
pub const CURRENT_POS: u64 = u64::MAX;

/// `struct iovec`.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Iovec {
    pub iov_base: *mut c_void,
    pub iov_len: usize,
}

impl Iovec {
    #[must_use]
    pub fn new(base: *mut c_void, len: usize) -> Self {
        Self {
            iov_base: base,
            iov_len: len,
        }
    }

    #[must_use]
    pub fn from_slice(buf: &mut [u8]) -> Self {
        Self::new(buf.as_mut_ptr().cast(), buf.len())
    }
}

pub struct Nop;

impl PrepSqe for Nop {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = crate::IORING_OP_NOP;
        sqe.fd = -1;
    }
}

pub struct OpenAt2<'a> {
    dirfd: i32,
    how: &'a OpenHow,
}

impl<'a> OpenAt2<'a> {
    #[must_use]
    pub fn new(dirfd: i32, how: &'a OpenHow) -> Self {
        Self { dirfd, how }
    }
}

impl PrepSqe for OpenAt2<'_> {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = crate::IORING_OP_OPENAT2;
        sqe.fd = self.dirfd;
        sqe.addr = self.how.path_ptr() as u64;
        sqe.len = core::mem::size_of::<open_how>() as u32;
        sqe.off = self.how.how_ptr() as u64;
    }
}

pub struct Close {
    fd: i32,
}

impl Close {
    #[must_use]
    pub fn new(fd: i32) -> Self {
        Self { fd }
    }
}

impl PrepSqe for Close {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = crate::IORING_OP_CLOSE;
        sqe.fd = self.fd;
    }
}

pub struct PollAdd {
    fd: i32,
    mask: u32,
}

impl PollAdd {
    /// `mask` is a native `POLL*` bitmask.
    #[must_use]
    pub fn new(fd: i32, mask: u32) -> Self {
        Self { fd, mask }
    }
}

impl PrepSqe for PollAdd {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = crate::IORING_OP_POLL_ADD;
        sqe.fd = self.fd;
        // poll32_events is read as two swapped half-words on big-endian.
        #[cfg(target_endian = "big")]
        let mask = self.mask.rotate_left(16);
        #[cfg(target_endian = "little")]
        let mask = self.mask;
        sqe.rw_flags = mask as i32;
    }
}

pub struct Readv<'a> {
    fd: i32,
    iovecs: &'a [Iovec],
    offset: u64,
}

impl<'a> Readv<'a> {
    #[must_use]
    pub fn new(fd: i32, iovecs: &'a [Iovec], offset: u64) -> Self {
        Self { fd, iovecs, offset }
    }
}

impl PrepSqe for Readv<'_> {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = crate::IORING_OP_READV;
        sqe.fd = self.fd;
        sqe.off = self.offset;
        sqe.addr = self.iovecs.as_ptr() as u64;
        sqe.len = self.iovecs.len() as u32;
    }
}

pub struct Writev<'a> {
    fd: i32,
    iovecs: &'a [Iovec],
    offset: u64,
}

impl<'a> Writev<'a> {
    #[must_use]
    pub fn new(fd: i32, iovecs: &'a [Iovec], offset: u64) -> Self {
        Self { fd, iovecs, offset }
    }
}

impl PrepSqe for Writev<'_> {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = crate::IORING_OP_WRITEV;
        sqe.fd = self.fd;
        sqe.off = self.offset;
        sqe.addr = self.iovecs.as_ptr() as u64;
        sqe.len = self.iovecs.len() as u32;
    }
}

/// Read into a region of registered buffer `buf_index`.
pub struct ReadFixed {
    fd: i32,
    buf: *mut u8,
    len: u32,
    offset: u64,
    buf_index: u16,
}

impl ReadFixed {
    #[must_use]
    pub fn new(fd: i32, buf: *mut u8, len: u32, offset: u64, buf_index: u16) -> Self {
        Self {
            fd,
            buf,
            len,
            offset,
            buf_index,
        }
    }
}

impl PrepSqe for ReadFixed {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = crate::IORING_OP_READ_FIXED;
        sqe.fd = self.fd;
        sqe.off = self.offset;
        sqe.addr = self.buf as u64;
        sqe.len = self.len;
        sqe.buf_index = self.buf_index;
    }
}

/// Write from a region of registered buffer `buf_index`.
pub struct WriteFixed {
    fd: i32,
    buf: *const u8,
    len: u32,
    offset: u64,
    buf_index: u16,
}

impl WriteFixed {
    #[must_use]
    pub fn new(fd: i32, buf: *const u8, len: u32, offset: u64, buf_index: u16) -> Self {
        Self {
            fd,
            buf,
            len,
            offset,
            buf_index,
        }
    }
}

impl PrepSqe for WriteFixed {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = crate::IORING_OP_WRITE_FIXED;
        sqe.fd = self.fd;
        sqe.off = self.offset;
        sqe.addr = self.buf as u64;
        sqe.len = self.len;
        sqe.buf_index = self.buf_index;
    }
}

/// Moves `len` bytes from `fd_in` to `fd_out`, at each descriptor's current
/// position. One side must be a pipe.
pub struct Splice {
    fd_in: i32,
    fd_out: i32,
    len: u32,
}

impl Splice {
    #[must_use]
    pub fn new(fd_in: i32, fd_out: i32, len: u32) -> Self {
        Self { fd_in, fd_out, len }
    }
}

impl PrepSqe for Splice {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = crate::IORING_OP_SPLICE;
        sqe.fd = self.fd_out;
        sqe.off = CURRENT_POS;
        sqe.addr = CURRENT_POS;
        sqe.len = self.len;
        sqe.splice_fd_in = self.fd_in;
        sqe.rw_flags = 0;
    }
}

pub struct Connect<'a> {
    fd: i32,
    addr: &'a SockAddr,
}

impl<'a> Connect<'a> {
    #[must_use]
    pub fn new(fd: i32, addr: &'a SockAddr) -> Self {
        Self { fd, addr }
    }
}

impl PrepSqe for Connect<'_> {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = crate::IORING_OP_CONNECT;
        sqe.fd = self.fd;
        sqe.addr = self.addr.addr_ptr() as u64;
        sqe.off = u64::from(self.addr.len());
    }
}

/// Accepts a connection on `fd`; the kernel writes the peer address and its
/// length into `addr`.
pub struct Accept<'a> {
    fd: i32,
    addr: &'a SockAddr,
    flags: i32,
}

impl<'a> Accept<'a> {
    #[must_use]
    pub fn new(fd: i32, addr: &'a SockAddr) -> Self {
        Self {
            fd,
            addr,
            flags: crate::SOCK_CLOEXEC,
        }
    }

    pub fn set_flags(&mut self, flags: i32) {
        self.flags = flags;
    }
}

impl PrepSqe for Accept<'_> {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = crate::IORING_OP_ACCEPT;
        sqe.fd = self.fd;
        sqe.addr = self.addr.addr_ptr() as u64;
        sqe.off = self.addr.len_ptr() as u64;
        sqe.rw_flags = self.flags;
    }
}

/// Best-effort cancellation of the entry whose SQE carried `user_data`.
///
/// [`crate::Ring::cancel`] resolves a [`crate::RequestId`] to that value.
pub struct AsyncCancel {
    target: u64,
}

impl AsyncCancel {
    #[must_use]
    pub fn new(user_data: u64) -> Self {
        Self { target: user_data }
    }
}

impl PrepSqe for AsyncCancel {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = crate::IORING_OP_ASYNC_CANCEL;
        sqe.fd = -1;
        sqe.addr = self.target;
    }
}

/// Completes after `count` other completions or when `ts` elapses.
pub(crate) struct Timeout<'a> {
    ts: &'a Timespec,
    count: u64,
}

impl<'a> Timeout<'a> {
    pub(crate) fn new(ts: &'a Timespec, count: u64) -> Self {
        Self { ts, count }
    }
}

impl PrepSqe for Timeout<'_> {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = crate::IORING_OP_TIMEOUT;
        sqe.fd = -1;
        sqe.addr = self.ts as *const Timespec as u64;
        sqe.len = 1;
        sqe.off = self.count;
    }
}
