//! A user-space view of an io_uring instance: a submission ring, a completion
//! ring, and the bookkeeping that ties each completion back to the request
//! that produced it.
//!
//! Every request carries a caller-chosen [`RequestId`]. Resources the kernel
//! reads or writes after the submitting call has returned (socket addresses,
//! `open_how` blocks, iovec arrays) are moved into the [`Ring`] and handed
//! back through the matching [`Completion`].

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod cq;
pub mod cqe;
pub mod err;
pub mod fixed;
pub mod handle;
pub mod id;
mod inflight;
pub mod mmap;
pub mod ring;
pub mod sq;
pub mod sqe;
mod tests;

pub use config::SetupBuilder;
pub use cqe::Completion;
pub use err::{Error, Result};
pub use fixed::FixedBuffer;
pub use handle::{Address, OpenHow, SockAddr};
pub use id::RequestId;
pub use inflight::Resource;
pub use ring::Ring;
pub use sqe::{
    Accept, AsyncCancel, Close, Connect, Iovec, Nop, OpenAt2, PollAdd, ReadFixed, Readv, Splice,
    WriteFixed, Writev,
};

pub use rustix::io_uring::{io_cqring_offsets, io_sqring_offsets};

pub const IORING_OFF_SQ_RING: u64 = 0;
pub const IORING_OFF_CQ_RING: u64 = 0x0800_0000;
pub const IORING_OFF_SQES: u64 = 0x1000_0000;

pub const AT_FDCWD: i32 = -100;

pub const IORING_OP_NOP: u8 = 0;
pub const IORING_OP_READV: u8 = 1;
pub const IORING_OP_WRITEV: u8 = 2;
pub const IORING_OP_READ_FIXED: u8 = 4;
pub const IORING_OP_WRITE_FIXED: u8 = 5;
pub const IORING_OP_POLL_ADD: u8 = 6;
pub const IORING_OP_TIMEOUT: u8 = 11;
pub const IORING_OP_ACCEPT: u8 = 13;
pub const IORING_OP_ASYNC_CANCEL: u8 = 14;
pub const IORING_OP_CONNECT: u8 = 16;
pub const IORING_OP_CLOSE: u8 = 19;
pub const IORING_OP_OPENAT2: u8 = 28;
pub const IORING_OP_SPLICE: u8 = 30;

pub const IORING_SQ_NEED_WAKEUP: u32 = 1 << 0;
pub const IORING_SQ_CQ_OVERFLOW: u32 = 1 << 1;

// Poll event flags
pub const POLLIN: u32 = 0x0001;
pub const POLLPRI: u32 = 0x0002;
pub const POLLOUT: u32 = 0x0004;
pub const POLLERR: u32 = 0x0008;
pub const POLLHUP: u32 = 0x0010;
pub const POLLNVAL: u32 = 0x0020;
pub const POLLRDHUP: u32 = 0x2000;

pub const SOCK_CLOEXEC: i32 = 0o2_000_000;

// Address families
pub const AF_UNIX: u16 = 1;
pub const AF_INET: u16 = 2;
pub const AF_INET6: u16 = 10;

/// Submission queue entry, laid out exactly as `struct io_uring_sqe`.
///
/// Unions are flattened to the member this crate writes: `off` doubles as
/// `addr2`, `addr` as `splice_off_in`, and `rw_flags` as `poll32_events`,
/// `accept_flags`, `cancel_flags` and `splice_flags`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct io_uring_sqe {
    pub opcode: u8,
    pub flags: u8,
    pub ioprio: u16,
    pub fd: i32,
    pub off: u64,
    pub addr: u64,
    pub len: u32,
    pub rw_flags: i32,
    pub user_data: u64,
    pub buf_index: u16,
    pub personality: u16,
    pub splice_fd_in: i32,
    pub addr3: u64,
    pub(crate) __pad2: u64,
}

/// Completion queue entry, laid out exactly as `struct io_uring_cqe`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct io_uring_cqe {
    pub user_data: u64,
    pub res: i32,
    pub flags: u32,
}

const _: () = assert!(core::mem::size_of::<io_uring_sqe>() == 64);
const _: () = assert!(core::mem::size_of::<io_uring_cqe>() == 16);

/// `struct __kernel_timespec`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Timespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

impl Timespec {
    #[must_use]
    pub fn new(tv_sec: i64, tv_nsec: i64) -> Self {
        Self { tv_sec, tv_nsec }
    }
}

impl From<core::time::Duration> for Timespec {
    fn from(d: core::time::Duration) -> Self {
        Self {
            tv_sec: i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
            tv_nsec: i64::from(d.subsec_nanos()),
        }
    }
}

/// `struct io_uring_getevents_arg`, passed with `IORING_ENTER_EXT_ARG`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct io_uring_getevents_arg {
    pub sigmask: u64,
    pub sigmask_sz: u32,
    pub pad: u32,
    pub ts: u64,
}

/// Fills an SQE for one kind of operation.
///
/// Implementations set the opcode and the operation's fields only; the ring
/// zeroes the slot beforehand and writes `user_data` afterwards.
pub trait PrepSqe {
    fn prep(&self, sqe: &mut io_uring_sqe);
}
