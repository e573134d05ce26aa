use std::net::SocketAddr;

use rustix::io::Errno;

use crate::handle::{OpenHow, SockAddr};
use crate::id::RequestId;
use crate::inflight::Resource;
use crate::io_uring_cqe;

/// Splits a raw completion into the token its request was written under and
/// the result.
///
/// `None` for user_data the ring reserves for itself.
#[must_use]
pub(crate) fn decode(cqe: &io_uring_cqe) -> Option<(u64, i32)> {
    if cqe.user_data > RequestId::MAX {
        return None;
    }
    Some((cqe.user_data, cqe.res))
}

/// Maps a completion result onto the synchronous syscall convention:
/// non-negative values are the success payload, negative values a negated
/// errno.
pub fn res_to_result(res: i32) -> Result<u32, Errno> {
    if res >= 0 {
        Ok(res as u32)
    } else {
        Err(Errno::from_raw_os_error(-res))
    }
}

/// One delivered completion: the id the request was submitted with, the
/// kernel's result, and the resource the request held, now released back to
/// the caller.
#[derive(Debug)]
pub struct Completion {
    id: RequestId,
    result: i32,
    flags: u32,
    resource: Option<Resource>,
}

impl Completion {
    pub(crate) fn new(id: RequestId, cqe: &io_uring_cqe, resource: Option<Resource>) -> Self {
        Self {
            id,
            result: cqe.res,
            flags: cqe.flags,
            resource,
        }
    }

    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Raw result: bytes transferred, a new descriptor, `0`, or `-errno`.
    #[must_use]
    pub fn result(&self) -> i32 {
        self.result
    }

    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[must_use]
    pub fn is_err(&self) -> bool {
        self.result < 0
    }

    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        res_to_result(self.result).err()
    }

    /// The result as an `io::Result`, negative values mapped to their OS error.
    pub fn io_result(&self) -> std::io::Result<u32> {
        res_to_result(self.result).map_err(Into::into)
    }

    pub fn take_resource(&mut self) -> Option<Resource> {
        self.resource.take()
    }

    /// The socket address handle a `connect` or `accept` held.
    pub fn take_sock_addr(&mut self) -> Option<SockAddr> {
        match self.resource.take()? {
            Resource::SockAddr(addr) => Some(addr),
            other => {
                self.resource = Some(other);
                None
            }
        }
    }

    /// The `open_how` handle an `openat2` held.
    pub fn take_open_how(&mut self) -> Option<OpenHow> {
        match self.resource.take()? {
            Resource::OpenHow(how) => Some(how),
            other => {
                self.resource = Some(other);
                None
            }
        }
    }

    /// Peer address written by a successful `accept`.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.resource {
            Some(Resource::SockAddr(addr)) if !self.is_err() => addr.socket_addr(),
            _ => None,
        }
    }
}

impl From<&Completion> for (RequestId, i32) {
    fn from(c: &Completion) -> Self {
        (c.id, c.result)
    }
}
