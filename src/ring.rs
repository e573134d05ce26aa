use core::ffi::c_void;
use core::ptr::null;
use core::time::Duration;

use log::{debug, trace, warn};
use rustix::fd::OwnedFd;
use rustix::io::Errno;
use rustix::io_uring::{
    io_uring_enter, io_uring_params, io_uring_register, io_uring_setup, IoringEnterFlags,
    IoringFeatureFlags, IoringRegisterOp,
};

use crate::config::SetupBuilder;
use crate::cq::CompletionQueue;
use crate::cqe::{decode, Completion};
use crate::err::{Error, Result};
use crate::fixed::{BufferSlot, FixedBuffer};
use crate::handle::{OpenHow, SockAddr};
use crate::id::RequestId;
use crate::inflight::{Held, InFlight, Resource};
use crate::mmap::Mapping;
use crate::sq::SubmissionQueue;
use crate::sqe::{
    Accept, AsyncCancel, Close, Connect, Iovec, Nop, OpenAt2, PollAdd, ReadFixed, Readv, Splice,
    Timeout, WriteFixed, Writev,
};
use crate::{
    io_uring_cqe, io_uring_getevents_arg, io_uring_sqe, PrepSqe, Timespec, IORING_OFF_CQ_RING,
    IORING_OFF_SQES, IORING_OFF_SQ_RING,
};

/// user_data of timeout entries queued by [`Ring::wait_timeout`] on kernels
/// without `IORING_FEAT_EXT_ARG`. Outside the [`RequestId`] range.
const TIMEOUT_USER_DATA: u64 = u64::MAX;

/// Cancel target for ids with nothing in flight. No entry carries it.
const UNMATCHED_USER_DATA: u64 = u64::MAX - 1;

/// Wait outcomes that mean "nothing yet, try again".
fn is_transient(e: Errno) -> bool {
    e == Errno::INTR || e == Errno::AGAIN || e == Errno::BUSY || e == Errno::TIME
}

/// Kernel-side state of a live ring.
struct Live {
    // The queues point into the mappings below.
    sq: SubmissionQueue,
    cq: CompletionQueue,
    _sq_ring: Mapping,
    _cq_ring: Option<Mapping>,
    _sqes: Mapping,
    features: IoringFeatureFlags,
    fd: OwnedFd,
}

impl Live {
    fn map(fd: OwnedFd, params: &io_uring_params) -> Result<Self> {
        let sq_len = params.sq_off.array as usize
            + params.sq_entries as usize * core::mem::size_of::<u32>();
        let cq_len = params.cq_off.cqes as usize
            + params.cq_entries as usize * core::mem::size_of::<io_uring_cqe>();
        let sqes_len = params.sq_entries as usize * core::mem::size_of::<io_uring_sqe>();

        let single = params.features.contains(IoringFeatureFlags::SINGLE_MMAP);
        let sq_ring = if single {
            Mapping::new(&fd, IORING_OFF_SQ_RING, sq_len.max(cq_len))?
        } else {
            Mapping::new(&fd, IORING_OFF_SQ_RING, sq_len)?
        };
        let cq_ring = if single {
            None
        } else {
            Some(Mapping::new(&fd, IORING_OFF_CQ_RING, cq_len)?)
        };
        let sqes = Mapping::new(&fd, IORING_OFF_SQES, sqes_len)?;

        // SAFETY: the mappings match the offsets the kernel returned and are
        // stored alongside the queues.
        let sq = unsafe { SubmissionQueue::new(&sq_ring, &params.sq_off, &sqes) };
        let cq_base = cq_ring.as_ref().unwrap_or(&sq_ring);
        let cq = unsafe { CompletionQueue::new(cq_base, &params.cq_off) };

        Ok(Self {
            sq,
            cq,
            _sq_ring: sq_ring,
            _cq_ring: cq_ring,
            _sqes: sqes,
            features: params.features,
            fd,
        })
    }

    fn enter(
        &self,
        to_submit: u32,
        min_complete: u32,
        flags: IoringEnterFlags,
        arg: Option<&io_uring_getevents_arg>,
    ) -> rustix::io::Result<u32> {
        let (arg, size) = match arg {
            Some(arg) => (
                (arg as *const io_uring_getevents_arg).cast::<c_void>(),
                core::mem::size_of::<io_uring_getevents_arg>(),
            ),
            None => (null(), 0),
        };

        // SAFETY: `arg` is either null or a getevents arg that outlives the
        // call, as IORING_ENTER_EXT_ARG requires.
        unsafe { io_uring_enter(&self.fd, to_submit, min_complete, flags, arg, size) }
    }

    fn register(&self, op: IoringRegisterOp, arg: *const c_void, nr_args: u32) -> Result<u32> {
        // SAFETY: the kernel only reads `arg` for the duration of the call.
        unsafe { io_uring_register(&self.fd, op, arg, nr_args) }.map_err(Error::Register)
    }
}

/// An io_uring instance: submission ring, completion ring, the single
/// registered buffer, and every request still waiting for its completion.
///
/// A ring is either live or torn down. Once torn down, no slot is ever
/// available and every other call fails with [`Error::TornDown`].
///
/// Not internally synchronized: one owner issues submissions and retrieves
/// completions.
pub struct Ring {
    live: Option<Live>,
    inflight: InFlight,
    fixed: BufferSlot,
}

// SAFETY: the raw ring pointers are only dereferenced through `&mut self` or
// `&self` methods of the single owner; nothing is shared between threads.
unsafe impl Send for Ring {}

impl Ring {
    /// Creates a ring with a submission queue of at least `depth` entries.
    pub fn setup(depth: u32) -> Result<Self> {
        SetupBuilder::new().sq_entries(depth).build()
    }

    pub(crate) fn with_config(config: SetupBuilder) -> Result<Self> {
        let mut params = config.params()?;
        let fd = io_uring_setup(config.requested_sq_entries(), &mut params)
            .map_err(Error::Setup)?;
        let live = Live::map(fd, &params)?;

        debug!(
            "ring set up: sq {} entries, cq {} entries, features {:?}",
            live.sq.ring_entries(),
            live.cq.ring_entries(),
            live.features
        );

        Ok(Self {
            live: Some(live),
            inflight: InFlight::default(),
            fixed: BufferSlot::default(),
        })
    }

    fn live(&self) -> Result<&Live> {
        self.live.as_ref().ok_or(Error::TornDown)
    }

    fn live_mut(&mut self) -> Result<&mut Live> {
        self.live.as_mut().ok_or(Error::TornDown)
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Makes timed waits queue a timeout entry, as on kernels without
    /// `IORING_FEAT_EXT_ARG`.
    #[cfg(test)]
    pub(crate) fn disable_ext_arg(&mut self) {
        if let Some(live) = self.live.as_mut() {
            live.features.remove(IoringFeatureFlags::EXT_ARG);
        }
    }

    /// Kernel feature flags reported at setup.
    #[must_use]
    pub fn features(&self) -> Option<IoringFeatureFlags> {
        self.live.as_ref().map(|live| live.features)
    }

    #[must_use]
    pub fn sq_capacity(&self) -> u32 {
        self.live.as_ref().map_or(0, |live| live.sq.ring_entries())
    }

    #[must_use]
    pub fn cq_capacity(&self) -> u32 {
        self.live.as_ref().map_or(0, |live| live.cq.ring_entries())
    }

    #[must_use]
    pub fn sq_space_left(&self) -> u32 {
        self.live.as_ref().map_or(0, |live| live.sq.space_left())
    }

    /// Requests queued or submitted whose completion has not been delivered.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Registers `buffer` for fixed-buffer I/O. Only one buffer can be
    /// registered at a time. On failure the buffer is handed back.
    pub fn register_buffer(
        &mut self,
        mut buffer: FixedBuffer,
    ) -> core::result::Result<(), (Error, FixedBuffer)> {
        let Some(live) = self.live.as_ref() else {
            return Err((Error::TornDown, buffer));
        };
        if self.fixed.is_active() {
            return Err((Error::AlreadyRegistered, buffer));
        }
        if buffer.is_empty() {
            return Err((Error::EmptyBuffer, buffer));
        }

        let iov = buffer.iovec();
        let arg = (&iov as *const Iovec).cast::<c_void>();
        if let Err(e) = live.register(IoringRegisterOp::RegisterBuffers, arg, 1) {
            return Err((e, buffer));
        }

        debug!("registered buffer {:p}, {} bytes", iov.iov_base, iov.iov_len);
        self.fixed.install(buffer);
        Ok(())
    }

    /// Unregisters the buffer and hands it back.
    pub fn unregister_buffer(&mut self) -> Result<FixedBuffer> {
        let live = self.live()?;
        if !self.fixed.is_active() {
            return Err(Error::NotRegistered);
        }
        if self.inflight.fixed() > 0 {
            return Err(Error::BufferInUse(self.inflight.fixed()));
        }

        live.register(IoringRegisterOp::UnregisterBuffers, null(), 0)?;
        debug!("unregistered buffer");
        self.fixed.take().ok_or(Error::NotRegistered)
    }

    /// The registered buffer. `None` while fixed operations on it are in
    /// flight, since the kernel may be writing to it.
    #[must_use]
    pub fn registered_buffer(&self) -> Option<&FixedBuffer> {
        if self.inflight.fixed() > 0 {
            return None;
        }
        self.fixed.get()
    }

    /// Mutable access to the registered buffer, on the same terms as
    /// [`Ring::registered_buffer`].
    pub fn registered_buffer_mut(&mut self) -> Option<&mut FixedBuffer> {
        if self.inflight.fixed() > 0 {
            return None;
        }
        self.fixed.get_mut()
    }

    /// Fills the next free slot with `op` under a fresh token and returns the
    /// token. `None` when the submission ring is full or the ring is torn
    /// down.
    fn fill<P: PrepSqe>(&mut self, id: RequestId, op: &P) -> Option<u64> {
        let live = self.live.as_mut()?;
        let sqe = live.sq.next_slot()?;
        let token = self.inflight.next_token();

        op.prep(sqe);
        sqe.user_data = token;
        trace!("queued {id} as {token:#x}: opcode {} fd {}", sqe.opcode, sqe.fd);
        Some(token)
    }

    fn push_holding<P: PrepSqe>(&mut self, id: RequestId, op: &P, held: Held) -> bool {
        let Some(token) = self.fill(id, op) else {
            return false;
        };
        self.inflight.insert(token, id, held);
        true
    }

    /// Hands out the next free slot, zeroed and tagged for `id`, for
    /// operations without an encoder here. `None` when the submission ring is
    /// full or torn down.
    ///
    /// # Safety
    /// `user_data` must be left as it is. Memory the filled-in entry points
    /// at must stay valid until the completion for `id` is delivered.
    pub unsafe fn next_slot(&mut self, id: RequestId) -> Option<&mut io_uring_sqe> {
        let live = self.live.as_mut()?;
        let sqe = live.sq.next_slot()?;
        let token = self.inflight.next_token();
        sqe.user_data = token;
        self.inflight.insert(token, id, Held::Nothing);
        Some(sqe)
    }

    /// Queues any [`PrepSqe`] operation. `false` when no slot is free.
    ///
    /// # Safety
    /// Memory the entry points at must stay valid until the completion for
    /// `id` is delivered.
    pub unsafe fn push<P: PrepSqe>(&mut self, id: RequestId, op: &P) -> bool {
        self.push_holding(id, op, Held::Nothing)
    }

    #[must_use]
    pub fn nop(&mut self, id: RequestId) -> bool {
        self.push_holding(id, &Nop, Held::Nothing)
    }

    /// Queues `openat2(dirfd, how.path(), how)`. The handle is held until
    /// the completion is delivered; it is handed back if no slot is free.
    pub fn openat2(
        &mut self,
        id: RequestId,
        dirfd: i32,
        how: OpenHow,
    ) -> core::result::Result<(), OpenHow> {
        let Some(token) = self.fill(id, &OpenAt2::new(dirfd, &how)) else {
            return Err(how);
        };
        self.inflight.insert(token, id, Held::Resource(Resource::OpenHow(how)));
        Ok(())
    }

    #[must_use]
    pub fn close(&mut self, id: RequestId, fd: i32) -> bool {
        self.push_holding(id, &Close::new(fd), Held::Nothing)
    }

    #[must_use]
    pub fn poll_add(&mut self, id: RequestId, fd: i32, mask: u32) -> bool {
        self.push_holding(id, &PollAdd::new(fd, mask), Held::Nothing)
    }

    /// Queues a vectored read at `offset` ([`crate::sqe::CURRENT_POS`] for
    /// the file position). The iovec array is copied and kept by the ring.
    ///
    /// # Safety
    /// Every segment must stay valid for writes, and otherwise untouched,
    /// until the completion for `id` is delivered.
    #[must_use]
    pub unsafe fn readv(&mut self, id: RequestId, fd: i32, iovecs: &[Iovec], offset: u64) -> bool {
        let iovecs: Box<[Iovec]> = iovecs.into();
        let Some(token) = self.fill(id, &Readv::new(fd, &iovecs, offset)) else {
            return false;
        };
        self.inflight.insert(token, id, Held::Resource(Resource::Iovecs(iovecs)));
        true
    }

    /// Queues a vectored write at `offset`.
    ///
    /// # Safety
    /// Every segment must stay valid for reads until the completion for
    /// `id` is delivered.
    #[must_use]
    pub unsafe fn writev(&mut self, id: RequestId, fd: i32, iovecs: &[Iovec], offset: u64) -> bool {
        let iovecs: Box<[Iovec]> = iovecs.into();
        let Some(token) = self.fill(id, &Writev::new(fd, &iovecs, offset)) else {
            return false;
        };
        self.inflight.insert(token, id, Held::Resource(Resource::Iovecs(iovecs)));
        true
    }

    /// Queues a read of `len` bytes at file `offset` into the registered
    /// buffer at `buf_offset`.
    pub fn read_fixed(
        &mut self,
        id: RequestId,
        fd: i32,
        buf_offset: usize,
        len: usize,
        offset: u64,
    ) -> Result<bool> {
        self.live()?;
        let buf = self.fixed.range(buf_offset, len)?;
        let op = ReadFixed::new(fd, buf, len as u32, offset, 0);
        Ok(self.push_holding(id, &op, Held::Fixed))
    }

    /// Queues a write of `len` bytes from the registered buffer at
    /// `buf_offset` to file `offset`.
    pub fn write_fixed(
        &mut self,
        id: RequestId,
        fd: i32,
        buf_offset: usize,
        len: usize,
        offset: u64,
    ) -> Result<bool> {
        self.live()?;
        let buf = self.fixed.range(buf_offset, len)?;
        let op = WriteFixed::new(fd, buf, len as u32, offset, 0);
        Ok(self.push_holding(id, &op, Held::Fixed))
    }

    #[must_use]
    pub fn splice(&mut self, id: RequestId, fd_in: i32, fd_out: i32, len: u32) -> bool {
        self.push_holding(id, &Splice::new(fd_in, fd_out, len), Held::Nothing)
    }

    /// Queues `connect(fd, addr)`. The handle is held until the completion
    /// is delivered; it is handed back if no slot is free.
    pub fn connect(
        &mut self,
        id: RequestId,
        fd: i32,
        addr: SockAddr,
    ) -> core::result::Result<(), SockAddr> {
        let Some(token) = self.fill(id, &Connect::new(fd, &addr)) else {
            return Err(addr);
        };
        self.inflight.insert(token, id, Held::Resource(Resource::SockAddr(addr)));
        Ok(())
    }

    /// Queues `accept4(fd, addr, SOCK_CLOEXEC)`. On completion the handle
    /// holds the peer address.
    pub fn accept(
        &mut self,
        id: RequestId,
        fd: i32,
        mut addr: SockAddr,
    ) -> core::result::Result<(), SockAddr> {
        addr.reset_len();
        let Some(token) = self.fill(id, &Accept::new(fd, &addr)) else {
            return Err(addr);
        };
        self.inflight.insert(token, id, Held::Resource(Resource::SockAddr(addr)));
        Ok(())
    }

    /// Queues a best-effort cancellation of the oldest in-flight request
    /// tagged `target`. The cancel and the target each complete on their
    /// own; with no such request the cancel completes with `-ENOENT`.
    #[must_use]
    pub fn cancel(&mut self, id: RequestId, target: RequestId) -> bool {
        let user_data = self.inflight.token_of(target).unwrap_or(UNMATCHED_USER_DATA);
        self.push_holding(id, &AsyncCancel::new(user_data), Held::Nothing)
    }

    /// Hands every queued entry to the kernel in one system call and returns
    /// how many it consumed.
    pub fn submit(&mut self) -> Result<usize> {
        let live = self.live_mut()?;
        let to_submit = live.sq.flush();
        if to_submit == 0 {
            return Ok(0);
        }

        let submitted = live
            .enter(to_submit, 0, IoringEnterFlags::empty(), None)
            .map_err(Error::Enter)?;
        trace!("submitted {submitted} of {to_submit}");
        Ok(submitted as usize)
    }

    /// Consumes the oldest completion, skipping entries the ring queued for
    /// itself.
    fn reap(&mut self) -> Option<Completion> {
        let live = self.live.as_mut()?;
        while let Some(cqe) = live.cq.pop() {
            let Some((token, res)) = decode(&cqe) else {
                trace!("internal completion {:#x}: {}", cqe.user_data, cqe.res);
                continue;
            };
            let Some((id, resource)) = self.inflight.complete(token) else {
                warn!("completion for unknown token {token:#x}: {res}");
                continue;
            };
            trace!("completed {id} ({token:#x}): {res}");
            return Some(Completion::new(id, &cqe, resource));
        }
        None
    }

    /// Returns the oldest completion without blocking, `None` if nothing is
    /// ready.
    pub fn peek(&mut self) -> Result<Option<Completion>> {
        let live = self.live_mut()?;
        if live.cq.is_empty() && live.sq.cq_overflow() {
            // Completions the kernel could not post are only flushed on enter.
            match live.enter(0, 0, IoringEnterFlags::GETEVENTS, None) {
                Ok(_) => {}
                Err(e) if is_transient(e) => {}
                Err(e) => return Err(Error::Enter(e)),
            }
        }
        Ok(self.reap())
    }

    /// Blocks until a completion is available. `None` if the wait was
    /// interrupted before one arrived.
    pub fn wait(&mut self) -> Result<Option<Completion>> {
        loop {
            if let Some(completion) = self.reap() {
                return Ok(Some(completion));
            }
            match self.live()?.enter(0, 1, IoringEnterFlags::GETEVENTS, None) {
                Ok(_) => {}
                Err(e) if is_transient(e) => return Ok(None),
                Err(e) => return Err(Error::Enter(e)),
            }
        }
    }

    /// Blocks up to `timeout` for a completion. `None` on timeout, signal
    /// interruption, or a transient kernel retry; these are not told apart.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<Completion>> {
        if let Some(completion) = self.reap() {
            return Ok(Some(completion));
        }

        let ts = Timespec::from(timeout);
        let live = self.live_mut()?;
        let entered = if live.features.contains(IoringFeatureFlags::EXT_ARG) {
            let arg = io_uring_getevents_arg {
                ts: &ts as *const Timespec as u64,
                ..io_uring_getevents_arg::default()
            };
            live.enter(
                0,
                1,
                IoringEnterFlags::GETEVENTS | IoringEnterFlags::EXT_ARG,
                Some(&arg),
            )
        } else {
            // The timeout entry goes ahead of anything queued but not yet
            // submitted and is submitted alone. With no free slot there is
            // nothing to bound the wait with.
            let Some(sqe) = live.sq.next_slot_before_unflushed() else {
                warn!("submission ring full, timed wait returns without waiting");
                return Ok(None);
            };
            Timeout::new(&ts, 1).prep(sqe);
            sqe.user_data = TIMEOUT_USER_DATA;
            live.sq.publish_one();
            let published = live.sq.pending() - live.sq.unflushed();
            live.enter(published, 1, IoringEnterFlags::GETEVENTS, None)
        };

        match entered {
            Ok(_) => Ok(self.reap()),
            Err(e) if is_transient(e) => Ok(None),
            Err(e) => Err(Error::Enter(e)),
        }
    }

    /// Releases the kernel ring. Idempotent.
    ///
    /// If requests are still in flight the ring is released anyway, but the
    /// memory they reference is leaked rather than freed and
    /// [`Error::Outstanding`] is returned.
    pub fn teardown(&mut self) -> Result<()> {
        let Some(live) = self.live.take() else {
            return Ok(());
        };
        drop(live);

        let outstanding = self.inflight.leak();
        if outstanding == 0 {
            drop(self.fixed.take());
            debug!("ring torn down");
            return Ok(());
        }

        if let Some(buffer) = self.fixed.take() {
            core::mem::forget(buffer);
        }
        warn!("ring torn down with {outstanding} requests outstanding, leaking their memory");
        Err(Error::Outstanding(outstanding))
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("{e}");
        }
    }
}

impl core::fmt::Debug for Ring {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ring")
            .field("live", &self.is_live())
            .field("sq_capacity", &self.sq_capacity())
            .field("cq_capacity", &self.cq_capacity())
            .field("in_flight", &self.in_flight())
            .field("registered_buffer", &self.fixed.get())
            .finish()
    }
}
