#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::net::{
        Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, TcpListener, TcpStream,
    };
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use pretty_assertions::assert_eq;
    use rustix::fs::{Mode, OFlags, ResolveFlags};
    use rustix::io::Errno;
    use rustix::net::{AddressFamily, SocketType};
    use tempfile::NamedTempFile;

    use crate::cqe::decode;
    use crate::handle::Address;
    use crate::sqe::CURRENT_POS;
    use crate::{
        io_uring_cqe, io_uring_sqe, Accept, AsyncCancel, Completion, Error, FixedBuffer,
        Iovec, Nop, OpenAt2, OpenHow, PollAdd, PrepSqe, RequestId, Ring, SetupBuilder, SockAddr,
        Splice, AT_FDCWD, IORING_OP_ACCEPT, IORING_OP_ASYNC_CANCEL, IORING_OP_NOP,
        IORING_OP_OPENAT2, IORING_OP_POLL_ADD, IORING_OP_SPLICE, POLLIN, SOCK_CLOEXEC,
    };

    fn id(n: u32) -> RequestId {
        RequestId::from(n)
    }

    /// Waits for exactly `n` completions, failing the test after ten seconds.
    fn collect(ring: &mut Ring, n: usize) -> Vec<Completion> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            assert!(
                Instant::now() < deadline,
                "only {} of {n} completions arrived",
                out.len()
            );
            if let Some(c) = ring
                .wait_timeout(Duration::from_millis(500))
                .expect("wait failed")
            {
                out.push(c);
            }
        }
        out
    }

    fn collect_one(ring: &mut Ring) -> Completion {
        collect(ring, 1).pop().expect("one completion")
    }

    #[test]
    fn test_setup_any_depth_accepts_a_submission() {
        for depth in [1, 2, 3, 7, 8, 33, 100] {
            let mut ring = Ring::setup(depth).expect("Failed to create ring");
            assert!(ring.sq_capacity() >= depth);
            assert!(ring.nop(id(depth)), "depth {depth} rejected first submission");
            assert_eq!(ring.submit().expect("Failed to submit"), 1);

            let c = collect_one(&mut ring);
            assert_eq!(c.id(), id(depth));
            assert_eq!(c.result(), 0);
        }
    }

    #[test]
    fn test_setup_rejects_zero_depth() {
        match Ring::setup(0) {
            Err(Error::InvalidDepth { sq: 0, cq: None }) => {}
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_setup_builder_cq_entries() {
        let ring = SetupBuilder::new()
            .sq_entries(8)
            .cq_entries(64)
            .build()
            .expect("Failed to create ring");
        assert_eq!(ring.sq_capacity(), 8);
        assert_eq!(ring.cq_capacity(), 64);

        let ring = Ring::setup(8).expect("Failed to create ring");
        assert_eq!(ring.cq_capacity(), 16);

        match SetupBuilder::new().sq_entries(16).cq_entries(4).build() {
            Err(Error::InvalidDepth { sq: 16, cq: Some(4) }) => {}
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_full_ring_of_nops_completes_once_each() {
        let mut ring = Ring::setup(8).expect("Failed to create ring");
        let depth = ring.sq_capacity();

        for n in 0..depth {
            assert!(ring.nop(id(n)));
        }
        assert!(!ring.nop(id(depth)), "ring should report full");
        assert_eq!(ring.sq_space_left(), 0);
        assert_eq!(ring.in_flight(), depth as usize);

        assert_eq!(ring.submit().expect("Failed to submit"), depth as usize);

        let completions = collect(&mut ring, depth as usize);
        let ids: BTreeSet<RequestId> = completions.iter().map(Completion::id).collect();
        assert_eq!(ids, (0..depth).map(id).collect::<BTreeSet<_>>());
        assert!(completions.iter().all(|c| c.result() == 0));
        assert_eq!(ring.in_flight(), 0);
        assert!(ring.peek().expect("peek failed").is_none());
    }

    #[test]
    fn test_slots_free_up_after_submit() {
        let mut ring = Ring::setup(2).expect("Failed to create ring");
        let depth = ring.sq_capacity();
        for n in 0..depth {
            assert!(ring.nop(id(n)));
        }
        assert!(!ring.nop(id(99)));

        ring.submit().expect("Failed to submit");
        assert!(ring.nop(id(99)));
        ring.submit().expect("Failed to submit");
        collect(&mut ring, depth as usize + 1);
    }

    #[test]
    fn test_raw_slot() {
        let mut ring = Ring::setup(1).expect("Failed to create ring");
        let depth = ring.sq_capacity();
        for n in 0..depth {
            // SAFETY: a nop references no memory.
            let sqe = unsafe { ring.next_slot(id(n)) }.expect("free slot");
            assert_eq!(sqe.opcode, 0);
            Nop.prep(sqe);
        }
        assert!(unsafe { ring.next_slot(id(depth)) }.is_none());

        ring.submit().expect("Failed to submit");
        let completions = collect(&mut ring, depth as usize);
        assert!(completions.iter().all(|c| c.result() == 0));
        assert_eq!(ring.in_flight(), 0);
    }

    #[test]
    fn test_peek_on_fresh_ring() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        for _ in 0..5 {
            assert!(ring.peek().expect("peek failed").is_none());
        }
    }

    #[test]
    fn test_peek_returns_ready_completion() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        assert!(ring.nop(id(7)));
        ring.submit().expect("Failed to submit");

        let deadline = Instant::now() + Duration::from_secs(5);
        let c = loop {
            if let Some(c) = ring.peek().expect("peek failed") {
                break c;
            }
            assert!(Instant::now() < deadline, "nop never completed");
            std::thread::yield_now();
        };
        assert_eq!(<(RequestId, i32)>::from(&c), (id(7), 0));
    }

    #[test]
    fn test_wait_timeout_returns_nothing_when_idle() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");

        let start = Instant::now();
        let got = ring
            .wait_timeout(Duration::from_millis(50))
            .expect("wait failed");
        assert!(got.is_none());
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "waited {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn test_wait_blocks_until_completion() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        assert!(ring.nop(id(3)));
        ring.submit().expect("Failed to submit");

        let c = loop {
            if let Some(c) = ring.wait().expect("wait failed") {
                break c;
            }
        };
        assert_eq!(c.id(), id(3));
        assert_eq!(c.result(), 0);
    }

    #[test]
    fn test_fixed_buffer_round_trip() {
        const K: usize = 512;

        let mut ring = Ring::setup(4).expect("Failed to create ring");
        let file = NamedTempFile::new().expect("Failed to create temp file");
        let fd = file.as_raw_fd();

        let mut buffer = FixedBuffer::new(2 * K);
        for (i, b) in buffer.as_mut_slice()[..K].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        ring.register_buffer(buffer)
            .map_err(|(e, _)| e)
            .expect("Failed to register buffer");

        assert!(ring
            .write_fixed(id(1), fd, 0, K, 0)
            .expect("write_fixed rejected"));
        ring.submit().expect("Failed to submit");
        let c = collect_one(&mut ring);
        assert_eq!((c.id(), c.result()), (id(1), K as i32));

        assert!(ring
            .read_fixed(id(2), fd, K, K, 0)
            .expect("read_fixed rejected"));
        ring.submit().expect("Failed to submit");
        let c = collect_one(&mut ring);
        assert_eq!((c.id(), c.result()), (id(2), K as i32));

        let buffer = ring.unregister_buffer().expect("Failed to unregister");
        let bytes = buffer.as_slice();
        assert_eq!(&bytes[K..], &bytes[..K]);
    }

    #[test]
    fn test_fixed_ops_validate_registration() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        let file = NamedTempFile::new().expect("Failed to create temp file");
        let fd = file.as_raw_fd();

        assert!(matches!(
            ring.read_fixed(id(1), fd, 0, 8, 0),
            Err(Error::NotRegistered)
        ));
        assert!(matches!(ring.unregister_buffer(), Err(Error::NotRegistered)));

        match ring.register_buffer(FixedBuffer::new(0)) {
            Err((Error::EmptyBuffer, _)) => {}
            other => panic!("Unexpected result: {other:?}"),
        }

        ring.register_buffer(FixedBuffer::new(64))
            .map_err(|(e, _)| e)
            .expect("Failed to register buffer");
        match ring.register_buffer(FixedBuffer::from(vec![1, 2, 3])) {
            Err((Error::AlreadyRegistered, returned)) => {
                assert_eq!(returned.as_slice(), &[1, 2, 3]);
            }
            other => panic!("Unexpected result: {other:?}"),
        }

        assert!(matches!(
            ring.write_fixed(id(2), fd, 60, 8, 0),
            Err(Error::OutOfBounds {
                offset: 60,
                len: 8,
                capacity: 64
            })
        ));
        assert!(matches!(
            ring.write_fixed(id(2), fd, usize::MAX, 2, 0),
            Err(Error::OutOfBounds { .. })
        ));
        assert_eq!(ring.in_flight(), 0);

        assert!(ring.write_fixed(id(3), fd, 0, 64, 0).expect("write_fixed"));
        assert!(matches!(
            ring.unregister_buffer(),
            Err(Error::BufferInUse(1))
        ));
        ring.submit().expect("Failed to submit");
        assert_eq!(collect_one(&mut ring).result(), 64);

        assert_eq!(ring.unregister_buffer().expect("unregister").len(), 64);
        assert!(ring.registered_buffer().is_none());
    }

    #[test]
    fn test_cancel_of_completed_request() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        assert!(ring.nop(id(1)));
        ring.submit().expect("Failed to submit");
        assert_eq!(collect_one(&mut ring).id(), id(1));

        assert!(ring.cancel(id(2), id(1)));
        ring.submit().expect("Failed to submit");
        let c = collect_one(&mut ring);
        assert_eq!(c.id(), id(2));
        let errno = c.errno().expect("cancel of a finished request should fail");
        assert!(
            errno == Errno::NOENT || errno == Errno::ALREADY,
            "unexpected errno {errno:?}"
        );
        assert!(ring.peek().expect("peek failed").is_none());
    }

    #[test]
    fn test_cancel_pending_poll() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        let (reader, _writer) = rustix::pipe::pipe().expect("Failed to create pipe");

        assert!(ring.poll_add(id(1), reader.as_raw_fd(), POLLIN));
        ring.submit().expect("Failed to submit");
        assert!(ring.cancel(id(2), id(1)));
        ring.submit().expect("Failed to submit");

        let mut completions = collect(&mut ring, 2);
        completions.sort_by_key(Completion::id);
        assert_eq!(completions[0].id(), id(1));
        assert_eq!(completions[0].errno(), Some(Errno::CANCELED));
        assert_eq!(completions[1].id(), id(2));
        assert_eq!(completions[1].result(), 0);
    }

    #[test]
    fn test_sock_addr_round_trip() {
        let addrs = [
            Address::Inet(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::new(192, 168, 1, 20),
                8080,
            ))),
            Address::Inet(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::new(0xfe80, 0, 0, 0, 0x1, 0x2, 0x3, 0x4),
                443,
                7,
                2,
            ))),
            Address::Unix(PathBuf::from("/tmp/uring.sock")),
            Address::UnnamedUnix,
        ];

        for addr in addrs {
            let handle = SockAddr::new(&addr).expect("Failed to build address");
            assert_eq!(handle.address(), Some(addr.clone()));
        }

        let v4 = SockAddr::try_from(SocketAddr::from(([127, 0, 0, 1], 9))).expect("v4");
        assert_eq!(v4.family(), crate::AF_INET);
        assert_eq!(v4.len(), 16);
        assert_eq!(&v4.as_bytes()[2..8], &[0, 9, 127, 0, 0, 1]);

        let v6 = SockAddr::try_from(SocketAddr::from((Ipv6Addr::LOCALHOST, 9))).expect("v6");
        assert_eq!(v6.family(), crate::AF_INET6);
        assert_eq!(v6.len(), 28);

        let unix = SockAddr::new(&Address::Unix(PathBuf::from("/a"))).expect("unix");
        assert_eq!(unix.len(), 2 + 2 + 1);
    }

    #[test]
    fn test_sock_addr_rejects_bad_paths() {
        let long = PathBuf::from("x".repeat(108));
        assert!(matches!(
            SockAddr::new(&Address::Unix(long)),
            Err(Error::AddressTooLong(108))
        ));
        let nul = PathBuf::from(std::ffi::OsStr::new("a\0b"));
        assert!(matches!(
            SockAddr::new(&Address::Unix(nul)),
            Err(Error::NulInPath)
        ));
    }

    #[test]
    fn test_accept_and_connect() {
        let mut ring = Ring::setup(8).expect("Failed to create ring");
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
        let local = listener.local_addr().expect("local_addr");
        let client = rustix::net::socket(AddressFamily::INET, SocketType::STREAM, None)
            .expect("Failed to create socket");

        ring.accept(id(1), listener.as_raw_fd(), SockAddr::for_accept())
            .expect("ring full");
        let target = SockAddr::try_from(local).expect("address");
        ring.connect(id(2), client.as_raw_fd(), target)
            .expect("ring full");
        assert_eq!(ring.submit().expect("Failed to submit"), 2);

        let mut completions = collect(&mut ring, 2);
        completions.sort_by_key(Completion::id);
        let (mut accepted, mut connected) = {
            let mut it = completions.into_iter();
            (it.next().expect("accept"), it.next().expect("connect"))
        };

        assert_eq!(connected.result(), 0);
        assert_eq!(
            connected.take_sock_addr().and_then(|a| a.socket_addr()),
            Some(local)
        );

        assert!(accepted.result() >= 0, "accept failed: {:?}", accepted.errno());
        // SAFETY: a successful accept result is a fresh descriptor.
        let _conn = unsafe { OwnedFd::from_raw_fd(accepted.result()) };
        let peer = accepted.peer_addr().expect("peer address");
        assert_eq!(peer.ip(), local.ip());
        assert_ne!(peer.port(), 0);
        let handle = accepted.take_sock_addr().expect("handle back");
        assert_eq!(handle.len(), 16);
    }

    #[test]
    fn test_owned_submissions_hand_back_handles_when_full() {
        let mut ring = Ring::setup(1).expect("Failed to create ring");
        while ring.nop(id(0)) {}

        let addr = SocketAddr::from(([10, 0, 0, 1], 80));
        let handle = SockAddr::try_from(addr).expect("address");
        let back = ring
            .connect(id(1), 0, handle)
            .expect_err("ring should be full");
        assert_eq!(back.socket_addr(), Some(addr));

        let how = OpenHow::new("/tmp/x", OFlags::RDONLY, Mode::empty(), ResolveFlags::empty())
            .expect("open_how");
        let back = ring
            .openat2(id(2), AT_FDCWD, how)
            .expect_err("ring should be full");
        assert_eq!(back.path(), std::path::Path::new("/tmp/x"));
    }

    #[test]
    fn test_openat2_then_close() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("opened");

        let how = OpenHow::new(
            &path,
            OFlags::CREATE | OFlags::RDWR | OFlags::CLOEXEC,
            Mode::RUSR | Mode::WUSR,
            ResolveFlags::empty(),
        )
        .expect("open_how");
        assert_eq!(how.path(), path.as_path());
        assert_eq!(how.how().mode, 0o600);

        ring.openat2(id(1), AT_FDCWD, how).expect("ring full");
        ring.submit().expect("Failed to submit");
        let mut c = collect_one(&mut ring);
        let fd = c.result();
        assert!(fd >= 0, "openat2 failed: {:?}", c.errno());
        assert_eq!(
            c.take_open_how().map(|h| h.path().to_path_buf()),
            Some(path.clone())
        );
        assert!(path.exists());

        assert!(ring.close(id(2), fd));
        ring.submit().expect("Failed to submit");
        let c = collect_one(&mut ring);
        assert_eq!((c.id(), c.result()), (id(2), 0));
    }

    #[test]
    fn test_close_bad_fd_reports_errno() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        assert!(ring.close(id(9), 1_000_000));
        ring.submit().expect("Failed to submit");

        let c = collect_one(&mut ring);
        assert!(c.is_err());
        assert_eq!(c.errno(), Some(Errno::BADF));
        let err = c.io_result().expect_err("close should fail");
        assert_eq!(err.raw_os_error(), Some(Errno::BADF.raw_os_error()));
    }

    #[test]
    fn test_writev_then_readv() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        let file = NamedTempFile::new().expect("Failed to create temp file");
        let fd = file.as_raw_fd();

        let mut hello = *b"hello ";
        let mut world = *b"world";
        let segments = [Iovec::from_slice(&mut hello), Iovec::from_slice(&mut world)];
        // SAFETY: both segments outlive the completion collected below.
        assert!(unsafe { ring.writev(id(1), fd, &segments, 0) });
        ring.submit().expect("Failed to submit");
        let c = collect_one(&mut ring);
        assert_eq!(c.result(), 11);

        let mut a = [0u8; 5];
        let mut b = [0u8; 6];
        let segments = [Iovec::from_slice(&mut a), Iovec::from_slice(&mut b)];
        // SAFETY: as above.
        assert!(unsafe { ring.readv(id(2), fd, &segments, 0) });
        ring.submit().expect("Failed to submit");
        let c = collect_one(&mut ring);
        assert_eq!(c.result(), 11);
        assert_eq!(&a, b"hello");
        assert_eq!(&b, b" world");
    }

    #[test]
    fn test_splice_pipe_into_file() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        let (reader, writer) = rustix::pipe::pipe().expect("Failed to create pipe");
        rustix::io::write(&writer, b"spliced").expect("Failed to write pipe");

        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        assert!(ring.splice(id(1), reader.as_raw_fd(), file.as_raw_fd(), 7));
        ring.submit().expect("Failed to submit");
        assert_eq!(collect_one(&mut ring).result(), 7);

        let mut contents = Vec::new();
        file.seek(SeekFrom::Start(0)).expect("seek");
        file.read_to_end(&mut contents).expect("read");
        assert_eq!(contents, b"spliced");
    }

    #[test]
    fn test_poll_add_reports_readable() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        let (reader, writer) = rustix::pipe::pipe().expect("Failed to create pipe");

        assert!(ring.poll_add(id(1), reader.as_raw_fd(), POLLIN));
        ring.submit().expect("Failed to submit");
        assert!(ring
            .wait_timeout(Duration::from_millis(50))
            .expect("wait failed")
            .is_none());

        let mut w = std::fs::File::from(writer);
        w.write_all(b"x").expect("write");
        let c = collect_one(&mut ring);
        assert_eq!(c.id(), id(1));
        assert_ne!(c.result() as u32 & POLLIN, 0);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        ring.teardown().expect("first teardown");
        ring.teardown().expect("second teardown");

        assert!(!ring.is_live());
        assert_eq!(ring.sq_capacity(), 0);
        assert!(!ring.nop(id(1)));
        assert!(matches!(ring.submit(), Err(Error::TornDown)));
        assert!(matches!(ring.peek(), Err(Error::TornDown)));
        assert!(matches!(ring.wait(), Err(Error::TornDown)));
        assert!(matches!(
            ring.read_fixed(id(1), 0, 0, 1, 0),
            Err(Error::TornDown)
        ));
        match ring.register_buffer(FixedBuffer::new(8)) {
            Err((Error::TornDown, _)) => {}
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_teardown_with_outstanding_requests() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        let (reader, _writer) = rustix::pipe::pipe().expect("Failed to create pipe");
        assert!(ring.poll_add(id(1), reader.as_raw_fd(), POLLIN));
        ring.submit().expect("Failed to submit");

        assert!(matches!(ring.teardown(), Err(Error::Outstanding(1))));
        assert!(!ring.is_live());
        ring.teardown().expect("second teardown");
        assert_eq!(ring.in_flight(), 0);
    }

    #[test]
    fn test_request_id_range() {
        assert!(RequestId::new(RequestId::MAX).is_some());
        assert!(RequestId::new(RequestId::MAX + 1).is_none());
        assert_eq!(RequestId::try_from(u64::MAX), Err(u64::MAX));
        assert_eq!(RequestId::from(5u32).get(), 5);
        assert_eq!(id(42).to_string(), "#42");
    }

    #[test]
    fn test_decode() {
        let cqe = io_uring_cqe {
            user_data: 17,
            res: -(Errno::NOENT.raw_os_error()),
            flags: 0,
        };
        assert_eq!(decode(&cqe), Some((17, -2)));

        let internal = io_uring_cqe {
            user_data: u64::MAX,
            res: -(Errno::TIME.raw_os_error()),
            flags: 0,
        };
        assert_eq!(decode(&internal), None);

        assert_eq!(crate::cqe::res_to_result(12), Ok(12));
        assert_eq!(crate::cqe::res_to_result(-9), Err(Errno::BADF));
    }

    #[test]
    fn test_sqe_layouts() {
        let mut sqe = io_uring_sqe::default();
        Nop.prep(&mut sqe);
        assert_eq!(sqe.opcode, IORING_OP_NOP);
        assert_eq!(sqe.fd, -1);

        let mut sqe = io_uring_sqe::default();
        Splice::new(3, 4, 100).prep(&mut sqe);
        assert_eq!(sqe.opcode, IORING_OP_SPLICE);
        assert_eq!(sqe.splice_fd_in, 3);
        assert_eq!(sqe.fd, 4);
        assert_eq!(sqe.len, 100);
        assert_eq!(sqe.off, CURRENT_POS);
        assert_eq!(sqe.addr, CURRENT_POS);

        let mut sqe = io_uring_sqe::default();
        PollAdd::new(5, POLLIN).prep(&mut sqe);
        assert_eq!(sqe.opcode, IORING_OP_POLL_ADD);
        #[cfg(target_endian = "little")]
        assert_eq!(sqe.rw_flags as u32, POLLIN);

        let addr = SockAddr::for_accept();
        let mut sqe = io_uring_sqe::default();
        Accept::new(6, &addr).prep(&mut sqe);
        assert_eq!(sqe.opcode, IORING_OP_ACCEPT);
        assert_eq!(sqe.rw_flags, SOCK_CLOEXEC);
        assert_eq!(sqe.addr, addr.addr_ptr() as u64);
        assert_eq!(sqe.off, addr.len_ptr() as u64);
        assert_eq!(addr.len(), 128);

        let mut sqe = io_uring_sqe::default();
        AsyncCancel::new(77).prep(&mut sqe);
        assert_eq!(sqe.opcode, IORING_OP_ASYNC_CANCEL);
        assert_eq!(sqe.addr, 77);

        let how = OpenHow::new(
            "/etc/hostname",
            OFlags::RDONLY,
            Mode::empty(),
            ResolveFlags::BENEATH,
        )
        .expect("open_how");
        let mut sqe = io_uring_sqe::default();
        OpenAt2::new(AT_FDCWD, &how).prep(&mut sqe);
        assert_eq!(sqe.opcode, IORING_OP_OPENAT2);
        assert_eq!(sqe.fd, AT_FDCWD);
        assert_eq!(sqe.len, 24);
        assert_eq!(sqe.off, how.how_ptr() as u64);
        assert_eq!(sqe.addr, sqe.off + 24);
        assert_eq!(how.how().resolve, ResolveFlags::BENEATH.bits());
    }

    #[test]
    fn test_drop_with_queued_requests() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        let handle = SockAddr::for_accept();
        ring.accept(id(1), -1, handle).expect("ring full");
        drop(ring);
    }

    #[test]
    fn test_duplicate_ids_keep_their_own_resources() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
        let local = listener.local_addr().expect("local_addr");

        ring.accept(id(1), listener.as_raw_fd(), SockAddr::for_accept())
            .expect("ring full");
        assert!(ring.nop(id(1)));
        ring.submit().expect("Failed to submit");

        // The accept cannot finish before a client connects.
        let mut first = collect_one(&mut ring);
        assert_eq!((first.id(), first.result()), (id(1), 0));
        assert!(first.take_resource().is_none());
        assert_eq!(ring.in_flight(), 1);

        let client = TcpStream::connect(local).expect("Failed to connect");
        let mut accepted = collect_one(&mut ring);
        assert_eq!(accepted.id(), id(1));
        assert!(accepted.result() >= 0, "accept failed: {:?}", accepted.errno());
        // SAFETY: a successful accept result is a fresh descriptor.
        let _conn = unsafe { OwnedFd::from_raw_fd(accepted.result()) };
        assert_eq!(
            accepted.peer_addr(),
            Some(client.local_addr().expect("client address"))
        );
        assert!(accepted.take_sock_addr().is_some());
        assert_eq!(ring.in_flight(), 0);
    }

    #[test]
    fn test_duplicate_id_keeps_buffer_in_use() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        let (reader, writer) = rustix::pipe::pipe().expect("Failed to create pipe");
        ring.register_buffer(FixedBuffer::new(16))
            .map_err(|(e, _)| e)
            .expect("Failed to register buffer");

        assert!(ring
            .read_fixed(id(1), reader.as_raw_fd(), 0, 8, CURRENT_POS)
            .expect("read_fixed rejected"));
        assert!(ring.nop(id(1)));
        ring.submit().expect("Failed to submit");

        let nop = collect_one(&mut ring);
        assert_eq!((nop.id(), nop.result()), (id(1), 0));

        assert!(matches!(
            ring.unregister_buffer(),
            Err(Error::BufferInUse(1))
        ));
        assert!(ring.registered_buffer().is_none());
        assert!(ring.registered_buffer_mut().is_none());

        rustix::io::write(&writer, b"fixed io").expect("Failed to write pipe");
        let read = collect_one(&mut ring);
        assert_eq!((read.id(), read.result()), (id(1), 8));

        let buffer = ring.registered_buffer().expect("buffer back");
        assert_eq!(&buffer.as_slice()[..8], b"fixed io");
        assert_eq!(ring.unregister_buffer().expect("unregister").len(), 16);
    }

    #[test]
    fn test_cancel_targets_one_of_duplicate_ids() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        let (reader, writer) = rustix::pipe::pipe().expect("Failed to create pipe");

        assert!(ring.poll_add(id(1), reader.as_raw_fd(), POLLIN));
        assert!(ring.poll_add(id(1), reader.as_raw_fd(), POLLIN));
        ring.submit().expect("Failed to submit");
        assert!(ring.cancel(id(2), id(1)));
        ring.submit().expect("Failed to submit");

        let mut completions = collect(&mut ring, 2);
        completions.sort_by_key(Completion::id);
        assert_eq!(completions[0].errno(), Some(Errno::CANCELED));
        assert_eq!(completions[1].id(), id(2));
        assert_eq!(completions[1].result(), 0);
        assert_eq!(ring.in_flight(), 1);

        rustix::io::write(&writer, b"x").expect("Failed to write pipe");
        let c = collect_one(&mut ring);
        assert_eq!(c.id(), id(1));
        assert_ne!(c.result() as u32 & POLLIN, 0);
    }

    #[test]
    fn test_timeout_entry_wait_leaves_queued_requests() {
        let mut ring = Ring::setup(4).expect("Failed to create ring");
        ring.disable_ext_arg();

        assert!(ring.nop(id(1)));
        assert!(ring.nop(id(2)));
        let got = ring
            .wait_timeout(Duration::from_millis(20))
            .expect("wait failed");
        assert!(got.is_none());
        assert_eq!(ring.in_flight(), 2);
        assert_eq!(ring.sq_space_left(), ring.sq_capacity() - 2);

        assert_eq!(ring.submit().expect("Failed to submit"), 2);
        let ids: BTreeSet<RequestId> = collect(&mut ring, 2).iter().map(Completion::id).collect();
        assert_eq!(ids, [id(1), id(2)].into_iter().collect::<BTreeSet<_>>());
        assert!(ring.peek().expect("peek failed").is_none());
    }

    #[test]
    fn test_timeout_entry_wait_with_full_ring() {
        let mut ring = Ring::setup(1).expect("Failed to create ring");
        ring.disable_ext_arg();
        while ring.nop(id(0)) {}

        let start = Instant::now();
        assert!(ring
            .wait_timeout(Duration::from_secs(5))
            .expect("wait failed")
            .is_none());
        assert!(start.elapsed() < Duration::from_secs(1));

        let queued = ring.in_flight();
        assert_eq!(ring.submit().expect("Failed to submit"), queued);
        collect(&mut ring, queued);
    }
}
