use rustix::io::Errno;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Failures reported synchronously by the ring.
///
/// Outcomes of individual operations are never reported here; they arrive as
/// the (possibly negative) result of the matching [`crate::Completion`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("io_uring_setup failed: {0}")]
    Setup(Errno),

    #[error("mapping the ring failed: {0}")]
    Mmap(Errno),

    #[error("invalid queue depth (sq {sq}, cq {cq:?})")]
    InvalidDepth { sq: u32, cq: Option<u32> },

    #[error("buffer registration failed: {0}")]
    Register(Errno),

    #[error("a buffer is already registered")]
    AlreadyRegistered,

    #[error("no buffer is registered")]
    NotRegistered,

    #[error("registered buffer still addressed by {0} in-flight operations")]
    BufferInUse(usize),

    #[error("cannot register an empty buffer")]
    EmptyBuffer,

    #[error("range {offset}..{offset}+{len} exceeds registered buffer of {capacity} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("io_uring_enter failed: {0}")]
    Enter(Errno),

    #[error("ring has been torn down")]
    TornDown,

    #[error("ring torn down with {0} operations outstanding")]
    Outstanding(usize),

    #[error("path contains an interior nul byte")]
    NulInPath,

    #[error("unix socket path of {0} bytes does not fit in sun_path")]
    AddressTooLong(usize),
}

impl Error {
    /// The kernel errno behind this error, if the kernel produced it.
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Setup(e) | Self::Mmap(e) | Self::Register(e) | Self::Enter(e) => Some(*e),
            _ => None,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> std::io::Error {
        match err.errno() {
            Some(errno) => errno.into(),
            None => std::io::Error::new(std::io::ErrorKind::Other, err),
        }
    }
}
