use crate::err::{Error, Result};
use crate::sqe::Iovec;

/// Heap memory that can be registered with a ring for fixed-buffer I/O.
///
/// The allocation never moves, so the address the kernel pins at
/// registration stays valid while the ring holds the buffer.
pub struct FixedBuffer {
    buf: Box<[u8]>,
}

impl FixedBuffer {
    /// A zero-filled buffer of `len` bytes.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            buf: vec![0; len].into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub(crate) fn iovec(&mut self) -> Iovec {
        Iovec::new(self.buf.as_mut_ptr().cast(), self.buf.len())
    }
}

impl From<Vec<u8>> for FixedBuffer {
    fn from(v: Vec<u8>) -> Self {
        Self {
            buf: v.into_boxed_slice(),
        }
    }
}

impl From<FixedBuffer> for Vec<u8> {
    fn from(b: FixedBuffer) -> Self {
        b.buf.into_vec()
    }
}

impl core::fmt::Debug for FixedBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FixedBuffer")
            .field("ptr", &self.buf.as_ptr())
            .field("len", &self.buf.len())
            .finish()
    }
}

/// The ring's single registration slot: zero or one registered buffer.
#[derive(Debug, Default)]
pub(crate) struct BufferSlot {
    active: Option<FixedBuffer>,
}

impl BufferSlot {
    pub(crate) fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub(crate) fn get(&self) -> Option<&FixedBuffer> {
        self.active.as_ref()
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut FixedBuffer> {
        self.active.as_mut()
    }

    pub(crate) fn install(&mut self, buffer: FixedBuffer) {
        debug_assert!(self.active.is_none());
        self.active = Some(buffer);
    }

    pub(crate) fn take(&mut self) -> Option<FixedBuffer> {
        self.active.take()
    }

    /// Address of `offset..offset + len` inside the registered buffer.
    pub(crate) fn range(&mut self, offset: usize, len: usize) -> Result<*mut u8> {
        let buf = self.active.as_mut().ok_or(Error::NotRegistered)?;
        let capacity = buf.len();
        match offset.checked_add(len) {
            Some(end) if end <= capacity && u32::try_from(len).is_ok() => {
                // SAFETY: offset <= end <= capacity.
                Ok(unsafe { buf.buf.as_mut_ptr().add(offset) })
            }
            _ => Err(Error::OutOfBounds {
                offset,
                len,
                capacity,
            }),
        }
    }
}
