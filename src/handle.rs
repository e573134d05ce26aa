//! Resource handles: kernel-native structures the kernel reads or writes
//! asynchronously, after the submitting call has returned.
//!
//! Each handle owns a single heap block whose address never changes for the
//! handle's lifetime. A handle is *bound* while the caller owns it, *in
//! flight* once the ring has taken it for a request, and *retired* when the
//! ring hands it back through the request's completion. The caller can only
//! drop it in the bound or retired state.

use core::ptr::NonNull;
use std::ffi::OsStr;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use rustix::fs::{Mode, OFlags, ResolveFlags};

use crate::err::{Error, Result};
use crate::{AF_INET, AF_INET6, AF_UNIX};

const SOCKADDR_STORAGE_LEN: usize = 128;
const SOCKADDR_IN_LEN: u32 = 16;
const SOCKADDR_IN6_LEN: u32 = 28;
const SUN_PATH_OFFSET: usize = 2;
const SUN_PATH_LEN: usize = 108;

/// `struct sockaddr_storage`.
#[repr(C, align(8))]
struct Storage([u8; SOCKADDR_STORAGE_LEN]);

#[repr(C)]
struct SockAddrData {
    storage: Storage,
    len: u32,
}

/// A socket address in a form the kernel can use directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Inet(SocketAddr),
    Unix(PathBuf),
    /// A Unix-domain peer that never bound a name.
    UnnamedUnix,
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::Inet(addr)
    }
}

/// Socket address handle for `connect` and `accept`.
///
/// Holds `sockaddr_storage` plus its `socklen_t` length in one block, so the
/// kernel may read the address (connect) or overwrite both address and
/// length (accept).
pub struct SockAddr {
    data: NonNull<SockAddrData>,
}

// SAFETY: the handle exclusively owns its heap block.
unsafe impl Send for SockAddr {}

impl SockAddr {
    fn zeroed() -> Self {
        let data = Box::new(SockAddrData {
            storage: Storage([0; SOCKADDR_STORAGE_LEN]),
            len: 0,
        });
        Self {
            data: NonNull::from(Box::leak(data)),
        }
    }

    /// Translates `addr` into its native `sockaddr_*` representation.
    pub fn new(addr: &Address) -> Result<Self> {
        let mut this = Self::zeroed();
        let data = this.data_mut();
        let bytes = &mut data.storage.0;
        match addr {
            Address::Inet(SocketAddr::V4(v4)) => {
                bytes[0..2].copy_from_slice(&AF_INET.to_ne_bytes());
                bytes[2..4].copy_from_slice(&v4.port().to_be_bytes());
                bytes[4..8].copy_from_slice(&v4.ip().octets());
                data.len = SOCKADDR_IN_LEN;
            }
            Address::Inet(SocketAddr::V6(v6)) => {
                bytes[0..2].copy_from_slice(&AF_INET6.to_ne_bytes());
                bytes[2..4].copy_from_slice(&v6.port().to_be_bytes());
                bytes[4..8].copy_from_slice(&v6.flowinfo().to_ne_bytes());
                bytes[8..24].copy_from_slice(&v6.ip().octets());
                bytes[24..28].copy_from_slice(&v6.scope_id().to_ne_bytes());
                data.len = SOCKADDR_IN6_LEN;
            }
            Address::Unix(path) => {
                let path = path.as_os_str().as_bytes();
                if path.contains(&0) {
                    return Err(Error::NulInPath);
                }
                // Room for the terminating nul.
                if path.len() >= SUN_PATH_LEN {
                    return Err(Error::AddressTooLong(path.len()));
                }
                bytes[0..2].copy_from_slice(&AF_UNIX.to_ne_bytes());
                bytes[SUN_PATH_OFFSET..SUN_PATH_OFFSET + path.len()].copy_from_slice(path);
                data.len = (SUN_PATH_OFFSET + path.len() + 1) as u32;
            }
            Address::UnnamedUnix => {
                bytes[0..2].copy_from_slice(&AF_UNIX.to_ne_bytes());
                data.len = SUN_PATH_OFFSET as u32;
            }
        }
        Ok(this)
    }

    /// An empty handle sized to hold any address, for `accept` to fill in.
    #[must_use]
    pub fn for_accept() -> Self {
        let mut this = Self::zeroed();
        this.reset_len();
        this
    }

    fn data(&self) -> &SockAddrData {
        unsafe { self.data.as_ref() }
    }

    fn data_mut(&mut self) -> &mut SockAddrData {
        unsafe { self.data.as_mut() }
    }

    #[must_use]
    pub fn family(&self) -> u16 {
        let bytes = &self.data().storage.0;
        u16::from_ne_bytes([bytes[0], bytes[1]])
    }

    /// The `socklen_t` length of the stored address.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.data().len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The native address bytes, `len()` long.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        let len = (self.len() as usize).min(SOCKADDR_STORAGE_LEN);
        &self.data().storage.0[..len]
    }

    /// Translates the native representation back. `None` for families this
    /// crate does not decode or truncated lengths.
    #[must_use]
    pub fn address(&self) -> Option<Address> {
        let bytes = self.as_bytes();
        if bytes.len() < SUN_PATH_OFFSET {
            return None;
        }
        match self.family() {
            AF_INET if bytes.len() >= SOCKADDR_IN_LEN as usize => {
                let port = u16::from_be_bytes([bytes[2], bytes[3]]);
                let ip = Ipv4Addr::new(bytes[4], bytes[5], bytes[6], bytes[7]);
                Some(Address::Inet(SocketAddr::V4(SocketAddrV4::new(ip, port))))
            }
            AF_INET6 if bytes.len() >= SOCKADDR_IN6_LEN as usize => {
                let port = u16::from_be_bytes([bytes[2], bytes[3]]);
                let flowinfo = u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&bytes[8..24]);
                let scope_id = u32::from_ne_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
                Some(Address::Inet(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(octets),
                    port,
                    flowinfo,
                    scope_id,
                ))))
            }
            AF_UNIX => {
                let path = &bytes[SUN_PATH_OFFSET..];
                let end = path.iter().position(|&b| b == 0).unwrap_or(path.len());
                if end == 0 {
                    Some(Address::UnnamedUnix)
                } else {
                    Some(Address::Unix(PathBuf::from(OsStr::from_bytes(&path[..end]))))
                }
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self.address()? {
            Address::Inet(addr) => Some(addr),
            _ => None,
        }
    }

    pub(crate) fn addr_ptr(&self) -> *const u8 {
        self.data.as_ptr().cast::<u8>().cast_const()
    }

    pub(crate) fn len_ptr(&self) -> *mut u32 {
        // SAFETY: `len` is a field of the block this handle owns.
        unsafe { core::ptr::addr_of_mut!((*self.data.as_ptr()).len) }
    }

    /// Lets the kernel write up to the full storage capacity.
    pub(crate) fn reset_len(&mut self) {
        self.data_mut().len = SOCKADDR_STORAGE_LEN as u32;
    }
}

impl TryFrom<SocketAddr> for SockAddr {
    type Error = Error;

    fn try_from(addr: SocketAddr) -> Result<Self> {
        Self::new(&Address::Inet(addr))
    }
}

impl core::fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SockAddr")
            .field("family", &self.family())
            .field("len", &self.len())
            .field("address", &self.address())
            .finish()
    }
}

impl Drop for SockAddr {
    fn drop(&mut self) {
        // SAFETY: created from Box::leak in `zeroed`, released exactly once.
        drop(unsafe { Box::from_raw(self.data.as_ptr()) });
    }
}

/// `struct open_how`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct open_how {
    pub flags: u64,
    pub mode: u64,
    pub resolve: u64,
}

const HOW_WORDS: usize = core::mem::size_of::<open_how>() / core::mem::size_of::<u64>();

/// `openat2` arguments: an `open_how` record immediately followed by the
/// nul-terminated path, in one contiguous block.
pub struct OpenHow {
    block: NonNull<[u64]>,
    path_len: usize,
}

// SAFETY: the handle exclusively owns its heap block.
unsafe impl Send for OpenHow {}

impl OpenHow {
    pub fn new(
        path: impl AsRef<Path>,
        flags: OFlags,
        mode: Mode,
        resolve: ResolveFlags,
    ) -> Result<Self> {
        let path = path.as_ref().as_os_str().as_bytes();
        if path.contains(&0) {
            return Err(Error::NulInPath);
        }

        let path_words = (path.len() + 1).div_ceil(core::mem::size_of::<u64>());
        let mut block = vec![0u64; HOW_WORDS + path_words].into_boxed_slice();
        let how = open_how {
            flags: u64::from(flags.bits()),
            mode: u64::from(mode.bits()),
            resolve: resolve.bits(),
        };

        // SAFETY: the block holds HOW_WORDS words for `how`, then at least
        // path.len() + 1 zeroed bytes, so the copied path stays terminated.
        unsafe {
            block.as_mut_ptr().cast::<open_how>().write(how);
            core::ptr::copy_nonoverlapping(
                path.as_ptr(),
                block.as_mut_ptr().add(HOW_WORDS).cast::<u8>(),
                path.len(),
            );
        }

        Ok(Self {
            block: NonNull::from(Box::leak(block)),
            path_len: path.len(),
        })
    }

    pub(crate) fn how_ptr(&self) -> *const open_how {
        self.block.as_ptr().cast::<open_how>().cast_const()
    }

    pub(crate) fn path_ptr(&self) -> *const u8 {
        unsafe { self.block.as_ptr().cast::<u64>().add(HOW_WORDS).cast::<u8>().cast_const() }
    }

    #[must_use]
    pub fn how(&self) -> open_how {
        unsafe { self.how_ptr().read() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        // SAFETY: path_len bytes were copied in by `new`.
        let bytes = unsafe { core::slice::from_raw_parts(self.path_ptr(), self.path_len) };
        Path::new(OsStr::from_bytes(bytes))
    }
}

impl core::fmt::Debug for OpenHow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenHow")
            .field("how", &self.how())
            .field("path", &self.path())
            .finish()
    }
}

impl Drop for OpenHow {
    fn drop(&mut self) {
        // SAFETY: created from Box::leak in `new`, released exactly once.
        drop(unsafe { Box::from_raw(self.block.as_ptr()) });
    }
}
