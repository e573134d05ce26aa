use rustix::io_uring::{io_uring_params, IoringSetupFlags};

use crate::err::{Error, Result};
use crate::ring::Ring;

/// Ring configuration.
///
/// ```no_run
/// let ring = uring_core::SetupBuilder::new().sq_entries(64).cq_entries(256).build()?;
/// # Ok::<(), uring_core::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupBuilder {
    sq_entries: u32,
    cq_entries: Option<u32>,
    clamp: bool,
}

impl Default for SetupBuilder {
    fn default() -> Self {
        Self {
            sq_entries: 32,
            cq_entries: None,
            clamp: false,
        }
    }
}

impl SetupBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested submission queue depth. The kernel rounds it up to a power
    /// of two.
    #[must_use]
    pub fn sq_entries(mut self, entries: u32) -> Self {
        self.sq_entries = entries;
        self
    }

    /// Completion queue depth. Defaults to twice the submission depth.
    #[must_use]
    pub fn cq_entries(mut self, entries: u32) -> Self {
        self.cq_entries = Some(entries);
        self
    }

    /// Clamp oversize depths to the kernel maximum instead of failing.
    #[must_use]
    pub fn clamp(mut self, clamp: bool) -> Self {
        self.clamp = clamp;
        self
    }

    pub(crate) fn params(&self) -> Result<io_uring_params> {
        let invalid = Error::InvalidDepth {
            sq: self.sq_entries,
            cq: self.cq_entries,
        };
        if self.sq_entries == 0 {
            return Err(invalid);
        }

        let mut params = io_uring_params::default();
        if let Some(cq) = self.cq_entries {
            if cq < self.sq_entries {
                return Err(invalid);
            }
            params.flags |= IoringSetupFlags::CQSIZE;
            params.cq_entries = cq;
        }
        if self.clamp {
            params.flags |= IoringSetupFlags::CLAMP;
        }
        Ok(params)
    }

    pub fn build(self) -> Result<Ring> {
        Ring::with_config(self)
    }

    #[must_use]
    pub(crate) fn requested_sq_entries(&self) -> u32 {
        self.sq_entries
    }
}
