use core::fmt;

/// Caller-chosen correlation id, handed back unchanged in the completion of
/// the request that carried it.
///
/// Ids are non-negative 63-bit values. They do not have to be unique: the
/// ring tags each request with its own user_data token and maps the
/// completion back to the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub const MAX: u64 = i64::MAX as u64;

    /// `None` if `raw` does not fit in 63 bits.
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        if raw > Self::MAX {
            None
        } else {
            Some(Self(raw))
        }
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u32> for RequestId {
    fn from(raw: u32) -> Self {
        Self(u64::from(raw))
    }
}

impl TryFrom<u64> for RequestId {
    type Error = u64;

    fn try_from(raw: u64) -> Result<Self, u64> {
        Self::new(raw).ok_or(raw)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
