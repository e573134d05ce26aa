use std::collections::HashMap;

use crate::handle::{OpenHow, SockAddr};
use crate::id::RequestId;
use crate::sqe::Iovec;

/// Memory the kernel may touch until a request completes.
#[derive(Debug)]
pub enum Resource {
    SockAddr(SockAddr),
    OpenHow(OpenHow),
    /// The iovec array of a vectored read or write. The segments it points
    /// at stay owned by the caller.
    Iovecs(Box<[Iovec]>),
}

/// What an in-flight request keeps alive.
#[derive(Debug)]
pub(crate) enum Held {
    Nothing,
    Resource(Resource),
    /// A range of the registered buffer.
    Fixed,
}

#[derive(Debug)]
struct Entry {
    id: RequestId,
    held: Held,
}

/// Requests handed to the ring whose completion has not been delivered yet,
/// with whatever each one holds.
///
/// Caller ids need not be unique, so every request is written to the kernel
/// under its own token instead. Tokens stay below [`RequestId::MAX`]; the top
/// bit of user_data is left to entries the ring queues for itself.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    entries: HashMap<u64, Entry>,
    next: u64,
    fixed: usize,
}

impl InFlight {
    /// The token the next inserted request will carry.
    pub(crate) fn next_token(&self) -> u64 {
        let mut token = self.next;
        while self.entries.contains_key(&token) {
            token = token.wrapping_add(1) & RequestId::MAX;
        }
        token
    }

    pub(crate) fn insert(&mut self, token: u64, id: RequestId, held: Held) {
        debug_assert!(!self.entries.contains_key(&token));
        if matches!(held, Held::Fixed) {
            self.fixed += 1;
        }
        self.entries.insert(token, Entry { id, held });
        self.next = token.wrapping_add(1) & RequestId::MAX;
    }

    /// Retires the request written under `token`, returning its caller id and
    /// the resource it held. `None` for tokens this table never issued.
    pub(crate) fn complete(&mut self, token: u64) -> Option<(RequestId, Option<Resource>)> {
        let Entry { id, held } = self.entries.remove(&token)?;
        let resource = match held {
            Held::Resource(resource) => Some(resource),
            Held::Fixed => {
                self.fixed -= 1;
                None
            }
            Held::Nothing => None,
        };
        Some((id, resource))
    }

    /// Token of the oldest in-flight request submitted as `id`.
    pub(crate) fn token_of(&self, id: RequestId) -> Option<u64> {
        // Distance from `next` orders tokens oldest first across wrap-around.
        let age = |token: u64| token.wrapping_sub(self.next) & RequestId::MAX;
        self.entries
            .iter()
            .filter(|(_, entry)| entry.id == id)
            .map(|(&token, _)| token)
            .min_by_key(|&token| age(token))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// In-flight requests addressing the registered buffer.
    pub(crate) fn fixed(&self) -> usize {
        self.fixed
    }

    /// Forgets every held resource without freeing it, for when the kernel
    /// may still write to them. Returns how many requests were outstanding.
    pub(crate) fn leak(&mut self) -> usize {
        let outstanding = self.entries.len();
        for (_, entry) in self.entries.drain() {
            if let Held::Resource(resource) = entry.held {
                core::mem::forget(resource);
            }
        }
        self.fixed = 0;
        outstanding
    }
}
