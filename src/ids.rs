//! Small index handles used across the tables that make up this crate's
//! pointer graph: the broker's `slab::Slab`-backed interface table, and the
//! monotonic session/transaction counters.
//!
//! Dangling references are meant to be a detected runtime error rather than
//! memory corruption: a stale [`InterfaceId`] either misses or (worst case)
//! aliases a slot that has since been reused, both of which are
//! `Option`/assert-level bugs instead of a freed-pointer dereference.

use std::fmt;

/// Handle to a live [`crate::session::Session`] inside a [`crate::session::SessionTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub(crate) usize);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Handle to a live [`crate::broker::Interface`] inside the broker's
/// interface table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub(crate) usize);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interface#{}", self.0)
    }
}

/// A request/response correlation id, non-zero while "in flight".
///
/// Zero is reserved for "no transaction" per the wire frame's
/// `transaction_id` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub(crate) std::num::NonZeroU32);

impl TransactionId {
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}
