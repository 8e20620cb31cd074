//! Keyed mutual exclusion.
//!
//! [`MultiMutex`] hands out at most one holder per key at a time while
//! letting unrelated keys proceed in parallel. Waiters on the same key are
//! served in FIFO order.

pub mod error;
mod mutex;

pub use crate::mutex::{KeyGuard, MultiMutex};
