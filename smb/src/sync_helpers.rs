//! Thin re-export of the async synchronization primitives used across the
//! crate, kept as a single module so call sites read `sync_helpers::Mutex`
//! rather than reaching into `tokio::sync` directly.

pub use tokio::sync::{Mutex, OnceCell, RwLock, Semaphore};
