//! # quellstore
//!
//! Flat key-value storage underneath the Quell normalized cache.
//!
//! ## Architecture
//! - **KvStore**: the `get` / `set` / `delete` capability the engine writes into
//! - **MemoryStore**: session-scoped backend (AHash map behind a RwLock)
//! - **FileStore**: local, persisted backend (append-only log, compacted on close)
//! - **NormalizedStore**: typed entry/list records with lazy and swept expiry
//!
//! ## Store layout
//! - `"<Type>--<identifier>"` → `{"fields":{..},"references":{..},"expiresAt":ms}`
//! - `"<Type>"` → `["<Type>--1", "<Type>--2", ...]`

#![warn(missing_docs)]

mod clock;
mod error;
mod expiry;
mod normalized;
mod record;
mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use expiry::ExpiryIndex;
pub use normalized::NormalizedStore;
pub use record::{entry_key, CacheEntry, Reference, StoredValue};
pub use storage::{FileStore, KvStore, MemoryStore};
