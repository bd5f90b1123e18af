#![forbid(unsafe_code)]

//! Durable checkpointing for the weir reservoir: binary record codecs, the
//! store capability the layer writes through, a redb-backed store, and the
//! checkpoint manager driving ticks, restore, and compaction.

pub mod codec;
pub mod manager;
pub mod redb_store;
pub mod store;

pub use manager::{CheckpointManager, RestoredState};
pub use redb_store::RedbStore;
pub use store::{CheckpointStore, MemoryStore};
