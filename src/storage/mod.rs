//! # Header Storage
//!
//! Durable keyed storage for object headers, so a restarted server can reload
//! its live objects and a new client can be handed the full inventory.
//!
//! ## Components
//! - **Slot**: on-disk file marker and fixed-size slot layout
//! - **Container**: id-to-slot table over the backing file, with lazy
//!   deletion, compaction and restore

pub mod container;
pub mod slot;

pub use container::HeaderContainer;
