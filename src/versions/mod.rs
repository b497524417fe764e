//! Snapshot chains keyed by checkpoint.
//!
//! The head is the live state every commit writes through. Older snapshots
//! are forked off when the global checkpoint advances, and stay reachable by
//! checkpoint lookup until a save makes them redundant.

mod chain;

pub use chain::{Version, VersionChain, Versions};
