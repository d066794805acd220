//! Background Tasks Module
//!
//! Long-running workers owned by the cache engine.

mod sweeper;

pub use sweeper::SweeperHandle;

pub(crate) use sweeper::spawn_sweeper;
