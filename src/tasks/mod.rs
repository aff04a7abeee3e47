//! Background Tasks Module
//!
//! Periodic maintenance that runs for the lifetime of the process.
//!
//! # Tasks
//! - Expiry sweep: purges expired entries from every backend

mod cleanup;

pub use cleanup::spawn_cleanup_task;
