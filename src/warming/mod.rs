//! Cache Warming
//!
//! Startup and idle-time preloading, periodic refresh and hover prefetch.

mod prefetch;
mod schedule;
mod warmer;

pub use prefetch::HoverPrefetcher;
pub use schedule::{run_every, run_when_idle, IdleSignal, ScheduledTask};
pub use warmer::{CacheWarmer, WarmPhase, WarmReport};
