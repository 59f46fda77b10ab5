//! Rate limiting
//!
//! Fixed one-minute and one-hour windows per (client, category). An
//! operation is counted only when it fits under both ceilings, and the
//! check and the increment happen in one critical section per counter.

pub mod clock;
pub mod limiter;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{RateLimitStatus, RateLimiter};
pub use store::{
    Admission, Ceilings, CounterKey, CounterStore, MemoryCounterStore, RateWindowCounter, Window,
    WindowUsage,
};
