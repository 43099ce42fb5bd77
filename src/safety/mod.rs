//! Safety Module
//!
//! Rate limiting and per-stage concurrency pools that keep a run inside
//! the backend's limits.

pub mod rate_limiter;
pub mod semaphore;
pub mod throttler;

pub use rate_limiter::{RateLimiter, SlotTicket};
pub use semaphore::{StagePermit, StageSemaphore, StageStats};
pub use throttler::PipelineThrottler;
