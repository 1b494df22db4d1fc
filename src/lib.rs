// Request plumbing shared by the tour booking frontends: a sequential
// request queue with a time-boxed result cache.

pub mod cache;
pub mod queue;

// Re-export key types for convenience
pub use cache::{CacheStats, ResultCache};
pub use queue::{QueueConfig, QueueError, QueueStats, RequestQueue};
