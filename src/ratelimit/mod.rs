//! Rate limiting logic and state management.

mod clock;
mod distributed;
mod entry;
mod limiter;
mod memory;
mod policy;
mod store;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use distributed::GossipStore;
pub use entry::{EntryKey, RateLimitEntry};
pub use limiter::{Decision, RateLimiter, Usage};
pub use memory::MemoryStore;
pub use policy::{Policy, PolicyRule, PolicySet, ScopeRules, DEFAULT_SCOPE, MAX_WINDOW_SECS};
pub use store::{EntryStore, StoreError, StoreResult};
pub use sweeper::{Sweeper, SweeperHandle, DEFAULT_SWEEP_INTERVAL, MIN_SWEEP_INTERVAL};
