//! Per-network poll scheduling
//!
//! A network's polling points live in exactly one of three places: the
//! priority queue (a min-heap over priority class and enqueue time), the
//! standby pool (points waiting out a repoll delay), or the two-slot
//! unloader pipeline (`next` pre-drawn, `current` out for I/O). The
//! [`NetworkPollManager`] owns the queue, applies the write-mode state
//! machine after every poll, and arms the repoll and lockup timers.

pub mod network_queue;
pub mod poll_manager;
pub mod polling_point;
pub mod priority_queue;
pub mod standby_queue;
pub mod statistics;

pub use network_queue::{NetworkPollQueue, RemoveResult};
pub use poll_manager::{NetworkPollManager, PollCompletion, PollQueueConfig, RetryType};
pub use polling_point::{PollToken, PollingPoint};
pub use priority_queue::PriorityPollQueue;
pub use standby_queue::StandbyPollQueue;
pub use statistics::PollStatistics;
