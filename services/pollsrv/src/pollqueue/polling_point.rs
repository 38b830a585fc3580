//! Polling point scheduling token

use chrono::Utc;
use poll_model::PollPriority;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Scheduling token for one enabled point. Lives in the priority queue, the
/// standby pool or the unloader pipeline, never in two places at once.
///
/// The two optional one-shot timers are owned here as task handles; every
/// removal path resets them, and dropping the token aborts them as a
/// backstop so a lost cancellation cannot fire into a dead queue.
#[derive(Debug)]
pub struct PollingPoint {
    pub point_uuid: Uuid,
    pub device_uuid: Uuid,
    pub network_uuid: Uuid,
    pub priority: PollPriority,
    /// Unix seconds at priority-queue entry; breaks ties inside a priority
    /// class.
    pub queue_entry_time: i64,
    repoll_timer: Option<JoinHandle<()>>,
    lockup_timer: Option<JoinHandle<()>>,
}

impl PollingPoint {
    pub fn new(point_uuid: Uuid, device_uuid: Uuid, network_uuid: Uuid) -> Self {
        Self::with_priority(point_uuid, device_uuid, network_uuid, PollPriority::Normal)
    }

    pub fn with_priority(
        point_uuid: Uuid,
        device_uuid: Uuid,
        network_uuid: Uuid,
        priority: PollPriority,
    ) -> Self {
        Self {
            point_uuid,
            device_uuid,
            network_uuid,
            priority,
            queue_entry_time: 0,
            repoll_timer: None,
            lockup_timer: None,
        }
    }

    /// Stamp the queue entry time with the current wall clock.
    pub fn stamp_queue_entry(&mut self) {
        self.queue_entry_time = Utc::now().timestamp();
    }

    /// Cancel and clear both timers.
    pub fn reset_timers(&mut self) {
        if let Some(timer) = self.repoll_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.lockup_timer.take() {
            timer.abort();
        }
    }

    pub fn set_repoll_timer(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.repoll_timer.replace(handle) {
            previous.abort();
        }
    }

    /// Detach the repoll timer without aborting it. Used by the repoll fire
    /// path, which runs inside the timer task itself.
    pub fn detach_repoll_timer(&mut self) {
        self.repoll_timer = None;
    }

    pub fn set_lockup_timer(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.lockup_timer.replace(handle) {
            previous.abort();
        }
    }

    /// Number of timers still armed and not yet finished.
    pub fn active_timer_count(&self) -> usize {
        let mut count = 0;
        if self.repoll_timer.as_ref().is_some_and(|t| !t.is_finished()) {
            count += 1;
        }
        if self.lockup_timer.as_ref().is_some_and(|t| !t.is_finished()) {
            count += 1;
        }
        count
    }

    /// Lightweight copy handed to the polling loop while the token itself
    /// stays in the pipeline.
    pub fn token(&self) -> PollToken {
        PollToken {
            point_uuid: self.point_uuid,
            device_uuid: self.device_uuid,
            network_uuid: self.network_uuid,
            priority: self.priority,
            queue_entry_time: self.queue_entry_time,
        }
    }
}

impl Drop for PollingPoint {
    fn drop(&mut self) {
        self.reset_timers();
    }
}

/// Copy of a polling point's scheduling identity, without the timers.
#[derive(Debug, Clone, Copy)]
pub struct PollToken {
    pub point_uuid: Uuid,
    pub device_uuid: Uuid,
    pub network_uuid: Uuid,
    pub priority: PollPriority,
    pub queue_entry_time: i64,
}
