//! Network poll queue
//!
//! Composes the priority queue, the standby pool, the updated-while-polling
//! marker set and the two-slot unloader pipeline. The pipeline guarantees
//! at most one polling point is out for I/O per network: `next` is
//! pre-drawn and waiting for the tick, `current` is out for I/O.

use std::collections::HashMap;

use parking_lot::Mutex;
use poll_model::PollPriority;
use uuid::Uuid;

use super::polling_point::{PollToken, PollingPoint};
use super::priority_queue::PriorityPollQueue;
use super::standby_queue::StandbyPollQueue;

/// Outcome of a removal request.
#[derive(Debug)]
pub enum RemoveResult {
    /// The polling point was pulled out of a queue or the `next` slot.
    Removed(PollingPoint),
    /// The polling point is out for I/O; it is flagged and will be dropped
    /// by the completion hook instead of re-queued.
    Pending,
    NotFound,
}

#[derive(Debug, Default)]
struct Unloader {
    next: Option<PollingPoint>,
    current: Option<PollingPoint>,
    remove_current: bool,
}

/// Per-network queue compound.
#[derive(Debug, Default)]
pub struct NetworkPollQueue {
    pub priority_queue: PriorityPollQueue,
    pub standby: StandbyPollQueue,
    updated_while_polling: Mutex<HashMap<Uuid, bool>>,
    unloader: Mutex<Unloader>,
}

impl NetworkPollQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the pipeline and pre-draw the first polling point.
    pub fn start(&self) {
        let mut unloader = self.unloader.lock();
        *unloader = Unloader::default();
        Self::refill_next(&mut unloader, &self.priority_queue);
    }

    pub fn stop(&self) {
        self.empty_queue();
    }

    /// Drain every slot and queue, cancelling all timers.
    pub fn empty_queue(&self) {
        self.priority_queue.empty_queue();
        self.standby.empty_queue();
        let mut unloader = self.unloader.lock();
        if let Some(mut pp) = unloader.next.take() {
            pp.reset_timers();
        }
        if let Some(mut pp) = unloader.current.take() {
            pp.reset_timers();
        }
        unloader.remove_current = false;
        self.updated_while_polling.lock().clear();
    }

    fn refill_next(unloader: &mut Unloader, priority_queue: &PriorityPollQueue) {
        if unloader.next.is_some() {
            return;
        }
        if let Some(mut pp) = priority_queue.pop_next() {
            // the point has been drawn; its lockup timer no longer applies
            pp.reset_timers();
            unloader.next = Some(pp);
        }
    }

    /// Move `next` into `current` and pre-draw the following point. Returns
    /// a token for the loop; the polling point itself stays in `current`
    /// until [`take_current`](Self::take_current).
    pub fn get_next_polling_point(&self) -> Option<PollToken> {
        let mut unloader = self.unloader.lock();
        if unloader.current.is_some() {
            // previous poll has not completed; pipeline is busy
            return None;
        }
        Self::refill_next(&mut unloader, &self.priority_queue);
        let pp = unloader.next.take()?;
        let token = pp.token();
        unloader.current = Some(pp);
        Self::refill_next(&mut unloader, &self.priority_queue);
        Some(token)
    }

    /// Take the `current` polling point for completion. Returns the point
    /// and whether a removal was requested while it was out for I/O.
    pub fn take_current(&self, point_uuid: Uuid) -> Option<(PollingPoint, bool)> {
        let mut unloader = self.unloader.lock();
        if unloader
            .current
            .as_ref()
            .is_some_and(|pp| pp.point_uuid == point_uuid)
        {
            let pp = unloader.current.take()?;
            let remove_requested = unloader.remove_current;
            unloader.remove_current = false;
            return Some((pp, remove_requested));
        }
        None
    }

    /// Stamp the queue entry time and push onto the priority queue.
    pub fn add_to_priority_queue(&self, mut pp: PollingPoint) -> bool {
        pp.stamp_queue_entry();
        self.priority_queue.add(pp)
    }

    pub fn add_to_standby_queue(&self, pp: PollingPoint) -> bool {
        self.standby.add(pp)
    }

    /// Remove a point wherever it lives: `current` is flagged for removal
    /// at completion, everything else is pulled immediately.
    pub fn remove_by_point(&self, point_uuid: Uuid) -> RemoveResult {
        let mut unloader = self.unloader.lock();
        if unloader
            .current
            .as_ref()
            .is_some_and(|pp| pp.point_uuid == point_uuid)
        {
            unloader.remove_current = true;
            return RemoveResult::Pending;
        }
        if unloader
            .next
            .as_ref()
            .is_some_and(|pp| pp.point_uuid == point_uuid)
        {
            let mut pp = unloader.next.take().expect("next checked above");
            pp.reset_timers();
            Self::refill_next(&mut unloader, &self.priority_queue);
            return RemoveResult::Removed(pp);
        }
        drop(unloader);

        if let Some(pp) = self.priority_queue.remove_by_point(point_uuid) {
            return RemoveResult::Removed(pp);
        }
        if let Some(pp) = self.standby.remove_by_point(point_uuid) {
            return RemoveResult::Removed(pp);
        }
        RemoveResult::NotFound
    }

    pub fn remove_by_device(&self, device_uuid: Uuid) {
        {
            let mut unloader = self.unloader.lock();
            if unloader
                .current
                .as_ref()
                .is_some_and(|pp| pp.device_uuid == device_uuid)
            {
                unloader.remove_current = true;
            }
            if unloader
                .next
                .as_ref()
                .is_some_and(|pp| pp.device_uuid == device_uuid)
            {
                if let Some(mut pp) = unloader.next.take() {
                    pp.reset_timers();
                }
                Self::refill_next(&mut unloader, &self.priority_queue);
            }
        }
        self.priority_queue.remove_by_device(device_uuid);
        self.standby.remove_by_device(device_uuid);
    }

    pub fn remove_by_network(&self, network_uuid: Uuid) {
        {
            let mut unloader = self.unloader.lock();
            if unloader
                .current
                .as_ref()
                .is_some_and(|pp| pp.network_uuid == network_uuid)
            {
                unloader.remove_current = true;
            }
            if let Some(mut pp) = unloader.next.take() {
                pp.reset_timers();
            }
        }
        self.priority_queue.remove_by_network(network_uuid);
        self.standby.remove_by_network(network_uuid);
    }

    /// Scheduling identity of a point's polling point, wherever it lives
    /// (pipeline, priority queue or standby pool).
    pub fn get_polling_point(&self, point_uuid: Uuid) -> Option<PollToken> {
        {
            let unloader = self.unloader.lock();
            for slot in [unloader.current.as_ref(), unloader.next.as_ref()] {
                if let Some(pp) = slot.filter(|pp| pp.point_uuid == point_uuid) {
                    return Some(pp.token());
                }
            }
        }
        self.priority_queue
            .get_by_point(point_uuid)
            .or_else(|| self.standby.get_by_point(point_uuid))
    }

    /// Whether a polling point exists anywhere for this point.
    pub fn contains_point(&self, point_uuid: Uuid) -> bool {
        self.get_polling_point(point_uuid).is_some()
    }

    pub fn update_priority(&self, point_uuid: Uuid, priority: PollPriority) -> bool {
        self.priority_queue.update_priority(point_uuid, priority)
            || self.standby.update_priority(point_uuid, priority)
    }

    /// Record that the point was updated while out for polling.
    pub fn mark_updated_while_polling(&self, point_uuid: Uuid, wants_asap_write: bool) {
        self.updated_while_polling
            .lock()
            .insert(point_uuid, wants_asap_write);
    }

    /// Consume the updated-while-polling marker, if any.
    pub fn consume_updated_while_polling(&self, point_uuid: Uuid) -> Option<bool> {
        self.updated_while_polling.lock().remove(&point_uuid)
    }

    /// Pull a point out of standby from inside its own repoll timer task.
    pub fn take_standby_for_repoll(&self, point_uuid: Uuid) -> Option<PollingPoint> {
        self.standby.take_for_repoll(point_uuid)
    }

    pub fn next_is_some(&self) -> bool {
        self.unloader.lock().next.is_some()
    }

    pub fn current_is_some(&self) -> bool {
        self.unloader.lock().current.is_some()
    }

    /// Armed, unfired timers across queues and pipeline; must drop to zero
    /// on teardown.
    pub fn active_timer_count(&self) -> usize {
        let pipeline: usize = {
            let unloader = self.unloader.lock();
            unloader
                .next
                .iter()
                .chain(unloader.current.iter())
                .map(|pp| pp.active_timer_count())
                .sum()
        };
        pipeline + self.priority_queue.active_timer_count() + self.standby.active_timer_count()
    }
}
