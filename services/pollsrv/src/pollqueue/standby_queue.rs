//! Standby poll pool
//!
//! Unordered holding area for polling points that are not eligible to be
//! drawn, most of them waiting out a repoll timer.

use parking_lot::Mutex;
use poll_model::PollPriority;
use uuid::Uuid;

use super::polling_point::PollingPoint;

/// Thread-safe unordered pool of polling points.
#[derive(Debug, Default)]
pub struct StandbyPollQueue {
    pool: Mutex<Vec<PollingPoint>>,
}

impl StandbyPollQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, pp: PollingPoint) -> bool {
        self.pool.lock().push(pp);
        true
    }

    pub fn contains(&self, point_uuid: Uuid) -> bool {
        self.get_by_point(point_uuid).is_some()
    }

    /// Scheduling identity of a pooled point, if present.
    pub fn get_by_point(&self, point_uuid: Uuid) -> Option<super::polling_point::PollToken> {
        self.pool
            .lock()
            .iter()
            .find(|pp| pp.point_uuid == point_uuid)
            .map(|pp| pp.token())
    }

    pub fn remove_by_point(&self, point_uuid: Uuid) -> Option<PollingPoint> {
        let mut pool = self.pool.lock();
        let index = pool.iter().position(|pp| pp.point_uuid == point_uuid)?;
        let mut pp = pool.swap_remove(index);
        pp.reset_timers();
        Some(pp)
    }

    /// Remove a point for the repoll fire path: the repoll handle is
    /// detached (the caller *is* that task), only the lockup timer is
    /// cancelled.
    pub fn take_for_repoll(&self, point_uuid: Uuid) -> Option<PollingPoint> {
        let mut pool = self.pool.lock();
        let index = pool.iter().position(|pp| pp.point_uuid == point_uuid)?;
        let mut pp = pool.swap_remove(index);
        pp.detach_repoll_timer();
        Some(pp)
    }

    pub fn remove_by_device(&self, device_uuid: Uuid) {
        let mut pool = self.pool.lock();
        pool.retain_mut(|pp| {
            if pp.device_uuid == device_uuid {
                pp.reset_timers();
                false
            } else {
                true
            }
        });
    }

    pub fn remove_by_network(&self, network_uuid: Uuid) {
        let mut pool = self.pool.lock();
        pool.retain_mut(|pp| {
            if pp.network_uuid == network_uuid {
                pp.reset_timers();
                false
            } else {
                true
            }
        });
    }

    pub fn update_priority(&self, point_uuid: Uuid, priority: PollPriority) -> bool {
        let mut pool = self.pool.lock();
        if let Some(pp) = pool.iter_mut().find(|pp| pp.point_uuid == point_uuid) {
            pp.priority = priority;
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.pool.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.lock().is_empty()
    }

    /// Drain the pool, cancelling all timers.
    pub fn empty_queue(&self) {
        let mut pool = self.pool.lock();
        for pp in pool.iter_mut() {
            pp.reset_timers();
        }
        pool.clear();
    }

    pub fn active_timer_count(&self) -> usize {
        self.pool
            .lock()
            .iter()
            .map(|pp| pp.active_timer_count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_round_trip() {
        let pool = StandbyPollQueue::new();
        let point_uuid = Uuid::new_v4();
        pool.add(PollingPoint::new(point_uuid, Uuid::new_v4(), Uuid::new_v4()));
        assert!(pool.contains(point_uuid));
        assert_eq!(pool.len(), 1);

        let removed = pool.remove_by_point(point_uuid).unwrap();
        assert_eq!(removed.point_uuid, point_uuid);
        assert!(pool.is_empty());
        assert!(pool.remove_by_point(point_uuid).is_none());
    }

    #[tokio::test]
    async fn empty_queue_cancels_timers() {
        let pool = StandbyPollQueue::new();
        let mut pp = PollingPoint::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        pp.set_repoll_timer(tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }));
        pool.add(pp);
        assert_eq!(pool.active_timer_count(), 1);

        pool.empty_queue();
        assert_eq!(pool.active_timer_count(), 0);
        assert!(pool.is_empty());
    }
}
