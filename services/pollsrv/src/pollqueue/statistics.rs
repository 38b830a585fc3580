//! Poll queue statistics

use chrono::Utc;
use poll_model::PollPriority;

use super::network_queue::NetworkPollQueue;

/// Statistics aggregate for one network's poll queue.
///
/// Poll execute times measure the transaction itself; the per-priority
/// averages measure queue entry to completion, excluding polls whose queue
/// entry time was reset while they waited.
#[derive(Debug, Clone, Default)]
pub struct PollStatistics {
    pub max_poll_execute_time_secs: f64,
    pub average_poll_execute_time_secs: f64,
    pub min_poll_execute_time_secs: f64,

    pub total_poll_queue_length: i64,
    pub total_standby_points_length: i64,
    pub total_points_out_for_polling: i64,

    pub asap_priority_poll_queue_length: i64,
    pub high_priority_poll_queue_length: i64,
    pub normal_priority_poll_queue_length: i64,
    pub low_priority_poll_queue_length: i64,

    pub asap_priority_average_poll_time: f64,
    pub high_priority_average_poll_time: f64,
    pub normal_priority_average_poll_time: f64,
    pub low_priority_average_poll_time: f64,

    pub total_poll_count: i64,
    pub asap_priority_poll_count: i64,
    pub high_priority_poll_count: i64,
    pub normal_priority_poll_count: i64,
    pub low_priority_poll_count: i64,

    asap_priority_poll_count_for_avg: i64,
    high_priority_poll_count_for_avg: i64,
    normal_priority_poll_count_for_avg: i64,
    low_priority_poll_count_for_avg: i64,

    pub asap_priority_lockup_alert: bool,
    pub high_priority_lockup_alert: bool,
    pub normal_priority_lockup_alert: bool,
    pub low_priority_lockup_alert: bool,

    pub polling_start_time_unix: i64,
    /// Percent of enabled time spent actively polling, 3 decimal places.
    pub busy_time: f64,
    pub enabled_time: f64,
    pub port_unavailable_time: f64,
    pub port_unavailable_start_time: i64,
}

impl PollStatistics {
    /// Reset all counters and stamp the polling start time.
    pub fn start(&mut self) {
        *self = PollStatistics {
            polling_start_time_unix: Utc::now().timestamp(),
            ..PollStatistics::default()
        };
    }

    pub fn set_lockup_alert(&mut self, priority: PollPriority) {
        match priority {
            PollPriority::Asap => self.asap_priority_lockup_alert = true,
            PollPriority::High => self.high_priority_lockup_alert = true,
            PollPriority::Normal => self.normal_priority_lockup_alert = true,
            PollPriority::Low => self.low_priority_lockup_alert = true,
        }
    }

    pub fn mark_port_unavailable(&mut self) {
        self.port_unavailable_start_time = Utc::now().timestamp();
    }

    fn refresh_queue_lengths(&mut self, queue: &NetworkPollQueue) {
        self.total_poll_queue_length = queue.priority_queue.len() as i64;
        if queue.next_is_some() {
            self.total_poll_queue_length += 1;
        }
        self.total_standby_points_length = queue.standby.len() as i64;
        self.total_points_out_for_polling = if queue.current_is_some() { 1 } else { 0 };

        let [asap, high, normal, low] = queue.priority_queue.priority_counts();
        self.asap_priority_poll_queue_length = asap;
        self.high_priority_poll_queue_length = high;
        self.normal_priority_poll_queue_length = normal;
        self.low_priority_poll_queue_length = low;
    }

    /// Update after a completed poll.
    pub fn poll_complete_update(
        &mut self,
        priority: PollPriority,
        queue_entry_time: i64,
        poll_time_secs: f64,
        queue: &NetworkPollQueue,
    ) {
        if self.max_poll_execute_time_secs == 0.0 || poll_time_secs > self.max_poll_execute_time_secs
        {
            self.max_poll_execute_time_secs = poll_time_secs;
        }
        if self.min_poll_execute_time_secs == 0.0 || poll_time_secs < self.min_poll_execute_time_secs
        {
            self.min_poll_execute_time_secs = poll_time_secs;
        }
        self.average_poll_execute_time_secs = ((self.average_poll_execute_time_secs
            * self.total_poll_count as f64)
            + poll_time_secs)
            / (self.total_poll_count as f64 + 1.0);
        self.total_poll_count += 1;
        self.enabled_time = (Utc::now().timestamp() - self.polling_start_time_unix) as f64;
        if self.enabled_time > 0.0 {
            self.busy_time = (((self.average_poll_execute_time_secs * self.total_poll_count as f64)
                / self.enabled_time)
                * 100.0
                * 1000.0)
                .round()
                / 1000.0;
        }

        self.refresh_queue_lengths(queue);

        let (count, count_for_avg, average) = match priority {
            PollPriority::Asap => (
                &mut self.asap_priority_poll_count,
                &mut self.asap_priority_poll_count_for_avg,
                &mut self.asap_priority_average_poll_time,
            ),
            PollPriority::High => (
                &mut self.high_priority_poll_count,
                &mut self.high_priority_poll_count_for_avg,
                &mut self.high_priority_average_poll_time,
            ),
            PollPriority::Normal => (
                &mut self.normal_priority_poll_count,
                &mut self.normal_priority_poll_count_for_avg,
                &mut self.normal_priority_average_poll_time,
            ),
            PollPriority::Low => (
                &mut self.low_priority_poll_count,
                &mut self.low_priority_poll_count_for_avg,
                &mut self.low_priority_average_poll_time,
            ),
        };
        *count += 1;
        if queue_entry_time <= 0 {
            return;
        }
        let queue_to_complete = (Utc::now().timestamp() - queue_entry_time) as f64;
        *average = ((*average * *count_for_avg as f64) + queue_to_complete)
            / (*count_for_avg as f64 + 1.0);
        *count_for_avg += 1;
    }

    /// Refresh the queue lengths and running times without a completed poll
    /// (used when polling resumes after a pause).
    pub fn partial_update(&mut self, queue: &NetworkPollQueue, port_was_unavailable: bool) {
        self.refresh_queue_lengths(queue);
        self.enabled_time = (Utc::now().timestamp() - self.polling_start_time_unix) as f64;
        if port_was_unavailable && self.port_unavailable_start_time > 0 {
            self.port_unavailable_time +=
                (Utc::now().timestamp() - self.port_unavailable_start_time) as f64;
            self.port_unavailable_start_time = Utc::now().timestamp();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pollqueue::polling_point::PollingPoint;
    use uuid::Uuid;

    #[test]
    fn min_max_avg_track_poll_times() {
        let queue = NetworkPollQueue::new();
        let mut stats = PollStatistics::default();
        stats.start();

        stats.poll_complete_update(PollPriority::Normal, 0, 0.5, &queue);
        stats.poll_complete_update(PollPriority::Normal, 0, 1.5, &queue);
        stats.poll_complete_update(PollPriority::Normal, 0, 1.0, &queue);

        assert_eq!(stats.total_poll_count, 3);
        assert_eq!(stats.normal_priority_poll_count, 3);
        assert_eq!(stats.min_poll_execute_time_secs, 0.5);
        assert_eq!(stats.max_poll_execute_time_secs, 1.5);
        assert!((stats.average_poll_execute_time_secs - 1.0).abs() < 1e-9);
    }

    #[test]
    fn queue_lengths_count_pipeline_next() {
        let queue = NetworkPollQueue::new();
        queue.add_to_priority_queue(PollingPoint::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        ));
        queue.add_to_priority_queue(PollingPoint::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        ));
        queue.start(); // one point moves into `next`

        let mut stats = PollStatistics::default();
        stats.start();
        stats.partial_update(&queue, false);

        assert_eq!(stats.total_poll_queue_length, 2);
        assert_eq!(stats.total_points_out_for_polling, 0);
    }

    #[test]
    fn lockup_alerts_by_priority() {
        let mut stats = PollStatistics::default();
        stats.set_lockup_alert(PollPriority::Normal);
        assert!(stats.normal_priority_lockup_alert);
        assert!(!stats.asap_priority_lockup_alert);
    }
}
