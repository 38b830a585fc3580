//! DTOs exchanged with the store and the HTTP surface

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::point::Point;
use crate::types::PointState;

/// Plugin registration record; the polling engine discovers its
/// `plugin_uuid` by name through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plugin {
    pub uuid: Uuid,
    pub name: String,
}

/// Body of a point write request (`PATCH /api/points/:uuid/write`) and of
/// the engine's internal value pushes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointWriter {
    pub original_value: Option<f64>,
    pub write_value: Option<f64>,
    pub message: Option<String>,
    #[serde(default)]
    pub fault: bool,
    pub poll_state: Option<PointState>,
}

/// Result of a store point write.
#[derive(Debug, Clone)]
pub struct PointWriteResult {
    pub point: Point,
    /// True when the write changed the point's write value; the caller uses
    /// this to decide whether the point must be re-queued for polling.
    pub is_write_value_change: bool,
}

/// Statistics snapshot for one network's poll queue.
///
/// Poll execute times measure the transaction only; the per-priority
/// average poll times measure queue entry to completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollQueueStatistics {
    pub enable: bool,
    pub network_uuid: Uuid,
    pub network_name: String,
    pub plugin_name: String,

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

    pub asap_priority_average_poll_time_secs: f64,
    pub high_priority_average_poll_time_secs: f64,
    pub normal_priority_average_poll_time_secs: f64,
    pub low_priority_average_poll_time_secs: f64,

    pub total_poll_count: i64,
    pub asap_priority_poll_count: i64,
    pub high_priority_poll_count: i64,
    pub normal_priority_poll_count: i64,
    pub low_priority_poll_count: i64,

    pub asap_priority_max_cycle_time_secs: f64,
    pub high_priority_max_cycle_time_secs: f64,
    pub normal_priority_max_cycle_time_secs: f64,
    pub low_priority_max_cycle_time_secs: f64,

    pub asap_priority_lockup_alert: bool,
    pub high_priority_lockup_alert: bool,
    pub normal_priority_lockup_alert: bool,
    pub low_priority_lockup_alert: bool,

    /// Percent of enabled time spent actively polling.
    pub busy_time_pct: f64,
    pub enabled_time_secs: f64,
    pub port_unavailable_time_secs: f64,
}
