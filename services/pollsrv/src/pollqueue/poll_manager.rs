//! Network poll manager
//!
//! One per enabled network. Owns the network queue, the per-device poll
//! rate durations, the per-priority lockup watchdogs, the statistics
//! aggregate and the periodic queue integrity checker, and applies the
//! write-mode state machine after every poll.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use poll_model::{PollPriority, PollQueueStatistics, PollRate, Point};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::network_queue::NetworkPollQueue;
use super::polling_point::{PollToken, PollingPoint};
use super::statistics::PollStatistics;
use crate::config::PollQueueLogLevel;
use crate::store::Store;

/// Default repoll durations per poll rate class, applied when a device
/// configures nothing (or something below the per-class floor).
const DEFAULT_FAST_POLL_RATE: Duration = Duration::from_secs(10);
const DEFAULT_NORMAL_POLL_RATE: Duration = Duration::from_secs(30);
const DEFAULT_SLOW_POLL_RATE: Duration = Duration::from_secs(120);

/// How long polling stays paused after the transport reported unavailable.
const PORT_UNAVAILABLE_RESUME_DELAY: Duration = Duration::from_secs(10);

/// Queue integrity check cadence.
const QUEUE_CHECK_INTERVAL: Duration = Duration::from_secs(300);

/// Retry classification handed to the completion hook by the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryType {
    Normal,
    Immediate,
    Delayed,
    Never,
}

/// Inputs to the completion hook beyond the polling point and the point.
#[derive(Debug, Clone, Copy)]
pub struct PollCompletion {
    pub write_success: bool,
    pub read_success: bool,
    pub poll_time_secs: f64,
    /// True for catalog-driven re-admissions; skips the statistics update.
    pub point_update: bool,
    /// Drop any priority escalation and return to the configured priority.
    pub reset_to_configured_priority: bool,
    pub retry_type: RetryType,
    pub polling_was_not_required: bool,
}

impl PollCompletion {
    /// Completion for a point admitted without polling (poll-on-startup
    /// disabled): routes through the state machine as an already-satisfied
    /// poll.
    pub fn not_required() -> Self {
        PollCompletion {
            write_success: true,
            read_success: true,
            poll_time_secs: 0.0,
            point_update: true,
            reset_to_configured_priority: false,
            retry_type: RetryType::Normal,
            polling_was_not_required: true,
        }
    }

    /// Completion for a catalog-driven (re-)admission of a point that
    /// should be polled.
    pub fn point_update(retry_type: RetryType) -> Self {
        PollCompletion {
            write_success: false,
            read_success: false,
            poll_time_secs: 0.0,
            point_update: true,
            reset_to_configured_priority: true,
            retry_type,
            polling_was_not_required: false,
        }
    }
}

/// Poll queue configuration shared by all managers.
#[derive(Debug, Clone)]
pub struct PollQueueConfig {
    pub enable_polling: bool,
    pub log_level: PollQueueLogLevel,
}

impl Default for PollQueueConfig {
    fn default() -> Self {
        PollQueueConfig {
            enable_polling: true,
            log_level: PollQueueLogLevel::Error,
        }
    }
}

/// Where the state machine routed a polling point.
enum Route {
    Standby,
    Priority,
    StandbyWithRepoll,
}

/// Per-network poll manager.
pub struct NetworkPollManager<S: Store> {
    config: PollQueueConfig,
    store: Arc<S>,

    enabled: AtomicBool,
    pub queue: NetworkPollQueue,

    pub network_uuid: Uuid,
    network_name: Mutex<String>,
    pub plugin_uuid: Uuid,
    pub plugin_name: String,

    device_durations: Mutex<HashMap<Uuid, [Duration; 3]>>,

    // Lockup watchdog thresholds per priority class
    asap_max_cycle_time: Duration,
    high_max_cycle_time: Duration,
    normal_max_cycle_time: Duration,
    low_max_cycle_time: Duration,

    pub statistics: Mutex<PollStatistics>,

    /// Serializes the completion hook per network.
    completion_lock: tokio::sync::Mutex<()>,

    port_unavailable_timer: Mutex<Option<JoinHandle<()>>>,
    queue_checker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Store> NetworkPollManager<S> {
    pub fn new(
        config: PollQueueConfig,
        store: Arc<S>,
        network_uuid: Uuid,
        network_name: String,
        plugin_uuid: Uuid,
        plugin_name: String,
    ) -> Self {
        NetworkPollManager {
            config,
            store,
            enabled: AtomicBool::new(false),
            queue: NetworkPollQueue::new(),
            network_uuid,
            network_name: Mutex::new(network_name),
            plugin_uuid,
            plugin_name,
            device_durations: Mutex::new(HashMap::new()),
            asap_max_cycle_time: Duration::from_secs(2 * 60),
            high_max_cycle_time: Duration::from_secs(5 * 60),
            normal_max_cycle_time: Duration::from_secs(15 * 60),
            low_max_cycle_time: Duration::from_secs(60 * 60),
            statistics: Mutex::new(PollStatistics::default()),
            completion_lock: tokio::sync::Mutex::new(()),
            port_unavailable_timer: Mutex::new(None),
            queue_checker: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn network_name(&self) -> String {
        self.network_name.lock().clone()
    }

    pub fn set_network_name(&self, name: String) {
        *self.network_name.lock() = name;
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Resolve per-device durations, rebuild the queue from the catalog,
    /// then start the watchdog/statistics machinery.
    pub async fn start(self: &Arc<Self>) {
        self.set_all_device_poll_rate_durations().await;
        self.rebuild_polling_queue().await;
        self.enabled.store(true, Ordering::SeqCst);
        self.queue.start();
        self.start_queue_checker();
        self.statistics.lock().start();
    }

    /// Stop polling and drop every queued polling point and timer.
    pub async fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.queue.stop();
        if let Some(checker) = self.queue_checker.lock().take() {
            checker.abort();
        }
        if let Some(timer) = self.port_unavailable_timer.lock().take() {
            timer.abort();
        }
    }

    /// Suppress draws without tearing the queue down; used while the
    /// transport is unavailable.
    pub fn pause(&self) {
        self.pq_debug("pause polling");
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn unpause(&self) {
        self.pq_debug("unpause polling");
        self.enabled.store(true, Ordering::SeqCst);
        if let Some(timer) = self.port_unavailable_timer.lock().take() {
            timer.abort();
        }
    }

    /// Pause for the resume delay after the transport reported unavailable.
    pub fn port_unavailable(self: &Arc<Self>) {
        self.statistics.lock().mark_port_unavailable();
        self.pause();
        let manager = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(PORT_UNAVAILABLE_RESUME_DELAY).await;
            manager.port_available();
        });
        if let Some(previous) = self.port_unavailable_timer.lock().replace(timer) {
            previous.abort();
        }
    }

    pub fn port_available(&self) {
        self.statistics.lock().partial_update(&self.queue, true);
        self.unpause();
    }

    pub fn is_port_unavailable(&self) -> bool {
        self.port_unavailable_timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    // ========================================================================
    // Device poll rate durations
    // ========================================================================

    pub async fn set_all_device_poll_rate_durations(&self) {
        let Ok(network) = self.store.get_network(self.network_uuid, true, false).await else {
            return;
        };
        for device in &network.devices {
            self.set_device_poll_rate_durations(device.uuid, device.fast_poll_rate, device.normal_poll_rate, device.slow_poll_rate);
        }
    }

    /// Resolve a device's three poll-rate class durations, applying the
    /// per-class floors.
    pub fn set_device_poll_rate_durations(
        &self,
        device_uuid: Uuid,
        fast: Option<f64>,
        normal: Option<f64>,
        slow: Option<f64>,
    ) {
        let mut fast = Duration::from_secs_f64(fast.unwrap_or(0.0).max(0.0));
        if fast <= Duration::from_millis(100) {
            fast = DEFAULT_FAST_POLL_RATE;
        }
        let mut normal = Duration::from_secs_f64(normal.unwrap_or(0.0).max(0.0));
        if normal <= Duration::from_millis(500) {
            normal = DEFAULT_NORMAL_POLL_RATE;
        }
        let mut slow = Duration::from_secs_f64(slow.unwrap_or(0.0).max(0.0));
        if slow <= Duration::from_secs(1) {
            slow = DEFAULT_SLOW_POLL_RATE;
        }
        self.device_durations
            .lock()
            .insert(device_uuid, [fast, normal, slow]);
    }

    pub fn get_poll_rate_duration(&self, rate: PollRate, device_uuid: Uuid) -> Duration {
        let durations = self.device_durations.lock();
        let entry = durations.get(&device_uuid).copied().unwrap_or([
            DEFAULT_FAST_POLL_RATE,
            DEFAULT_NORMAL_POLL_RATE,
            DEFAULT_SLOW_POLL_RATE,
        ]);
        match rate {
            PollRate::Fast => entry[0],
            PollRate::Normal => entry[1],
            PollRate::Slow => entry[2],
        }
    }

    // ========================================================================
    // Queue admission
    // ========================================================================

    /// Push onto the priority queue with a fresh lockup watchdog.
    pub fn add_to_priority_queue(self: &Arc<Self>, mut pp: PollingPoint) {
        pp.set_lockup_timer(self.make_lockup_timer(pp.priority));
        self.queue.add_to_priority_queue(pp);
    }

    /// Park on standby with a one-shot repoll timer resolved from the
    /// point's poll-rate class.
    pub fn add_to_standby_with_repoll(self: &Arc<Self>, mut pp: PollingPoint, point: &Point) {
        let duration = self.get_poll_rate_duration(point.poll_rate, pp.device_uuid);
        pp.set_repoll_timer(self.make_repoll_timer(pp.point_uuid, duration));
        self.queue.add_to_standby_queue(pp);
    }

    fn make_repoll_timer(self: &Arc<Self>, point_uuid: Uuid, duration: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            match manager.queue.take_standby_for_repoll(point_uuid) {
                Some(pp) => manager.add_to_priority_queue(pp),
                None => {
                    manager.pq_error(format!(
                        "repoll fired but polling point not on standby ({point_uuid})"
                    ));
                },
            }
        })
    }

    fn make_lockup_timer(self: &Arc<Self>, priority: PollPriority) -> JoinHandle<()> {
        let timeout = match priority {
            PollPriority::Asap => self.asap_max_cycle_time,
            PollPriority::High => self.high_max_cycle_time,
            PollPriority::Normal => self.normal_max_cycle_time,
            PollPriority::Low => self.low_max_cycle_time,
        };
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            manager.statistics.lock().set_lockup_alert(priority);
            manager.pq_error(format!(
                "{:?} priority poll queue LOCKUP on network {}",
                priority, manager.network_uuid
            ));
        })
    }

    // ========================================================================
    // Rebuild & integrity check
    // ========================================================================

    /// Rebuild the priority queue from the catalog. Points with poll-on-
    /// startup go straight to the priority queue; the rest are routed by
    /// the state machine onto standby with a repoll timer.
    pub async fn rebuild_polling_queue(self: &Arc<Self>) {
        self.pq_debug("rebuild polling queue");
        self.enabled.store(false, Ordering::SeqCst);
        self.queue.stop();

        let Ok(network) = self.store.get_network(self.network_uuid, true, true).await else {
            self.pq_error(format!(
                "rebuild: network {} not found in store",
                self.network_uuid
            ));
            return;
        };

        for device in &network.devices {
            if !device.enable {
                continue;
            }
            for point in &device.points {
                if !point.enable {
                    continue;
                }
                let pp = PollingPoint::with_priority(
                    point.uuid,
                    point.device_uuid,
                    device.network_uuid,
                    point.poll_priority,
                );
                if point.poll_on_startup() {
                    self.add_to_priority_queue(pp);
                } else {
                    let mut point = point.clone();
                    self.polling_point_complete_notification(
                        pp,
                        &mut point,
                        PollCompletion::not_required(),
                    )
                    .await;
                }
            }
        }
    }

    /// Periodic queue integrity check: reconcile the queue against the
    /// catalog, dropping polling points for disabled entities and creating
    /// missing ones for enabled points.
    pub async fn poll_queue_error_checking(self: &Arc<Self>) {
        self.pq_debug("poll queue error check");
        let Ok(network) = self.store.get_network(self.network_uuid, true, true).await else {
            self.pq_error("queue check: network not found");
            return;
        };

        if !network.enable {
            if !self.queue.priority_queue.is_empty() {
                self.pq_error("queue check: polling points queued on a disabled network");
                self.queue.priority_queue.empty_queue();
            }
            if !self.queue.standby.is_empty() {
                self.pq_error("queue check: standby polling points on a disabled network");
                self.queue.standby.empty_queue();
            }
        }

        for device in &network.devices {
            for point in &device.points {
                let exists = self.queue.contains_point(point.uuid);
                if !device.enable {
                    if exists {
                        self.pq_error(format!(
                            "queue check: point {} queued on disabled device",
                            point.uuid
                        ));
                        self.queue.remove_by_device(device.uuid);
                    }
                    continue;
                }
                if !point.enable {
                    if exists {
                        self.pq_error(format!(
                            "queue check: disabled point {} in poll queue",
                            point.uuid
                        ));
                        self.queue.remove_by_point(point.uuid);
                    }
                    continue;
                }
                if !exists {
                    self.pq_error(format!(
                        "queue check: no polling point for enabled point {}",
                        point.uuid
                    ));
                    let pp = PollingPoint::new(point.uuid, point.device_uuid, device.network_uuid);
                    let mut point = point.clone();
                    self.polling_point_complete_notification(
                        pp,
                        &mut point,
                        PollCompletion::point_update(RetryType::Normal),
                    )
                    .await;
                }
            }
        }
    }

    fn start_queue_checker(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let checker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(QUEUE_CHECK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // immediate first tick
            loop {
                interval.tick().await;
                manager.poll_queue_error_checking().await;
                debug!(
                    network = %manager.network_uuid,
                    stats = ?manager.get_polling_queue_statistics(),
                    "poll queue statistics"
                );
            }
        });
        if let Some(previous) = self.queue_checker.lock().replace(checker) {
            previous.abort();
        }
    }

    /// Re-admit a device's enabled points after its poll rates changed.
    pub async fn re_add_device_points(self: &Arc<Self>, device_uuid: Uuid) {
        let Ok(device) = self.store.get_device(device_uuid, true).await else {
            self.pq_error(format!("re-add device points: cannot find device {device_uuid}"));
            return;
        };
        self.queue.remove_by_device(device_uuid);
        for point in &device.points {
            if point.enable {
                let pp = PollingPoint::with_priority(
                    point.uuid,
                    point.device_uuid,
                    device.network_uuid,
                    point.poll_priority,
                );
                self.add_to_priority_queue(pp);
            }
        }
    }

    // ========================================================================
    // Completion hook
    // ========================================================================

    /// Completion entry point for the polling loop: consumes the `current`
    /// pipeline slot, drops the polling point when a removal was requested
    /// mid-poll, and otherwise runs the state machine.
    pub async fn single_poll_finished(
        self: &Arc<Self>,
        token: &PollToken,
        point: Option<&mut Point>,
        poll_time_secs: f64,
        write_success: bool,
        read_success: bool,
        polling_was_not_required: bool,
        retry_type: RetryType,
    ) {
        let Some((pp, remove_requested)) = self.queue.take_current(token.point_uuid) else {
            self.pq_error(format!(
                "poll completion for {} but it is not the current polling point",
                token.point_uuid
            ));
            return;
        };
        if remove_requested {
            // the point was deleted while out for polling
            self.pq_debug(format!("dropping removed polling point {}", pp.point_uuid));
            return;
        }

        let completion = PollCompletion {
            write_success,
            read_success,
            poll_time_secs,
            point_update: false,
            reset_to_configured_priority: true,
            retry_type,
            polling_was_not_required,
        };
        match point {
            Some(point) => {
                self.polling_point_complete_notification(pp, point, completion)
                    .await;
            },
            None => self.route_orphan(pp, retry_type),
        }
    }

    /// Route a polling point whose catalog point could not be resolved.
    /// There is no write mode to consult; the retry classification decides.
    fn route_orphan(self: &Arc<Self>, pp: PollingPoint, retry_type: RetryType) {
        {
            let mut statistics = self.statistics.lock();
            statistics.partial_update(&self.queue, false);
        }
        match retry_type {
            RetryType::Never => {
                self.queue.add_to_standby_queue(pp);
            },
            RetryType::Delayed => {
                let duration = self.get_poll_rate_duration(PollRate::Slow, pp.device_uuid);
                let mut pp = pp;
                pp.set_repoll_timer(self.make_repoll_timer(pp.point_uuid, duration));
                self.queue.add_to_standby_queue(pp);
            },
            RetryType::Normal | RetryType::Immediate => {
                self.add_to_priority_queue(pp);
            },
        }
    }

    /// The write-mode state machine. Decides the new poll-required flags
    /// and the destination of the polling point, then persists the point if
    /// the flags changed.
    pub async fn polling_point_complete_notification(
        self: &Arc<Self>,
        mut pp: PollingPoint,
        point: &mut Point,
        completion: PollCompletion,
    ) {
        let _guard = self.completion_lock.lock().await;

        self.pq_polling(format!(
            "POLLING COMPLETE: point: {}, write_success: {}, read_success: {}, point_update: {}, not_required: {}, retry: {:?}, poll_time: {:.4}s",
            pp.point_uuid,
            completion.write_success,
            completion.read_success,
            completion.point_update,
            completion.polling_was_not_required,
            completion.retry_type,
            completion.poll_time_secs
        ));

        if !completion.point_update {
            self.statistics.lock().poll_complete_update(
                pp.priority,
                pp.queue_entry_time,
                completion.poll_time_secs,
                &self.queue,
            );
        }

        // drop any escalation (e.g. a previous promotion to ASAP)
        if completion.reset_to_configured_priority {
            pp.priority = point.poll_priority;
        }

        pp.reset_timers();

        // a point updated while out for polling re-enters immediately,
        // promoted to ASAP when the update wants a write
        if let Some(wants_asap_write) = self.queue.consume_updated_while_polling(point.uuid) {
            if wants_asap_write {
                pp.priority = PollPriority::Asap;
                self.add_to_priority_queue(pp);
                return;
            }
        }

        let orig_read_required = point.read_poll_required;
        let orig_write_required = point.write_poll_required;

        let route = self.decide_route(point, &completion);
        match route {
            Route::Standby => {
                self.queue.add_to_standby_queue(pp);
            },
            Route::Priority => {
                self.add_to_priority_queue(pp);
            },
            Route::StandbyWithRepoll => {
                self.add_to_standby_with_repoll(pp, point);
            },
        }

        if point.read_poll_required != orig_read_required
            || point.write_poll_required != orig_write_required
        {
            if let Err(e) = self.store.update_point(point.uuid, point.clone()).await {
                self.pq_error(format!("failed to persist point {}: {e}", point.uuid));
            }
        }
    }

    /// Per-write-mode routing table. Mutates the point's poll-required
    /// flags and returns the destination.
    fn decide_route(&self, point: &mut Point, completion: &PollCompletion) -> Route {
        use poll_model::WriteMode;
        use RetryType::{Delayed, Immediate, Never, Normal};

        let retry = completion.retry_type;
        let read_ok = completion.read_success;
        let write_ok = completion.write_success;
        let not_required = completion.polling_was_not_required;

        match point.write_mode {
            // One read, then done.
            WriteMode::ReadOnce => {
                point.write_poll_required = false;
                if retry == Never || ((read_ok || not_required) && retry == Normal) {
                    point.read_poll_required = false;
                    Route::Standby
                } else if (point.read_poll_required && !read_ok && retry == Normal)
                    || retry == Immediate
                {
                    point.read_poll_required = true;
                    Route::Priority
                } else if retry == Delayed {
                    point.read_poll_required = true;
                    Route::StandbyWithRepoll
                } else {
                    Route::Standby
                }
            },

            // Keep reading forever.
            WriteMode::ReadOnly => {
                point.write_poll_required = false;
                point.read_poll_required = true;
                if ((read_ok || not_required) && retry == Normal) || retry == Delayed {
                    Route::StandbyWithRepoll
                } else if (!read_ok && retry == Normal) || retry == Immediate {
                    Route::Priority
                } else {
                    Route::Standby // Never
                }
            },

            // One write, then done.
            WriteMode::WriteOnce => {
                point.read_poll_required = false;
                if ((write_ok || not_required) && retry == Normal) || retry == Never {
                    point.write_poll_required = false;
                    Route::Standby
                } else if (point.write_poll_required && !write_ok && retry == Normal)
                    || retry == Immediate
                {
                    point.write_poll_required = true;
                    Route::Priority
                } else if retry == Delayed {
                    point.write_poll_required = true;
                    Route::StandbyWithRepoll
                } else {
                    Route::Standby
                }
            },

            // Write phase as WriteOnce, then read phase as ReadOnce.
            WriteMode::WriteOnceReadOnce => {
                if completion.point_update
                    || (point.write_poll_required && !write_ok && retry == Normal)
                    || retry == Immediate
                {
                    point.write_poll_required = true;
                    if completion.point_update {
                        point.read_poll_required = true;
                    }
                    return Route::Priority;
                }
                if retry == Delayed {
                    point.write_poll_required = true;
                    point.read_poll_required = true;
                    return Route::StandbyWithRepoll;
                }
                if (point.write_poll_required && write_ok && retry == Normal) || retry == Never {
                    point.write_poll_required = false;
                }
                // read phase
                if (read_ok && retry == Normal) || retry == Never {
                    point.read_poll_required = false;
                    Route::Standby
                } else if point.read_poll_required && !read_ok && retry == Normal {
                    Route::Priority
                } else {
                    Route::Standby
                }
            },

            // Keep writing forever.
            WriteMode::WriteAlways => {
                point.read_poll_required = false;
                point.write_poll_required = true;
                if ((write_ok || not_required) && retry == Normal) || retry == Delayed {
                    Route::StandbyWithRepoll
                } else if (!write_ok && retry == Normal) || retry == Immediate {
                    Route::Priority
                } else {
                    Route::Standby // Never
                }
            },

            // One write, then keep reading; the read phase dominates once
            // the write succeeded.
            WriteMode::WriteOnceThenRead => {
                point.read_poll_required = true;
                if retry == Never {
                    if write_ok {
                        point.write_poll_required = false;
                    }
                    return Route::Standby;
                }
                if completion.point_update
                    || (point.write_poll_required && !write_ok && retry == Normal)
                    || retry == Immediate
                {
                    if write_ok {
                        point.write_poll_required = false;
                    }
                    return Route::Priority;
                }
                if (point.write_poll_required && write_ok && retry == Normal) || retry == Delayed {
                    if write_ok {
                        point.write_poll_required = false;
                    }
                    return Route::StandbyWithRepoll;
                }
                // read phase
                if read_ok && retry == Normal {
                    Route::StandbyWithRepoll
                } else {
                    Route::Priority
                }
            },

            // Write, then keep reading and re-write whenever the present
            // value drifts from the write value.
            WriteMode::WriteAndMaintain => {
                point.read_poll_required = true;
                if (point.write_poll_required && !write_ok && retry == Normal)
                    || retry == Immediate
                {
                    return Route::Priority;
                }
                if retry == Delayed {
                    return Route::StandbyWithRepoll;
                }
                if retry == Never {
                    return Route::Standby;
                }
                match point.write_value {
                    Some(write_value) => {
                        let converged = point
                            .present_value
                            .is_some_and(|present| present == write_value);
                        if converged {
                            point.write_poll_required = false;
                            Route::StandbyWithRepoll
                        } else {
                            point.write_poll_required = true;
                            Route::Priority
                        }
                    },
                    // nothing to maintain; keep reading
                    None => {
                        point.write_poll_required = false;
                        Route::StandbyWithRepoll
                    },
                }
            },
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn get_polling_queue_statistics(&self) -> PollQueueStatistics {
        let statistics = self.statistics.lock();
        PollQueueStatistics {
            enable: self.is_enabled(),
            network_uuid: self.network_uuid,
            network_name: self.network_name(),
            plugin_name: self.plugin_name.clone(),
            max_poll_execute_time_secs: statistics.max_poll_execute_time_secs,
            average_poll_execute_time_secs: statistics.average_poll_execute_time_secs,
            min_poll_execute_time_secs: statistics.min_poll_execute_time_secs,
            total_poll_queue_length: statistics.total_poll_queue_length,
            total_standby_points_length: statistics.total_standby_points_length,
            total_points_out_for_polling: statistics.total_points_out_for_polling,
            asap_priority_poll_queue_length: statistics.asap_priority_poll_queue_length,
            high_priority_poll_queue_length: statistics.high_priority_poll_queue_length,
            normal_priority_poll_queue_length: statistics.normal_priority_poll_queue_length,
            low_priority_poll_queue_length: statistics.low_priority_poll_queue_length,
            asap_priority_average_poll_time_secs: statistics.asap_priority_average_poll_time,
            high_priority_average_poll_time_secs: statistics.high_priority_average_poll_time,
            normal_priority_average_poll_time_secs: statistics.normal_priority_average_poll_time,
            low_priority_average_poll_time_secs: statistics.low_priority_average_poll_time,
            total_poll_count: statistics.total_poll_count,
            asap_priority_poll_count: statistics.asap_priority_poll_count,
            high_priority_poll_count: statistics.high_priority_poll_count,
            normal_priority_poll_count: statistics.normal_priority_poll_count,
            low_priority_poll_count: statistics.low_priority_poll_count,
            asap_priority_max_cycle_time_secs: self.asap_max_cycle_time.as_secs_f64(),
            high_priority_max_cycle_time_secs: self.high_max_cycle_time.as_secs_f64(),
            normal_priority_max_cycle_time_secs: self.normal_max_cycle_time.as_secs_f64(),
            low_priority_max_cycle_time_secs: self.low_max_cycle_time.as_secs_f64(),
            asap_priority_lockup_alert: statistics.asap_priority_lockup_alert,
            high_priority_lockup_alert: statistics.high_priority_lockup_alert,
            normal_priority_lockup_alert: statistics.normal_priority_lockup_alert,
            low_priority_lockup_alert: statistics.low_priority_lockup_alert,
            busy_time_pct: statistics.busy_time,
            enabled_time_secs: statistics.enabled_time,
            port_unavailable_time_secs: statistics.port_unavailable_time,
        }
    }

    /// Armed, unfired point timers; drops to zero after [`stop`](Self::stop).
    pub fn active_timer_count(&self) -> usize {
        self.queue.active_timer_count()
    }

    // ========================================================================
    // Logging helpers, gated by the poll queue log level
    // ========================================================================

    pub(crate) fn pq_debug(&self, message: impl AsRef<str>) {
        if self.config.log_level.debug_enabled() {
            info!("Poll Queue: {}", message.as_ref());
        }
    }

    pub(crate) fn pq_polling(&self, message: impl AsRef<str>) {
        if self.config.log_level.polling_enabled() {
            info!("Poll Queue: {}", message.as_ref());
        }
    }

    pub(crate) fn pq_error(&self, message: impl AsRef<str>) {
        error!("Poll Queue: {}", message.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use poll_model::{Device, Network, Point, WriteMode};

    struct Fixture {
        manager: Arc<NetworkPollManager<MemoryStore>>,
        store: Arc<MemoryStore>,
        device: Device,
    }

    async fn fixture() -> Fixture {
        let (store, plugin) = MemoryStore::with_plugin("modbus");
        let store = Arc::new(store);
        let network = store
            .create_network(Network {
                name: "bench".into(),
                enable: true,
                plugin_uuid: Some(plugin.uuid),
                max_poll_rate: Some(0.1),
                ..Network::default()
            })
            .await
            .unwrap();
        let device = store
            .create_device(Device {
                network_uuid: network.uuid,
                enable: true,
                address_id: 1,
                ..Device::default()
            })
            .await
            .unwrap();
        let manager = Arc::new(NetworkPollManager::new(
            PollQueueConfig::default(),
            Arc::clone(&store),
            network.uuid,
            network.name.clone(),
            plugin.uuid,
            "modbus".into(),
        ));
        manager.set_device_poll_rate_durations(device.uuid, None, None, None);
        Fixture {
            manager,
            store,
            device,
        }
    }

    /// Seed a point on the fixture device; enabled unless the literal says
    /// otherwise.
    async fn seed_point(fixture: &Fixture, point: Point) -> Point {
        fixture
            .store
            .create_point(Point {
                device_uuid: fixture.device.uuid,
                address_id: point.address_id.or(Some(1)),
                ..point
            })
            .await
            .unwrap()
    }

    fn polling_point(fixture: &Fixture, point: &Point) -> PollingPoint {
        PollingPoint::with_priority(
            point.uuid,
            point.device_uuid,
            fixture.manager.network_uuid,
            point.poll_priority,
        )
    }

    fn queue_population(manager: &NetworkPollManager<MemoryStore>) -> usize {
        let mut total = manager.queue.priority_queue.len() + manager.queue.standby.len();
        if manager.queue.next_is_some() {
            total += 1;
        }
        if manager.queue.current_is_some() {
            total += 1;
        }
        total
    }

    #[tokio::test]
    async fn rebuild_admits_exactly_the_enabled_points() {
        let fixture = fixture().await;
        for index in 0..3 {
            seed_point(
                &fixture,
                Point {
                    enable: true,
                    read_poll_required: true,
                    poll_on_startup: Some(index != 2), // one point waits on standby
                    ..Point::default()
                },
            )
            .await;
        }
        // a disabled point must not be admitted
        seed_point(
            &fixture,
            Point {
                enable: false,
                ..Point::default()
            },
        )
        .await;
        // nor points of a disabled device
        let disabled_device = fixture
            .store
            .create_device(Device {
                network_uuid: fixture.manager.network_uuid,
                enable: false,
                address_id: 2,
                ..Device::default()
            })
            .await
            .unwrap();
        fixture
            .store
            .create_point(Point {
                device_uuid: disabled_device.uuid,
                enable: true,
                address_id: Some(9),
                ..Point::default()
            })
            .await
            .unwrap();

        fixture.manager.start().await;
        assert_eq!(queue_population(&fixture.manager), 3);
        fixture.manager.stop().await;
        assert_eq!(fixture.manager.active_timer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn read_only_success_repolls_after_fast_duration() {
        let fixture = fixture().await;
        let mut point = seed_point(
            &fixture,
            Point {
                enable: true,
                write_mode: WriteMode::ReadOnly,
                poll_rate: PollRate::Fast,
                read_poll_required: true,
                ..Point::default()
            },
        )
        .await;

        let pp = polling_point(&fixture, &point);
        fixture
            .manager
            .polling_point_complete_notification(
                pp,
                &mut point,
                PollCompletion {
                    write_success: false,
                    read_success: true,
                    poll_time_secs: 0.01,
                    point_update: false,
                    reset_to_configured_priority: true,
                    retry_type: RetryType::Normal,
                    polling_was_not_required: false,
                },
            )
            .await;

        assert!(fixture.manager.queue.standby.contains(point.uuid));
        assert_eq!(fixture.manager.active_timer_count(), 1);

        // default fast poll rate is 10 s; not a moment earlier
        tokio::time::sleep(Duration::from_millis(9_800)).await;
        assert!(fixture.manager.queue.standby.contains(point.uuid));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!fixture.manager.queue.standby.contains(point.uuid));
        assert!(fixture.manager.queue.priority_queue.contains(point.uuid));

        fixture.manager.stop().await;
        assert_eq!(fixture.manager.active_timer_count(), 0);
    }

    #[tokio::test]
    async fn write_always_failure_goes_back_to_priority() {
        let fixture = fixture().await;
        let mut point = seed_point(
            &fixture,
            Point {
                enable: true,
                write_mode: WriteMode::WriteAlways,
                write_value: Some(1.0),
                write_poll_required: true,
                poll_priority: PollPriority::High,
                ..Point::default()
            },
        )
        .await;

        let pp = polling_point(&fixture, &point);
        fixture
            .manager
            .polling_point_complete_notification(
                pp,
                &mut point,
                PollCompletion {
                    write_success: false,
                    read_success: false,
                    poll_time_secs: 0.01,
                    point_update: false,
                    reset_to_configured_priority: true,
                    retry_type: RetryType::Immediate,
                    polling_was_not_required: false,
                },
            )
            .await;

        let requeued = fixture.manager.queue.priority_queue.pop_next().unwrap();
        assert_eq!(requeued.point_uuid, point.uuid);
        // back at its configured priority, not escalated
        assert_eq!(requeued.priority, PollPriority::High);
        assert!(point.write_poll_required);
        fixture.manager.stop().await;
    }

    #[tokio::test]
    async fn write_and_maintain_converges_to_standby() {
        let fixture = fixture().await;
        let mut point = seed_point(
            &fixture,
            Point {
                enable: true,
                write_mode: WriteMode::WriteAndMaintain,
                write_value: Some(5.0),
                present_value: Some(5.0),
                read_poll_required: true,
                write_poll_required: true,
                ..Point::default()
            },
        )
        .await;

        let completion = PollCompletion {
            write_success: true,
            read_success: true,
            poll_time_secs: 0.01,
            point_update: false,
            reset_to_configured_priority: true,
            retry_type: RetryType::Normal,
            polling_was_not_required: false,
        };

        let pp = polling_point(&fixture, &point);
        fixture
            .manager
            .polling_point_complete_notification(pp, &mut point, completion)
            .await;
        // converged: no redundant writes, parked with a repoll timer
        assert!(fixture.manager.queue.standby.contains(point.uuid));
        assert!(!point.write_poll_required);
        assert!(point.read_poll_required);

        // drift: present value no longer matches the write value
        fixture.manager.queue.remove_by_point(point.uuid);
        point.present_value = Some(4.0);
        let pp = polling_point(&fixture, &point);
        fixture
            .manager
            .polling_point_complete_notification(pp, &mut point, completion)
            .await;
        assert!(fixture.manager.queue.priority_queue.contains(point.uuid));
        assert!(point.write_poll_required);
        fixture.manager.stop().await;
    }

    #[tokio::test]
    async fn flag_changes_are_persisted_through_the_store() {
        let fixture = fixture().await;
        let mut point = seed_point(
            &fixture,
            Point {
                enable: true,
                write_mode: WriteMode::ReadOnce,
                read_poll_required: true,
                ..Point::default()
            },
        )
        .await;

        let pp = polling_point(&fixture, &point);
        fixture
            .manager
            .polling_point_complete_notification(
                pp,
                &mut point,
                PollCompletion {
                    write_success: false,
                    read_success: true,
                    poll_time_secs: 0.01,
                    point_update: false,
                    reset_to_configured_priority: true,
                    retry_type: RetryType::Normal,
                    polling_was_not_required: false,
                },
            )
            .await;

        let stored = fixture.store.get_point(point.uuid).await.unwrap();
        assert!(!stored.read_poll_required);
        fixture.manager.stop().await;
    }

    #[tokio::test]
    async fn update_while_polling_promotes_to_asap() {
        let fixture = fixture().await;
        let mut point = seed_point(
            &fixture,
            Point {
                enable: true,
                write_mode: WriteMode::WriteAlways,
                write_value: Some(2.0),
                write_poll_required: true,
                poll_priority: PollPriority::Low,
                ..Point::default()
            },
        )
        .await;

        fixture.manager.queue.mark_updated_while_polling(point.uuid, true);

        let pp = polling_point(&fixture, &point);
        fixture
            .manager
            .polling_point_complete_notification(
                pp,
                &mut point,
                PollCompletion {
                    write_success: true,
                    read_success: false,
                    poll_time_secs: 0.01,
                    point_update: false,
                    reset_to_configured_priority: true,
                    retry_type: RetryType::Normal,
                    polling_was_not_required: false,
                },
            )
            .await;

        let requeued = fixture.manager.queue.priority_queue.pop_next().unwrap();
        assert_eq!(requeued.point_uuid, point.uuid);
        assert_eq!(requeued.priority, PollPriority::Asap);
        fixture.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn lockup_watchdog_fires_after_max_cycle_time() {
        let fixture = fixture().await;
        let point = seed_point(
            &fixture,
            Point {
                enable: true,
                read_poll_required: true,
                poll_priority: PollPriority::Normal,
                ..Point::default()
            },
        )
        .await;

        fixture
            .manager
            .add_to_priority_queue(polling_point(&fixture, &point));

        // normal priority max cycle time is 15 minutes
        tokio::time::sleep(Duration::from_secs(14 * 60)).await;
        assert!(!fixture.manager.statistics.lock().normal_priority_lockup_alert);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert!(fixture.manager.statistics.lock().normal_priority_lockup_alert);
        fixture.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drawing_a_point_cancels_its_lockup_timer() {
        let fixture = fixture().await;
        let point = seed_point(
            &fixture,
            Point {
                enable: true,
                read_poll_required: true,
                poll_priority: PollPriority::Normal,
                ..Point::default()
            },
        )
        .await;

        fixture
            .manager
            .add_to_priority_queue(polling_point(&fixture, &point));
        fixture.manager.queue.start();
        // the draw moves the point into the pipeline and disarms the timer
        let token = fixture.manager.queue.get_next_polling_point().unwrap();
        assert_eq!(token.point_uuid, point.uuid);

        tokio::time::sleep(Duration::from_secs(16 * 60)).await;
        assert!(!fixture.manager.statistics.lock().normal_priority_lockup_alert);
        fixture.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn port_unavailable_pauses_then_resumes() {
        let fixture = fixture().await;
        fixture.manager.enabled.store(true, Ordering::SeqCst);

        fixture.manager.port_unavailable();
        assert!(!fixture.manager.is_enabled());
        assert!(fixture.manager.is_port_unavailable());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(fixture.manager.is_enabled());
        assert!(!fixture.manager.is_port_unavailable());
        fixture.manager.stop().await;
    }

    #[tokio::test]
    async fn queue_integrity_check_repairs_the_queue() {
        let fixture = fixture().await;
        let point = seed_point(
            &fixture,
            Point {
                enable: true,
                read_poll_required: true,
                ..Point::default()
            },
        )
        .await;

        // nothing queued for an enabled point: the checker re-admits it
        fixture.manager.poll_queue_error_checking().await;
        assert!(fixture.manager.queue.contains_point(point.uuid));

        // disabling the point makes the checker remove it again
        let mut disabled = point.clone();
        disabled.enable = false;
        fixture
            .store
            .update_point(point.uuid, disabled)
            .await
            .unwrap();
        fixture.manager.poll_queue_error_checking().await;
        assert!(!fixture.manager.queue.contains_point(point.uuid));
        fixture.manager.stop().await;
    }
}
