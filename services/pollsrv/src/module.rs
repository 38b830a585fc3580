//! Module orchestrator
//!
//! Owns the per-network poll managers, the cached Modbus clients and the
//! polling loop tasks, and applies catalog mutations (create/update/delete
//! of networks, devices and points) by mutating the managers and queues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use poll_model::{
    Device, FaultCode, MessageLevel, Network, Plugin, Point, PointWriter, PollQueueStatistics,
    WriteMode,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{PollError, Result};
use crate::polling::{spawn_polling_loop, ClientCache};
use crate::pollqueue::{NetworkPollManager, PollCompletion, PollQueueConfig, RemoveResult, RetryType};
use crate::pollqueue::polling_point::PollingPoint;
use crate::store::Store;

/// Plugin name this engine registers under.
pub const MODULE_NAME: &str = "modbus";

/// The polling engine orchestrator: one per process.
pub struct ModbusModule<S: Store> {
    config: Config,
    store: Arc<S>,
    plugin: Plugin,

    managers: DashMap<Uuid, Arc<NetworkPollManager<S>>>,
    clients: ClientCache,
    loops: Mutex<HashMap<Uuid, (CancellationToken, JoinHandle<()>)>>,
    poll_counter: Arc<AtomicI64>,
    enabled: AtomicBool,
}

impl<S: Store> ModbusModule<S> {
    /// Resolve the plugin registration and build the orchestrator.
    pub async fn new(config: Config, store: Arc<S>) -> Result<Self> {
        let plugin = store.get_plugin_by_name(MODULE_NAME).await?;
        Ok(ModbusModule {
            config,
            store,
            plugin,
            managers: DashMap::new(),
            clients: Arc::new(DashMap::new()),
            loops: Mutex::new(HashMap::new()),
            poll_counter: Arc::new(AtomicI64::new(0)),
            enabled: AtomicBool::new(false),
        })
    }

    pub fn plugin(&self) -> &Plugin {
        &self.plugin
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn poll_queue_config(&self) -> PollQueueConfig {
        PollQueueConfig {
            enable_polling: self.config.enable_polling,
            log_level: self.config.poll_queue_log_level,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start a poll manager and polling loop for every enabled network of
    /// this plugin.
    pub async fn enable(self: &Arc<Self>) -> Result<()> {
        if !self.config.enable_polling {
            info!("polling disabled by configuration");
            return Ok(());
        }
        self.enabled.store(true, Ordering::SeqCst);
        let networks = self.store.get_networks_by_plugin(self.plugin.uuid).await?;
        for network in networks {
            if network.enable {
                self.start_network_polling(&network).await;
            }
        }
        Ok(())
    }

    /// Stop every polling loop and poll manager and drop the client cache.
    pub async fn disable(&self) {
        info!("polling engine disable");
        self.enabled.store(false, Ordering::SeqCst);
        let loops: Vec<(Uuid, (CancellationToken, JoinHandle<()>))> =
            self.loops.lock().drain().collect();
        let mut handles = Vec::with_capacity(loops.len());
        for (_, (cancel, handle)) in loops {
            cancel.cancel();
            handles.push(handle);
        }
        let _ = futures::future::join_all(handles).await;
        let managers: Vec<Arc<NetworkPollManager<S>>> = self
            .managers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for manager in managers {
            manager.stop().await;
        }
        self.managers.clear();
        self.clients.clear();
    }

    async fn start_network_polling(self: &Arc<Self>, network: &Network) {
        debug!("start polling for network {}", network.name);
        let manager = Arc::new(NetworkPollManager::new(
            self.poll_queue_config(),
            Arc::clone(&self.store),
            network.uuid,
            network.name.clone(),
            self.plugin.uuid,
            self.plugin.name.clone(),
        ));
        manager.start().await;

        // the master switch keeps the scheduler alive but leaves the wire
        // alone
        if self.config.enable_polling {
            let cancel = CancellationToken::new();
            let handle = spawn_polling_loop(
                Arc::clone(&self.store),
                Arc::clone(&manager),
                Arc::clone(&self.clients),
                Arc::clone(&self.poll_counter),
                Duration::from_secs_f64(network.poll_rate_secs()),
                cancel.clone(),
            );
            if let Some((previous_cancel, previous_handle)) =
                self.loops.lock().insert(network.uuid, (cancel, handle))
            {
                previous_cancel.cancel();
                previous_handle.abort();
            }
        }
        self.managers.insert(network.uuid, manager);
    }

    async fn stop_network_polling(&self, network_uuid: Uuid) {
        if let Some((cancel, handle)) = self.loops.lock().remove(&network_uuid) {
            cancel.cancel();
            handle.abort();
        }
        if let Some((_, manager)) = self.managers.remove(&network_uuid) {
            manager.stop().await;
        }
        self.clients.remove(&network_uuid);
    }

    /// The poll manager of a network, if one is running.
    pub fn poll_manager(&self, network_uuid: Uuid) -> Option<Arc<NetworkPollManager<S>>> {
        self.managers
            .get(&network_uuid)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn manager_for_network(&self, network_uuid: Uuid) -> Result<Arc<NetworkPollManager<S>>> {
        self.managers
            .get(&network_uuid)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                PollError::internal(format!(
                    "cannot find poll manager for network {network_uuid}"
                ))
            })
    }

    // ========================================================================
    // Network mutations
    // ========================================================================

    pub async fn add_network(self: &Arc<Self>, mut body: Network) -> Result<Network> {
        debug!("add network: {}", body.name);
        body.has_polling_statistics = true;
        body.plugin_uuid = Some(self.plugin.uuid);
        let network = self.store.create_network(body).await?;

        if network.enable {
            self.start_network_polling(&network).await;
        } else {
            let mut fault = network.common_fault.clone();
            fault.set_fail(
                MessageLevel::Warning,
                FaultCode::NetworkError,
                "network disabled",
            );
            self.store.update_network_errors(network.uuid, &fault).await?;
            self.store
                .update_network_descendants_errors(
                    network.uuid,
                    "network disabled",
                    MessageLevel::Warning,
                    FaultCode::NetworkError,
                    true,
                )
                .await?;
        }
        Ok(network)
    }

    pub async fn update_network(self: &Arc<Self>, uuid: Uuid, mut body: Network) -> Result<Network> {
        debug!("update network: {uuid}");
        body.has_polling_statistics = true;
        body.plugin_uuid = Some(self.plugin.uuid);
        if body.enable {
            body.common_fault.set_ok(FaultCode::Ok, "");
        } else {
            body.common_fault.set_fail(
                MessageLevel::Warning,
                FaultCode::NetworkError,
                "network disabled",
            );
        }

        let previous = self.store.get_network(uuid, false, false).await?;
        let restart_polling = body.max_poll_rate != previous.max_poll_rate;
        let network = self.store.update_network(uuid, body).await?;

        let manager = self.managers.get(&uuid).map(|entry| Arc::clone(entry.value()));
        match manager {
            Some(manager) => {
                if manager.network_name() != network.name {
                    manager.set_network_name(network.name.clone());
                }
                if !network.enable && manager.is_enabled() {
                    self.stop_network_polling(uuid).await;
                    self.store
                        .update_network_descendants_errors(
                            uuid,
                            "network disabled",
                            MessageLevel::Warning,
                            FaultCode::DeviceError,
                            true,
                        )
                        .await?;
                } else if restart_polling || (network.enable && !manager.is_enabled()) {
                    self.stop_network_polling(uuid).await;
                    self.start_network_polling(&network).await;
                    self.store.clear_network_descendants_errors(uuid, true).await?;
                }
            },
            None => {
                if network.enable && self.enabled.load(Ordering::SeqCst) {
                    self.start_network_polling(&network).await;
                    self.store.clear_network_descendants_errors(uuid, true).await?;
                }
            },
        }
        Ok(network)
    }

    pub async fn delete_network(&self, uuid: Uuid) -> Result<bool> {
        debug!("delete network: {uuid}");
        self.stop_network_polling(uuid).await;
        self.store.delete_network(uuid).await?;
        Ok(true)
    }

    // ========================================================================
    // Device mutations
    // ========================================================================

    pub async fn add_device(self: &Arc<Self>, body: Device) -> Result<Device> {
        debug!("add device: {}", body.name);
        let device = self.store.create_device(body).await?;

        if !device.enable {
            let mut fault = device.common_fault.clone();
            fault.set_fail(
                MessageLevel::Warning,
                FaultCode::DeviceError,
                "device disabled",
            );
            self.store.update_device_errors(device.uuid, &fault).await?;
            self.store
                .update_device_descendants_errors(
                    device.uuid,
                    "device disabled",
                    MessageLevel::Warning,
                    FaultCode::DeviceError,
                )
                .await?;
        }

        match self.manager_for_network(device.network_uuid) {
            Ok(manager) => manager.set_device_poll_rate_durations(
                device.uuid,
                device.fast_poll_rate,
                device.normal_poll_rate,
                device.slow_poll_rate,
            ),
            Err(_) => debug!(
                "add device: no poll manager for network {}",
                device.network_uuid
            ),
        }
        Ok(device)
    }

    pub async fn update_device(self: &Arc<Self>, uuid: Uuid, mut body: Device) -> Result<Device> {
        debug!("update device: {uuid}");
        if body.enable {
            body.common_fault.set_ok(FaultCode::Ok, "");
        } else {
            body.common_fault.set_fail(
                MessageLevel::Warning,
                FaultCode::DeviceError,
                "device disabled",
            );
        }

        let previous = self.store.get_device(uuid, false).await?;
        let poll_rates_changed = previous.fast_poll_rate != body.fast_poll_rate
            || previous.normal_poll_rate != body.normal_poll_rate
            || previous.slow_poll_rate != body.slow_poll_rate;

        let mut device = self.store.update_device(uuid, body).await?;
        if device.enable {
            device = self.store.get_device(uuid, true).await?;
        }

        let Ok(manager) = self.manager_for_network(device.network_uuid) else {
            debug!(
                "update device: no poll manager for network {}",
                device.network_uuid
            );
            return Ok(device);
        };
        manager.set_device_poll_rate_durations(
            device.uuid,
            device.fast_poll_rate,
            device.normal_poll_rate,
            device.slow_poll_rate,
        );

        if !device.enable {
            self.store
                .update_device_descendants_errors(
                    device.uuid,
                    "device disabled",
                    MessageLevel::Warning,
                    FaultCode::DeviceError,
                )
                .await?;
            manager.queue.remove_by_device(device.uuid);
        } else if poll_rates_changed {
            // standby repoll timers carry the old durations; re-admit
            self.store.clear_device_descendants_errors(device.uuid).await?;
            manager.re_add_device_points(device.uuid).await;
        } else {
            self.store.clear_device_descendants_errors(device.uuid).await?;
            for point in device.points.clone() {
                if point.enable {
                    self.readd_point(&manager, &point, device.network_uuid).await;
                }
            }
        }
        Ok(device)
    }

    pub async fn delete_device(&self, uuid: Uuid) -> Result<bool> {
        debug!("delete device: {uuid}");
        let device = self.store.get_device(uuid, false).await?;
        match self.manager_for_network(device.network_uuid) {
            Ok(manager) => manager.queue.remove_by_device(uuid),
            Err(_) => debug!(
                "delete device: no poll manager for network {}",
                device.network_uuid
            ),
        }
        self.store.delete_device(uuid).await?;
        Ok(true)
    }

    // ========================================================================
    // Point mutations
    // ========================================================================

    /// Re-admit a point through the completion hook, honoring its
    /// poll-on-startup preference.
    async fn readd_point(
        &self,
        manager: &Arc<NetworkPollManager<S>>,
        point: &Point,
        network_uuid: Uuid,
    ) {
        manager.queue.remove_by_point(point.uuid);
        let pp = PollingPoint::new(point.uuid, point.device_uuid, network_uuid);
        let mut point = point.clone();
        let completion = if point.poll_on_startup() {
            PollCompletion::point_update(RetryType::Normal)
        } else {
            PollCompletion::not_required()
        };
        manager
            .polling_point_complete_notification(pp, &mut point, completion)
            .await;
    }

    fn validate_point(body: &mut Point) -> Result<()> {
        if body.is_writeable() {
            body.enable_writeable = true;
            if body.poll_on_startup() {
                body.write_poll_required = true;
            }
        } else {
            body.reset_writeable_properties();
        }
        body.read_poll_required = true;

        if !body.valid_address() {
            return Err(PollError::validation("register must be between 1 and 65535"));
        }

        body.is_type_bool =
            body.object_type.is_boolean() || body.data_type == poll_model::DataType::Digital;
        body.is_output = body.object_type.is_writeable() && body.write_mode.is_writeable();
        Ok(())
    }

    pub async fn add_point(self: &Arc<Self>, mut body: Point) -> Result<Point> {
        debug!("add point: {}", body.name);
        Self::validate_point(&mut body)?;
        let point = self.store.create_point(body).await?;

        let device = self.store.get_device(point.device_uuid, false).await?;
        let manager = self.manager_for_network(device.network_uuid)?;

        if point.enable {
            self.readd_point(&manager, &point, device.network_uuid).await;
        } else {
            let mut fault = point.common_fault.clone();
            fault.set_fail(
                MessageLevel::Warning,
                FaultCode::PointError,
                "point disabled",
            );
            self.store.update_point_errors(point.uuid, &fault).await?;
        }
        self.store.get_point(point.uuid).await
    }

    pub async fn update_point(self: &Arc<Self>, uuid: Uuid, mut body: Point) -> Result<Point> {
        debug!("update point: {uuid}");
        Self::validate_point(&mut body)?;
        if body.is_writeable() {
            body.write_poll_required = true;
        }
        body.common_fault.set_ok(
            FaultCode::PointWriteOk,
            format!("last-updated: {}", chrono::Utc::now()),
        );

        let point = self.store.update_point(uuid, body).await?;
        let device = self.store.get_device(point.device_uuid, false).await?;
        let manager = self.manager_for_network(device.network_uuid)?;

        if point.enable && device.enable {
            self.readd_point(&manager, &point, device.network_uuid).await;
        } else {
            manager.queue.remove_by_point(point.uuid);
        }
        self.store.get_point(uuid).await
    }

    pub async fn delete_point(&self, uuid: Uuid) -> Result<bool> {
        debug!("delete point: {uuid}");
        let point = self.store.get_point(uuid).await?;
        let device = self.store.get_device(point.device_uuid, false).await?;
        match self.manager_for_network(device.network_uuid) {
            Ok(manager) => {
                manager.queue.remove_by_point(uuid);
            },
            Err(_) => debug!(
                "delete point: no poll manager for network {}",
                device.network_uuid
            ),
        }
        self.store.delete_point(uuid).await?;
        Ok(true)
    }

    /// Apply a point write and re-queue the point so the new value reaches
    /// the wire as soon as its write mode allows.
    pub async fn write_point(self: &Arc<Self>, uuid: Uuid, writer: &PointWriter) -> Result<Point> {
        debug!("write point: {uuid}");
        let result = self.store.point_write(uuid, writer).await?;
        let mut point = result.point;

        let device = self.store.get_device(point.device_uuid, false).await?;
        let manager = self.manager_for_network(device.network_uuid)?;

        if !point.enable {
            return Ok(point);
        }

        let write_once_then_read_changed = point.write_mode == WriteMode::WriteOnceThenRead
            && point.write_value.is_some()
            && point.write_value != point.original_value;
        let needs_requeue = result.is_write_value_change
            || point.write_mode == WriteMode::WriteOnceReadOnce
            || point.write_mode == WriteMode::WriteOnce
            || write_once_then_read_changed;
        if !needs_requeue {
            return Ok(point);
        }

        point.write_poll_required = point.is_writeable();
        point.read_poll_required =
            point.write_mode != WriteMode::WriteAlways && point.write_mode != WriteMode::WriteOnce;
        point.common_fault.set_ok(
            FaultCode::PointWriteOk,
            format!("last-updated: {}", chrono::Utc::now()),
        );
        let mut point = self.store.update_point(point.uuid, point).await?;

        match manager.queue.remove_by_point(point.uuid) {
            RemoveResult::Removed(pp) => {
                manager
                    .polling_point_complete_notification(
                        pp,
                        &mut point,
                        PollCompletion {
                            write_success: false,
                            read_success: false,
                            poll_time_secs: 0.0,
                            point_update: true,
                            reset_to_configured_priority: false,
                            retry_type: RetryType::Immediate,
                            polling_was_not_required: false,
                        },
                    )
                    .await;
            },
            RemoveResult::Pending => {
                // out for polling right now: the completion hook will
                // re-enter it, promoted to ASAP when a write is wanted
                manager
                    .queue
                    .mark_updated_while_polling(point.uuid, point.write_poll_required);
            },
            RemoveResult::NotFound => {
                warn!("write point {}: no polling point to re-queue", point.uuid);
            },
        }
        Ok(point)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn polling_stats_by_network_name(&self, name: &str) -> Result<PollQueueStatistics> {
        for entry in self.managers.iter() {
            if entry.value().network_name() == name {
                return Ok(entry.value().get_polling_queue_statistics());
            }
        }
        Err(PollError::NetworkNotFound(format!(
            "no polling statistics for network {name}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use poll_model::{PollPriority, TransportType};

    async fn module() -> (Arc<ModbusModule<MemoryStore>>, Arc<MemoryStore>) {
        let (store, _plugin) = MemoryStore::with_plugin(MODULE_NAME);
        let store = Arc::new(store);
        // keep the wire loops out of these tests; the scheduler alone is
        // under test
        let config = Config {
            enable_polling: false,
            ..Config::default()
        };
        let module = ModbusModule::new(config, Arc::clone(&store))
            .await
            .unwrap();
        (Arc::new(module), store)
    }

    fn network_body() -> Network {
        Network {
            name: "site-a".into(),
            enable: true,
            transport_type: TransportType::Ip,
            host: Some("127.0.0.1".into()),
            port: Some(1502),
            max_poll_rate: Some(0.05),
            ..Network::default()
        }
    }

    fn device_body(network_uuid: Uuid) -> Device {
        Device {
            network_uuid,
            name: "meter-1".into(),
            enable: true,
            address_id: 7,
            host: Some("127.0.0.1".into()),
            port: Some(1502),
            ..Device::default()
        }
    }

    fn point_body(device_uuid: Uuid) -> Point {
        Point {
            device_uuid,
            name: "kwh".into(),
            enable: true,
            address_id: Some(1),
            ..Point::default()
        }
    }

    #[tokio::test]
    async fn add_network_starts_a_poll_manager() {
        let (module, _store) = module().await;
        let network = module.add_network(network_body()).await.unwrap();
        assert!(module.managers.contains_key(&network.uuid));
        assert!(module
            .polling_stats_by_network_name("site-a")
            .unwrap()
            .enable);
        module.disable().await;
    }

    #[tokio::test]
    async fn add_point_admits_polling_point() {
        let (module, _store) = module().await;
        let network = module.add_network(network_body()).await.unwrap();
        let device = module.add_device(device_body(network.uuid)).await.unwrap();
        let point = module.add_point(point_body(device.uuid)).await.unwrap();

        let manager = module.manager_for_network(network.uuid).unwrap();
        assert!(manager.queue.contains_point(point.uuid));

        // deleting the point removes the polling point
        module.delete_point(point.uuid).await.unwrap();
        assert!(!manager.queue.contains_point(point.uuid));
        module.disable().await;
    }

    #[tokio::test]
    async fn point_address_is_validated() {
        let (module, _store) = module().await;
        let network = module.add_network(network_body()).await.unwrap();
        let device = module.add_device(device_body(network.uuid)).await.unwrap();
        let mut body = point_body(device.uuid);
        body.address_id = Some(0);
        assert!(module.add_point(body).await.is_err());
        module.disable().await;
    }

    #[tokio::test]
    async fn disable_network_clears_queue() {
        let (module, _store) = module().await;
        let network = module.add_network(network_body()).await.unwrap();
        let device = module.add_device(device_body(network.uuid)).await.unwrap();
        module.add_point(point_body(device.uuid)).await.unwrap();

        let mut disabled = network.clone();
        disabled.enable = false;
        module
            .update_network(network.uuid, disabled)
            .await
            .unwrap();
        assert!(!module.managers.contains_key(&network.uuid));
        module.disable().await;
    }

    #[tokio::test]
    async fn write_point_requeues_with_write_required() {
        let (module, store) = module().await;
        let network = module.add_network(network_body()).await.unwrap();
        let device = module.add_device(device_body(network.uuid)).await.unwrap();
        let mut body = point_body(device.uuid);
        body.write_mode = WriteMode::WriteAndMaintain;
        body.poll_priority = PollPriority::Low;
        let point = module.add_point(body).await.unwrap();

        let written = module
            .write_point(
                point.uuid,
                &PointWriter {
                    write_value: Some(7.0),
                    ..PointWriter::default()
                },
            )
            .await
            .unwrap();
        assert!(written.write_poll_required);
        assert!(written.read_poll_required);

        let stored = store.get_point(point.uuid).await.unwrap();
        assert_eq!(stored.write_value, Some(7.0));
        let manager = module.manager_for_network(network.uuid).unwrap();
        assert!(manager.queue.contains_point(point.uuid));
        module.disable().await;
    }

    #[tokio::test]
    async fn write_point_while_current_marks_updated_while_polling() {
        let (module, _store) = module().await;
        let network = module.add_network(network_body()).await.unwrap();
        let device = module.add_device(device_body(network.uuid)).await.unwrap();
        let mut body = point_body(device.uuid);
        body.write_mode = WriteMode::WriteAlways;
        let point = module.add_point(body).await.unwrap();

        let manager = module.manager_for_network(network.uuid).unwrap();
        // simulate the loop drawing the point out for I/O
        manager.queue.start();
        let token = manager.queue.get_next_polling_point().unwrap();
        assert_eq!(token.point_uuid, point.uuid);

        module
            .write_point(
                point.uuid,
                &PointWriter {
                    write_value: Some(1.0),
                    ..PointWriter::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(
            manager.queue.consume_updated_while_polling(point.uuid),
            Some(true)
        );
        module.disable().await;
    }
}
