//! In-memory store implementation
//!
//! DashMap-backed catalog used by the binary and the test suite. Entities
//! are stored flat and stitched together on fetch.

use async_trait::async_trait;
use dashmap::DashMap;
use poll_model::{
    CommonFault, Device, FaultCode, MessageLevel, Network, Plugin, Point, PointWriteResult,
    PointWriter,
};
use uuid::Uuid;

use super::Store;
use crate::error::{PollError, Result};

/// DashMap-backed [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    plugins: DashMap<String, Plugin>,
    networks: DashMap<Uuid, Network>,
    devices: DashMap<Uuid, Device>,
    points: DashMap<Uuid, Point>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with a plugin pre-registered, returning the store and
    /// the plugin record.
    pub fn with_plugin(name: &str) -> (Self, Plugin) {
        let store = Self::new();
        let plugin = Plugin {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
        };
        store.plugins.insert(name.to_string(), plugin.clone());
        (store, plugin)
    }

    fn network_devices(&self, network_uuid: Uuid, with_points: bool) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|entry| entry.network_uuid == network_uuid)
            .map(|entry| entry.clone())
            .collect();
        if with_points {
            for device in &mut devices {
                device.points = self.device_points(device.uuid);
            }
        }
        devices
    }

    fn device_points(&self, device_uuid: Uuid) -> Vec<Point> {
        self.points
            .iter()
            .filter(|entry| entry.device_uuid == device_uuid)
            .map(|entry| entry.clone())
            .collect()
    }

    fn mark_device(&self, uuid: Uuid, apply: impl FnOnce(&mut CommonFault)) {
        if let Some(mut device) = self.devices.get_mut(&uuid) {
            apply(&mut device.common_fault);
        }
    }

    fn mark_point(&self, uuid: Uuid, apply: impl FnOnce(&mut CommonFault)) {
        if let Some(mut point) = self.points.get_mut(&uuid) {
            apply(&mut point.common_fault);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_plugin_by_name(&self, name: &str) -> Result<Plugin> {
        self.plugins
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| PollError::PluginNotFound(name.to_string()))
    }

    async fn get_networks_by_plugin(&self, plugin_uuid: Uuid) -> Result<Vec<Network>> {
        Ok(self
            .networks
            .iter()
            .filter(|entry| entry.plugin_uuid == Some(plugin_uuid))
            .map(|entry| entry.clone())
            .collect())
    }

    async fn get_network(
        &self,
        uuid: Uuid,
        with_devices: bool,
        with_points: bool,
    ) -> Result<Network> {
        let mut network = self
            .networks
            .get(&uuid)
            .map(|entry| entry.clone())
            .ok_or_else(|| PollError::NetworkNotFound(uuid.to_string()))?;
        if with_devices {
            network.devices = self.network_devices(uuid, with_points);
        }
        Ok(network)
    }

    async fn get_device(&self, uuid: Uuid, with_points: bool) -> Result<Device> {
        let mut device = self
            .devices
            .get(&uuid)
            .map(|entry| entry.clone())
            .ok_or_else(|| PollError::DeviceNotFound(uuid.to_string()))?;
        if with_points {
            device.points = self.device_points(uuid);
        }
        Ok(device)
    }

    async fn get_point(&self, uuid: Uuid) -> Result<Point> {
        self.points
            .get(&uuid)
            .map(|entry| entry.clone())
            .ok_or_else(|| PollError::PointNotFound(uuid.to_string()))
    }

    async fn create_network(&self, mut network: Network) -> Result<Network> {
        if network.uuid.is_nil() {
            network.uuid = Uuid::new_v4();
        }
        network.devices.clear();
        self.networks.insert(network.uuid, network.clone());
        Ok(network)
    }

    async fn update_network(&self, uuid: Uuid, mut network: Network) -> Result<Network> {
        if !self.networks.contains_key(&uuid) {
            return Err(PollError::NetworkNotFound(uuid.to_string()));
        }
        network.uuid = uuid;
        network.devices.clear();
        self.networks.insert(uuid, network.clone());
        Ok(network)
    }

    async fn delete_network(&self, uuid: Uuid) -> Result<()> {
        self.networks
            .remove(&uuid)
            .ok_or_else(|| PollError::NetworkNotFound(uuid.to_string()))?;
        let device_uuids: Vec<Uuid> = self
            .devices
            .iter()
            .filter(|entry| entry.network_uuid == uuid)
            .map(|entry| entry.uuid)
            .collect();
        for device_uuid in device_uuids {
            let _ = self.delete_device(device_uuid).await;
        }
        Ok(())
    }

    async fn create_device(&self, mut device: Device) -> Result<Device> {
        if device.uuid.is_nil() {
            device.uuid = Uuid::new_v4();
        }
        device.points.clear();
        self.devices.insert(device.uuid, device.clone());
        Ok(device)
    }

    async fn update_device(&self, uuid: Uuid, mut device: Device) -> Result<Device> {
        if !self.devices.contains_key(&uuid) {
            return Err(PollError::DeviceNotFound(uuid.to_string()));
        }
        device.uuid = uuid;
        device.points.clear();
        self.devices.insert(uuid, device.clone());
        Ok(device)
    }

    async fn delete_device(&self, uuid: Uuid) -> Result<()> {
        self.devices
            .remove(&uuid)
            .ok_or_else(|| PollError::DeviceNotFound(uuid.to_string()))?;
        self.points.retain(|_, point| point.device_uuid != uuid);
        Ok(())
    }

    async fn create_point(&self, mut point: Point) -> Result<Point> {
        if point.uuid.is_nil() {
            point.uuid = Uuid::new_v4();
        }
        self.points.insert(point.uuid, point.clone());
        Ok(point)
    }

    async fn update_point(&self, uuid: Uuid, mut point: Point) -> Result<Point> {
        if !self.points.contains_key(&uuid) {
            return Err(PollError::PointNotFound(uuid.to_string()));
        }
        point.uuid = uuid;
        self.points.insert(uuid, point.clone());
        Ok(point)
    }

    async fn delete_point(&self, uuid: Uuid) -> Result<()> {
        self.points
            .remove(&uuid)
            .ok_or_else(|| PollError::PointNotFound(uuid.to_string()))?;
        Ok(())
    }

    async fn update_network_errors(&self, uuid: Uuid, fault: &CommonFault) -> Result<()> {
        let mut network = self
            .networks
            .get_mut(&uuid)
            .ok_or_else(|| PollError::NetworkNotFound(uuid.to_string()))?;
        network.common_fault = fault.clone();
        Ok(())
    }

    async fn update_device_errors(&self, uuid: Uuid, fault: &CommonFault) -> Result<()> {
        let mut device = self
            .devices
            .get_mut(&uuid)
            .ok_or_else(|| PollError::DeviceNotFound(uuid.to_string()))?;
        device.common_fault = fault.clone();
        Ok(())
    }

    async fn update_point_errors(&self, uuid: Uuid, fault: &CommonFault) -> Result<()> {
        let mut point = self
            .points
            .get_mut(&uuid)
            .ok_or_else(|| PollError::PointNotFound(uuid.to_string()))?;
        point.common_fault = fault.clone();
        Ok(())
    }

    async fn clear_network_descendants_errors(
        &self,
        uuid: Uuid,
        include_points: bool,
    ) -> Result<()> {
        for device in self.network_devices(uuid, false) {
            self.mark_device(device.uuid, |fault| fault.set_ok(FaultCode::Ok, ""));
            if include_points {
                for point in self.device_points(device.uuid) {
                    self.mark_point(point.uuid, |fault| fault.set_ok(FaultCode::Ok, ""));
                }
            }
        }
        Ok(())
    }

    async fn update_network_descendants_errors(
        &self,
        uuid: Uuid,
        message: &str,
        level: MessageLevel,
        code: FaultCode,
        include_points: bool,
    ) -> Result<()> {
        for device in self.network_devices(uuid, false) {
            self.mark_device(device.uuid, |fault| fault.set_fail(level, code, message));
            if include_points {
                for point in self.device_points(device.uuid) {
                    self.mark_point(point.uuid, |fault| fault.set_fail(level, code, message));
                }
            }
        }
        Ok(())
    }

    async fn clear_device_descendants_errors(&self, uuid: Uuid) -> Result<()> {
        for point in self.device_points(uuid) {
            self.mark_point(point.uuid, |fault| fault.set_ok(FaultCode::Ok, ""));
        }
        Ok(())
    }

    async fn update_device_descendants_errors(
        &self,
        uuid: Uuid,
        message: &str,
        level: MessageLevel,
        code: FaultCode,
    ) -> Result<()> {
        for point in self.device_points(uuid) {
            self.mark_point(point.uuid, |fault| fault.set_fail(level, code, message));
        }
        Ok(())
    }

    async fn point_write(&self, uuid: Uuid, writer: &PointWriter) -> Result<PointWriteResult> {
        let mut point = self
            .points
            .get_mut(&uuid)
            .ok_or_else(|| PollError::PointNotFound(uuid.to_string()))?;

        let mut is_write_value_change = false;
        if let Some(value) = writer.write_value {
            is_write_value_change = point.write_value != Some(value);
            point.write_value = Some(value);
        }
        if let Some(value) = writer.original_value {
            // the present value is derived from the original value; this
            // store applies no transformations
            point.original_value = Some(value);
            point.present_value = Some(value);
        }
        if writer.fault {
            point.common_fault.set_fail(
                MessageLevel::Fail,
                FaultCode::PointError,
                writer.message.clone().unwrap_or_default(),
            );
        } else {
            point.common_fault.set_ok(
                FaultCode::PointWriteOk,
                writer.message.clone().unwrap_or_default(),
            );
        }

        Ok(PointWriteResult {
            point: point.clone(),
            is_write_value_change,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (MemoryStore, Network, Device, Point) {
        let (store, plugin) = MemoryStore::with_plugin("modbus");
        let network = Network {
            name: "net".into(),
            enable: true,
            plugin_uuid: Some(plugin.uuid),
            ..Network::default()
        };
        let network = store.create_network(network).await.unwrap();
        let device = Device {
            network_uuid: network.uuid,
            enable: true,
            address_id: 1,
            ..Device::default()
        };
        let device = store.create_device(device).await.unwrap();
        let point = Point {
            device_uuid: device.uuid,
            enable: true,
            address_id: Some(1),
            ..Point::default()
        };
        let point = store.create_point(point).await.unwrap();
        (store, network, device, point)
    }

    #[tokio::test]
    async fn fetch_with_descendants() {
        let (store, network, device, point) = seeded().await;
        let fetched = store.get_network(network.uuid, true, true).await.unwrap();
        assert_eq!(fetched.devices.len(), 1);
        assert_eq!(fetched.devices[0].uuid, device.uuid);
        assert_eq!(fetched.devices[0].points.len(), 1);
        assert_eq!(fetched.devices[0].points[0].uuid, point.uuid);
    }

    #[tokio::test]
    async fn delete_network_cascades() {
        let (store, network, device, point) = seeded().await;
        store.delete_network(network.uuid).await.unwrap();
        assert!(store.get_device(device.uuid, false).await.is_err());
        assert!(store.get_point(point.uuid).await.is_err());
    }

    #[tokio::test]
    async fn point_write_derives_present_value() {
        let (store, _, _, point) = seeded().await;
        let result = store
            .point_write(
                point.uuid,
                &PointWriter {
                    original_value: Some(42.0),
                    ..PointWriter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.point.original_value, Some(42.0));
        assert_eq!(result.point.present_value, Some(42.0));
        assert!(!result.is_write_value_change);
    }

    #[tokio::test]
    async fn point_write_reports_write_value_change() {
        let (store, _, _, point) = seeded().await;
        let writer = PointWriter {
            write_value: Some(1.0),
            ..PointWriter::default()
        };
        let first = store.point_write(point.uuid, &writer).await.unwrap();
        assert!(first.is_write_value_change);
        let second = store.point_write(point.uuid, &writer).await.unwrap();
        assert!(!second.is_write_value_change);
    }
}
