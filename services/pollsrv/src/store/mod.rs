//! Store abstraction
//!
//! The engine is generic over a [`Store`] capability set: the catalog of
//! networks, devices and points lives behind this trait, together with the
//! fault-annotation and point-write operations the polling loop relies on.
//! The crate ships [`MemoryStore`] for the binary and the tests; a real
//! deployment plugs the platform's persistent store in here.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use poll_model::{
    CommonFault, Device, FaultCode, MessageLevel, Network, Plugin, Point, PointWriteResult,
    PointWriter,
};
use uuid::Uuid;

use crate::error::Result;

/// Catalog capability set consumed by the polling engine.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Resolve a plugin registration by name.
    async fn get_plugin_by_name(&self, name: &str) -> Result<Plugin>;

    async fn get_networks_by_plugin(&self, plugin_uuid: Uuid) -> Result<Vec<Network>>;

    /// Fetch a network, optionally populated with its devices (and their
    /// points).
    async fn get_network(&self, uuid: Uuid, with_devices: bool, with_points: bool)
        -> Result<Network>;

    async fn get_device(&self, uuid: Uuid, with_points: bool) -> Result<Device>;

    async fn get_point(&self, uuid: Uuid) -> Result<Point>;

    async fn create_network(&self, network: Network) -> Result<Network>;
    async fn update_network(&self, uuid: Uuid, network: Network) -> Result<Network>;
    async fn delete_network(&self, uuid: Uuid) -> Result<()>;

    async fn create_device(&self, device: Device) -> Result<Device>;
    async fn update_device(&self, uuid: Uuid, device: Device) -> Result<Device>;
    async fn delete_device(&self, uuid: Uuid) -> Result<()>;

    async fn create_point(&self, point: Point) -> Result<Point>;
    async fn update_point(&self, uuid: Uuid, point: Point) -> Result<Point>;
    async fn delete_point(&self, uuid: Uuid) -> Result<()>;

    /// Persist only the fault state of an entity.
    async fn update_network_errors(&self, uuid: Uuid, fault: &CommonFault) -> Result<()>;
    async fn update_device_errors(&self, uuid: Uuid, fault: &CommonFault) -> Result<()>;
    async fn update_point_errors(&self, uuid: Uuid, fault: &CommonFault) -> Result<()>;

    /// Clear fault state on all devices of a network, and optionally on
    /// their points too.
    async fn clear_network_descendants_errors(&self, uuid: Uuid, include_points: bool)
        -> Result<()>;

    /// Mark fault state on all devices of a network, and optionally on
    /// their points too.
    async fn update_network_descendants_errors(
        &self,
        uuid: Uuid,
        message: &str,
        level: MessageLevel,
        code: FaultCode,
        include_points: bool,
    ) -> Result<()>;

    async fn clear_device_descendants_errors(&self, uuid: Uuid) -> Result<()>;

    async fn update_device_descendants_errors(
        &self,
        uuid: Uuid,
        message: &str,
        level: MessageLevel,
        code: FaultCode,
    ) -> Result<()>;

    /// Apply a point write. `original_value` pushes derive the point's
    /// present value; `write_value` changes are reported back so the caller
    /// can re-queue the point.
    async fn point_write(&self, uuid: Uuid, writer: &PointWriter) -> Result<PointWriteResult>;
}
