//! Per-network polling loop
//!
//! One cooperative task per network, ticking at the network's max poll
//! rate. Each tick draws at most one polling point from the network queue,
//! revalidates the catalog, performs the read and/or write transaction, and
//! feeds the poll manager's completion hook. Errors never abort the task;
//! they annotate entities and pick the retry classification.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use poll_model::{DataType, FaultCode, MessageLevel, Network, ObjectType, Point, PointWriter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{PollError, Result};
use crate::modbus::client::{ModbusClient, RegisterType, TransportTarget};
use crate::modbus::codec::{self, encoding_params};
use crate::modbus::connection::{SerialParams, DEFAULT_SERIAL_TIMEOUT};
use crate::pollqueue::{NetworkPollManager, RetryType};
use crate::store::Store;

/// Read→write inter-op sleep fallback when the network carries no max poll
/// rate of its own.
const READ_WRITE_GAP_FALLBACK_SECS: f64 = 0.1;

/// Shared cache of Modbus clients, one per network.
pub type ClientCache = Arc<DashMap<Uuid, Arc<tokio::sync::Mutex<ModbusClient>>>>;

/// Spawn the polling loop for one network. The task exits when `cancel`
/// fires, leaving the pipeline's `current` slot empty.
pub fn spawn_polling_loop<S: Store>(
    store: Arc<S>,
    manager: Arc<NetworkPollManager<S>>,
    clients: ClientCache,
    poll_counter: Arc<AtomicI64>,
    tick: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }
            if !manager.is_enabled() {
                continue;
            }
            poll_network_once(&store, &manager, &clients, &poll_counter).await;
        }
        debug!(network = %manager.network_uuid, "polling loop stopped");
    })
}

/// One tick's worth of work: draw, validate, transact, complete.
async fn poll_network_once<S: Store>(
    store: &Arc<S>,
    manager: &Arc<NetworkPollManager<S>>,
    clients: &ClientCache,
    poll_counter: &Arc<AtomicI64>,
) {
    // revalidate the network in the store before touching the wire
    let network = match store.get_network(manager.network_uuid, false, false).await {
        Ok(network) => network,
        Err(_) => {
            error!("network {} not found, skipping poll", manager.network_uuid);
            return;
        },
    };
    if network.plugin_uuid != Some(manager.plugin_uuid) || !network.enable {
        debug!("skipping poll, network disabled: {}", network.name);
        return;
    }

    let Some(token) = manager.queue.get_next_polling_point() else {
        debug!("skipping poll, no points to poll: {}", network.name);
        return;
    };
    let poll_start = tokio::time::Instant::now();
    let elapsed = |start: tokio::time::Instant| start.elapsed().as_secs_f64();

    // resolve the device
    let device = match store.get_device(token.device_uuid, false).await {
        Ok(device) => device,
        Err(_) => {
            error!("skipping poll, could not find device {}", token.device_uuid);
            manager
                .single_poll_finished(
                    &token,
                    None,
                    elapsed(poll_start),
                    false,
                    false,
                    true,
                    RetryType::Delayed,
                )
                .await;
            return;
        },
    };
    if !device.enable {
        error!("skipping poll, device disabled: {}", device.uuid);
        manager
            .single_poll_finished(
                &token,
                None,
                elapsed(poll_start),
                false,
                false,
                true,
                RetryType::Never,
            )
            .await;
        return;
    }
    if !device.valid_address() {
        error!(
            "skipping poll, invalid device address {} on {}",
            device.address_id, device.uuid
        );
        device_update_err(
            store,
            &device.uuid,
            "invalid device address",
            MessageLevel::Fail,
            FaultCode::DeviceError,
        )
        .await;
        manager
            .single_poll_finished(
                &token,
                None,
                elapsed(poll_start),
                false,
                false,
                true,
                RetryType::Never,
            )
            .await;
        return;
    }

    // resolve the point
    let mut point = match store.get_point(token.point_uuid).await {
        Ok(point) => point,
        Err(_) => {
            error!("skipping poll, could not find point {}", token.point_uuid);
            manager
                .single_poll_finished(
                    &token,
                    None,
                    elapsed(poll_start),
                    false,
                    false,
                    true,
                    RetryType::Delayed,
                )
                .await;
            return;
        },
    };
    if !point.enable {
        error!("skipping poll, point disabled: {}", point.uuid);
        manager
            .single_poll_finished(
                &token,
                None,
                elapsed(poll_start),
                false,
                false,
                true,
                RetryType::Never,
            )
            .await;
        return;
    }
    if !point.read_poll_required && !point.write_poll_required {
        debug!("skipping poll, polling not required: {}", point.name);
        manager
            .single_poll_finished(
                &token,
                Some(&mut point),
                elapsed(poll_start),
                false,
                false,
                true,
                RetryType::Normal,
            )
            .await;
        return;
    }
    if !point.valid_address() {
        point_update_err(
            store,
            &point,
            "register must be between 1 and 65535",
            MessageLevel::Fail,
            FaultCode::PointError,
        )
        .await;
        manager
            .single_poll_finished(
                &token,
                Some(&mut point),
                elapsed(poll_start),
                false,
                false,
                false,
                RetryType::Delayed,
            )
            .await;
        return;
    }

    manager.pq_polling(format!(
        "next poll drawn. network: {}, device: {}, point: {}, priority: {:?}, write required: {}, read required: {}",
        network.name,
        device.name,
        point.name,
        point.poll_priority,
        point.write_poll_required,
        point.read_poll_required
    ));

    // resolve (or create) the cached client for this network
    let client = match clients.get(&network.uuid) {
        Some(entry) => Arc::clone(entry.value()),
        None => match create_client(&network).await {
            Ok(client) => {
                let client = Arc::new(tokio::sync::Mutex::new(client));
                clients.insert(network.uuid, Arc::clone(&client));
                client
            },
            Err(e) => {
                error!("failed to set client for network {}: {e}", network.name);
                if e.is_transport_unavailable() {
                    manager.port_unavailable();
                }
                update_network_message(store, &network, "", Some(&e), poll_counter).await;
                manager
                    .single_poll_finished(
                        &token,
                        Some(&mut point),
                        elapsed(poll_start),
                        false,
                        false,
                        false,
                        RetryType::Normal,
                    )
                    .await;
                return;
            },
        },
    };
    let mut client = client.lock().await;

    // point the client at the device
    if network.transport_type.is_serial() {
        client.set_slave(device.address_id);
    } else {
        let host = device.host.clone().or_else(|| network.host.clone());
        let port = device.port.or(network.port);
        let (Some(host), Some(port)) = (host, port) else {
            let message = format!("failed to validate device address: {}", device.uuid);
            error!("{message}");
            update_network_message(
                store,
                &network,
                "",
                Some(&PollError::config(message)),
                poll_counter,
            )
            .await;
            manager
                .single_poll_finished(
                    &token,
                    Some(&mut point),
                    elapsed(poll_start),
                    false,
                    false,
                    false,
                    RetryType::Delayed,
                )
                .await;
            return;
        };
        client.set_tcp_target(&host, port);
        client.set_slave(device.address_id);
    }

    let (endianness, word_order) = encoding_params(point.object_encoding);
    client.set_encoding(endianness, word_order);
    client.set_zero_mode(device.zero_mode);
    let address = point_address(&point, device.zero_mode);

    let bitwise = point.bitwise();
    let bitwise_index = point.bitwise_index.unwrap_or(0) as u32;

    // READ
    let mut read_success = false;
    let mut read_value = 0.0;
    let mut bitwise_value = 0.0;
    if point.read_poll_required && (!point.write_poll_required || bitwise) {
        match network_read(&mut client, &point, address).await {
            Ok((_raw, value)) => {
                read_value = value;
                if bitwise {
                    match codec::bit_from_f64(value, bitwise_index) {
                        Ok(bit) => bitwise_value = if bit { 1.0 } else { 0.0 },
                        Err(e) => {
                            point_update_err(
                                store,
                                &point,
                                &e.to_string(),
                                MessageLevel::Fail,
                                FaultCode::PointError,
                            )
                            .await;
                            manager
                                .single_poll_finished(
                                    &token,
                                    Some(&mut point),
                                    elapsed(poll_start),
                                    false,
                                    false,
                                    false,
                                    RetryType::Delayed,
                                )
                                .await;
                            return;
                        },
                    }
                }
                read_success = true;
                manager.pq_polling(format!(
                    "READ-RESPONSE: value {read_value}, point: {}",
                    point.uuid
                ));
            },
            Err(e) => {
                point_update_err(
                    store,
                    &point,
                    &e.to_string(),
                    MessageLevel::Fail,
                    FaultCode::PointError,
                )
                .await;
                manager
                    .single_poll_finished(
                        &token,
                        Some(&mut point),
                        elapsed(poll_start),
                        false,
                        false,
                        false,
                        RetryType::Immediate,
                    )
                    .await;
                return;
            },
        }
    }

    // WRITE
    let mut write_success = false;
    let mut write_response_value = 0.0;
    if point.write_mode.is_writeable() && point.write_poll_required {
        if let Some(write_value) = point.write_value {
            if read_success {
                // keep the configured gap between the read and the write
                let gap = network
                    .max_poll_rate
                    .unwrap_or(READ_WRITE_GAP_FALLBACK_SECS);
                tokio::time::sleep(Duration::from_secs_f64(gap)).await;
            }

            let value_to_write = if bitwise {
                if !read_success || read_value.fract() != 0.0 {
                    point_update_err(
                        store,
                        &point,
                        "read fail: bitwise point needs successful read before write",
                        MessageLevel::Fail,
                        FaultCode::PointError,
                    )
                    .await;
                    manager
                        .single_poll_finished(
                            &token,
                            Some(&mut point),
                            elapsed(poll_start),
                            false,
                            false,
                            false,
                            RetryType::Delayed,
                        )
                        .await;
                    return;
                }
                let register = read_value as u64;
                let updated = if write_value > 0.0 {
                    codec::set_bit(register, bitwise_index)
                } else {
                    codec::clear_bit(register, bitwise_index)
                };
                updated as f64
            } else {
                write_value
            };

            match network_write(&mut client, &point, address, value_to_write).await {
                Ok((_raw, value)) => {
                    write_response_value = if bitwise {
                        if write_value > 0.0 {
                            1.0
                        } else {
                            0.0
                        }
                    } else {
                        value
                    };
                    write_success = true;
                    manager.pq_polling(format!(
                        "WRITE-RESPONSE: value {write_response_value}, point: {}",
                        point.uuid
                    ));
                },
                Err(e) => {
                    point_update_err(
                        store,
                        &point,
                        &e.to_string(),
                        MessageLevel::Fail,
                        FaultCode::PointWriteError,
                    )
                    .await;
                    manager
                        .single_poll_finished(
                            &token,
                            Some(&mut point),
                            elapsed(poll_start),
                            false,
                            false,
                            false,
                            RetryType::Immediate,
                        )
                        .await;
                    return;
                },
            }
        } else {
            // successful because there is no value to write; anything else
            // short-cycles the point
            write_success = true;
            debug!("write point {}: no value to write", point.uuid);
        }
    }
    drop(client);

    // the new observable value
    let new_value = if write_success && point.write_value.is_some() {
        write_response_value
    } else if read_success {
        if bitwise {
            bitwise_value
        } else {
            read_value
        }
    } else {
        point.present_value.unwrap_or_default()
    };

    // only push when a value was actually observed; a write that had no
    // value to send observes nothing
    let value_observed = read_success || (write_success && point.write_value.is_some());
    let is_change = point.present_value != Some(new_value);
    if is_change && value_observed {
        if let Ok(result) = store
            .point_write(
                point.uuid,
                &PointWriter {
                    original_value: Some(new_value),
                    message: Some(format!("last-updated: {}", chrono::Utc::now())),
                    fault: false,
                    poll_state: Some(poll_model::PointState::PollOk),
                    ..Default::default()
                },
            )
            .await
        {
            // carry the refreshed values into the completion hook
            point.original_value = result.point.original_value;
            point.present_value = result.point.present_value;
            point.common_fault = result.point.common_fault;
        }

        // give the user periodic feedback on how polling has been working
        let count = poll_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if count == 1 || count % 100 == 0 {
            let message = format!("last 100th poll: {}", chrono::Utc::now());
            update_network_message(store, &network, &message, None, poll_counter).await;
            if count > 100_000 {
                poll_counter.store(100, Ordering::SeqCst);
            }
            if let Ok(mut refreshed) = store.get_device(device.uuid, false).await {
                refreshed.message = message;
                refreshed.common_fault.set_ok(FaultCode::Ok, "");
                let _ = store.update_device(refreshed.uuid, refreshed).await;
            }
        }
    }

    manager
        .single_poll_finished(
            &token,
            Some(&mut point),
            elapsed(poll_start),
            write_success,
            read_success,
            false,
            RetryType::Normal,
        )
        .await;
}

/// Build the Modbus client for a network. Serial parameters come from the
/// network; a TCP client is aimed at a device endpoint on first use.
pub async fn create_client(network: &Network) -> Result<ModbusClient> {
    if network.transport_type.is_serial() {
        let defaults = SerialParams::default();
        let params = SerialParams {
            port: network
                .serial_port
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.port),
            baud_rate: network.serial_baud_rate.unwrap_or(defaults.baud_rate),
            data_bits: network.serial_data_bits.unwrap_or(defaults.data_bits),
            stop_bits: network.serial_stop_bits.unwrap_or(defaults.stop_bits),
            parity: network.serial_parity.clone().unwrap_or(defaults.parity),
        };
        let timeout = network
            .serial_timeout
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SERIAL_TIMEOUT);
        let mut client = ModbusClient::new(TransportTarget::Rtu(params), timeout);
        // probe the port now; an unopenable port pauses the manager
        client.connect().await?;
        Ok(client)
    } else {
        let host = network.host.clone().unwrap_or_default();
        let port = network.port.unwrap_or(502);
        Ok(ModbusClient::new(
            TransportTarget::Tcp { host, port },
            DEFAULT_SERIAL_TIMEOUT,
        ))
    }
}

/// Wire register address: `address_id - 1` unless the device is in zero
/// mode.
pub fn point_address(point: &Point, zero_mode: bool) -> u16 {
    let address = point.address_id.unwrap_or(1) as u16;
    if zero_mode {
        address
    } else {
        address.saturating_sub(1)
    }
}

/// Dispatch a read by object type and data type.
pub async fn network_read(
    client: &mut ModbusClient,
    point: &Point,
    address: u16,
) -> Result<(Vec<u8>, f64)> {
    let object_type = ObjectType::from_legacy(point.object_type.as_str());
    match object_type {
        ObjectType::Coil => client.read_coils(address, 1).await,
        ObjectType::DiscreteInput => client.read_discrete_inputs(address, 1).await,
        ObjectType::InputRegister => match point.data_type {
            DataType::Float32 => client.read_float32(address, RegisterType::Input).await,
            DataType::Float64 => client.read_float64(address, RegisterType::Input).await,
            data_type => {
                client
                    .read_input_registers(address, data_type.register_count(), data_type)
                    .await
            },
        },
        ObjectType::HoldingRegister => match point.data_type {
            DataType::Float32 => client.read_float32(address, RegisterType::Holding).await,
            DataType::Float64 => client.read_float64(address, RegisterType::Holding).await,
            data_type => {
                client
                    .read_holding_registers(address, data_type.register_count(), data_type)
                    .await
            },
        },
    }
}

/// Dispatch a write by object type and data type.
pub async fn network_write(
    client: &mut ModbusClient,
    point: &Point,
    address: u16,
    value: f64,
) -> Result<(Vec<u8>, f64)> {
    let object_type = ObjectType::from_legacy(point.object_type.as_str());
    match object_type {
        ObjectType::Coil => client.write_coil(address, value).await,
        ObjectType::HoldingRegister => match point.data_type {
            DataType::Uint16 | DataType::Int16 | DataType::Digital => {
                client.write_single_register(address, value as u16).await
            },
            DataType::Uint32 | DataType::Int32 => {
                client.write_double_register(address, value as u32).await
            },
            DataType::Uint64 | DataType::Int64 => {
                client.write_quad_register(address, value as u64).await
            },
            // 64-bit floats are written through the 32-bit path; devices
            // that accept float writes take 2-register payloads
            DataType::Float32 | DataType::Float64 => client.write_float32(address, value).await,
            DataType::Mod10U32 => Err(PollError::validation(
                "mod10_u32 points are read-only on the wire",
            )),
        },
        _ => Err(PollError::validation(format!(
            "object type {} is not writeable",
            object_type.as_str()
        ))),
    }
}

async fn point_update_err<S: Store>(
    store: &Arc<S>,
    point: &Point,
    message: &str,
    level: MessageLevel,
    code: FaultCode,
) {
    let mut fault = point.common_fault.clone();
    fault.set_fail(level, code, format!("modbus: {message}"));
    if let Err(e) = store.update_point_errors(point.uuid, &fault).await {
        error!("failed to update point errors for {}: {e}", point.uuid);
    }
}

async fn device_update_err<S: Store>(
    store: &Arc<S>,
    device_uuid: &Uuid,
    message: &str,
    level: MessageLevel,
    code: FaultCode,
) {
    let mut fault = poll_model::CommonFault::default();
    fault.set_fail(level, code, format!("modbus: {message}"));
    if let Err(e) = store.update_device_errors(*device_uuid, &fault).await {
        error!("failed to update device errors for {device_uuid}: {e}");
    }
}

/// Annotate the network: a message refreshes `last_ok`, an error records a
/// network fault.
async fn update_network_message<S: Store>(
    store: &Arc<S>,
    network: &Network,
    message: &str,
    error: Option<&PollError>,
    poll_counter: &Arc<AtomicI64>,
) {
    let mut fault = network.common_fault.clone();
    match error {
        Some(e) => fault.set_fail(
            MessageLevel::Fail,
            FaultCode::NetworkError,
            e.to_string(),
        ),
        None => fault.set_ok(
            FaultCode::Ok,
            format!(
                "{message} poll count: {}",
                poll_counter.load(Ordering::SeqCst)
            ),
        ),
    }
    if let Err(e) = store.update_network_errors(network.uuid, &fault).await {
        error!("failed to update network {}: {e}", network.uuid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poll_model::TransportType;

    #[test]
    fn wire_address_honors_zero_mode() {
        let point = Point {
            address_id: Some(1),
            ..Point::default()
        };
        assert_eq!(point_address(&point, false), 0);
        assert_eq!(point_address(&point, true), 1);

        let point = Point {
            address_id: Some(100),
            ..Point::default()
        };
        assert_eq!(point_address(&point, false), 99);
        assert_eq!(point_address(&point, true), 100);
    }

    #[tokio::test]
    async fn tcp_client_for_ip_network() {
        let network = Network {
            transport_type: TransportType::Ip,
            host: Some("127.0.0.1".into()),
            port: Some(1502),
            ..Network::default()
        };
        let client = create_client(&network).await.unwrap();
        assert!(!client.is_serial());
    }

    #[tokio::test]
    async fn serial_client_for_missing_port_is_transport_unavailable() {
        let network = Network {
            transport_type: TransportType::Serial,
            serial_port: Some("/dev/definitely-not-a-port".into()),
            ..Network::default()
        };
        let err = create_client(&network).await.unwrap_err();
        assert!(err.is_transport_unavailable());
    }
}
