//! Transport connections
//!
//! Async TCP and serial streams with connect and transaction timeouts. RTU
//! receive uses an inter-byte timeout to find the end of a frame; TCP reads
//! the MBAP header first and then the exact remainder.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};

use super::frame::MBAP_HEADER_LEN;
use crate::error::{PollError, Result};

/// Serial connect/transaction timeout applied when the network configures
/// none.
pub const DEFAULT_SERIAL_TIMEOUT: Duration = Duration::from_secs(2);

const INTER_BYTE_TIMEOUT: Duration = Duration::from_millis(50);
const RECEIVE_BUFFER_SIZE: usize = 512;

/// Serial line parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialParams {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: String,
}

impl Default for SerialParams {
    fn default() -> Self {
        SerialParams {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 38400,
            data_bits: 8,
            stop_bits: 1,
            parity: "none".to_string(),
        }
    }
}

/// An open transport connection.
#[derive(Debug)]
pub enum ModbusConnection {
    Tcp(TcpStream),
    Rtu(SerialStream),
}

impl ModbusConnection {
    /// Open a TCP connection.
    pub async fn connect_tcp(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        debug!("TCP connecting: {}", addr);

        match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                debug!("TCP connected: {}", addr);
                Ok(ModbusConnection::Tcp(stream))
            },
            Ok(Err(e)) => Err(PollError::connection(format!(
                "failed to connect to {addr}: {e}"
            ))),
            Err(_) => Err(PollError::timeout(format!("connection to {addr} timed out"))),
        }
    }

    /// Open a serial port. Failure here is the transport-unavailable class
    /// that pauses the owning poll manager.
    pub fn connect_rtu(params: &SerialParams, port_timeout: Duration) -> Result<Self> {
        debug!("RTU opening: {} @{}baud", params.port, params.baud_rate);

        let parity = match params.parity.to_ascii_lowercase().as_str() {
            "even" | "e" => tokio_serial::Parity::Even,
            "odd" | "o" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        };
        let data_bits = match params.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let stop_bits = match params.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        match tokio_serial::new(&params.port, params.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(port_timeout)
            .open_native_async()
        {
            Ok(stream) => {
                debug!("RTU opened: {}", params.port);
                Ok(ModbusConnection::Rtu(stream))
            },
            Err(e) => {
                warn!("RTU open failed: {} - {}", params.port, e);
                Err(PollError::TransportUnavailable(format!(
                    "failed to open serial port {}: {e}",
                    params.port
                )))
            },
        }
    }

    /// Send a complete frame.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            ModbusConnection::Tcp(stream) => {
                stream
                    .write_all(data)
                    .await
                    .map_err(|e| PollError::io(format!("TCP send error: {e}")))?;
            },
            ModbusConnection::Rtu(port) => {
                port.write_all(data)
                    .await
                    .map_err(|e| PollError::io(format!("serial send error: {e}")))?;
                port.flush()
                    .await
                    .map_err(|e| PollError::io(format!("serial flush error: {e}")))?;
            },
        }
        debug!("TX: {}B", data.len());
        Ok(())
    }

    /// Receive one complete response frame.
    pub async fn receive(&mut self, transaction_timeout: Duration) -> Result<Vec<u8>> {
        match self {
            ModbusConnection::Tcp(stream) => {
                let mut header = [0u8; MBAP_HEADER_LEN];
                timeout(transaction_timeout, stream.read_exact(&mut header))
                    .await
                    .map_err(|_| PollError::timeout("TCP header read timeout"))?
                    .map_err(|e| PollError::io(format!("TCP header read error: {e}")))?;

                let length = u16::from_be_bytes([header[4], header[5]]) as usize;
                if length == 0 || length > RECEIVE_BUFFER_SIZE - MBAP_HEADER_LEN {
                    return Err(PollError::protocol(format!(
                        "invalid TCP frame length: {length}"
                    )));
                }

                let mut frame = vec![0u8; MBAP_HEADER_LEN + length];
                frame[..MBAP_HEADER_LEN].copy_from_slice(&header);
                timeout(
                    transaction_timeout,
                    stream.read_exact(&mut frame[MBAP_HEADER_LEN..]),
                )
                .await
                .map_err(|_| PollError::timeout("TCP body read timeout"))?
                .map_err(|e| PollError::io(format!("TCP body read error: {e}")))?;

                debug!("TCP RX: {}B", frame.len());
                Ok(frame)
            },
            ModbusConnection::Rtu(port) => {
                let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
                let mut total = 0usize;
                let start = tokio::time::Instant::now();

                loop {
                    if start.elapsed() >= transaction_timeout {
                        if total < 4 {
                            return Err(PollError::timeout("RTU frame incomplete: total timeout"));
                        }
                        break;
                    }

                    match timeout(INTER_BYTE_TIMEOUT, port.read(&mut buffer[total..])).await {
                        Ok(Ok(0)) => {
                            return Err(PollError::connection("serial connection closed"));
                        },
                        Ok(Ok(n)) => {
                            total += n;
                            if total >= buffer.len() {
                                return Err(PollError::protocol("RTU frame exceeds buffer size"));
                            }
                        },
                        Ok(Err(e)) => {
                            return Err(PollError::io(format!("serial read error: {e}")));
                        },
                        Err(_) => {
                            // inter-byte gap: frame complete once we have
                            // the minimum unit + FC + CRC
                            if total >= 4 {
                                break;
                            }
                            if total > 0 {
                                return Err(PollError::timeout(
                                    "RTU frame incomplete: inter-byte timeout",
                                ));
                            }
                        },
                    }
                }

                debug!("RTU RX: {}B", total);
                Ok(buffer[..total].to_vec())
            },
        }
    }
}
