//! Link transport to the inverter's wireless module.
//!
//! The session logic talks to [`LinkTransport`] and [`LinkConnection`]; the
//! btleplug-backed [`BleLink`] is the production implementation.

mod btle;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;
use types::DeviceAddress;
use uuid::Uuid;

pub use btle::{default_adapter, BleConnection, BleLink};

/// Characteristic the request commands are written to.
pub const WRITE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ff11_0000_1000_8000_00805f9b34fb);
/// Characteristic the device streams its responses on.
pub const NOTIFY_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ff12_0000_1000_8000_00805f9b34fb);

/// A fixed request payload and the characteristic it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub name: &'static str,
    pub payload: &'static [u8],
    pub characteristic: Uuid,
}

impl Command {
    pub fn payload_hex(&self) -> String {
        hex::encode(self.payload)
    }
}

/// Reads 29 holding registers from 0x1021: E-Today, E-Total, peak and active power.
pub const REQ_ETODAY: Command = Command {
    name: "REQ_ETODAY",
    payload: &[0x01, 0x03, 0x10, 0x21, 0x00, 0x1D, 0xD1, 0x09],
    characteristic: WRITE_CHARACTERISTIC,
};

/// Reads 32 holding registers from 0x1001: solar input, inverter power, grid values.
pub const REQ_SI: Command = Command {
    name: "REQ_SI",
    payload: &[0x01, 0x03, 0x10, 0x01, 0x00, 0x20, 0x11, 0x12],
    characteristic: WRITE_CHARACTERISTIC,
};

/// Commands in the order the response slots expect them: energy first, power second.
pub const REQUEST_SEQUENCE: [Command; 2] = [REQ_ETODAY, REQ_SI];

/// Raw notification payloads from the subscribed characteristic.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Connection options for the wireless link.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound for connecting and discovering services, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-operation timeout for subscribe, write and unsubscribe.
    pub request_timeout_ms: u64,
    /// How long to scan when the cached address is not among known peripherals.
    pub rescan_duration_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            request_timeout_ms: 5_000,
            rescan_duration_ms: 5_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no bluetooth adapter available")]
    NoAdapter,
    #[error("peripheral {0} not in range")]
    PeripheralNotFound(DeviceAddress),
    #[error("characteristic {uuid} not found")]
    CharacteristicNotFound { uuid: Uuid },
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: Operation,
        timeout_ms: u64,
    },
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Subscribe,
    Write,
    Unsubscribe,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Connect => "connect",
            Operation::Subscribe => "subscribe",
            Operation::Write => "write",
            Operation::Unsubscribe => "unsubscribe",
        };
        f.write_str(name)
    }
}

/// Opens connections to a device address.
#[async_trait]
pub trait LinkTransport: Send + Sync {
    async fn connect(&self, address: &DeviceAddress)
        -> Result<Box<dyn LinkConnection>, ClientError>;
}

/// One open connection. Dropped connections are not guaranteed to be closed.
#[async_trait]
pub trait LinkConnection: Send {
    async fn subscribe(&mut self, characteristic: Uuid) -> Result<NotificationStream, ClientError>;

    async fn write(&mut self, characteristic: Uuid, payload: &[u8]) -> Result<(), ClientError>;

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), ClientError>;

    async fn close(&mut self);
}
