use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{future, StreamExt};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use types::DeviceAddress;
use uuid::Uuid;

use crate::{ClientConfig, ClientError, LinkConnection, LinkTransport, NotificationStream, Operation};

/// Returns the first bluetooth adapter of the host.
pub async fn default_adapter() -> Result<Adapter, ClientError> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(ClientError::NoAdapter)
}

#[derive(Debug, Clone)]
pub struct BleLink {
    adapter: Adapter,
    config: ClientConfig,
}

impl BleLink {
    pub fn new(adapter: Adapter, config: ClientConfig) -> Self {
        Self { adapter, config }
    }

    async fn locate(&self, address: &DeviceAddress) -> Result<Peripheral, ClientError> {
        if let Some(peripheral) = self.known_peripheral(address).await? {
            return Ok(peripheral);
        }

        debug!(address = %address, "peripheral not cached by adapter, rescanning");
        self.adapter.start_scan(ScanFilter::default()).await?;
        sleep(Duration::from_millis(self.config.rescan_duration_ms)).await;
        let found = self.known_peripheral(address).await;
        if let Err(err) = self.adapter.stop_scan().await {
            warn!(error = %err, "stop scan failed");
        }

        found?.ok_or_else(|| ClientError::PeripheralNotFound(address.clone()))
    }

    async fn known_peripheral(&self, address: &DeviceAddress) -> Result<Option<Peripheral>, ClientError> {
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals
            .into_iter()
            .find(|peripheral| address.matches(&peripheral.address().to_string())))
    }
}

#[async_trait]
impl LinkTransport for BleLink {
    async fn connect(
        &self,
        address: &DeviceAddress,
    ) -> Result<Box<dyn LinkConnection>, ClientError> {
        let peripheral = self.locate(address).await?;
        let connect_timeout = self.config.connect_timeout_ms;

        with_timeout(Operation::Connect, connect_timeout, peripheral.connect()).await?;
        let connected = peripheral.is_connected().await.unwrap_or(false);
        info!(address = %address, connected, "connected");

        if let Err(err) =
            with_timeout(Operation::Connect, connect_timeout, peripheral.discover_services()).await
        {
            if let Err(disconnect_err) = peripheral.disconnect().await {
                warn!(address = %address, error = %disconnect_err, "disconnect failed");
            }
            return Err(err);
        }

        Ok(Box::new(BleConnection {
            peripheral,
            request_timeout_ms: self.config.request_timeout_ms,
        }))
    }
}

#[derive(Debug)]
pub struct BleConnection {
    peripheral: Peripheral,
    request_timeout_ms: u64,
}

impl BleConnection {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, ClientError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .ok_or(ClientError::CharacteristicNotFound { uuid })
    }
}

#[async_trait]
impl LinkConnection for BleConnection {
    async fn subscribe(&mut self, characteristic: Uuid) -> Result<NotificationStream, ClientError> {
        let target = self.characteristic(characteristic)?;
        let notifications = self.peripheral.notifications().await?;
        with_timeout(
            Operation::Subscribe,
            self.request_timeout_ms,
            self.peripheral.subscribe(&target),
        )
        .await?;

        let stream = notifications
            .filter_map(move |notification| {
                future::ready((notification.uuid == characteristic).then_some(notification.value))
            })
            .fuse();
        Ok(Box::pin(stream))
    }

    async fn write(&mut self, characteristic: Uuid, payload: &[u8]) -> Result<(), ClientError> {
        let target = self.characteristic(characteristic)?;
        let write_type = if target.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        with_timeout(
            Operation::Write,
            self.request_timeout_ms,
            self.peripheral.write(&target, payload, write_type),
        )
        .await
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), ClientError> {
        let target = self.characteristic(characteristic)?;
        with_timeout(
            Operation::Unsubscribe,
            self.request_timeout_ms,
            self.peripheral.unsubscribe(&target),
        )
        .await
    }

    async fn close(&mut self) {
        if let Err(err) = self.peripheral.disconnect().await {
            warn!(error = %err, "disconnect failed");
        }
    }
}

async fn with_timeout<F>(operation: Operation, timeout_ms: u64, request: F) -> Result<(), ClientError>
where
    F: Future<Output = Result<(), btleplug::Error>>,
{
    match timeout(Duration::from_millis(timeout_ms), request).await {
        Ok(result) => result.map_err(ClientError::from),
        Err(_) => Err(ClientError::Timeout {
            operation,
            timeout_ms,
        }),
    }
}
