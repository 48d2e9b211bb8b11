use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{BDAddr, Central, Peripheral as _, ScanFilter};
use btleplug::platform::Adapter;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use types::DeviceAddress;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// How long advertisements are collected before matching names.
    pub scan_duration_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_duration_ms: 5_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("bluetooth scan failed: {0}")]
    Scan(#[from] btleplug::Error),
}

/// Resolves an advertised device name to its address.
///
/// `Ok(None)` means the scan completed and nothing matched; `Err` means the
/// scan itself failed.
#[async_trait]
pub trait DeviceFinder: Send + Sync {
    async fn find(&self, name: &str) -> Result<Option<DeviceAddress>, DiscoveryError>;
}

/// Scan-and-match lookup on a bluetooth adapter.
#[derive(Debug, Clone)]
pub struct BleScanner {
    adapter: Adapter,
    config: DiscoveryConfig,
}

impl BleScanner {
    pub fn new(adapter: Adapter, config: DiscoveryConfig) -> Self {
        Self { adapter, config }
    }

    async fn advertised_names(&self) -> Result<HashMap<String, DeviceAddress>, DiscoveryError> {
        let mut names = HashMap::new();
        for peripheral in self.adapter.peripherals().await? {
            let properties = match peripheral.properties().await {
                Ok(Some(properties)) => properties,
                Ok(None) => continue,
                Err(err) => {
                    debug!(error = %err, "peripheral properties unavailable");
                    continue;
                }
            };
            let Some(name) = properties.local_name else {
                continue;
            };
            match advertised_address(properties.address) {
                Some(address) => {
                    names.insert(name, address);
                }
                None => debug!(device = %name, "peripheral has no usable address"),
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl DeviceFinder for BleScanner {
    async fn find(&self, name: &str) -> Result<Option<DeviceAddress>, DiscoveryError> {
        info!(device = %name, "scanning for device address");
        self.adapter.start_scan(ScanFilter::default()).await?;
        sleep(Duration::from_millis(self.config.scan_duration_ms)).await;
        let names = self.advertised_names().await;
        if let Err(err) = self.adapter.stop_scan().await {
            warn!(error = %err, "stop scan failed");
        }

        let names = names?;
        let address = match_name(&names, name);
        match &address {
            Some(address) => info!(device = %name, address = %address, "device found"),
            None => warn!(device = %name, seen = names.len(), "cant find the device"),
        }
        Ok(address)
    }
}

/// CoreBluetooth hides hardware addresses and reports all zeros, which would
/// match any peripheral later on.
fn advertised_address(address: BDAddr) -> Option<DeviceAddress> {
    (address != BDAddr::from([0; 6])).then(|| DeviceAddress::new(address.to_string()))
}

fn match_name(names: &HashMap<String, DeviceAddress>, name: &str) -> Option<DeviceAddress> {
    names.get(name).cloned()
}
