use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;

use ble_client::ClientConfig;
use daylight::Location;
use discovery::DiscoveryConfig;
use mqtt_publisher::MqttConfig;
use poller::{PollConfig, SessionConfig};

const DEFAULT_SUNRISE_OFFSET_DAYS: u64 = 1;

#[derive(Clone, Debug)]
pub struct LocationConfig {
    pub city: String,
    pub region: String,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Days ahead of today whose sunrise ends a night pause.
    pub sunrise_offset_days: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            city: "Greenwich".to_string(),
            region: "England".to_string(),
            timezone: "UTC".to_string(),
            latitude: 51.4769,
            longitude: 0.0,
            sunrise_offset_days: DEFAULT_SUNRISE_OFFSET_DAYS,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CollectorConfig {
    pub poller: PollConfig,
    pub session: SessionConfig,
    pub discovery: DiscoveryConfig,
    pub link: ClientConfig,
    pub location: LocationConfig,
    /// Broker host; without one, records are only logged.
    pub mqtt_host: Option<String>,
    pub mqtt: MqttConfig,
    pub metrics_addr: Option<String>,
}

impl CollectorConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poller.device_name.trim().is_empty() {
            anyhow::bail!("device.name must be non-empty");
        }
        if self.poller.poll_interval.is_zero() {
            anyhow::bail!("device.poll_interval_ms must be >= 1");
        }
        if self.session.settle_delay.is_zero() {
            anyhow::bail!("device.settle_delay_ms must be >= 1");
        }
        if self.discovery.scan_duration_ms == 0 {
            anyhow::bail!("discovery.scan_duration_ms must be >= 1");
        }
        if self.link.connect_timeout_ms == 0 {
            anyhow::bail!("link.connect_timeout_ms must be >= 1");
        }
        if self.link.request_timeout_ms == 0 {
            anyhow::bail!("link.request_timeout_ms must be >= 1");
        }
        if self.link.rescan_duration_ms == 0 {
            anyhow::bail!("link.rescan_duration_ms must be >= 1");
        }
        if !(-90.0..=90.0).contains(&self.location.latitude) {
            anyhow::bail!("location.latitude must be between -90 and 90");
        }
        if !(-180.0..=180.0).contains(&self.location.longitude) {
            anyhow::bail!("location.longitude must be between -180 and 180");
        }
        self.timezone()?;
        if self.location.sunrise_offset_days == 0 {
            anyhow::bail!("location.sunrise_offset_days must be >= 1");
        }
        if let Some(ref host) = self.mqtt_host {
            if host.trim().is_empty() {
                anyhow::bail!("mqtt.host must be non-empty when set");
            }
        }
        if self.mqtt.port == 0 {
            anyhow::bail!("mqtt.port must be between 1 and 65535");
        }
        if self.mqtt.keepalive_secs == 0 {
            anyhow::bail!("mqtt.keepalive_s must be >= 1");
        }
        if self.mqtt.client_id.trim().is_empty() {
            anyhow::bail!("mqtt.client_id must be non-empty");
        }
        if let Some(ref addr) = self.metrics_addr {
            addr.parse::<SocketAddr>()
                .map_err(|_| anyhow::anyhow!("metrics.addr must be a socket address (e.g. 0.0.0.0:9898)"))?;
        }

        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.location
            .timezone
            .parse::<Tz>()
            .map_err(|_| anyhow::anyhow!("location.timezone {:?} is not an IANA zone", self.location.timezone))
    }

    pub fn location(&self) -> Result<Location> {
        Ok(Location {
            city: self.location.city.clone(),
            region: self.location.region.clone(),
            timezone: self.timezone()?,
            latitude: self.location.latitude,
            longitude: self.location.longitude,
        })
    }

    /// Broker settings, or `None` when no host is configured.
    pub fn mqtt_config(&self) -> Option<MqttConfig> {
        let host = self.mqtt_host.clone()?;
        Some(MqttConfig {
            host,
            ..self.mqtt.clone()
        })
    }
}

fn apply_env_overrides(config: &mut CollectorConfig) {
    if let Ok(value) = env::var("SOLAR_DEVICE_NAME") {
        config.poller.device_name = value;
    }

    if let Some(interval_ms) = parse_env_u64("SOLAR_POLL_INTERVAL_MS") {
        config.poller.poll_interval = Duration::from_millis(interval_ms);
    }

    if let Some(delay_ms) = parse_env_u64("SOLAR_SETTLE_DELAY_MS") {
        config.session.settle_delay = Duration::from_millis(delay_ms);
    }

    if let Some(scan_ms) = parse_env_u64("SOLAR_SCAN_DURATION_MS") {
        config.discovery.scan_duration_ms = scan_ms;
        config.link.rescan_duration_ms = scan_ms;
    }

    if let Some(timeout_ms) = parse_env_u64("SOLAR_CONNECT_TIMEOUT_MS") {
        config.link.connect_timeout_ms = timeout_ms;
    }

    if let Ok(value) = env::var("SOLAR_CITY") {
        config.location.city = value;
    }
    if let Ok(value) = env::var("SOLAR_REGION") {
        config.location.region = value;
    }
    if let Ok(value) = env::var("SOLAR_TIMEZONE") {
        config.location.timezone = value;
    }
    config.location.latitude = parse_env_f64("SOLAR_LATITUDE").unwrap_or(config.location.latitude);
    config.location.longitude =
        parse_env_f64("SOLAR_LONGITUDE").unwrap_or(config.location.longitude);
    config.location.sunrise_offset_days = parse_env_u64("SOLAR_SUNRISE_OFFSET_DAYS")
        .unwrap_or(config.location.sunrise_offset_days);

    config.mqtt_host = env::var("SOLAR_MQTT_HOST").ok().or(config.mqtt_host.take());
    config.mqtt.port = parse_env_u16("SOLAR_MQTT_PORT").unwrap_or(config.mqtt.port);
    config.mqtt.username = env::var("SOLAR_MQTT_USERNAME").ok().or(config.mqtt.username.take());
    config.mqtt.password = env::var("SOLAR_MQTT_PASSWORD").ok().or(config.mqtt.password.take());
    if let Ok(value) = env::var("SOLAR_MQTT_CLIENT_ID") {
        config.mqtt.client_id = value;
    }
    config.mqtt.keepalive_secs =
        parse_env_u64("SOLAR_MQTT_KEEPALIVE_S").unwrap_or(config.mqtt.keepalive_secs);

    config.metrics_addr = env::var("SOLAR_METRICS_ADDR").ok().or(config.metrics_addr.take());
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    device: Option<FileDeviceConfig>,
    discovery: Option<FileDiscoveryConfig>,
    link: Option<FileLinkConfig>,
    location: Option<FileLocationConfig>,
    mqtt: Option<FileMqttConfig>,
    metrics: Option<FileMetricsConfig>,
}

#[derive(Debug, Deserialize)]
struct FileDeviceConfig {
    name: Option<String>,
    poll_interval_ms: Option<u64>,
    settle_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileDiscoveryConfig {
    scan_duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileLinkConfig {
    connect_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    rescan_duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileLocationConfig {
    city: Option<String>,
    region: Option<String>,
    timezone: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    sunrise_offset_days: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileMqttConfig {
    host: Option<String>,
    port: Option<u16>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    keepalive_s: Option<u64>,
    connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileMetricsConfig {
    addr: Option<String>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("SOLAR_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut CollectorConfig, file: FileConfig) {
    if let Some(device) = file.device {
        if let Some(name) = device.name {
            config.poller.device_name = name;
        }
        if let Some(interval_ms) = device.poll_interval_ms {
            config.poller.poll_interval = Duration::from_millis(interval_ms);
        }
        if let Some(delay_ms) = device.settle_delay_ms {
            config.session.settle_delay = Duration::from_millis(delay_ms);
        }
    }

    if let Some(discovery) = file.discovery {
        if let Some(scan_ms) = discovery.scan_duration_ms {
            config.discovery.scan_duration_ms = scan_ms;
        }
    }

    if let Some(link) = file.link {
        if let Some(timeout_ms) = link.connect_timeout_ms {
            config.link.connect_timeout_ms = timeout_ms;
        }
        if let Some(timeout_ms) = link.request_timeout_ms {
            config.link.request_timeout_ms = timeout_ms;
        }
        if let Some(rescan_ms) = link.rescan_duration_ms {
            config.link.rescan_duration_ms = rescan_ms;
        }
    }

    if let Some(location) = file.location {
        if let Some(city) = location.city {
            config.location.city = city;
        }
        if let Some(region) = location.region {
            config.location.region = region;
        }
        if let Some(timezone) = location.timezone {
            config.location.timezone = timezone;
        }
        if let Some(latitude) = location.latitude {
            config.location.latitude = latitude;
        }
        if let Some(longitude) = location.longitude {
            config.location.longitude = longitude;
        }
        if let Some(days) = location.sunrise_offset_days {
            config.location.sunrise_offset_days = days;
        }
    }

    if let Some(mqtt) = file.mqtt {
        if let Some(host) = mqtt.host {
            config.mqtt_host = Some(host);
        }
        if let Some(port) = mqtt.port {
            config.mqtt.port = port;
        }
        if let Some(client_id) = mqtt.client_id {
            config.mqtt.client_id = client_id;
        }
        if let Some(username) = mqtt.username {
            config.mqtt.username = Some(username);
        }
        if let Some(password) = mqtt.password {
            config.mqtt.password = Some(password);
        }
        if let Some(keepalive) = mqtt.keepalive_s {
            config.mqtt.keepalive_secs = keepalive;
        }
        if let Some(timeout_ms) = mqtt.connect_timeout_ms {
            config.mqtt.connect_timeout_ms = timeout_ms;
        }
    }

    if let Some(metrics) = file.metrics {
        config.metrics_addr = metrics.addr.or(config.metrics_addr.take());
    }
}

fn parse_env_u16(key: &str) -> Option<u16> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_f64(key: &str) -> Option<f64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}
