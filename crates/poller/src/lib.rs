//! Device session and the poll loop that drives it.

mod session;

use std::time::Duration;

use daylight::DaylightScheduler;
use discovery::DeviceFinder;
use frame_decoder::FrameSlots;
use metrics::counter;
use mqtt_publisher::{serialize_record, PublishTransport, QoS, TOPIC};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};
use types::{DeviceAddress, MeasurementRecord};

pub use session::{DeviceSession, SessionConfig, SessionError, SessionState};

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Advertised name of the inverter's wireless module.
    pub device_name: String,
    /// Pause after each published record.
    pub poll_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            device_name: "BLE1295".to_string(),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// State carried across iterations of the poll loop.
#[derive(Debug, Default)]
pub struct PollContext {
    /// Resolved once and kept until the process exits.
    address: Option<DeviceAddress>,
    slots: FrameSlots,
}

impl PollContext {
    pub fn address(&self) -> Option<&DeviceAddress> {
        self.address.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Published(MeasurementRecord),
    /// Discovery found nothing or failed; `paused` is the night sleep, if any.
    Unresolved { paused: Option<Duration> },
    SessionFailed { paused: Option<Duration> },
}

/// Repeats device sessions forever and forwards every decoded record to the broker.
pub struct PollLoop {
    config: PollConfig,
    finder: Box<dyn DeviceFinder>,
    session: DeviceSession,
    publisher: Box<dyn PublishTransport>,
    scheduler: DaylightScheduler,
    context: PollContext,
}

impl PollLoop {
    pub fn new(
        config: PollConfig,
        finder: Box<dyn DeviceFinder>,
        session: DeviceSession,
        publisher: Box<dyn PublishTransport>,
        scheduler: DaylightScheduler,
    ) -> Self {
        Self {
            config,
            finder,
            session,
            publisher,
            scheduler,
            context: PollContext::default(),
        }
    }

    pub fn context(&self) -> &PollContext {
        &self.context
    }

    /// Polls until `shutdown` flips to true. Failures never end the loop.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut iteration = 0u64;
        loop {
            if *shutdown.borrow() {
                info!(device = %self.config.device_name, "poller shutdown requested");
                break;
            }

            tokio::select! {
                outcome = self.poll_once() => {
                    iteration = iteration.wrapping_add(1);
                    log_outcome(iteration, &outcome);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(device = %self.config.device_name, "poller shutdown requested");
                        break;
                    }
                }
            }
        }
    }

    /// One iteration: repair the broker link, resolve the device, run a
    /// session, then either publish and wait the poll interval or consult the
    /// daylight scheduler.
    pub async fn poll_once(&mut self) -> PollOutcome {
        self.ensure_publisher().await;

        let Some(address) = self.resolve_address().await else {
            let paused = self.pause_if_dark().await;
            return PollOutcome::Unresolved { paused };
        };

        match self.session.run(&address, &mut self.context.slots).await {
            Ok(record) => {
                counter!("solar_sessions_total", "outcome" => "success").increment(1);
                self.publish(&record).await;
                sleep(self.config.poll_interval).await;
                PollOutcome::Published(record)
            }
            Err(err) => {
                counter!("solar_sessions_total", "outcome" => "failure").increment(1);
                warn!(address = %address, error = %err, "session failed");
                let paused = self.pause_if_dark().await;
                PollOutcome::SessionFailed { paused }
            }
        }
    }

    async fn ensure_publisher(&mut self) {
        if self.publisher.is_connected() {
            return;
        }
        warn!("publish transport disconnected, reconnecting");
        if let Err(err) = self.publisher.reconnect().await {
            warn!(error = %err, "publish transport reconnect failed");
        }
    }

    async fn resolve_address(&mut self) -> Option<DeviceAddress> {
        if let Some(address) = &self.context.address {
            return Some(address.clone());
        }

        info!(device = %self.config.device_name, "trying to find address for device");
        match self.finder.find(&self.config.device_name).await {
            Ok(Some(address)) => {
                self.context.address = Some(address.clone());
                Some(address)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(device = %self.config.device_name, error = %err, "error finding address");
                None
            }
        }
    }

    async fn publish(&self, record: &MeasurementRecord) {
        let payload = match serialize_record(record) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "record serialization failed");
                return;
            }
        };

        match self.publisher.publish(TOPIC, payload, QoS::AtMostOnce).await {
            Ok(()) => {
                counter!("solar_publish_total", "outcome" => "success").increment(1);
                if record.is_empty() {
                    info!(topic = TOPIC, "no data to print");
                } else {
                    info!(topic = TOPIC, record = ?record, "published");
                }
            }
            Err(err) => {
                counter!("solar_publish_total", "outcome" => "failure").increment(1);
                warn!(topic = TOPIC, error = %err, "publish failed");
            }
        }
    }

    async fn pause_if_dark(&self) -> Option<Duration> {
        let paused = self.scheduler.pause_if_dark().await;
        if paused.is_some() {
            counter!("solar_night_pauses_total").increment(1);
        }
        paused
    }
}

fn log_outcome(iteration: u64, outcome: &PollOutcome) {
    match outcome {
        PollOutcome::Published(_) => info!(iteration, "poll cycle complete"),
        PollOutcome::Unresolved { paused } => info!(
            iteration,
            paused_s = paused.map(|duration| duration.as_secs()),
            "device unresolved, retrying"
        ),
        PollOutcome::SessionFailed { paused } => info!(
            iteration,
            paused_s = paused.map(|duration| duration.as_secs()),
            "session failed, retrying"
        ),
    }
}
