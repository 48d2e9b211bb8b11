#![allow(dead_code)]

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use ble_client::{
    ClientError, LinkConnection, LinkTransport, NotificationStream, Operation, REQ_ETODAY,
    REQ_SI,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use daylight::{Clock, DaylightScheduler, Location, SunCalculator, SunTimes};
use discovery::{DeviceFinder, DiscoveryError};
use futures::channel::mpsc;
use futures::{ready, Stream};
use mqtt_publisher::{PublishError, PublishTransport, QoS};
use poller::{DeviceSession, PollConfig, PollLoop, SessionConfig};
use types::DeviceAddress;
use uuid::Uuid;

pub const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";
pub const DEVICE_NAME: &str = "BLE1295";

pub const ENERGY_FRAME: &str = "01033a11113039111111111111111111110d05111111111111111111111111111111111111111111111111111111111111\
0fa011111111111113881111eaff";
pub const POWER_FRAME: &str = "010340091001f411112710111111111111111111111111111111111111111111111111111111110bb8111111111111111111\
11111111111111112a11111111111111112cad";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Find(String),
    Connect(String),
    Subscribe,
    Write(String),
    Unsubscribe,
    Close,
    Reconnect,
    Publish(String),
}

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().expect("call log").push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().expect("call log").clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    pub fn position(&self, predicate: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(predicate)
    }
}

/// Scripted link: each written payload is answered with the configured fragments.
#[derive(Clone, Default)]
pub struct MockLink {
    pub log: CallLog,
    pub responses: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    pub fail_connect: bool,
    pub fail_subscribe: bool,
    pub fail_write: bool,
    /// Drops the notification sender once the first response has been sent.
    pub end_stream_after_first_write: bool,
    pub unsubscribe_failures: Arc<AtomicUsize>,
}

impl MockLink {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Answers both requests with complete frames, each split into `pieces` notifications.
    pub fn answering(log: CallLog, pieces: usize) -> Self {
        let mut link = Self::new(log);
        link.respond(REQ_ETODAY.payload, ENERGY_FRAME, pieces);
        link.respond(REQ_SI.payload, POWER_FRAME, pieces);
        link
    }

    pub fn respond(&mut self, command: &[u8], frame: &str, pieces: usize) {
        let bytes = hex::decode(frame).expect("frame hex");
        let size = bytes.len().div_ceil(pieces.max(1));
        let fragments = bytes.chunks(size).map(<[u8]>::to_vec).collect();
        self.responses.insert(command.to_vec(), fragments);
    }

    pub fn fail_unsubscribe_times(&self, times: usize) {
        self.unsubscribe_failures.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl LinkTransport for MockLink {
    async fn connect(
        &self,
        address: &DeviceAddress,
    ) -> Result<Box<dyn LinkConnection>, ClientError> {
        self.log.push(Call::Connect(address.to_string()));
        if self.fail_connect {
            return Err(ClientError::PeripheralNotFound(address.clone()));
        }
        Ok(Box::new(MockConnection {
            link: self.clone(),
            sender: None,
        }))
    }
}

struct MockConnection {
    link: MockLink,
    sender: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl LinkConnection for MockConnection {
    async fn subscribe(&mut self, characteristic: Uuid) -> Result<NotificationStream, ClientError> {
        self.link.log.push(Call::Subscribe);
        if self.link.fail_subscribe {
            return Err(ClientError::CharacteristicNotFound {
                uuid: characteristic,
            });
        }
        let (tx, rx) = mpsc::unbounded();
        self.sender = Some(tx);
        Ok(Box::pin(EndOnce {
            inner: rx,
            ended: false,
        }))
    }

    async fn write(&mut self, _characteristic: Uuid, payload: &[u8]) -> Result<(), ClientError> {
        self.link.log.push(Call::Write(hex::encode(payload)));
        if self.link.fail_write {
            return Err(ClientError::Timeout {
                operation: Operation::Write,
                timeout_ms: 5_000,
            });
        }
        if let (Some(sender), Some(fragments)) = (&self.sender, self.link.responses.get(payload)) {
            for fragment in fragments {
                let _ = sender.unbounded_send(fragment.clone());
            }
        }
        if self.link.end_stream_after_first_write {
            self.sender = None;
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, _characteristic: Uuid) -> Result<(), ClientError> {
        self.link.log.push(Call::Unsubscribe);
        let remaining = self.link.unsubscribe_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.link
                .unsubscribe_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(ClientError::Timeout {
                operation: Operation::Unsubscribe,
                timeout_ms: 5_000,
            });
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.link.log.push(Call::Close);
    }
}

/// Notification stream that fails the test if it is polled after ending.
struct EndOnce {
    inner: mpsc::UnboundedReceiver<Vec<u8>>,
    ended: bool,
}

impl Stream for EndOnce {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Vec<u8>>> {
        assert!(!self.ended, "notification stream polled after it ended");
        let item = ready!(Pin::new(&mut self.inner).poll_next(cx));
        if item.is_none() {
            self.ended = true;
        }
        Poll::Ready(item)
    }
}

pub struct MockFinder {
    pub log: CallLog,
    pub result: Option<DeviceAddress>,
    pub fail: bool,
}

#[async_trait]
impl DeviceFinder for MockFinder {
    async fn find(&self, name: &str) -> Result<Option<DeviceAddress>, DiscoveryError> {
        self.log.push(Call::Find(name.to_string()));
        if self.fail {
            return Err(DiscoveryError::Scan(btleplug::Error::PermissionDenied));
        }
        Ok(self.result.clone())
    }
}

pub struct MockPublisher {
    pub log: CallLog,
    pub connected: bool,
}

#[async_trait]
impl PublishTransport for MockPublisher {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn reconnect(&mut self) -> Result<(), PublishError> {
        self.log.push(Call::Reconnect);
        self.connected = true;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), PublishError> {
        assert_eq!(topic, "solar-data");
        assert_eq!(qos, QoS::AtMostOnce);
        self.log.push(Call::Publish(
            String::from_utf8(payload).expect("utf8 payload"),
        ));
        Ok(())
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Sunrise at 06:00 and sunset at 18:00 UTC.
pub struct FixedSun;

impl SunCalculator for FixedSun {
    fn sun_times(&self, _location: &Location, date: NaiveDate) -> Option<SunTimes> {
        Some(SunTimes {
            sunrise: date.and_hms_opt(6, 0, 0)?.and_utc(),
            sunset: date.and_hms_opt(18, 0, 0)?.and_utc(),
        })
    }
}

pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn late_evening() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 22, 0, 0).unwrap()
}

pub fn scheduler(now: DateTime<Utc>) -> DaylightScheduler {
    let location = Location {
        city: "Greenwich".to_string(),
        region: "England".to_string(),
        timezone: chrono_tz::UTC,
        latitude: 51.48,
        longitude: 0.0,
    };
    DaylightScheduler::new(location, Box::new(FixedSun), Box::new(FixedClock(now)), 1)
}

pub fn session(link: MockLink) -> DeviceSession {
    DeviceSession::new(
        Box::new(link),
        SessionConfig {
            settle_delay: Duration::from_millis(500),
        },
    )
}

pub fn poll_loop(
    finder: MockFinder,
    link: MockLink,
    publisher: MockPublisher,
    now: DateTime<Utc>,
) -> PollLoop {
    PollLoop::new(
        PollConfig {
            device_name: DEVICE_NAME.to_string(),
            poll_interval: Duration::from_secs(5),
        },
        Box::new(finder),
        session(link),
        Box::new(publisher),
        scheduler(now),
    )
}
