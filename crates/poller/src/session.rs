use std::fmt;
use std::time::Duration;

use ble_client::{
    ClientError, LinkConnection, LinkTransport, NotificationStream, NOTIFY_CHARACTERISTIC,
    REQUEST_SEQUENCE,
};
use frame_decoder::{decode_frames, FrameSlots};
use futures::{FutureExt, StreamExt};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use types::{DeviceAddress, MeasurementRecord};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Longest wait for a response burst after each write.
    pub settle_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(#[source] ClientError),
    #[error("error writing {command}: {source}")]
    Write {
        command: &'static str,
        #[source]
        source: ClientError,
    },
    #[error("failed to unsubscribe from notifications: {0}")]
    Unsubscribe(#[source] ClientError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Subscribed,
    Requesting(usize),
    Unsubscribing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Subscribed => f.write_str("subscribed"),
            SessionState::Requesting(index) => write!(f, "requesting({})", index + 1),
            SessionState::Unsubscribing => f.write_str("unsubscribing"),
            SessionState::Closed => f.write_str("closed"),
        }
    }
}

/// One connect, subscribe, request, unsubscribe cycle against the inverter.
pub struct DeviceSession {
    link: Box<dyn LinkTransport>,
    config: SessionConfig,
}

impl DeviceSession {
    pub fn new(link: Box<dyn LinkTransport>, config: SessionConfig) -> Self {
        Self { link, config }
    }

    /// Runs a full session and decodes the collected frames.
    ///
    /// The slots are cleared when the session starts and again after a
    /// successful decode; a failed session leaves them as they were.
    pub async fn run(
        &self,
        address: &DeviceAddress,
        slots: &mut FrameSlots,
    ) -> Result<MeasurementRecord, SessionError> {
        slots.clear();
        enter(SessionState::Connecting);
        let mut connection = match self.link.connect(address).await {
            Ok(connection) => connection,
            Err(err) => {
                enter(SessionState::Closed);
                return Err(SessionError::Connect(err));
            }
        };

        let result = self.exchange(connection.as_mut(), slots).await;
        connection.close().await;
        enter(SessionState::Closed);
        result?;

        Ok(decode_frames(&slots.take()))
    }

    async fn exchange(
        &self,
        connection: &mut dyn LinkConnection,
        slots: &mut FrameSlots,
    ) -> Result<(), SessionError> {
        let mut notifications = match connection.subscribe(NOTIFY_CHARACTERISTIC).await {
            Ok(stream) => {
                info!(characteristic = %NOTIFY_CHARACTERISTIC, "subscribed to notifications");
                Some(stream)
            }
            Err(err) => {
                warn!(
                    characteristic = %NOTIFY_CHARACTERISTIC,
                    error = %err,
                    "failed to subscribe to notifications"
                );
                None
            }
        };
        enter(SessionState::Subscribed);

        for (index, command) in REQUEST_SEQUENCE.iter().enumerate() {
            enter(SessionState::Requesting(index));
            connection
                .write(command.characteristic, command.payload)
                .await
                .map_err(|source| SessionError::Write {
                    command: command.name,
                    source,
                })?;
            info!(
                command = command.name,
                payload = %command.payload_hex(),
                characteristic = %command.characteristic,
                "requested"
            );
            self.collect_burst(&mut notifications, slots).await;
            slots.advance();
        }
        drain_late(&mut notifications, slots);

        enter(SessionState::Unsubscribing);
        info!(characteristic = %NOTIFY_CHARACTERISTIC, "unsubscribing from notifications");
        connection
            .unsubscribe(NOTIFY_CHARACTERISTIC)
            .await
            .map_err(SessionError::Unsubscribe)
    }

    /// Appends notifications to the active slot until its frame is complete
    /// or the settle delay runs out, whichever happens first. A stream that
    /// ends is dropped and never polled again.
    async fn collect_burst(
        &self,
        notifications: &mut Option<NotificationStream>,
        slots: &mut FrameSlots,
    ) {
        let deadline = sleep(self.config.settle_delay);
        tokio::pin!(deadline);

        let Some(stream) = notifications.as_mut() else {
            deadline.await;
            return;
        };

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    debug!(slot = slots.active(), "settle delay elapsed");
                    return;
                }
                fragment = stream.next() => match fragment {
                    Some(fragment) => {
                        slots.append(&fragment);
                        if slots.active_complete() {
                            debug!(slot = slots.active(), "response frame complete");
                            return;
                        }
                    }
                    None => {
                        warn!("notification stream ended");
                        break;
                    }
                },
            }
        }

        *notifications = None;
        deadline.await;
    }
}

/// Appends whatever is already queued after the last burst to the active slot.
fn drain_late(notifications: &mut Option<NotificationStream>, slots: &mut FrameSlots) {
    let Some(stream) = notifications.as_mut() else {
        return;
    };
    loop {
        match stream.next().now_or_never() {
            Some(Some(fragment)) => {
                debug!(slot = slots.active(), "late notification");
                slots.append(&fragment);
            }
            Some(None) => {
                *notifications = None;
                return;
            }
            None => return,
        }
    }
}

fn enter(state: SessionState) {
    debug!(state = %state, "session state");
}
