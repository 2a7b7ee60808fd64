//! Broker session lifecycle.
//!
//! One session: connect with bounded backoff, subscribe, then pump frames
//! until the connection dies. The supervisor owns reconnection between
//! sessions and enforces spacing between them.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;

use utility::config::{ConfigError, Secret};

use super::error::StompError;
use super::frame::{Command, Frame, StompCodec, WireEvent};

pub const STOMP_PORT: u16 = 61613;
pub const MAX_CONNECTION_ATTEMPTS: u32 = 30;

const CONNECT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Quadratic backoff, clamped to [10s, 600s].
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt.saturating_mul(attempt)).clamp(10, 600))
}

#[derive(Debug, Clone)]
pub struct StompConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub destination: String,
    pub client_id: String,
    pub subscription_name: String,
    pub heartbeat: Duration,
}

impl StompConfig {
    pub fn from_secret(secret: &Secret) -> Result<Self, ConfigError> {
        Ok(Self {
            hostname: Secret::require(&secret.hostname, "hostname")?.to_owned(),
            port: STOMP_PORT,
            username: Secret::require(&secret.username, "username")?.to_owned(),
            password: Secret::require(&secret.password, "password")?.to_owned(),
            destination: Secret::require(&secret.subscribe, "subscribe")?.to_owned(),
            client_id: secret
                .client_id
                .clone()
                .or_else(|| secret.username.clone())
                .unwrap_or_default(),
            subscription_name: Secret::require(&secret.identifier, "identifier")?
                .to_owned(),
            heartbeat: Duration::from_secs(secret.heartbeat_seconds),
        })
    }
}

/// How a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Connection lost (or heartbeat timed out) after subscribing.
    Disconnected,
    /// Every connection attempt of this session failed.
    Exhausted,
}

/// Processes one delivered MESSAGE frame. The return value decides whether
/// the frame is acknowledged; an unacknowledged frame is redelivered by
/// the broker after reconnection.
#[async_trait]
pub trait FrameHandler: Send {
    async fn on_frame(&mut self, frame: &Frame) -> bool;
}

pub struct Subscriber {
    config: StompConfig,
}

impl Subscriber {
    pub fn new(config: StompConfig) -> Self {
        Self { config }
    }

    /// Runs one full session: bounded connection attempts, subscription,
    /// then the receive loop until the connection dies.
    pub async fn run_session<H: FrameHandler>(&self, handler: &mut H) -> SessionEnd {
        let mut framed = match self.connect_and_subscribe().await {
            Some(framed) => framed,
            None => return SessionEnd::Exhausted,
        };
        log::info!("connected and subscribed to {}", self.config.destination);

        match self.receive_loop(&mut framed, handler).await {
            Ok(()) => {}
            Err(StompError::HeartbeatTimeout) => log::error!("heartbeat timeout"),
            Err(why) => log::error!("broker session ended: {}", why),
        }
        SessionEnd::Disconnected
    }

    async fn connect_and_subscribe(&self) -> Option<Framed<TcpStream, StompCodec>> {
        for attempt in 1..=MAX_CONNECTION_ATTEMPTS {
            log::info!(
                "connecting to {}:{} (attempt {})",
                self.config.hostname,
                self.config.port,
                attempt
            );
            match self.try_connect().await {
                Ok(framed) => return Some(framed),
                Err(why) => {
                    let backoff = backoff_delay(attempt);
                    log::error!(
                        "failed to connect, waiting {}s: {}",
                        backoff.as_secs(),
                        why
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        log::error!("connection attempts exhausted");
        None
    }

    async fn try_connect(&self) -> Result<Framed<TcpStream, StompCodec>, StompError> {
        let stream =
            TcpStream::connect((self.config.hostname.as_str(), self.config.port)).await?;
        let mut framed = Framed::new(stream, StompCodec);

        let heartbeat_millis = self.config.heartbeat.as_millis() as u64;
        framed
            .send(WireEvent::Frame(Frame::connect(
                &self.config.hostname,
                &self.config.username,
                &self.config.password,
                &self.config.client_id,
                heartbeat_millis,
            )))
            .await?;

        // The broker answers CONNECTED (or ERROR), possibly with
        // heartbeats interleaved.
        loop {
            let reply = tokio::time::timeout(CONNECT_REPLY_TIMEOUT, framed.next())
                .await
                .map_err(|_| StompError::HeartbeatTimeout)?
                .ok_or(StompError::Disconnected)??;
            match reply {
                WireEvent::Heartbeat => continue,
                WireEvent::Frame(frame) => match frame.command {
                    Command::Connected => break,
                    Command::Error => {
                        return Err(StompError::Broker(first_line(&frame.body)))
                    }
                    _ => continue,
                },
            }
        }

        framed
            .send(WireEvent::Frame(Frame::subscribe(
                &self.config.destination,
                "1",
                &self.config.subscription_name,
            )))
            .await?;
        Ok(framed)
    }

    async fn receive_loop<H: FrameHandler>(
        &self,
        framed: &mut Framed<TcpStream, StompCodec>,
        handler: &mut H,
    ) -> Result<(), StompError> {
        let mut send_beat = tokio::time::interval(self.config.heartbeat);
        send_beat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; that just primes the connection.
        let read_window = self.config.heartbeat * 2 + Duration::from_secs(5);

        loop {
            tokio::select! {
                _ = send_beat.tick() => {
                    framed.send(WireEvent::Heartbeat).await?;
                }
                received = tokio::time::timeout(read_window, framed.next()) => {
                    let event = received
                        .map_err(|_| StompError::HeartbeatTimeout)?
                        .ok_or(StompError::Disconnected)??;
                    match event {
                        WireEvent::Heartbeat => {}
                        WireEvent::Frame(frame) => {
                            self.handle_frame(framed, handler, frame).await?;
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame<H: FrameHandler>(
        &self,
        framed: &mut Framed<TcpStream, StompCodec>,
        handler: &mut H,
        frame: Frame,
    ) -> Result<(), StompError> {
        match frame.command {
            Command::Message => {
                if handler.on_frame(&frame).await {
                    if let (Some(message_id), Some(subscription)) =
                        (frame.header("message-id"), frame.header("subscription"))
                    {
                        framed
                            .send(WireEvent::Frame(Frame::ack(message_id, subscription)))
                            .await?;
                    }
                }
            }
            Command::Error => {
                log::error!("received an error \"{}\"", first_line(&frame.body));
            }
            _ => {}
        }
        Ok(())
    }
}

fn first_line(body: &[u8]) -> String {
    let line = body.split(|byte| *byte == b'\n').next().unwrap_or(b"");
    String::from_utf8_lossy(line).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_quadratic_with_floor_and_cap() {
        assert_eq!(backoff_delay(1), Duration::from_secs(10));
        assert_eq!(backoff_delay(3), Duration::from_secs(10));
        assert_eq!(backoff_delay(4), Duration::from_secs(16));
        assert_eq!(backoff_delay(10), Duration::from_secs(100));
        assert_eq!(backoff_delay(24), Duration::from_secs(576));
        assert_eq!(backoff_delay(25), Duration::from_secs(600));
        assert_eq!(backoff_delay(30), Duration::from_secs(600));
    }

    #[test]
    fn config_falls_back_to_username_client_id() {
        let secret: Secret = serde_json::from_str(
            r#"{
                "database-string": "postgres://localhost/darwin",
                "hostname": "broker", "username": "user", "password": "pass",
                "subscribe": "/topic/darwin", "identifier": "ingester"
            }"#,
        )
        .unwrap();
        let config = StompConfig::from_secret(&secret).unwrap();
        assert_eq!(config.client_id, "user");
        assert_eq!(config.heartbeat, Duration::from_secs(35));
        assert_eq!(config.port, STOMP_PORT);
    }

    #[test]
    fn missing_broker_keys_are_reported() {
        let secret: Secret = serde_json::from_str(
            r#"{"database-string": "postgres://localhost/darwin"}"#,
        )
        .unwrap();
        let why = StompConfig::from_secret(&secret).unwrap_err();
        assert!(why.to_string().contains("hostname"));
    }
}
