//! MQTT session with one heat pump's SMT gateway.
//!
//! The gateway publishes register batches on `<node>/SMTID/HOST2CLIENT` and
//! accepts write commands on `<node>/SMTID/CLIENT2HOST`. It only keeps
//! reporting while it is being polled, so the session periodically publishes
//! a keep-alive command naming every register it wants to hear about.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use tokio_util::task::AbortOnDropHandle;

use crate::registers::{Language, RegisterIndex};
use crate::state::{Commit, DeviceState};
use crate::values::{self, RegisterValue};

/// Minimum spacing between two keep-alive polls.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Inbound silence after which the link is considered down.
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(300);
const WATCHDOG_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// Grace period after connecting or writing before consumers are poked.
const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Write the gateway expects inside every keep-alive poll.
const KEEP_ALIVE_WRITES: [(&str, &str); 3] =
    [("5074", "0255"), ("5106", "0000"), ("5109", "0000")];

/// Substring marking command traffic from another controller.
const FOREIGN_CONTROLLER_MARKER: &[u8] = b"CLIENT_ID";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not subscribe to {1}")]
    Subscribe(#[source] rumqttc::v5::ClientError, String),
    #[error("could not publish to {1}")]
    Publish(#[source] rumqttc::v5::ClientError, String),
    #[error("there is no register named {0:?}")]
    UnknownRegister(String),
    #[error("could not encode a value for register {1}")]
    Encode(#[source] values::EncodeError, &'static str),
}

#[derive(clap::Args, Clone, Debug)]
pub struct Args {
    /// Hostname of the MQTT broker the SMT gateway is connected to.
    #[arg(long, short = 'H')]
    pub host: String,
    /// Port of the MQTT broker.
    #[arg(long, short = 'P', default_value_t = 1883)]
    pub port: u16,
    /// Client identifier to present to the broker.
    #[arg(long, default_value = "remko-smt-tools")]
    pub client_id: String,
    /// MQTT node name of the SMT gateway, the first topic level.
    #[arg(long, default_value = "V04P28")]
    pub node: String,
    /// Language of the decoded enumeration values.
    #[arg(long, value_enum, default_value_t = Language::En)]
    pub language: Language,
    /// Minimum interval between committed updates of any analog channel.
    #[arg(long, default_value = "100s")]
    pub throttle: humantime::Duration,
}

/// Register batch reported by the gateway.
#[derive(serde::Deserialize)]
struct DataMessage {
    values: BTreeMap<String, String>,
}

#[derive(serde::Serialize)]
struct KeepAlive {
    #[serde(rename = "FORCE_RESPONSE")]
    force_response: bool,
    values: BTreeMap<&'static str, &'static str>,
    query_list: Vec<u16>,
}

#[derive(serde::Serialize)]
struct WriteMessage {
    values: BTreeMap<String, String>,
}

/// A running connection to one heat pump.
///
/// Dropping the session aborts its worker; [`Session::stop`] additionally
/// says goodbye to the broker.
pub struct Session {
    state: Arc<DeviceState>,
    client: AsyncClient,
    cmd_topic: String,
    #[allow(unused)] // exists for its drop handler
    worker: AbortOnDropHandle<()>,
}

impl Session {
    pub async fn start(args: Args) -> Result<Self, Error> {
        let data_topic = format!("{}/SMTID/HOST2CLIENT", args.node);
        let cmd_topic = format!("{}/SMTID/CLIENT2HOST", args.node);
        let state = Arc::new(DeviceState::new(*args.throttle));

        let options = MqttOptions::new(&args.client_id, &args.host, args.port);
        let (client, eventloop) = AsyncClient::new(options, 64);
        for topic in [&data_topic, &cmd_topic] {
            client
                .subscribe(topic.clone(), QoS::AtLeastOnce)
                .await
                .map_err(|e| Error::Subscribe(e, topic.clone()))?;
        }

        let worker = Worker {
            core: SessionCore::new(
                data_topic,
                cmd_topic.clone(),
                args.language,
                Arc::clone(&state),
            ),
            client: client.clone(),
            eventloop,
        };
        let worker = AbortOnDropHandle::new(tokio::spawn(worker.main_loop()));
        Ok(Self { state, client, cmd_topic, worker })
    }

    pub fn state(&self) -> &Arc<DeviceState> {
        &self.state
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::state::Refresh> {
        self.state.subscribe()
    }

    /// Encodes a value and publishes it as a write command.
    ///
    /// The gateway takes a moment to apply writes, so consumers are notified
    /// only after a settle delay.
    pub async fn send_register(&self, name: &str, value: &RegisterValue) -> Result<(), Error> {
        let register = RegisterIndex::from_name(name)
            .ok_or_else(|| Error::UnknownRegister(name.to_string()))?;
        let encoded =
            values::encode(register, value).map_err(|e| Error::Encode(e, register.name()))?;
        let message = WriteMessage {
            values: BTreeMap::from([(register.id(), encoded)]),
        };
        let payload = serde_json::to_string(&message).unwrap();
        tracing::debug!(
            register = register.name(),
            payload = payload.as_str(),
            "publishing a write command"
        );
        self.client
            .publish(self.cmd_topic.clone(), QoS::ExactlyOnce, false, payload)
            .await
            .map_err(|e| Error::Publish(e, self.cmd_topic.clone()))?;
        tokio::time::sleep(SETTLE_DELAY).await;
        self.state.notify_refreshed(0);
        Ok(())
    }

    /// Shuts the session down and disconnects from the broker.
    pub async fn stop(self) {
        drop(self.worker);
        let _ = self.client.disconnect().await;
    }
}

struct Worker {
    core: SessionCore,
    client: AsyncClient,
    eventloop: EventLoop,
}

impl Worker {
    async fn main_loop(mut self) {
        let mut watchdog = tokio::time::interval(WATCHDOG_CHECK_INTERVAL);
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let settle = tokio::time::sleep(SETTLE_DELAY);
        tokio::pin!(settle);
        let mut settled = false;
        loop {
            tokio::select! {
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Ok(topic) = str::from_utf8(&publish.topic) else {
                            tracing::warn!("received a message with a non-utf8 topic");
                            continue;
                        };
                        let now = Instant::now();
                        match self.core.handle_message(topic, &publish.payload, now) {
                            Ok(Ingest::Data { changed }) => {
                                self.core.state.notify_refreshed(changed);
                                self.send_keep_alive(now).await;
                            }
                            Ok(Ingest::ForeignController) => {
                                tracing::debug!(
                                    "another controller is active, deferring the next poll"
                                );
                            }
                            Ok(Ingest::Ignored) => {}
                            Err(error) => tracing::warn!(
                                topic,
                                error = &error as &dyn std::error::Error,
                                "discarding an unprocessable message",
                            ),
                        }
                    }
                    Ok(_) => {}
                    Err(error) => {
                        // rumqttc reconnects on the next poll.
                        tracing::warn!(
                            error = &error as &dyn std::error::Error,
                            "lost the broker connection, retrying",
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
                _ = &mut settle, if !settled => {
                    settled = true;
                    self.core.reset_keep_alive_window();
                    self.send_keep_alive(Instant::now()).await;
                    self.core.state.notify_refreshed(0);
                }
                _ = watchdog.tick() => {
                    let now = Instant::now();
                    if settled && self.core.link_stale(now) {
                        tracing::debug!("no report from the gateway in a while, polling again");
                        self.send_keep_alive(now).await;
                        if self.core.mark_link_down(now) {
                            self.core.state.notify_refreshed(1);
                        }
                    }
                }
            }
        }
    }

    async fn send_keep_alive(&mut self, now: Instant) {
        let Some(payload) = self.core.keep_alive_payload(now) else {
            return;
        };
        tracing::debug!("polling the gateway");
        let publish = self
            .client
            .publish(self.core.cmd_topic.clone(), QoS::ExactlyOnce, false, payload)
            .await;
        if let Err(error) = publish {
            // The next data batch or watchdog tick retries.
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "could not publish a keep-alive poll",
            );
        }
    }
}

/// Protocol state machine of a session, separated from the transport.
struct SessionCore {
    data_topic: String,
    cmd_topic: String,
    language: Language,
    state: Arc<DeviceState>,
    /// Addresses named in the keep-alive `query_list`.
    capabilities: Vec<u16>,
    last_inbound: Instant,
    last_keep_alive: Option<Instant>,
}

/// What an inbound message amounted to.
#[derive(Debug, PartialEq, Eq)]
enum Ingest {
    /// A register batch was committed.
    Data { changed: usize },
    /// Another controller wrote to the gateway.
    ForeignController,
    /// Our own command echo or an unrelated topic.
    Ignored,
}

#[derive(Debug, thiserror::Error)]
enum MalformedMessage {
    #[error("the payload is not a JSON object with a `values` map")]
    Json(#[source] serde_json::Error),
}

impl SessionCore {
    fn new(
        data_topic: String,
        cmd_topic: String,
        language: Language,
        state: Arc<DeviceState>,
    ) -> Self {
        let capabilities = RegisterIndex::all()
            .filter(|register| register.kind().is_queryable())
            .map(|register| register.address())
            .collect();
        Self {
            data_topic,
            cmd_topic,
            language,
            state,
            capabilities,
            last_inbound: Instant::now(),
            last_keep_alive: None,
        }
    }

    fn handle_message(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: Instant,
    ) -> Result<Ingest, MalformedMessage> {
        if topic == self.cmd_topic {
            // The gateway appends a CLIENT_ID field when relaying commands
            // from other controllers; our own echoes carry none.
            let foreign = payload
                .windows(FOREIGN_CONTROLLER_MARKER.len())
                .any(|window| window == FOREIGN_CONTROLLER_MARKER);
            if foreign {
                self.last_keep_alive = Some(now);
                return Ok(Ingest::ForeignController);
            }
            return Ok(Ingest::Ignored);
        }
        if topic != self.data_topic {
            return Ok(Ingest::Ignored);
        }

        self.last_inbound = now;
        let message: DataMessage =
            serde_json::from_slice(payload).map_err(MalformedMessage::Json)?;
        let mut changed = 0;
        for (id, raw) in &message.values {
            let Some(register) = RegisterIndex::from_id(id) else {
                tracing::trace!(id = id.as_str(), "skipping a register outside the catalog");
                continue;
            };
            let value = match values::decode(register, raw, self.language) {
                Ok(value) => value,
                Err(error) => {
                    tracing::warn!(
                        register = register.name(),
                        raw = raw.as_str(),
                        error = &error as &dyn std::error::Error,
                        "skipping an undecodable register",
                    );
                    continue;
                }
            };
            if self.state.commit(register, value, now) == Commit::Changed {
                changed += 1;
            }
        }
        changed += self.set_link_up(true, now);
        Ok(Ingest::Data { changed })
    }

    /// Serializes a keep-alive poll, or `None` while the window since the
    /// previous one has not elapsed yet.
    fn keep_alive_payload(&mut self, now: Instant) -> Option<String> {
        if let Some(last) = self.last_keep_alive {
            if now.saturating_duration_since(last) < KEEP_ALIVE_INTERVAL {
                return None;
            }
        }
        self.last_keep_alive = Some(now);
        let message = KeepAlive {
            force_response: true,
            values: BTreeMap::from(KEEP_ALIVE_WRITES),
            query_list: self.capabilities.clone(),
        };
        Some(serde_json::to_string(&message).unwrap())
    }

    /// Makes the next keep-alive eligible immediately.
    fn reset_keep_alive_window(&mut self) {
        self.last_keep_alive = None;
    }

    fn link_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_inbound) >= WATCHDOG_TIMEOUT
    }

    /// Flags the communication status register down. Returns whether that
    /// was news.
    fn mark_link_down(&mut self, now: Instant) -> bool {
        self.set_link_up(false, now) > 0
    }

    fn set_link_up(&mut self, up: bool, now: Instant) -> usize {
        let register = RegisterIndex::from_name("communication_status")
            .expect("the catalog always carries communication_status");
        usize::from(self.state.commit(register, RegisterValue::Bool(up), now) == Commit::Changed)
    }
}
