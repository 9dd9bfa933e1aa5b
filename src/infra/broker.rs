use crate::error::{KarcherError, Result};
use rumqttc::{
    Client, ConnectReturnCode, Event, MqttOptions, Outgoing, Packet, QoS, Transport,
};
use std::sync::Arc;
use std::sync::mpsc::SyncSender;
use std::thread;
use std::time::Duration;

const DEFAULT_TLS_PORT: u16 = 8883;
const REQUEST_CAPACITY: usize = 100;
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// What the connection thread hands to the dispatcher.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BrokerEvent {
    Connected,
    Message { topic: String, payload: Vec<u8> },
    Disconnected(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BrokerCredentials {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

/// Handle to an open broker connection. Every call is fire-and-forget at QoS 0.
pub trait BrokerTransport: Send + Sync {
    fn subscribe(&self, topics: &[String]) -> Result<()>;
    fn unsubscribe(&self, topics: &[String]) -> Result<()>;
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
    fn disconnect(&self) -> Result<()>;
}

/// Opens connections; delivery happens on the connector's own thread through `events`.
pub trait BrokerConnector: Send + Sync {
    fn connect(
        &self,
        credentials: &BrokerCredentials,
        events: SyncSender<BrokerEvent>,
    ) -> Result<Arc<dyn BrokerTransport>>;
}

/// Splits a `host[:port]` broker address, defaulting to the TLS port.
pub fn parse_broker_address(address: &str) -> Result<(String, u16)> {
    let trimmed = address.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let parsed = url::Url::parse(&format!("mqtts://{without_scheme}"))
        .map_err(|error| KarcherError::Broker(format!("bad broker address {address}: {error}")))?;
    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| KarcherError::Broker(format!("bad broker address {address}")))?;
    Ok((host.to_string(), parsed.port().unwrap_or(DEFAULT_TLS_PORT)))
}

pub struct RumqttConnector {
    keep_alive: Duration,
}

impl Default for RumqttConnector {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(60),
        }
    }
}

impl RumqttConnector {
    pub fn new(keep_alive: Duration) -> Self {
        Self { keep_alive }
    }
}

impl BrokerConnector for RumqttConnector {
    fn connect(
        &self,
        credentials: &BrokerCredentials,
        events: SyncSender<BrokerEvent>,
    ) -> Result<Arc<dyn BrokerTransport>> {
        let mut options = MqttOptions::new(
            credentials.client_id.clone(),
            credentials.host.clone(),
            credentials.port,
        );
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options.set_credentials(credentials.username.clone(), credentials.password.clone());
        options.set_transport(Transport::tls_with_default_config());

        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        let host = credentials.host.clone();
        thread::Builder::new()
            .name("karcher-broker".to_string())
            .spawn(move || {
                for notification in connection.iter() {
                    let event = match notification {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            if ack.code != ConnectReturnCode::Success {
                                tracing::warn!(code = ?ack.code, "broker refused connection");
                                continue;
                            }
                            tracing::info!(%host, "broker connected");
                            BrokerEvent::Connected
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => BrokerEvent::Message {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        },
                        Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                        Ok(_) => continue,
                        Err(error) => {
                            tracing::warn!(%error, "broker connection dropped");
                            if events
                                .send(BrokerEvent::Disconnected(error.to_string()))
                                .is_err()
                            {
                                break;
                            }
                            thread::sleep(RECONNECT_PAUSE);
                            continue;
                        }
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                tracing::debug!("broker event loop finished");
            })
            .map_err(|error| KarcherError::Broker(error.to_string()))?;

        Ok(Arc::new(RumqttLink { client }))
    }
}

struct RumqttLink {
    client: Client,
}

impl BrokerTransport for RumqttLink {
    fn subscribe(&self, topics: &[String]) -> Result<()> {
        for topic in topics {
            self.client
                .subscribe(topic.as_str(), QoS::AtMostOnce)
                .map_err(|error| KarcherError::Broker(error.to_string()))?;
        }
        Ok(())
    }

    fn unsubscribe(&self, topics: &[String]) -> Result<()> {
        for topic in topics {
            self.client
                .unsubscribe(topic.as_str())
                .map_err(|error| KarcherError::Broker(error.to_string()))?;
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|error| KarcherError::Broker(error.to_string()))
    }

    fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .map_err(|error| KarcherError::Broker(error.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    type Responder = Box<dyn Fn(&str, &[u8]) -> Option<(String, Vec<u8>)> + Send + Sync>;

    #[derive(Default)]
    struct FakeState {
        events: Option<SyncSender<BrokerEvent>>,
        connects: Vec<BrokerCredentials>,
        subscribed: Vec<String>,
        unsubscribed: Vec<String>,
        published: Vec<(String, Vec<u8>)>,
        disconnects: usize,
        silent: bool,
        responder: Option<Responder>,
    }

    /// In-memory broker: records every call and can answer publishes through the event channel.
    #[derive(Clone, Default)]
    pub struct FakeBroker {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeBroker {
        pub fn respond_with(
            &self,
            responder: impl Fn(&str, &[u8]) -> Option<(String, Vec<u8>)> + Send + Sync + 'static,
        ) {
            self.state.lock().responder = Some(Box::new(responder));
        }

        /// Later connects never report `Connected`.
        pub fn stay_silent(&self) {
            self.state.lock().silent = true;
        }

        pub fn deliver(&self, event: BrokerEvent) {
            let sender = self.state.lock().events.clone();
            if let Some(sender) = sender {
                let _ = sender.send(event);
            }
        }

        pub fn inject(&self, topic: &str, payload: &[u8]) {
            self.deliver(BrokerEvent::Message {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            });
        }

        pub fn connects(&self) -> Vec<BrokerCredentials> {
            self.state.lock().connects.clone()
        }

        pub fn subscribed(&self) -> Vec<String> {
            self.state.lock().subscribed.clone()
        }

        pub fn unsubscribed(&self) -> Vec<String> {
            self.state.lock().unsubscribed.clone()
        }

        pub fn published(&self) -> Vec<(String, Vec<u8>)> {
            self.state.lock().published.clone()
        }

        pub fn disconnects(&self) -> usize {
            self.state.lock().disconnects
        }
    }

    impl BrokerConnector for FakeBroker {
        fn connect(
            &self,
            credentials: &BrokerCredentials,
            events: SyncSender<BrokerEvent>,
        ) -> Result<Arc<dyn BrokerTransport>> {
            let silent = {
                let mut state = self.state.lock();
                state.connects.push(credentials.clone());
                state.events = Some(events);
                state.silent
            };
            if !silent {
                self.deliver(BrokerEvent::Connected);
            }
            Ok(Arc::new(self.clone()))
        }
    }

    impl BrokerTransport for FakeBroker {
        fn subscribe(&self, topics: &[String]) -> Result<()> {
            self.state.lock().subscribed.extend(topics.iter().cloned());
            Ok(())
        }

        fn unsubscribe(&self, topics: &[String]) -> Result<()> {
            self.state.lock().unsubscribed.extend(topics.iter().cloned());
            Ok(())
        }

        fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            let reply = {
                let mut state = self.state.lock();
                let reply = state
                    .responder
                    .as_ref()
                    .and_then(|responder| responder(topic, &payload));
                state.published.push((topic.to_string(), payload));
                reply
            };
            if let Some((topic, payload)) = reply {
                self.inject(&topic, &payload);
            }
            Ok(())
        }

        fn disconnect(&self) -> Result<()> {
            let mut state = self.state.lock();
            state.disconnects += 1;
            state.events = None;
            Ok(())
        }
    }
}
