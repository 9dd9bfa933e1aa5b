//! Broker connection owner: desired topics, inbound demultiplexing, the per-device property cache
//! and blocking request/reply correlation on exact topics.

use crate::config::ClientConfig;
use crate::domain::topics::{self, PROPERTY_GET_REPLY, STATE_EVENT_SUFFIXES};
use crate::domain::{PROPERTY_REQUEST_VERSION, PropertySnapshot, ROBOT_PROPERTIES, TENANT_ID};
use crate::error::{KarcherError, Result};
use crate::infra::broker::{BrokerConnector, BrokerCredentials, BrokerEvent, BrokerTransport};
use crate::infra::signer::{now_unix_millis, now_unix_secs};
use parking_lot::{Condvar, Mutex};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, sync_channel};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    Resolved,
    TimedOut,
    /// Another caller already waits on the topic; this call returned at once.
    AlreadyWaiting,
    NotConnected,
}

#[derive(Default)]
struct OneShot {
    fired: Mutex<bool>,
    signal: Condvar,
}

impl OneShot {
    fn fire(&self) {
        *self.fired.lock() = true;
        self.signal.notify_all();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut fired = self.fired.lock();
        while !*fired {
            if self.signal.wait_until(&mut fired, deadline).timed_out() {
                break;
            }
        }
        *fired
    }
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    /// Bumped on every connect and disconnect so a stale dispatcher stops touching state.
    generation: u64,
    link: Option<Arc<dyn BrokerTransport>>,
    topics: Vec<String>,
    snapshots: HashMap<String, PropertySnapshot>,
    waiters: HashMap<String, Arc<OneShot>>,
    ready: Option<Arc<OneShot>>,
}

impl Shared {
    fn resolve_waiter(&mut self, topic: &str) {
        if let Some(waiter) = self.waiters.remove(topic) {
            tracing::debug!(%topic, "waiter resolved");
            waiter.fire();
        }
    }

    fn route_message(&mut self, topic: &str, payload: &[u8]) {
        let serial = self
            .snapshots
            .keys()
            .find(|serial| topic.contains(&format!("/{serial}/")))
            .cloned();
        let Some(serial) = serial else {
            self.resolve_waiter(topic);
            return;
        };

        if STATE_EVENT_SUFFIXES.iter().any(|suffix| topic.contains(suffix)) {
            self.resolve_waiter(topic);
            return;
        }
        if topic.contains(PROPERTY_GET_REPLY) && !self.apply_property_reply(&serial, payload) {
            return;
        }
        self.resolve_waiter(topic);
    }

    /// Returns whether the reply was merged. Rejected or unreadable replies leave the waiter pending.
    fn apply_property_reply(&mut self, serial: &str, payload: &[u8]) -> bool {
        let reply: Value = match serde_json::from_slice(payload) {
            Ok(reply) => reply,
            Err(error) => {
                tracing::warn!(%serial, %error, "unreadable property reply");
                return false;
            }
        };
        let Some(snapshot) = self.snapshots.get_mut(serial) else {
            return false;
        };

        let code = reply.get("code").and_then(Value::as_i64).unwrap_or(-1);
        if code != 0 {
            let message = reply
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            tracing::warn!(%serial, code, %message, "device rejected property request");
            snapshot.last_reply_error = Some((code, message));
            return false;
        }

        let empty = Map::new();
        let delta = reply.get("data").and_then(Value::as_object).unwrap_or(&empty);
        let report = snapshot.merge(delta);
        snapshot.last_update_time = now_unix_secs();
        snapshot.last_reply_error = None;
        if !report.dropped.is_empty() {
            tracing::debug!(%serial, dropped = ?report.dropped, "ignored unknown properties");
        }
        tracing::debug!(%serial, changed = report.changed.len(), "properties updated");
        true
    }
}

/// A registered one-shot wait on an exact topic. Dropping it unregisters the wait.
pub struct TopicWaiter {
    shared: Arc<Mutex<Shared>>,
    topic: String,
    signal: Arc<OneShot>,
}

impl TopicWaiter {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn wait(self, timeout: Duration) -> WaitOutcome {
        if self.signal.wait(timeout) {
            WaitOutcome::Resolved
        } else {
            WaitOutcome::TimedOut
        }
    }
}

impl Drop for TopicWaiter {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        let ours = shared
            .waiters
            .get(&self.topic)
            .is_some_and(|waiter| Arc::ptr_eq(waiter, &self.signal));
        if ours {
            shared.waiters.remove(&self.topic);
        }
    }
}

/// Subscription held for the length of one property fetch; released on drop when this fetch created it.
struct DeviceSubscription<'a> {
    client: &'a CorrelationClient,
    product_id: &'a str,
    serial: &'a str,
    owned: bool,
}

impl Drop for DeviceSubscription<'_> {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Err(error) = self.client.unwatch_device(self.product_id, self.serial) {
            tracing::warn!(serial = %self.serial, %error, "failed to release device subscription");
        }
    }
}

pub fn property_request(msg_id: i64) -> Value {
    json!({
        "method": "prop.get",
        "msgId": msg_id.to_string(),
        "tenantId": TENANT_ID,
        "version": PROPERTY_REQUEST_VERSION,
        "params": {
            "property": ROBOT_PROPERTIES,
        },
    })
}

pub struct CorrelationClient {
    connector: Arc<dyn BrokerConnector>,
    event_capacity: usize,
    connect_timeout: Duration,
    shared: Arc<Mutex<Shared>>,
    connecting: Mutex<()>,
}

impl CorrelationClient {
    pub fn new(connector: Arc<dyn BrokerConnector>, config: &ClientConfig) -> Self {
        Self {
            connector,
            event_capacity: config.event_capacity.max(1),
            connect_timeout: config.connect_timeout,
            shared: Arc::new(Mutex::new(Shared::default())),
            connecting: Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().link.is_some()
    }

    /// Opens the connection unless one is already open or opening.
    ///
    /// With `wait_for_ready` the call blocks until the first handshake completes, bounded by the
    /// configured connect timeout. Callers arriving while a connection is opening join that wait.
    pub fn connect(&self, credentials: &BrokerCredentials, wait_for_ready: bool) -> Result<()> {
        let _connecting = self.connecting.lock();

        let (ready, generation) = {
            let mut shared = self.shared.lock();
            match shared.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    let pending = shared.ready.clone();
                    drop(shared);
                    return match pending {
                        Some(ready) if wait_for_ready => self.await_ready(&ready),
                        _ => Ok(()),
                    };
                }
                ConnectionState::Disconnected => {}
            }
            shared.state = ConnectionState::Connecting;
            shared.generation += 1;
            let ready = Arc::new(OneShot::default());
            shared.ready = Some(Arc::clone(&ready));
            (ready, shared.generation)
        };

        tracing::info!(host = %credentials.host, port = credentials.port, "connecting to broker");
        let (sender, receiver) = sync_channel(self.event_capacity);
        let link = match self.connector.connect(credentials, sender) {
            Ok(link) => link,
            Err(error) => {
                let mut shared = self.shared.lock();
                shared.state = ConnectionState::Disconnected;
                shared.ready = None;
                return Err(error);
            }
        };
        self.shared.lock().link = Some(link);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("karcher-dispatch".to_string())
            .spawn(move || dispatch(receiver, shared, generation));
        if let Err(error) = spawned {
            self.teardown();
            return Err(KarcherError::Broker(error.to_string()));
        }

        if !wait_for_ready {
            return Ok(());
        }
        self.await_ready(&ready).inspect_err(|_| self.close_link())
    }

    fn await_ready(&self, ready: &OneShot) -> Result<()> {
        if ready.wait(self.connect_timeout) {
            return Ok(());
        }
        Err(KarcherError::Broker(format!(
            "timed out after {}s waiting for broker connection",
            self.connect_timeout.as_secs()
        )))
    }

    /// Adds topics to the desired set. New ones are pushed at once when connected, otherwise on connect.
    pub fn subscribe(&self, topics: &[String]) -> Result<()> {
        let (delta, link) = {
            let mut shared = self.shared.lock();
            let mut delta = Vec::new();
            for topic in topics {
                if !shared.topics.contains(topic) {
                    shared.topics.push(topic.clone());
                    delta.push(topic.clone());
                }
            }
            (delta, self.connected_link(&shared))
        };
        match link {
            Some(link) if !delta.is_empty() => link.subscribe(&delta),
            _ => Ok(()),
        }
    }

    pub fn unsubscribe(&self, topics: &[String]) -> Result<()> {
        let (delta, link) = {
            let mut shared = self.shared.lock();
            let delta: Vec<String> = topics
                .iter()
                .filter(|topic| shared.topics.contains(topic))
                .cloned()
                .collect();
            shared.topics.retain(|topic| !delta.contains(topic));
            (delta, self.connected_link(&shared))
        };
        match link {
            Some(link) if !delta.is_empty() => link.unsubscribe(&delta),
            _ => Ok(()),
        }
    }

    fn connected_link(&self, shared: &Shared) -> Option<Arc<dyn BrokerTransport>> {
        if shared.state == ConnectionState::Connected {
            shared.link.clone()
        } else {
            None
        }
    }

    pub fn desired_topics(&self) -> Vec<String> {
        self.shared.lock().topics.clone()
    }

    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let link = self
            .shared
            .lock()
            .link
            .clone()
            .ok_or_else(|| KarcherError::Broker("not connected".to_string()))?;
        tracing::debug!(%topic, bytes = payload.len(), "publish");
        link.publish(topic, payload)
    }

    /// Registers a wait on `topic`. `None` when nothing is connected or a wait already exists.
    pub fn register_waiter(&self, topic: &str) -> Option<TopicWaiter> {
        let mut shared = self.shared.lock();
        if shared.link.is_none() || shared.waiters.contains_key(topic) {
            return None;
        }
        let signal = Arc::new(OneShot::default());
        shared.waiters.insert(topic.to_string(), Arc::clone(&signal));
        Some(TopicWaiter {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            signal,
        })
    }

    pub fn wait_for_topic(&self, topic: &str, timeout: Duration) -> WaitOutcome {
        if !self.is_open() {
            return WaitOutcome::NotConnected;
        }
        match self.register_waiter(topic) {
            Some(waiter) => waiter.wait(timeout),
            None => WaitOutcome::AlreadyWaiting,
        }
    }

    pub fn snapshot(&self, serial: &str) -> Option<PropertySnapshot> {
        self.shared.lock().snapshots.get(serial).cloned()
    }

    pub fn is_watching(&self, serial: &str) -> bool {
        self.shared.lock().snapshots.contains_key(serial)
    }

    /// Starts tracking a device with an empty snapshot and subscribes to its topics.
    pub fn watch_device(&self, product_id: &str, serial: &str) -> Result<()> {
        self.shared
            .lock()
            .snapshots
            .insert(serial.to_string(), PropertySnapshot::default());
        self.subscribe(&topics::device_topics(product_id, serial))
    }

    /// Stops tracking a device. Does nothing when no connection is open or the device is not tracked.
    pub fn unwatch_device(&self, product_id: &str, serial: &str) -> Result<()> {
        {
            let shared = self.shared.lock();
            if shared.link.is_none() || !shared.snapshots.contains_key(serial) {
                return Ok(());
            }
        }
        self.unsubscribe(&topics::device_topics(product_id, serial))?;
        self.shared.lock().snapshots.remove(serial);
        Ok(())
    }

    fn hold_device<'a>(
        &'a self,
        product_id: &'a str,
        serial: &'a str,
    ) -> Result<DeviceSubscription<'a>> {
        let owned = !self.is_watching(serial);
        let subscription = DeviceSubscription {
            client: self,
            product_id,
            serial,
            owned,
        };
        if owned {
            self.watch_device(product_id, serial)?;
        }
        Ok(subscription)
    }

    pub fn request_properties(&self, product_id: &str, serial: &str) -> Result<()> {
        let payload = property_request(now_unix_millis()).to_string().into_bytes();
        self.publish(&topics::property_get(product_id, serial), payload)
    }

    /// Returns the cached snapshot, or runs one subscribe, publish, wait round and returns whatever
    /// the cache holds afterwards. A timed-out wait is not an error.
    pub fn fetch_properties(
        &self,
        credentials: &BrokerCredentials,
        product_id: &str,
        serial: &str,
        timeout: Duration,
    ) -> Result<PropertySnapshot> {
        if let Some(snapshot) = self.snapshot(serial) {
            return Ok(snapshot);
        }

        self.connect(credentials, true)?;
        let subscription = self.hold_device(product_id, serial)?;

        let reply_topic = topics::property_get_reply(product_id, serial);
        let waiter = self.register_waiter(&reply_topic);
        self.request_properties(product_id, serial)?;
        let outcome = match waiter {
            Some(waiter) => waiter.wait(timeout),
            None => WaitOutcome::AlreadyWaiting,
        };
        tracing::debug!(%serial, ?outcome, "property fetch finished");

        let snapshot = self.snapshot(serial).unwrap_or_default();
        drop(subscription);
        Ok(snapshot)
    }

    /// Closes the connection and forgets topics and snapshots. Pending waiters run to their timeout.
    pub fn disconnect(&self) {
        let _connecting = self.connecting.lock();
        self.teardown();
    }

    fn teardown(&self) {
        {
            let mut shared = self.shared.lock();
            shared.topics.clear();
            shared.snapshots.clear();
        }
        self.close_link();
    }

    /// Drops the live connection but keeps desired topics and snapshots for the next connect.
    fn close_link(&self) {
        let link = {
            let mut shared = self.shared.lock();
            shared.state = ConnectionState::Disconnected;
            shared.generation += 1;
            shared.ready = None;
            shared.link.take()
        };
        if let Some(link) = link {
            if let Err(error) = link.disconnect() {
                tracing::warn!(%error, "broker disconnect failed");
            }
            tracing::info!("broker disconnected");
        }
    }
}

impl Drop for CorrelationClient {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn dispatch(events: Receiver<BrokerEvent>, shared: Arc<Mutex<Shared>>, generation: u64) {
    for event in events {
        let mut guard = shared.lock();
        if guard.generation != generation {
            break;
        }
        match event {
            BrokerEvent::Connected => {
                guard.state = ConnectionState::Connected;
                let topics = guard.topics.clone();
                let link = guard.link.clone();
                let ready = guard.ready.take();
                drop(guard);

                if let Some(link) = link.filter(|_| !topics.is_empty()) {
                    if let Err(error) = link.subscribe(&topics) {
                        tracing::warn!(%error, "resubscribe failed");
                    }
                }
                if let Some(ready) = ready {
                    ready.fire();
                }
            }
            BrokerEvent::Disconnected(reason) => {
                if guard.state == ConnectionState::Connected {
                    guard.state = ConnectionState::Connecting;
                }
                tracing::debug!(%reason, "broker reconnecting");
            }
            BrokerEvent::Message { topic, payload } => guard.route_message(&topic, &payload),
        }
    }
    tracing::debug!(generation, "dispatcher finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::broker::testing::FakeBroker;

    const PRODUCT: &str = "1540149850806333440";
    const SERIAL: &str = "SN123";

    fn credentials() -> BrokerCredentials {
        BrokerCredentials {
            host: "mq.example.com".to_string(),
            port: 1883,
            client_id: "u1_0011223344556677".to_string(),
            username: "u1".to_string(),
            password: "mqtt-tok".to_string(),
        }
    }

    fn client(broker: &FakeBroker) -> CorrelationClient {
        let connector: Arc<dyn BrokerConnector> = Arc::new(broker.clone());
        CorrelationClient::new(connector, &ClientConfig::default())
    }

    fn eventually(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn reply(code: i64, data: Value) -> Vec<u8> {
        json!({ "code": code, "msg": "m", "data": data }).to_string().into_bytes()
    }

    #[test]
    fn deferred_topics_are_pushed_on_connect() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        client
            .subscribe(&["/a".to_string(), "/b".to_string()])
            .expect("subscribe");
        assert!(broker.subscribed().is_empty());

        client.connect(&credentials(), true).expect("connect");
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(broker.subscribed(), vec!["/a".to_string(), "/b".to_string()]);
    }

    #[test]
    fn connect_is_idempotent() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        client.connect(&credentials(), true).expect("connect");
        client.connect(&credentials(), true).expect("connect again");
        assert_eq!(broker.connects().len(), 1);
    }

    #[test]
    fn concurrent_first_connect_opens_one_connection() {
        let broker = FakeBroker::default();
        let client = Arc::new(client(&broker));
        let handles = (0..8)
            .map(|_| {
                let client = Arc::clone(&client);
                thread::spawn(move || client.connect(&credentials(), true))
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("join").expect("connect");
        }
        assert_eq!(broker.connects().len(), 1);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[test]
    fn readiness_timeout_drops_the_link_but_keeps_topics() {
        let broker = FakeBroker::default();
        broker.stay_silent();
        let config = ClientConfig {
            connect_timeout: Duration::from_millis(50),
            ..ClientConfig::default()
        };
        let connector: Arc<dyn BrokerConnector> = Arc::new(broker.clone());
        let client = CorrelationClient::new(connector, &config);
        client.subscribe(&["/a".to_string()]).expect("subscribe");

        assert!(matches!(
            client.connect(&credentials(), true),
            Err(KarcherError::Broker(_))
        ));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(broker.disconnects(), 1);
        assert_eq!(client.desired_topics(), vec!["/a".to_string()]);

        assert!(client.connect(&credentials(), true).is_err());
        assert_eq!(broker.connects().len(), 2);
    }

    #[test]
    fn reconnect_resubscribes_full_topic_set() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        client.connect(&credentials(), true).expect("connect");
        client.subscribe(&["/a".to_string()]).expect("subscribe");
        assert_eq!(broker.subscribed().len(), 1);

        broker.deliver(BrokerEvent::Disconnected("reset".to_string()));
        broker.deliver(BrokerEvent::Connected);
        assert!(eventually(|| broker.subscribed().len() == 2));
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[test]
    fn known_topics_are_not_subscribed_twice() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        client.connect(&credentials(), true).expect("connect");
        client.subscribe(&["/a".to_string()]).expect("subscribe");
        client.subscribe(&["/a".to_string()]).expect("subscribe again");
        client.unsubscribe(&["/missing".to_string()]).expect("unsubscribe");
        assert_eq!(broker.subscribed(), vec!["/a".to_string()]);
        assert!(broker.unsubscribed().is_empty());
    }

    #[test]
    fn waiter_resolves_when_reply_arrives() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        client.connect(&credentials(), true).expect("connect");

        let waiter = client.register_waiter("/orphan/topic").expect("waiter");
        broker.inject("/orphan/topic", b"{}");
        let started = Instant::now();
        assert_eq!(waiter.wait(Duration::from_secs(5)), WaitOutcome::Resolved);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn unanswered_wait_times_out_and_leaves_cache_alone() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        client.connect(&credentials(), true).expect("connect");
        client.watch_device(PRODUCT, SERIAL).expect("watch");

        let topic = topics::property_get_reply(PRODUCT, SERIAL);
        let started = Instant::now();
        let outcome = client.wait_for_topic(&topic, Duration::from_millis(50));
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(client.snapshot(SERIAL), Some(PropertySnapshot::default()));
        assert!(client.register_waiter(&topic).is_some());
    }

    #[test]
    fn second_waiter_on_same_topic_returns_immediately() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        client.connect(&credentials(), true).expect("connect");

        let _first = client.register_waiter("/t").expect("waiter");
        let started = Instant::now();
        assert_eq!(
            client.wait_for_topic("/t", Duration::from_secs(10)),
            WaitOutcome::AlreadyWaiting
        );
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn waiting_without_connection_is_rejected() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        assert_eq!(
            client.wait_for_topic("/t", Duration::from_secs(10)),
            WaitOutcome::NotConnected
        );
    }

    #[test]
    fn get_reply_merges_into_snapshot() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        client.connect(&credentials(), true).expect("connect");
        client.watch_device(PRODUCT, SERIAL).expect("watch");

        let topic = topics::property_get_reply(PRODUCT, SERIAL);
        let waiter = client.register_waiter(&topic).expect("waiter");
        broker.inject(&topic, &reply(0, json!({ "quantity": 77, "bogus": 1 })));
        assert_eq!(waiter.wait(Duration::from_secs(2)), WaitOutcome::Resolved);

        let snapshot = client.snapshot(SERIAL).expect("snapshot");
        assert_eq!(snapshot.get("quantity"), Some(&json!(77)));
        assert_eq!(snapshot.get("bogus"), None);
        assert!(snapshot.last_update_time > 0);
    }

    #[test]
    fn rejected_reply_is_recorded_without_touching_values() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        client.connect(&credentials(), true).expect("connect");
        client.watch_device(PRODUCT, SERIAL).expect("watch");

        let topic = topics::property_get_reply(PRODUCT, SERIAL);
        let waiter = client.register_waiter(&topic).expect("waiter");
        broker.inject(&topic, &reply(500, json!({ "quantity": 10 })));
        assert_eq!(waiter.wait(Duration::from_millis(150)), WaitOutcome::TimedOut);

        let snapshot = client.snapshot(SERIAL).expect("snapshot");
        assert!(snapshot.values().is_empty());
        assert_eq!(snapshot.last_update_time, 0);
        assert_eq!(snapshot.last_reply_error, Some((500, "m".to_string())));
    }

    #[test]
    fn unreadable_reply_leaves_waiter_pending() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        client.connect(&credentials(), true).expect("connect");
        client.watch_device(PRODUCT, SERIAL).expect("watch");

        let topic = topics::property_get_reply(PRODUCT, SERIAL);
        let waiter = client.register_waiter(&topic).expect("waiter");
        broker.inject(&topic, b"not json");
        assert_eq!(waiter.wait(Duration::from_millis(150)), WaitOutcome::TimedOut);
        assert_eq!(client.snapshot(SERIAL), Some(PropertySnapshot::default()));
    }

    #[test]
    fn state_events_only_wake_waiters() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        client.connect(&credentials(), true).expect("connect");
        client.watch_device(PRODUCT, SERIAL).expect("watch");

        let topic = topics::device_topic(PRODUCT, SERIAL, topics::PROPERTY_POST);
        let waiter = client.register_waiter(&topic).expect("waiter");
        broker.inject(&topic, &reply(0, json!({ "quantity": 10 })));
        assert_eq!(waiter.wait(Duration::from_secs(2)), WaitOutcome::Resolved);
        assert_eq!(client.snapshot(SERIAL), Some(PropertySnapshot::default()));
    }

    #[test]
    fn fetch_subscribes_publishes_waits_and_releases() {
        let broker = FakeBroker::default();
        let reply_topic = topics::property_get_reply(PRODUCT, SERIAL);
        let request_topic = topics::property_get(PRODUCT, SERIAL);
        {
            let reply_topic = reply_topic.clone();
            let request_topic = request_topic.clone();
            broker.respond_with(move |topic, _| {
                (topic == request_topic)
                    .then(|| (reply_topic.clone(), reply(0, json!({ "status": 5, "wind": 2 }))))
            });
        }
        let client = client(&broker);

        let snapshot = client
            .fetch_properties(&credentials(), PRODUCT, SERIAL, Duration::from_secs(5))
            .expect("fetch");
        assert_eq!(
            Value::Object(snapshot.values().clone()),
            json!({ "status": 5, "wind": 2 })
        );
        assert_eq!(snapshot.properties().status, 5);

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, request_topic);
        let request: Value = serde_json::from_slice(&published[0].1).expect("request json");
        assert_eq!(request["method"], "prop.get");
        assert_eq!(request["version"], PROPERTY_REQUEST_VERSION);

        assert!(broker.subscribed().contains(&reply_topic));
        assert!(broker.unsubscribed().contains(&reply_topic));
        assert!(!client.is_watching(SERIAL));
    }

    #[test]
    fn fetch_returns_cached_snapshot_without_traffic() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        client.connect(&credentials(), true).expect("connect");
        client.watch_device(PRODUCT, SERIAL).expect("watch");

        let snapshot = client
            .fetch_properties(&credentials(), PRODUCT, SERIAL, Duration::from_secs(5))
            .expect("fetch");
        assert_eq!(snapshot, PropertySnapshot::default());
        assert!(broker.published().is_empty());
    }

    #[test]
    fn disconnect_forgets_topics_and_snapshots() {
        let broker = FakeBroker::default();
        let client = client(&broker);
        client.connect(&credentials(), true).expect("connect");
        client.watch_device(PRODUCT, SERIAL).expect("watch");

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.desired_topics().is_empty());
        assert!(client.snapshot(SERIAL).is_none());
        assert_eq!(broker.disconnects(), 1);
    }
}
