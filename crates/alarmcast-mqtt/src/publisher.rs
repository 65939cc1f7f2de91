//! Notification publisher
//!
//! One `publish` call walks
//! `Idle -> Connecting -> Connected -> Publishing -> Done | Failed`.
//! The deadline covers everything from the start of the connection attempt;
//! when it fires first the session is force-closed and the call resolves to
//! `Error::Timeout`. `ConfigMissing` is reached before any network activity.

use crate::session::{BrokerConnector, BrokerSession, RumqttcConnector};
use alarmcast_core::types::NotificationPayload;
use alarmcast_core::{BrokerSettings, Error, QosLevel, Result};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Publisher lifecycle for a single invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Idle,
    ConfigMissing,
    Connecting,
    Connected,
    Publishing,
    Done,
    Failed,
}

impl PublishState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PublishState::ConfigMissing | PublishState::Done | PublishState::Failed
        )
    }

    /// Legal transitions, including the timeout edges into `Failed`
    pub fn can_transition(&self, to: PublishState) -> bool {
        use PublishState::*;
        matches!(
            (self, to),
            (Idle, ConfigMissing)
                | (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connected, Publishing)
                | (Connected, Failed)
                | (Publishing, Done)
                | (Publishing, Failed)
        )
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublishState::Idle => "IDLE",
            PublishState::ConfigMissing => "CONFIG_MISSING",
            PublishState::Connecting => "CONNECTING",
            PublishState::Connected => "CONNECTED",
            PublishState::Publishing => "PUBLISHING",
            PublishState::Done => "DONE",
            PublishState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Shared view of the current state; the timeout branch reads it to report
/// where the exchange stalled
#[derive(Debug, Clone)]
struct StateCell(Arc<Mutex<PublishState>>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(PublishState::Idle)))
    }

    fn get(&self) -> PublishState {
        *self.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn advance(&self, to: PublishState) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        if state.can_transition(to) {
            debug!(from = %*state, to = %to, "Publisher state");
            *state = to;
        } else {
            warn!(from = %*state, to = %to, "Ignoring illegal publisher transition");
        }
    }
}

/// Single settlement point for a publish outcome.
///
/// The first `settle` wins; later attempts (a PUBACK that arrives after the
/// deadline, an error raised while closing) are ignored.
pub struct Settlement {
    outcome: Option<Result<()>>,
}

impl Settlement {
    pub fn new() -> Self {
        Self { outcome: None }
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    /// Returns false when an outcome was already recorded
    pub fn settle(&mut self, outcome: Result<()>) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    /// Consume the recorded outcome. An unsettled publish is reported as a
    /// publish failure rather than a silent success.
    pub fn into_outcome(self) -> Result<()> {
        self.outcome
            .unwrap_or_else(|| Err(Error::Publish("publish was never settled".into())))
    }
}

impl Default for Settlement {
    fn default() -> Self {
        Self::new()
    }
}

/// Details of a successful publish
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    pub topic: String,
    pub client_id: String,
    pub qos: QosLevel,
    pub elapsed: Duration,
}

/// Publishes one notification per call over a fresh connection
#[derive(Clone)]
pub struct Publisher {
    settings: BrokerSettings,
    connector: Arc<dyn BrokerConnector>,
}

impl Publisher {
    pub fn new(settings: BrokerSettings) -> Self {
        Self::with_connector(settings, Arc::new(RumqttcConnector))
    }

    pub fn with_connector(settings: BrokerSettings, connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            settings,
            connector,
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub async fn publish(&self, payload: &NotificationPayload) -> Result<PublishReceipt> {
        let state = StateCell::new();

        if let Err(err) = self.settings.validate() {
            error!(
                has_broker_url = self.settings.has_url(),
                has_username = self.settings.has_username(),
                has_password = self.settings.has_password(),
                code = err.code(),
                "MQTT configuration not usable: {}",
                err
            );
            state.advance(PublishState::ConfigMissing);
            return Err(err);
        }

        let body = payload.to_json()?;
        let topic = self.settings.topic.clone();
        let qos = self.settings.qos;
        let deadline = self.settings.timeout;
        let client_id = format!(
            "{}-{}",
            self.settings.client_id_prefix,
            Uuid::new_v4().simple()
        );

        let mut session = self.connector.open(&self.settings, &client_id)?;
        info!(broker = %self.settings.url, %topic, %client_id, "Connecting to MQTT broker");

        let started = Instant::now();
        let mut settlement = Settlement::new();

        let exchange = Self::exchange(session.as_mut(), &state, &topic, qos, body);
        match tokio::time::timeout(deadline, exchange).await {
            Ok(result) => {
                settlement.settle(result);
            }
            Err(_) => {
                warn!(
                    stalled_in = %state.get(),
                    timeout = ?deadline,
                    "MQTT publish timeout"
                );
                settlement.settle(Err(Error::Timeout(deadline)));
            }
        }

        for event in session.close().await {
            if let Some(late) = event.as_outcome() {
                if !settlement.settle(late) {
                    debug!(?event, "Ignoring broker event after settlement");
                }
            }
        }

        let elapsed = started.elapsed();
        match settlement.into_outcome() {
            Ok(()) => {
                state.advance(PublishState::Done);
                info!(%topic, %client_id, qos = %qos, ?elapsed, "MQTT message published");
                Ok(PublishReceipt {
                    topic,
                    client_id,
                    qos,
                    elapsed,
                })
            }
            Err(err) => {
                state.advance(PublishState::Failed);
                error!(%topic, %client_id, code = err.code(), "Failed to publish MQTT message: {}", err);
                Err(err)
            }
        }
    }

    async fn exchange(
        session: &mut dyn BrokerSession,
        state: &StateCell,
        topic: &str,
        qos: QosLevel,
        body: Vec<u8>,
    ) -> Result<()> {
        state.advance(PublishState::Connecting);
        session.connect().await?;
        state.advance(PublishState::Connected);
        info!("Connected to MQTT broker");

        state.advance(PublishState::Publishing);
        session.publish(topic, qos, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::BrokerEvent;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Scripted broker behaviour
    #[derive(Clone, Default)]
    struct Script {
        connect_delay: Option<Duration>,
        /// None: the broker never answers the publish
        ack_delay: Option<Duration>,
        refuse_connect: bool,
        reject_publish: bool,
    }

    #[derive(Default)]
    struct Record {
        opened: usize,
        closed: usize,
        client_ids: Vec<String>,
        published: Vec<(String, QosLevel, Vec<u8>)>,
    }

    struct FakeConnector {
        script: Script,
        record: Arc<Mutex<Record>>,
    }

    impl FakeConnector {
        fn new(script: Script) -> (Arc<Self>, Arc<Mutex<Record>>) {
            let record = Arc::new(Mutex::new(Record::default()));
            (
                Arc::new(Self {
                    script,
                    record: record.clone(),
                }),
                record,
            )
        }
    }

    impl BrokerConnector for FakeConnector {
        fn open(&self, _: &BrokerSettings, client_id: &str) -> Result<Box<dyn BrokerSession>> {
            let mut record = self.record.lock().unwrap();
            record.opened += 1;
            record.client_ids.push(client_id.to_string());
            Ok(Box::new(FakeSession {
                script: self.script.clone(),
                record: self.record.clone(),
                ack_pending: false,
            }))
        }
    }

    struct FakeSession {
        script: Script,
        record: Arc<Mutex<Record>>,
        ack_pending: bool,
    }

    #[async_trait]
    impl BrokerSession for FakeSession {
        async fn connect(&mut self) -> Result<()> {
            match self.script.connect_delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
            if self.script.refuse_connect {
                return Err(Error::Connection("certificate verify failed".into()));
            }
            Ok(())
        }

        async fn publish(&mut self, topic: &str, qos: QosLevel, body: Vec<u8>) -> Result<()> {
            self.record
                .lock()
                .unwrap()
                .published
                .push((topic.to_string(), qos, body));
            self.ack_pending = true;
            match self.script.ack_delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
            self.ack_pending = false;
            if self.script.reject_publish {
                return Err(Error::Publish("not authorized".into()));
            }
            Ok(())
        }

        async fn close(&mut self) -> Vec<BrokerEvent> {
            self.record.lock().unwrap().closed += 1;
            // A slow broker acknowledges after we gave up
            if self.ack_pending {
                vec![BrokerEvent::PubAck(1)]
            } else {
                Vec::new()
            }
        }
    }

    fn settings() -> BrokerSettings {
        BrokerSettings {
            url: "mqtts://broker.example.com".into(),
            username: "device".into(),
            password: "secret".into(),
            topic: "home/audio/device1".into(),
            qos: QosLevel::AtMostOnce,
            timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(30),
            ca_file: None,
            client_id_prefix: "alarmcast".into(),
        }
    }

    fn payload() -> NotificationPayload {
        NotificationPayload::new(
            "https://storage.example.com/b/audio/alarm1.mp3?sig=abc",
            Utc::now(),
            "audio/alarm1.mp3",
        )
    }

    fn responsive() -> Script {
        Script {
            connect_delay: Some(Duration::from_millis(100)),
            ack_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_success() {
        let (connector, record) = FakeConnector::new(responsive());
        let publisher = Publisher::with_connector(settings(), connector);

        let receipt = publisher.publish(&payload()).await.unwrap();
        assert_eq!(receipt.topic, "home/audio/device1");
        assert_eq!(receipt.qos, QosLevel::AtMostOnce);
        assert!(receipt.client_id.starts_with("alarmcast-"));

        let record = record.lock().unwrap();
        assert_eq!(record.opened, 1);
        assert_eq!(record.closed, 1);
        assert_eq!(record.published.len(), 1);

        let (topic, qos, body) = &record.published[0];
        assert_eq!(topic, "home/audio/device1");
        assert_eq!(*qos, QosLevel::AtMostOnce);
        let sent = NotificationPayload::from_json(body).unwrap();
        assert_eq!(sent.filename, "alarm1.mp3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_client_id_per_publish() {
        let (connector, record) = FakeConnector::new(responsive());
        let publisher = Publisher::with_connector(settings(), connector);

        publisher.publish(&payload()).await.unwrap();
        publisher.publish(&payload()).await.unwrap();

        let record = record.lock().unwrap();
        assert_eq!(record.opened, 2);
        assert_eq!(record.closed, 2);
        assert_ne!(record.client_ids[0], record.client_ids[1]);
    }

    #[tokio::test]
    async fn test_missing_credentials_never_connect() {
        for (username, password) in [("", "secret"), ("device", ""), ("", "")] {
            let (connector, record) = FakeConnector::new(responsive());
            let mut settings = settings();
            settings.username = username.into();
            settings.password = password.into();

            let err = Publisher::with_connector(settings, connector)
                .publish(&payload())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::ConfigMissing { .. }));

            let record = record.lock().unwrap();
            assert_eq!(record.opened, 0);
            assert!(record.published.is_empty());
        }
    }

    #[tokio::test]
    async fn test_missing_url_never_connects() {
        let (connector, record) = FakeConnector::new(responsive());
        let mut settings = settings();
        settings.url = String::new();

        let err = Publisher::with_connector(settings, connector)
            .publish(&payload())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ConfigMissing");
        assert_eq!(record.lock().unwrap().opened, 0);
    }

    #[tokio::test]
    async fn test_bad_client_id_prefix_never_connects() {
        let (connector, record) = FakeConnector::new(responsive());
        let mut settings = settings();
        settings.client_id_prefix = " alarmcast".into();

        let err = Publisher::with_connector(settings, connector)
            .publish(&payload())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "InvalidConfig");
        assert_eq!(record.lock().unwrap().opened, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure_closes() {
        let (connector, record) = FakeConnector::new(Script {
            refuse_connect: true,
            ..responsive()
        });

        let err = Publisher::with_connector(settings(), connector)
            .publish(&payload())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));

        let record = record.lock().unwrap();
        assert_eq!(record.closed, 1);
        assert!(record.published.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_closes() {
        let (connector, record) = FakeConnector::new(Script {
            reject_publish: true,
            ..responsive()
        });

        let err = Publisher::with_connector(settings(), connector)
            .publish(&payload())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Publish(_)));
        assert_eq!(record.lock().unwrap().closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_broker_never_acks() {
        let (connector, record) = FakeConnector::new(Script {
            connect_delay: Some(Duration::from_millis(50)),
            ack_delay: None,
            ..Default::default()
        });

        let started = Instant::now();
        let err = Publisher::with_connector(settings(), connector)
            .publish(&payload())
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(10)));
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(10) + Duration::from_millis(50));
        assert_eq!(record.lock().unwrap().closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_while_connecting() {
        let (connector, record) = FakeConnector::new(Script {
            connect_delay: None,
            ..responsive()
        });

        let err = Publisher::with_connector(settings(), connector)
            .publish(&payload())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TimeoutFailure");

        let record = record.lock().unwrap();
        assert_eq!(record.closed, 1);
        assert!(record.published.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_ack_does_not_change_outcome() {
        let (connector, record) = FakeConnector::new(Script {
            connect_delay: Some(Duration::from_millis(50)),
            ack_delay: Some(Duration::from_secs(12)),
            ..Default::default()
        });

        let err = Publisher::with_connector(settings(), connector)
            .publish(&payload())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(record.lock().unwrap().closed, 1);
    }

    #[test]
    fn test_settlement_first_outcome_wins() {
        let mut settlement = Settlement::new();
        assert!(!settlement.is_settled());
        assert!(settlement.settle(Err(Error::Timeout(Duration::from_secs(10)))));
        assert!(!settlement.settle(Ok(())));
        assert!(!settlement.settle(Err(Error::Publish("late".into()))));
        assert!(matches!(settlement.into_outcome(), Err(Error::Timeout(_))));
    }

    #[test]
    fn test_unsettled_is_failure() {
        assert!(Settlement::new().into_outcome().is_err());
    }

    #[test]
    fn test_state_transitions() {
        use PublishState::*;
        assert!(Idle.can_transition(Connecting));
        assert!(Idle.can_transition(ConfigMissing));
        assert!(Connecting.can_transition(Failed));
        assert!(Connected.can_transition(Failed));
        assert!(Publishing.can_transition(Failed));
        assert!(Publishing.can_transition(Done));
        assert!(!Idle.can_transition(Publishing));
        assert!(!Done.can_transition(Failed));
        assert!(!Failed.can_transition(Done));
        assert!(Done.is_terminal() && Failed.is_terminal() && ConfigMissing.is_terminal());
        assert_eq!(ConfigMissing.to_string(), "CONFIG_MISSING");
    }

    #[test]
    fn test_state_cell_ignores_illegal_moves() {
        let cell = StateCell::new();
        cell.advance(PublishState::Connecting);
        cell.advance(PublishState::Failed);
        cell.advance(PublishState::Done);
        assert_eq!(cell.get(), PublishState::Failed);
    }
}
