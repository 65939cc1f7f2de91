//! Broker sessions
//!
//! A session is one connection identity used for exactly one publish.
//! `BrokerConnector::open` must not touch the network; all I/O starts in
//! `BrokerSession::connect`.

use crate::endpoint::BrokerEndpoint;
use crate::tls::client_tls;
use alarmcast_core::{BrokerSettings, Error, QosLevel, Result};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    Transport,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Time given to the event loop to flush DISCONNECT before it is dropped
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Creates sessions for the publisher
pub trait BrokerConnector: Send + Sync {
    fn open(&self, settings: &BrokerSettings, client_id: &str) -> Result<Box<dyn BrokerSession>>;
}

#[async_trait]
pub trait BrokerSession: Send {
    /// Dial the broker and wait for its CONNACK
    async fn connect(&mut self) -> Result<()>;

    /// Publish once and wait for the terminal event of that QoS level
    async fn publish(&mut self, topic: &str, qos: QosLevel, body: Vec<u8>) -> Result<()>;

    /// Release the connection. Returns broker events that arrived but were
    /// never consumed. Calling it again is a no-op.
    async fn close(&mut self) -> Vec<BrokerEvent>;
}

/// Broker activity relevant to a single publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connected,
    ConnectRefused(String),
    /// The publish left the local transport; carries the packet id
    PublishWritten(u16),
    PubAck(u16),
    DisconnectSent,
    BrokerDisconnect,
    Failed(String),
    Other,
}

impl BrokerEvent {
    pub fn from_mqtt(event: &Event) -> Self {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    BrokerEvent::Connected
                } else {
                    BrokerEvent::ConnectRefused(format!("{:?}", ack.code))
                }
            }
            Event::Incoming(Packet::PubAck(ack)) => BrokerEvent::PubAck(ack.pkid),
            Event::Incoming(Packet::Disconnect) => BrokerEvent::BrokerDisconnect,
            Event::Outgoing(Outgoing::Publish(pkid)) => BrokerEvent::PublishWritten(*pkid),
            Event::Outgoing(Outgoing::Disconnect) => BrokerEvent::DisconnectSent,
            _ => BrokerEvent::Other,
        }
    }

    /// The publish outcome this event would settle, if any
    pub fn as_outcome(&self) -> Option<Result<()>> {
        match self {
            BrokerEvent::PubAck(_) | BrokerEvent::PublishWritten(_) => Some(Ok(())),
            BrokerEvent::Failed(reason) => Some(Err(Error::Publish(reason.clone()))),
            BrokerEvent::BrokerDisconnect => {
                Some(Err(Error::Publish("broker closed the session".into())))
            }
            _ => None,
        }
    }
}

fn map_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
    }
}

/// Production connector backed by `rumqttc`
#[derive(Debug, Clone, Default)]
pub struct RumqttcConnector;

impl BrokerConnector for RumqttcConnector {
    fn open(&self, settings: &BrokerSettings, client_id: &str) -> Result<Box<dyn BrokerSession>> {
        let endpoint = BrokerEndpoint::parse(&settings.url)?;
        let tls = client_tls(settings.ca_file.as_deref())?;

        let mut opts = MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port);
        opts.set_credentials(settings.username.clone(), settings.password.clone());
        opts.set_keep_alive(settings.keep_alive);
        opts.set_clean_session(true);
        opts.set_transport(Transport::tls_with_config(tls));

        let (client, eventloop) = AsyncClient::new(opts, 10);

        debug!(
            host = %endpoint.host,
            port = endpoint.port,
            client_id,
            "Prepared broker session"
        );

        Ok(Box::new(RumqttcSession::new(client, eventloop)))
    }
}

pub struct RumqttcSession {
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    events: Option<mpsc::UnboundedReceiver<BrokerEvent>>,
    driver: Option<JoinHandle<()>>,
    closed: bool,
}

impl RumqttcSession {
    fn new(client: AsyncClient, eventloop: EventLoop) -> Self {
        Self {
            client,
            eventloop: Some(eventloop),
            events: None,
            driver: None,
            closed: false,
        }
    }

    /// Poll the event loop until the first error; never reconnects
    async fn drive(mut eventloop: EventLoop, events: mpsc::UnboundedSender<BrokerEvent>) {
        loop {
            match eventloop.poll().await {
                Ok(event) => {
                    if events.send(BrokerEvent::from_mqtt(&event)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = events.send(BrokerEvent::Failed(err.to_string()));
                    break;
                }
            }
        }
    }
}

/// Wait for the CONNACK that opens the session
async fn await_connack(events: &mut mpsc::UnboundedReceiver<BrokerEvent>) -> Result<()> {
    loop {
        match events.recv().await {
            Some(BrokerEvent::Connected) => return Ok(()),
            Some(BrokerEvent::ConnectRefused(code)) => {
                return Err(Error::Connection(format!("broker refused connection: {}", code)))
            }
            Some(BrokerEvent::Failed(reason)) => return Err(Error::Connection(reason)),
            Some(BrokerEvent::BrokerDisconnect) => {
                return Err(Error::Connection("broker closed the session".into()))
            }
            Some(_) => continue,
            None => return Err(Error::Connection("event loop stopped".into())),
        }
    }
}

/// Wait for the terminal event of a publish at `qos`: the outgoing write
/// for QoS 0, the PUBACK of the written packet for QoS 1
async fn await_publish_outcome(
    events: &mut mpsc::UnboundedReceiver<BrokerEvent>,
    qos: QosLevel,
) -> Result<()> {
    let mut written: Option<u16> = None;
    loop {
        match events.recv().await {
            Some(BrokerEvent::PublishWritten(pkid)) => {
                if qos == QosLevel::AtMostOnce {
                    return Ok(());
                }
                written = Some(pkid);
            }
            Some(BrokerEvent::PubAck(pkid)) => {
                if written == Some(pkid) {
                    return Ok(());
                }
                debug!(pkid, ?written, "Ignoring PUBACK for another packet");
            }
            Some(event) => {
                if let Some(Err(err)) = event.as_outcome() {
                    return Err(err);
                }
            }
            None => return Err(Error::Publish("event loop stopped".into())),
        }
    }
}

/// Collect unconsumed events until DISCONNECT has been written or `grace`
/// runs out
async fn drain_until_disconnect(
    events: &mut mpsc::UnboundedReceiver<BrokerEvent>,
    grace: Duration,
) -> Vec<BrokerEvent> {
    let mut leftover = Vec::new();
    let _ = tokio::time::timeout(grace, async {
        while let Some(event) = events.recv().await {
            match event {
                BrokerEvent::DisconnectSent => break,
                BrokerEvent::Other => {}
                other => leftover.push(other),
            }
        }
    })
    .await;
    while let Ok(event) = events.try_recv() {
        if event != BrokerEvent::Other {
            leftover.push(event);
        }
    }
    leftover
}

#[async_trait]
impl BrokerSession for RumqttcSession {
    async fn connect(&mut self) -> Result<()> {
        let eventloop = self
            .eventloop
            .take()
            .ok_or_else(|| Error::Connection("session already used".into()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.driver = Some(tokio::spawn(Self::drive(eventloop, tx)));
        await_connack(self.events.insert(rx)).await
    }

    async fn publish(&mut self, topic: &str, qos: QosLevel, body: Vec<u8>) -> Result<()> {
        let events = self
            .events
            .as_mut()
            .ok_or_else(|| Error::Publish("session is not connected".into()))?;

        self.client
            .publish(topic, map_qos(qos), false, body)
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;

        await_publish_outcome(events, qos).await
    }

    async fn close(&mut self) -> Vec<BrokerEvent> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;

        // Never connected: nothing was dialed
        let Some(mut driver) = self.driver.take() else {
            self.eventloop = None;
            return Vec::new();
        };

        if let Err(err) = self.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", err);
        }

        let leftover = match self.events.take() {
            Some(mut events) => drain_until_disconnect(&mut events, CLOSE_GRACE).await,
            None => Vec::new(),
        };

        // Dropping the event loop closes the socket
        driver.abort();
        if let Err(err) = (&mut driver).await {
            if !err.is_cancelled() {
                warn!("Broker event loop ended abnormally: {}", err);
            }
        }

        leftover
    }
}

impl Drop for RumqttcSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}
