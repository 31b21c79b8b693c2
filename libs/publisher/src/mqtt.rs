use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, NetworkOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::broker::{Broker, BrokerError, BrokerEvent, BrokerOptions, BrokerSession, ConnectResult, Connection};

/// Pause between a transport error and the next poll (which reconnects).
pub const RECONNECT_PERIOD: Duration = Duration::from_secs(1);
/// How long `disconnect` waits for the DISCONNECT packet to go out.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

const REQUEST_CAPACITY: usize = 64;

// ═══════════════════════════════════════════════════════════════
//  MQTT broker (rumqttc)
// ═══════════════════════════════════════════════════════════════

/// [`Broker`] backed by rumqttc. Must be used inside a tokio runtime:
/// `connect` spawns the task that drives the MQTT event loop.
#[derive(Debug, Default)]
pub struct MqttBroker;

impl Broker for MqttBroker {
    fn connect(&mut self, url: &str, options: &BrokerOptions) -> Result<Connection, BrokerError> {
        let mqtt_options = mqtt_options(url, options)?;
        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        let mut network = NetworkOptions::new();
        network.set_connection_timeout(options.connect_timeout.as_secs().max(1));
        eventloop.set_network_options(network);

        let (tx, rx) = mpsc::unbounded_channel();
        let poller = tokio::spawn(poll_events(eventloop, tx));

        Ok(Connection {
            session: Box::new(MqttSession { client, poller }),
            events: rx,
        })
    }
}

/// Build rumqttc options from a broker url (`mqtt://`, `tcp://`,
/// `mqtts://`, `ssl://`). The client id is added as an encoded query
/// pair unless the url already carries one.
pub fn mqtt_options(url: &str, options: &BrokerOptions) -> Result<MqttOptions, BrokerError> {
    let invalid = |detail: String| BrokerError::InvalidUrl { url: url.to_string(), detail };

    let mut parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    if !parsed.query_pairs().any(|(key, _)| key == "client_id") {
        parsed.query_pairs_mut().append_pair("client_id", &options.client_id);
    }

    let mut mqtt_options = MqttOptions::try_from(parsed).map_err(|e| invalid(e.to_string()))?;
    mqtt_options.set_keep_alive(options.keep_alive);
    Ok(mqtt_options)
}

// ═══════════════════════════════════════════════════════════════
//  Event loop → BrokerEvent
// ═══════════════════════════════════════════════════════════════

async fn poll_events(mut eventloop: EventLoop, events: mpsc::UnboundedSender<BrokerEvent>) {
    let mut acknowledged = false;

    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) if ack.code == ConnectReturnCode::Success => {
                acknowledged = true;
                BrokerEvent::Connect(ConnectResult::Success)
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                BrokerEvent::Connect(ConnectResult::Error(format!("connection refused: {:?}", ack.code)))
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => continue,
            Err(e) => {
                let event = classify(&e, acknowledged);
                acknowledged = false;
                if events.send(event).is_err() {
                    break;
                }
                tokio::time::sleep(RECONNECT_PERIOD).await;
                continue;
            }
        };

        if events.send(event).is_err() {
            break;
        }
    }

    tracing::debug!("mqtt event loop stopped");
}

/// Errors before the ConnAck belong to the connection attempt.
fn classify(error: &ConnectionError, acknowledged: bool) -> BrokerEvent {
    if acknowledged {
        return BrokerEvent::Error(error.to_string());
    }
    match error {
        ConnectionError::NetworkTimeout => BrokerEvent::Connect(ConnectResult::Timeout),
        other => BrokerEvent::Connect(ConnectResult::Error(other.to_string())),
    }
}

// ═══════════════════════════════════════════════════════════════
//  Session
// ═══════════════════════════════════════════════════════════════

struct MqttSession {
    client: AsyncClient,
    poller: JoinHandle<()>,
}

impl BrokerSession for MqttSession {
    fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| BrokerError::Request { operation: "subscribe", detail: e.to_string() })
    }

    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| BrokerError::Request { operation: "publish", detail: e.to_string() })
    }

    /// Queues DISCONNECT and waits until the event loop has written it.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            self.client
                .try_disconnect()
                .map_err(|e| BrokerError::Request { operation: "disconnect", detail: e.to_string() })?;

            if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut self.poller).await.is_err() {
                self.poller.abort();
                return Err(BrokerError::Request {
                    operation: "disconnect",
                    detail: format!("not flushed within {}s", DISCONNECT_TIMEOUT.as_secs()),
                });
            }
            Ok(())
        })
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.poller.abort();
    }
}
