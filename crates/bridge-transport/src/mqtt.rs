//! MQTT bus implementation.
//!
//! This module provides the bus adapter using rumqttc. Reconnection is
//! handled by the rumqttc event loop; this adapter only keeps polling it and
//! re-subscribes after every successful (re)connect.

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeReasonCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::traits::{BusMessage, BusPublisher, TransportError};

/// MQTT connection configuration.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// Optional credentials.
    pub credentials: Option<(String, String)>,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// QoS level for subscriptions and publishes (0, 1 or 2).
    pub qos: u8,
    /// Capacity of the client request channel.
    pub channel_capacity: usize,
    /// Pause before polling again after an event loop error.
    pub reconnect_delay: Duration,
    /// Topic filters to subscribe to on every connect.
    pub subscriptions: Vec<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "mbridge".to_string(),
            credentials: None,
            keep_alive: Duration::from_secs(30),
            qos: 1,
            channel_capacity: 256,
            reconnect_delay: Duration::from_secs(1),
            subscriptions: vec!["media/status/+/+".to_string()],
        }
    }
}

/// Convert a numeric QoS level, clamping anything above 2.
#[must_use]
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Publishing handle to an MQTT broker.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    qos: QoS,
    connected: Arc<AtomicBool>,
}

impl MqttBus {
    /// Create the client and its event loop.
    ///
    /// Nothing touches the network until [`MqttEventLoop::run`] is polled.
    #[must_use]
    pub fn new(config: MqttConfig) -> (Self, MqttEventLoop) {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        if let Some((username, password)) = &config.credentials {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity);
        let qos = qos_from_level(config.qos);
        let connected = Arc::new(AtomicBool::new(false));

        info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "MQTT client created"
        );

        let bus = Self {
            client: client.clone(),
            qos,
            connected: Arc::clone(&connected),
        };
        let event_loop = MqttEventLoop {
            eventloop,
            client,
            qos,
            connected,
            subscriptions: config.subscriptions,
            reconnect_delay: config.reconnect_delay,
        };
        (bus, event_loop)
    }
}

#[async_trait]
impl BusPublisher for MqttBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        trace!(topic = %topic, bytes = payload.len(), "MQTT publish");
        self.client
            .publish(topic, self.qos, false, payload.to_vec())
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn is_healthy(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Drives the MQTT connection and forwards inbound publishes.
pub struct MqttEventLoop {
    eventloop: EventLoop,
    client: AsyncClient,
    qos: QoS,
    connected: Arc<AtomicBool>,
    subscriptions: Vec<String>,
    reconnect_delay: Duration,
}

impl MqttEventLoop {
    /// Poll the connection until the receiving side of `inbound` is dropped.
    ///
    /// Inbound publishes are forwarded in arrival order. Connection and
    /// subscription errors are logged; polling resumes after the configured
    /// delay and rumqttc reconnects on the next poll.
    pub async fn run(mut self, inbound: mpsc::Sender<BusMessage>) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(code = ?ack.code, "Connected to MQTT broker");
                    self.connected.store(true, Ordering::SeqCst);
                    self.subscribe_all();
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|c| matches!(c, SubscribeReasonCode::Failure))
                    {
                        warn!(pkid = ack.pkid, "Broker rejected a status subscription");
                    } else {
                        debug!(pkid = ack.pkid, "Subscription acknowledged");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = BusMessage::new(publish.topic, publish.payload);
                    if inbound.send(message).await.is_err() {
                        debug!("Inbound receiver dropped, stopping MQTT loop");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker sent disconnect");
                    self.connected.store(false, Ordering::SeqCst);
                }
                Ok(_) => {}
                Err(e) => {
                    if self.connected.swap(false, Ordering::SeqCst) {
                        warn!(error = %e, "MQTT connection lost");
                    } else {
                        debug!(error = %e, "MQTT connection attempt failed");
                    }
                    if inbound.is_closed() {
                        break;
                    }
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }

    fn subscribe_all(&self) {
        for filter in &self.subscriptions {
            match self.client.try_subscribe(filter.as_str(), self.qos) {
                Ok(()) => debug!(filter = %filter, "Subscribing"),
                Err(e) => warn!(filter = %filter, error = %e, "Subscribe request failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mqtt_config_default() {
        let config = MqttConfig::default();
        assert_eq!(config.port, 1883);
        assert_eq!(config.subscriptions, vec!["media/status/+/+".to_string()]);
    }

    #[test]
    fn test_qos_from_level() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
        assert_eq!(qos_from_level(7), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_new_bus_starts_disconnected() {
        let (bus, _event_loop) = MqttBus::new(MqttConfig::default());
        assert_eq!(bus.name(), "mqtt");
        assert!(!bus.is_healthy());
    }
}
