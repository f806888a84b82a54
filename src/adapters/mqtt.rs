//! MQTT client adapter.
//!
//! Implements [`BrokerPort`] with mutual-TLS authentication from the active
//! [`CredentialSet`].  A connection thread translates client events:
//!
//! - `Connected` → `MqttConnected`
//! - last outstanding `Subscribed` ack → `MqttSubscribed`
//! - `Received` → `MqttDataReceived`, then the payload is routed by topic
//!   through [`Inbox::on_broker_data`]
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `EspMqttClient` from `esp_idf_svc::mqtt`.
//! - **all other targets**: simulation that records publishes and
//!   acknowledges immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{error, info};

use crate::app::ports::{BrokerError, BrokerPort};
use crate::channels::Inbox;
use crate::events::Event;
use crate::secrets::bundle::CredentialSet;

/// Broker endpoint, fixed at build time.
pub const BROKER_URL: &str = match option_env!("THING_BROKER_URL") {
    Some(url) => url,
    None => "mqtts://localhost:8883",
};

/// State shared with the connection thread.
struct Link {
    inbox: Arc<Inbox>,
    connected: AtomicBool,
    pending_subscriptions: AtomicUsize,
}

impl Link {
    fn on_connected(&self) {
        info!("MQTT connected");
        self.connected.store(true, Ordering::Release);
        let _ = self.inbox.bus().trigger(Event::MqttConnected);
    }

    fn on_disconnected(&self) {
        info!("MQTT disconnected");
        self.connected.store(false, Ordering::Release);
    }

    fn on_subscribed(&self) {
        let before = self
            .pending_subscriptions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if before == 1 {
            info!("MQTT subscribed");
            let _ = self.inbox.bus().trigger(Event::MqttSubscribed);
        }
    }

    fn on_data(&self, topic: &str, data: &[u8]) {
        info!("MQTT rx {} ({} bytes)", topic, data.len());
        let _ = self.inbox.bus().trigger(Event::MqttDataReceived);
        self.inbox.on_broker_data(topic, data);
    }
}

pub struct MqttAdapter {
    link: Arc<Link>,
    buffer_size: usize,
    #[cfg(target_os = "espidf")]
    client: Option<esp_idf_svc::mqtt::client::EspMqttClient<'static>>,
    #[cfg(not(target_os = "espidf"))]
    started: bool,
    /// Simulation: topics subscribed, in order.
    #[cfg(not(target_os = "espidf"))]
    pub subscriptions: Vec<String>,
    /// Simulation: `(topic, payload)` of every publish.
    #[cfg(not(target_os = "espidf"))]
    pub published: Vec<(String, Vec<u8>)>,
}

impl MqttAdapter {
    /// `buffer_size` bounds both directions of the client.
    pub fn new(inbox: Arc<Inbox>, buffer_size: usize) -> Self {
        Self {
            link: Arc::new(Link {
                inbox,
                connected: AtomicBool::new(false),
                pending_subscriptions: AtomicUsize::new(0),
            }),
            buffer_size,
            #[cfg(target_os = "espidf")]
            client: None,
            #[cfg(not(target_os = "espidf"))]
            started: false,
            #[cfg(not(target_os = "espidf"))]
            subscriptions: Vec::new(),
            #[cfg(not(target_os = "espidf"))]
            published: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Acquire)
    }

    /// Simulation: a message arriving from the broker.
    #[cfg(not(target_os = "espidf"))]
    pub fn deliver(&self, topic: &str, data: &[u8]) {
        self.link.on_data(topic, data);
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self, bundle: &CredentialSet) -> Result<(), BrokerError> {
        use esp_idf_svc::mqtt::client::{
            Details, EspMqttClient, EventPayload, MqttClientConfiguration,
        };
        use esp_idf_svc::tls::X509;

        // The client keeps borrowing the PEMs for its whole life.
        fn pem(bytes: &[u8]) -> X509<'static> {
            let mut owned = bytes.to_vec();
            owned.push(0);
            X509::pem_until_nul(Box::leak(owned.into_boxed_slice()))
        }

        let conf = MqttClientConfiguration {
            server_certificate: Some(pem(&bundle.root_ca)),
            client_certificate: Some(pem(&bundle.thing_cert)),
            private_key: Some(pem(&bundle.thing_key)),
            buffer_size: self.buffer_size,
            out_buffer_size: self.buffer_size,
            ..Default::default()
        };
        let (client, mut connection) = EspMqttClient::new(BROKER_URL, &conf).map_err(|e| {
            error!("MQTT client init failed: {:?}", e);
            BrokerError::Rejected
        })?;

        let link = Arc::clone(&self.link);
        std::thread::Builder::new()
            .name("mqtt-rx".into())
            .stack_size(6 * 1024)
            .spawn(move || {
                while let Ok(event) = connection.next() {
                    match event.payload() {
                        EventPayload::Connected(_) => link.on_connected(),
                        EventPayload::Disconnected => link.on_disconnected(),
                        EventPayload::Subscribed(_) => link.on_subscribed(),
                        EventPayload::Received {
                            topic: Some(topic),
                            data,
                            details: Details::Complete,
                            ..
                        } => link.on_data(topic, data),
                        EventPayload::Received { .. } => {
                            error!("MQTT fragmented message dropped");
                        }
                        EventPayload::Error(e) => error!("MQTT error: {:?}", e),
                        _ => {}
                    }
                }
                info!("MQTT connection closed");
            })
            .map_err(|_| BrokerError::Rejected)?;

        self.client = Some(client);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self, _bundle: &CredentialSet) -> Result<(), BrokerError> {
        info!("MQTT(sim): connecting to {}", BROKER_URL);
        self.started = true;
        self.link.on_connected();
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_stop(&mut self) -> Result<(), BrokerError> {
        // Dropping the client ends the connection thread.
        self.client.take().map(drop).ok_or(BrokerError::NotConnected)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_stop(&mut self) -> Result<(), BrokerError> {
        if !core::mem::replace(&mut self.started, false) {
            return Err(BrokerError::NotConnected);
        }
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        use esp_idf_svc::mqtt::client::QoS;
        let client = self.client.as_mut().ok_or(BrokerError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .map(drop)
            .map_err(|_| BrokerError::Rejected)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        if !self.started {
            return Err(BrokerError::NotConnected);
        }
        self.subscriptions.push(topic.to_string());
        self.link.on_subscribed();
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        use esp_idf_svc::mqtt::client::QoS;
        let client = self.client.as_mut().ok_or(BrokerError::NotConnected)?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .map(drop)
            .map_err(|_| BrokerError::Rejected)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// BrokerPort
// ───────────────────────────────────────────────────────────────

impl BrokerPort for MqttAdapter {
    fn start(&mut self, bundle: &CredentialSet) -> Result<(), BrokerError> {
        info!("MQTT: starting client");
        self.platform_start(bundle)
    }

    fn stop(&mut self) -> Result<(), BrokerError> {
        info!("MQTT: stopping client");
        self.link.connected.store(false, Ordering::Release);
        self.platform_stop()
    }

    fn subscribe(&mut self, topics: &[&str]) -> Result<(), BrokerError> {
        self.link
            .pending_subscriptions
            .store(topics.len(), Ordering::Release);
        for topic in topics {
            self.platform_subscribe(topic).inspect_err(|e| {
                error!("MQTT subscribe {} failed: {}", topic, e);
            })?;
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if !self.is_connected() {
            error!("MQTT not connected");
            return Err(BrokerError::NotConnected);
        }
        if payload.len() > self.buffer_size {
            return Err(BrokerError::PayloadTooLarge);
        }
        self.platform_publish(topic, payload)?;
        info!("Published {} bytes to {}", payload.len(), topic);
        Ok(())
    }
}
