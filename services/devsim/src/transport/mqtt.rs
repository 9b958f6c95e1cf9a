//! MQTT transport based on rumqttc
//!
//! One session per broker URL, opened lazily on the first publication and
//! shared by every later one. A session whose event loop fails is dropped so
//! the next publication reconnects.

use super::{MqttCredentials, MqttTransport};
use crate::error::{Result, SimulatorError};
use crate::events::MqttPublication;
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use url::Url;

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTTS_PORT: u16 = 8883;

#[derive(Debug, Clone, PartialEq)]
enum SessionState {
    Connecting,
    Connected,
    Failed(String),
}

struct Session {
    client: AsyncClient,
    state: watch::Receiver<SessionState>,
}

impl Session {
    fn has_failed(&self) -> bool {
        matches!(*self.state.borrow(), SessionState::Failed(_))
    }
}

pub struct RumqttcTransport {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    keep_alive: Duration,
}

impl Default for RumqttcTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RumqttcTransport {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            keep_alive: Duration::from_secs(30),
        }
    }

    /// Reuse the live session of a broker or open a new one
    fn session(&self, broker_url: &str, credentials: Option<&MqttCredentials>) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(broker_url) {
            if !session.has_failed() {
                return Ok(Arc::clone(session));
            }
        }

        let session = Arc::new(self.connect(broker_url, credentials)?);
        sessions.insert(broker_url.to_string(), Arc::clone(&session));
        Ok(session)
    }

    fn connect(&self, broker_url: &str, credentials: Option<&MqttCredentials>) -> Result<Session> {
        let url = Url::parse(broker_url)
            .map_err(|e| SimulatorError::transport(format!("Invalid MQTT broker URL '{}': {}", broker_url, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| SimulatorError::transport(format!("MQTT broker URL '{}' has no host", broker_url)))?;
        let secure = matches!(url.scheme(), "mqtts" | "ssl" | "tls");
        let port = url
            .port()
            .unwrap_or(if secure { DEFAULT_MQTTS_PORT } else { DEFAULT_MQTT_PORT });

        let client_id = format!("devsim_{}", uuid::Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id.as_str(), host, port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some(credentials) = credentials {
            options.set_credentials(credentials.user.as_str(), credentials.password.as_str());
        } else if !url.username().is_empty() {
            options.set_credentials(url.username(), url.password().unwrap_or_default());
        }
        if secure {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let broker = broker_url.to_string();

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            info!("Connected to MQTT broker: {}", broker);
                            let _ = state_tx.send(SessionState::Connected);
                        } else {
                            let reason = format!("connection refused: {:?}", ack.code);
                            warn!("MQTT broker {} {}", broker, reason);
                            let _ = state_tx.send(SessionState::Failed(reason));
                            break;
                        }
                    },
                    Ok(notification) => {
                        debug!("MQTT Event: {:?}", notification);
                    },
                    Err(e) => {
                        error!("MQTT connection error on {}: {}", broker, e);
                        let _ = state_tx.send(SessionState::Failed(e.to_string()));
                        break;
                    },
                }
            }
        });

        debug!("Opening MQTT session {} to {}:{}", client_id, host, port);
        Ok(Session {
            client,
            state: state_rx,
        })
    }

    fn forget(&self, broker_url: &str, session: &Arc<Session>) {
        let mut sessions = self.sessions.lock();
        if sessions.get(broker_url).is_some_and(|current| Arc::ptr_eq(current, session)) {
            sessions.remove(broker_url);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl MqttTransport for RumqttcTransport {
    async fn publish(&self, publication: &MqttPublication, credentials: Option<&MqttCredentials>) -> Result<()> {
        let session = self.session(&publication.url, credentials)?;

        let mut state = session.state.clone();
        let outcome = state
            .wait_for(|s| *s != SessionState::Connecting)
            .await
            .map(|s| s.clone())
            .map_err(|_| SimulatorError::transport("MQTT session closed before connecting"));

        let failure = match outcome {
            Ok(SessionState::Failed(reason)) => Some(reason),
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            self.forget(&publication.url, &session);
            return Err(SimulatorError::transport(format!(
                "MQTT broker {} unavailable: {}",
                publication.url, reason
            )));
        }

        session
            .client
            .publish(
                publication.topic.as_str(),
                QoS::AtLeastOnce,
                false,
                publication.payload.as_bytes().to_vec(),
            )
            .await?;
        debug!("Published message to topic: {}", publication.topic);
        Ok(())
    }

    async fn disconnect_all(&self) {
        let sessions: Vec<(String, Arc<Session>)> = self.sessions.lock().drain().collect();
        for (url, session) in sessions {
            if let Err(e) = session.client.disconnect().await {
                debug!("Error disconnecting from MQTT broker {}: {}", url, e);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn publication(url: &str) -> MqttPublication {
        MqttPublication {
            url: url.to_string(),
            topic: "/key/dev1/attrs".to_string(),
            payload: "t|21".to_string(),
        }
    }

    #[tokio::test]
    async fn test_invalid_broker_url() {
        let transport = RumqttcTransport::new();
        let err = transport.publish(&publication("not a url"), None).await.unwrap_err();
        assert_eq!(err.name(), "TransportError");
        assert_eq!(transport.session_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_broker_drops_the_session() {
        let transport = RumqttcTransport::new();
        let err = transport
            .publish(&publication("mqtt://127.0.0.1:1"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unavailable"));
        assert_eq!(transport.session_count(), 0);
    }
}
