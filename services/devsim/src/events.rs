//! Simulation events
//!
//! A run reports everything it does through one event stream. The stream is
//! closed by the `end` event: nothing is delivered after it.

use crate::config::Attribute;
use crate::error::SimulatorError;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use std::pin::Pin;
use parking_lot::Mutex;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::trace;

/// Body of an outgoing HTTP request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    Json(Value),
    Text(String),
}

impl RequestBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MqttPublication {
    /// Broker URL, `mqtt://host:port`
    pub url: String,
    pub topic: String,
    pub payload: String,
}

/// A request as sent through a transport, attached to events for diagnosis
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum OutboundRequest {
    Http(HttpRequest),
    Mqtt(MqttPublication),
}

impl OutboundRequest {
    pub fn url(&self) -> &str {
        match self {
            Self::Http(request) => &request.url,
            Self::Mqtt(publication) => &publication.url,
        }
    }

    pub fn as_http(&self) -> Option<&HttpRequest> {
        match self {
            Self::Http(request) => Some(request),
            Self::Mqtt(_) => None,
        }
    }

    pub fn as_mqtt(&self) -> Option<&MqttPublication> {
        match self {
            Self::Mqtt(publication) => Some(publication),
            Self::Http(_) => None,
        }
    }
}

/// Identification of the element an update was scheduled for
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ElementSummary {
    Entity {
        entity_name: String,
        entity_type: String,
    },
    Device {
        device_id: String,
        protocol: String,
        api_key: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub enum SimulationEvent {
    TokenRequest {
        request: OutboundRequest,
    },
    TokenResponse {
        expires_at: DateTime<Utc>,
    },
    TokenRequestScheduled {
        scheduled_at: DateTime<Utc>,
    },
    UpdateScheduled {
        schedule: String,
        element: ElementSummary,
        /// Static attributes first, then the scheduled ones
        attributes: Vec<Attribute>,
    },
    UpdateRequest {
        request: OutboundRequest,
    },
    UpdateResponse {
        request: OutboundRequest,
        response: Value,
    },
    Error {
        error: SimulatorError,
        request: Option<OutboundRequest>,
        response: Option<Value>,
    },
    Stop,
    End,
}

impl SimulationEvent {
    /// Event name as exposed to callers
    pub fn name(&self) -> &'static str {
        match self {
            Self::TokenRequest { .. } => "token-request",
            Self::TokenResponse { .. } => "token-response",
            Self::TokenRequestScheduled { .. } => "token-request-scheduled",
            Self::UpdateScheduled { .. } => "update-scheduled",
            Self::UpdateRequest { .. } => "update-request",
            Self::UpdateResponse { .. } => "update-response",
            Self::Error { .. } => "error",
            Self::Stop => "stop",
            Self::End => "end",
        }
    }

    pub fn error(error: SimulatorError) -> Self {
        Self::Error {
            error,
            request: None,
            response: None,
        }
    }

    pub fn request_error(error: SimulatorError, request: OutboundRequest, response: Option<Value>) -> Self {
        Self::Error {
            error,
            request: Some(request),
            response,
        }
    }
}

/// Sending side of a run's event stream
#[derive(Debug, Clone)]
pub struct EventNotifier {
    sender: mpsc::UnboundedSender<SimulationEvent>,
    /// Set once `end` is sent; checked under the same lock as every send
    ended: Arc<Mutex<bool>>,
}

impl EventNotifier {
    pub fn channel() -> (Self, EventStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let notifier = Self {
            sender,
            ended: Arc::new(Mutex::new(false)),
        };
        (notifier, EventStream { receiver })
    }

    /// Deliver an event unless the stream already ended
    pub fn emit(&self, event: SimulationEvent) {
        let ended = self.ended.lock();
        if *ended {
            trace!("Dropping '{}' event emitted after end", event.name());
            return;
        }
        if self.sender.send(event).is_err() {
            trace!("Event stream receiver dropped");
        }
    }

    /// Emit `end` exactly once; returns whether this call emitted it
    pub fn end(&self) -> bool {
        let mut ended = self.ended.lock();
        if *ended {
            return false;
        }
        *ended = true;
        if self.sender.send(SimulationEvent::End).is_err() {
            trace!("Event stream receiver dropped before end");
        }
        true
    }

    pub fn has_ended(&self) -> bool {
        *self.ended.lock()
    }
}

/// Receiving side of a run's event stream
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<SimulationEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<SimulationEvent> {
        self.receiver.recv().await
    }

    /// Collect every event up to and including `end`
    pub async fn collect_until_end(&mut self) -> Vec<SimulationEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let is_end = matches!(event, SimulationEvent::End);
            events.push(event);
            if is_end {
                break;
            }
        }
        events
    }
}

impl Stream for EventStream {
    type Item = SimulationEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
