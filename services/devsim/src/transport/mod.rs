//! Transport seams
//!
//! The simulation core never talks to the network directly: every HTTP
//! request and MQTT publication goes through these traits so runs can be
//! driven against mocks in tests.

pub mod http;
pub mod mqtt;

pub use http::ReqwestHttpTransport;
pub use mqtt::RumqttcTransport;

use crate::error::Result;
use crate::events::{HttpRequest, MqttPublication};
use async_trait::async_trait;
use serde_json::Value;

/// Response of an HTTP exchange, whatever its status
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body as JSON when it parses, as a JSON string otherwise
    pub fn body_value(&self) -> Value {
        if self.body.trim().is_empty() {
            return Value::Null;
        }
        serde_json::from_str(&self.body).unwrap_or_else(|_| Value::String(self.body.clone()))
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request; only network failures are errors, any status is a response
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MqttCredentials {
    pub user: String,
    pub password: String,
}

#[async_trait]
pub trait MqttTransport: Send + Sync {
    /// Publish on the broker named by `publication.url`, connecting on first use
    async fn publish(&self, publication: &MqttPublication, credentials: Option<&MqttCredentials>) -> Result<()>;

    /// Close every open broker session
    async fn disconnect_all(&self) {}
}
