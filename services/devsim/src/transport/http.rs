//! HTTP transport based on reqwest

use super::{HttpResponse, HttpTransport};
use crate::error::{Result, SimulatorError};
use crate::events::{HttpRequest, RequestBody};
use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::debug;

/// reqwest-backed transport shared by every dispatch of a run
#[derive(Debug, Clone)]
pub struct ReqwestHttpTransport {
    client: Client,
}

impl ReqwestHttpTransport {
    /// Build a client that accepts self-signed broker certificates
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| SimulatorError::transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| SimulatorError::transport(format!("Invalid HTTP method '{}': {}", request.method, e)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = match &request.body {
            Some(RequestBody::Json(value)) => builder.body(serde_json::to_string(value)?),
            Some(RequestBody::Text(text)) => builder.body(text.clone()),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.text().await?;

        debug!("{} {} -> {}", request.method, request.url, status);
        Ok(HttpResponse { status, headers, body })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_json_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/op/update"))
            .and(header("Fiware-Service", "smartcity"))
            .and(body_json(json!({"actionType": "APPEND"})))
            .respond_with(ResponseTemplate::new(204).insert_header("X-Trace", "1"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestHttpTransport::new().unwrap();
        let request = HttpRequest {
            method: "POST".to_string(),
            url: format!("{}/v2/op/update", server.uri()),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Fiware-Service".to_string(), "smartcity".to_string()),
            ],
            body: Some(RequestBody::Json(json!({"actionType": "APPEND"}))),
        };

        let response = transport.send(&request).await.unwrap();
        assert_eq!(response.status, 204);
        assert_eq!(response.header("x-trace"), Some("1"));
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
            .mount(&server)
            .await;

        let transport = ReqwestHttpTransport::new().unwrap();
        let request = HttpRequest {
            method: "POST".to_string(),
            url: format!("{}/iot/d?i=dev1&k=key", server.uri()),
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: Some(RequestBody::Text("t|21".to_string())),
        };

        let response = transport.send(&request).await.unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(response.body, "bad payload");
    }

    #[tokio::test]
    async fn test_connection_failure_is_a_transport_error() {
        let transport = ReqwestHttpTransport::new().unwrap();
        let request = HttpRequest {
            method: "GET".to_string(),
            url: "http://127.0.0.1:1/v2/entities".to_string(),
            headers: Vec::new(),
            body: None,
        };
        let err = transport.send(&request).await.unwrap_err();
        assert_eq!(err.name(), "TransportError");
    }
}
