//! Authorization token lifecycle
//!
//! The token is requested from the identity service before any job runs and
//! renewed one minute before it expires. Any failed request, initial or
//! renewal, is fatal to the run.

use crate::config::{AuthenticationConfig, DomainConfig, RetryPolicy};
use crate::error::{Result, SimulatorError};
use crate::events::{EventNotifier, HttpRequest, OutboundRequest, RequestBody, SimulationEvent};
use crate::payload::{fiware_headers, CONTENT_TYPE_JSON};
use crate::transport::{HttpResponse, HttpTransport};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Header carrying the issued token
pub const SUBJECT_TOKEN_HEADER: &str = "x-subject-token";

/// Renewal happens this long before expiry
const RENEWAL_MARGIN_SECS: i64 = 60;

/// Current token of a run, read by every outgoing request
#[derive(Debug, Clone, Default)]
pub struct SharedToken(Arc<RwLock<Option<String>>>);

impl SharedToken {
    pub fn get(&self) -> Option<String> {
        self.0.read().clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.0.write() = Some(token.into());
    }
}

pub struct TokenManager {
    http: Arc<dyn HttpTransport>,
    authentication: AuthenticationConfig,
    domain: Option<DomainConfig>,
    token: SharedToken,
    notifier: EventNotifier,
}

impl TokenManager {
    pub fn new(
        http: Arc<dyn HttpTransport>,
        authentication: AuthenticationConfig,
        domain: Option<DomainConfig>,
        token: SharedToken,
        notifier: EventNotifier,
    ) -> Self {
        Self {
            http,
            authentication,
            domain,
            token,
            notifier,
        }
    }

    pub fn token(&self) -> &SharedToken {
        &self.token
    }

    fn token_request(&self) -> HttpRequest {
        let service = self.domain.as_ref().and_then(|d| d.service.clone());
        let subservice = self.domain.as_ref().and_then(|d| d.subservice.clone());
        let headers = fiware_headers(None, None, CONTENT_TYPE_JSON);

        HttpRequest {
            method: "POST".to_string(),
            url: format!("{}/v3/auth/tokens", self.authentication.base_url()),
            headers,
            body: Some(RequestBody::Json(json!({
                "auth": {
                    "identity": {
                        "methods": ["password"],
                        "password": {
                            "user": {
                                "domain": {"name": service},
                                "name": self.authentication.user,
                                "password": self.authentication.password,
                            }
                        }
                    },
                    "scope": {
                        "project": {
                            "domain": {"name": service},
                            "name": subservice,
                        }
                    }
                }
            }))),
        }
    }

    /// Request a token, retrying per the configured policy
    ///
    /// Every attempt emits `token-request`; every failed attempt emits an
    /// `error`. On success the token is stored and `token-response` emitted.
    pub async fn request_token(&self) -> Result<DateTime<Utc>> {
        let policy = self.authentication.retry.unwrap_or(RetryPolicy {
            times: 1,
            interval: 0,
        });
        let attempts = policy.times.max(1);

        let mut last_error = SimulatorError::token_not_available("no token request attempted");
        for attempt in 1..=attempts {
            match self.attempt().await {
                Ok(expires_at) => return Ok(expires_at),
                Err(e) => {
                    warn!("Token request attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e;
                },
            }
            if attempt < attempts && policy.interval > 0 {
                tokio::time::sleep(Duration::from_millis(policy.interval)).await;
            }
        }
        Err(last_error)
    }

    async fn attempt(&self) -> Result<DateTime<Utc>> {
        let request = self.token_request();
        let outbound = OutboundRequest::Http(request.clone());
        self.notifier.emit(SimulationEvent::TokenRequest {
            request: outbound.clone(),
        });

        let outcome = match self.http.send(&request).await {
            Ok(response) => parse_token_response(&response).map(|token| (token, response)),
            Err(e) => Err((SimulatorError::token_not_available(e.to_string()), None)),
        };

        match outcome {
            Ok(((token, expires_at), _)) => {
                self.token.set(token);
                info!("Authorization token obtained, expires at {}", expires_at);
                self.notifier.emit(SimulationEvent::TokenResponse { expires_at });
                Ok(expires_at)
            },
            Err((error, response)) => {
                self.notifier
                    .emit(SimulationEvent::request_error(error.clone(), outbound, response));
                Err(error)
            },
        }
    }

    /// Keep the token fresh until `cancel` fires
    ///
    /// `on_first_token` runs once, after the first token is obtained and its
    /// renewal scheduled. Returns the fatal error that stopped renewals.
    pub async fn run<F>(&self, cancel: CancellationToken, on_first_token: F) -> Result<()>
    where
        F: FnOnce() + Send,
    {
        let mut on_first_token = Some(on_first_token);
        loop {
            let expires_at = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.request_token() => result?,
            };

            let scheduled_at = renewal_time(expires_at, Utc::now());
            self.notifier
                .emit(SimulationEvent::TokenRequestScheduled { scheduled_at });
            debug!("Token renewal scheduled at {}", scheduled_at);

            if let Some(start_jobs) = on_first_token.take() {
                start_jobs();
            }

            let delay = (scheduled_at - Utc::now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {},
            }
        }
    }
}

type TokenOutcome = std::result::Result<(String, DateTime<Utc>), (SimulatorError, Option<Value>)>;

fn parse_token_response(response: &HttpResponse) -> TokenOutcome {
    let body = response.body_value();
    let failure = |reason: String| {
        (
            SimulatorError::token_not_available(reason),
            Some(body.clone()),
        )
    };

    if !response.is_success() {
        let error = body.get("error");
        let field = |name: &str| {
            error
                .and_then(|e| e.get(name))
                .map(|v| v.to_string())
                .unwrap_or_else(|| "undefined".to_string())
        };
        return Err(failure(format!(
            "Authorization token could not be generated due to error (status: {}, code: {}, title: {}, message: {})",
            response.status,
            field("code"),
            field("title"),
            field("message")
        )));
    }

    let token = response
        .header(SUBJECT_TOKEN_HEADER)
        .ok_or_else(|| failure("Token response carries no X-Subject-Token header".to_string()))?;
    let expires_at = body
        .pointer("/token/expires_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
        .ok_or_else(|| failure("Token response carries no valid token.expires_at".to_string()))?;

    Ok((token.to_string(), expires_at))
}

/// One minute before expiry, but never sooner than one second from now
fn renewal_time(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let renewal = expires_at - ChronoDuration::seconds(RENEWAL_MARGIN_SECS);
    renewal.max(now + ChronoDuration::seconds(1))
}
