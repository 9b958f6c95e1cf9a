//! Attribute value resolution
//!
//! Non-string values are literals. Strings naming a known interpolator kind
//! are computed through the run's [`InterpolatorRegistry`]; any other string
//! is a literal too. Attribute-function interpolators additionally fetch the
//! attribute values they reference from the Context Broker.

use crate::config::{ContextBrokerConfig, DomainConfig, NgsiVersion};
use crate::error::{Result, SimulatorError};
use crate::events::{HttpRequest, RequestBody};
use crate::payload::{fiware_headers, CONTENT_TYPE_JSON};
use crate::token::SharedToken;
use crate::transport::HttpTransport;
use chrono::{DateTime, Local};
use devsim_calc::{AttributeFunctionInterpolator, AttributeReference, InterpolatorRegistry};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Context Broker access for attribute-function lookups
#[derive(Clone)]
pub struct ContextLookup {
    pub http: Arc<dyn HttpTransport>,
    pub context_broker: Option<ContextBrokerConfig>,
    pub domain: Option<DomainConfig>,
    pub token: SharedToken,
}

pub struct ValueResolver {
    registry: Arc<InterpolatorRegistry>,
    lookup: Option<ContextLookup>,
}

impl ValueResolver {
    pub fn new(registry: Arc<InterpolatorRegistry>) -> Self {
        Self {
            registry,
            lookup: None,
        }
    }

    pub fn with_lookup(mut self, lookup: ContextLookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Resolve one configured value at instant `now`
    pub async fn resolve(&self, value: &Value, now: &DateTime<Local>) -> Result<Value> {
        let Value::String(text) = value else {
            return Ok(value.clone());
        };
        let Some(compiled) = self.registry.resolve_value_spec(text) else {
            return Ok(value.clone());
        };
        let interpolator = compiled?;

        match interpolator.as_attribute_function() {
            Some(function) => self.evaluate_function(function).await,
            None => Ok(interpolator.evaluate(now)?),
        }
    }

    async fn evaluate_function(&self, function: &AttributeFunctionInterpolator) -> Result<Value> {
        let mut values = HashMap::new();
        for (entity_id, attributes) in function.references_by_entity() {
            let fetched = self.fetch_attributes(entity_id, &attributes).await?;
            for attribute in attributes {
                let value = fetched.get(attribute).cloned().ok_or_else(|| {
                    SimulatorError::value_resolution(format!(
                        "Attribute '{}' of entity '{}' not found in the Context Broker",
                        attribute, entity_id
                    ))
                })?;
                let reference = AttributeReference {
                    entity_id: entity_id.to_string(),
                    attribute: attribute.to_string(),
                };
                values.insert(reference, value);
            }
        }

        trace!("Evaluating attribute function with {} fetched values", values.len());
        function.evaluate(&values).map_err(|e| SimulatorError::value_resolution(e.to_string()))
    }

    /// Fetch the current value of some attributes of one entity
    async fn fetch_attributes(&self, entity_id: &str, attributes: &[&str]) -> Result<HashMap<String, Value>> {
        let lookup = self.lookup.as_ref().ok_or_else(|| {
            SimulatorError::value_resolution("Attribute references need a configured Context Broker")
        })?;
        let broker = lookup.context_broker.as_ref().ok_or_else(|| {
            SimulatorError::value_resolution("Attribute references need a configured Context Broker")
        })?;
        let version: NgsiVersion = broker
            .ngsi_version
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(|e: SimulatorError| SimulatorError::value_resolution(e.to_string()))?;

        let token = lookup.token.get();
        let request = query_request(version, &broker.base_url(), lookup.domain.as_ref(), token.as_deref(), entity_id, attributes);
        debug!("Fetching {:?} of entity '{}'", attributes, entity_id);

        let response = lookup
            .http
            .send(&request)
            .await
            .map_err(|e| SimulatorError::value_resolution(format!("Context Broker lookup failed: {}", e)))?;
        if !response.is_success() {
            return Err(SimulatorError::value_resolution(format!(
                "Context Broker lookup of entity '{}' returned status {}",
                entity_id, response.status
            )));
        }

        Ok(match version {
            NgsiVersion::V1 => v1_attribute_values(&response.body_value()),
            NgsiVersion::V2 => v2_attribute_values(&response.body_value()),
        })
    }
}

fn query_request(
    version: NgsiVersion,
    base_url: &str,
    domain: Option<&DomainConfig>,
    token: Option<&str>,
    entity_id: &str,
    attributes: &[&str],
) -> HttpRequest {
    match version {
        NgsiVersion::V1 => HttpRequest {
            method: "POST".to_string(),
            url: format!("{}/v1/queryContext", base_url),
            headers: fiware_headers(domain, token, CONTENT_TYPE_JSON),
            body: Some(RequestBody::Json(json!({
                "entities": [{"id": entity_id, "isPattern": "false"}],
                "attributes": attributes,
            }))),
        },
        NgsiVersion::V2 => {
            let mut headers = fiware_headers(domain, token, CONTENT_TYPE_JSON);
            headers.retain(|(name, _)| name != "Content-Type");
            HttpRequest {
                method: "GET".to_string(),
                url: format!(
                    "{}/v2/entities/{}?attrs={}&options=keyValues",
                    base_url,
                    entity_id,
                    attributes.join(",")
                ),
                headers,
                body: None,
            }
        },
    }
}

/// Attribute values of a `queryContext` response
fn v1_attribute_values(body: &Value) -> HashMap<String, Value> {
    body.pointer("/contextResponses/0/contextElement/attributes")
        .and_then(Value::as_array)
        .map(|attributes| {
            attributes
                .iter()
                .filter_map(|attribute| {
                    let name = attribute.get("name")?.as_str()?;
                    Some((name.to_string(), attribute.get("value").cloned().unwrap_or(Value::Null)))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Attribute values of a `keyValues` entity representation
fn v2_attribute_values(body: &Value) -> HashMap<String, Value> {
    body.as_object()
        .map(|entity| {
            entity
                .iter()
                .filter(|(name, _)| !matches!(name.as_str(), "id" | "type"))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}
