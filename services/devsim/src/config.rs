//! Simulation configuration
//!
//! Field names follow the simulation file format (`contextBroker`,
//! `ngsiVersion`, `staticAttributes`, `entity_name`, ...). Presence rules are
//! enforced by [`crate::validation`], so most fields are optional here.

use crate::error::{Result, SimulatorError};
use figment::{
    providers::{Env, Format, Json, Yaml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Root simulation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub domain: Option<DomainConfig>,

    #[serde(rename = "contextBroker", alias = "contextbroker")]
    pub context_broker: Option<ContextBrokerConfig>,

    pub authentication: Option<AuthenticationConfig>,

    pub iota: Option<IotaConfig>,

    #[serde(default)]
    pub entities: Vec<EntityTemplate>,

    #[serde(default)]
    pub devices: Vec<DeviceTemplate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainConfig {
    pub service: Option<String>,
    pub subservice: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextBrokerConfig {
    pub protocol: Option<String>,
    pub host: Option<String>,
    #[serde(default, deserialize_with = "port_from_any")]
    pub port: Option<u16>,
    #[serde(rename = "ngsiVersion", alias = "ngsiversion")]
    pub ngsi_version: Option<String>,
}

impl ContextBrokerConfig {
    pub fn base_url(&self) -> String {
        base_url(&self.protocol, &self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    pub protocol: Option<String>,
    pub host: Option<String>,
    #[serde(default, deserialize_with = "port_from_any")]
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub retry: Option<RetryPolicy>,
}

impl AuthenticationConfig {
    pub fn base_url(&self) -> String {
        base_url(&self.protocol, &self.host, self.port)
    }
}

/// Retry policy for token requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts
    #[serde(default = "default_retry_times")]
    pub times: u32,
    /// Milliseconds between attempts
    #[serde(default)]
    pub interval: u64,
}

fn default_retry_times() -> u32 {
    5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            times: default_retry_times(),
            interval: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IotaConfig {
    pub ultralight: Option<AgentConfig>,
    pub json: Option<AgentConfig>,
}

impl IotaConfig {
    pub fn agent(&self, encoding: Encoding) -> Option<&AgentConfig> {
        match encoding {
            Encoding::UltraLight => self.ultralight.as_ref(),
            Encoding::Json => self.json.as_ref(),
        }
    }
}

/// IoT agent of one payload encoding
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    pub api_key: Option<String>,
    pub http: Option<EndpointConfig>,
    pub mqtt: Option<EndpointConfig>,
}

impl AgentConfig {
    pub fn endpoint(&self, transport: TransportKind) -> Option<&EndpointConfig> {
        match transport {
            TransportKind::Http => self.http.as_ref(),
            TransportKind::Mqtt => self.mqtt.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub protocol: Option<String>,
    pub host: Option<String>,
    #[serde(default, deserialize_with = "port_from_any")]
    pub port: Option<u16>,
    /// MQTT only
    pub user: Option<String>,
    /// MQTT only
    pub password: Option<String>,
}

impl EndpointConfig {
    pub fn base_url(&self) -> String {
        base_url(&self.protocol, &self.host, self.port)
    }
}

/// Entity template: a concrete entity or a counted generator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityTemplate {
    pub entity_name: Option<String>,
    pub count: Option<u32>,
    pub entity_type: Option<String>,
    pub schedule: Option<String>,
    #[serde(default)]
    pub active: Vec<Attribute>,
    #[serde(rename = "staticAttributes", alias = "staticattributes", default)]
    pub static_attributes: Vec<Attribute>,
}

/// Device template: a concrete device or a counted generator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceTemplate {
    pub device_id: Option<String>,
    pub count: Option<u32>,
    /// Prefix of generated device ids
    pub entity_type: Option<String>,
    pub protocol: Option<String>,
    pub api_key: Option<String>,
    pub schedule: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

/// Entity (active or static) or device attribute
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub attr_type: Option<String>,
    /// Literal or interpolator spec string; `Null` when absent
    #[serde(default)]
    pub value: Value,
    /// Short attribute code used by device payloads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<Metadata>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub meta_type: Option<String>,
    #[serde(default)]
    pub value: Value,
}

/// NGSI version of the Context Broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NgsiVersion {
    V1,
    V2,
}

impl FromStr for NgsiVersion {
    type Err = SimulatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1.0" => Ok(Self::V1),
            "2.0" => Ok(Self::V2),
            other => Err(SimulatorError::NgsiVersionNotSupported(format!(
                "The provided NGSI version ('{}') is not supported",
                other
            ))),
        }
    }
}

/// Device payload encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    UltraLight,
    Json,
}

/// Device transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Http,
    Mqtt,
}

/// Device protocol: `UltraLight::HTTP`, `UltraLight::MQTT`, `JSON::HTTP` or `JSON::MQTT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceProtocol {
    pub encoding: Encoding,
    pub transport: TransportKind,
}

impl DeviceProtocol {
    pub const ALL: [&'static str; 4] = ["UltraLight::HTTP", "UltraLight::MQTT", "JSON::HTTP", "JSON::MQTT"];
}

impl FromStr for DeviceProtocol {
    type Err = SimulatorError;

    fn from_str(s: &str) -> Result<Self> {
        let (encoding, transport) = match s {
            "UltraLight::HTTP" => (Encoding::UltraLight, TransportKind::Http),
            "UltraLight::MQTT" => (Encoding::UltraLight, TransportKind::Mqtt),
            "JSON::HTTP" => (Encoding::Json, TransportKind::Http),
            "JSON::MQTT" => (Encoding::Json, TransportKind::Mqtt),
            other => {
                return Err(SimulatorError::ProtocolNotSupported(format!(
                    "The provided protocol ('{}') is not supported",
                    other
                )))
            },
        };
        Ok(Self { encoding, transport })
    }
}

impl fmt::Display for DeviceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoding = match self.encoding {
            Encoding::UltraLight => "UltraLight",
            Encoding::Json => "JSON",
        };
        let transport = match self.transport {
            TransportKind::Http => "HTTP",
            TransportKind::Mqtt => "MQTT",
        };
        write!(f, "{}::{}", encoding, transport)
    }
}

fn base_url(protocol: &Option<String>, host: &Option<String>, port: Option<u16>) -> String {
    let protocol = protocol.as_deref().unwrap_or("http");
    let host = host.as_deref().unwrap_or("localhost");
    match port {
        Some(port) => format!("{}://{}:{}", protocol, host, port),
        None => format!("{}://{}", protocol, host),
    }
}

/// Ports are written both as numbers and as strings in simulation files
fn port_from_any<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u16),
        Text(String),
    }

    match Option::<PortValue>::deserialize(deserializer)? {
        None => Ok(None),
        Some(PortValue::Number(port)) => Ok(Some(port)),
        Some(PortValue::Text(text)) => text
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", text))),
    }
}

/// Load a simulation configuration file
///
/// The format follows the extension (`.yaml`/`.yml`, anything else as JSON).
/// `DEVSIM_`-prefixed environment variables override file values, with `__`
/// separating nested keys (e.g. `DEVSIM_CONTEXTBROKER__HOST`).
pub fn load_config(path: impl AsRef<Path>) -> Result<SimulationConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SimulatorError::config_not_valid(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    let figment = if is_yaml {
        Figment::new().merge(Yaml::file(path))
    } else {
        Figment::new().merge(Json::file(path))
    };

    let config: SimulationConfig = figment
        .merge(Env::prefixed("DEVSIM_").split("__"))
        .extract()?;

    debug!(
        "Loaded configuration from {}: {} entity template(s), {} device template(s)",
        path.display(),
        config.entities.len(),
        config.devices.len()
    );

    Ok(config)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_wire_names() {
        let config: SimulationConfig = serde_json::from_value(json!({
            "domain": {"service": "theService", "subservice": "/theSubService"},
            "contextBroker": {"protocol": "https", "host": "localhost", "port": "1026", "ngsiVersion": "2.0"},
            "authentication": {"protocol": "https", "host": "localhost", "port": 5001,
                "user": "theUser", "password": "thePassword", "retry": {"times": 3}},
            "entities": [{
                "entity_name": "EntityName1",
                "entity_type": "EntityType1",
                "schedule": "once",
                "active": [{"name": "active1", "type": "number", "value": 1}],
                "staticAttributes": [{"name": "static1", "type": "string", "value": "s",
                    "metadata": [{"name": "m", "type": "t", "value": 1}]}]
            }],
        }))
        .unwrap();

        let broker = config.context_broker.unwrap();
        assert_eq!(broker.port, Some(1026));
        assert_eq!(broker.base_url(), "https://localhost:1026");
        assert_eq!(broker.ngsi_version.as_deref(), Some("2.0"));

        let retry = config.authentication.unwrap().retry.unwrap();
        assert_eq!(retry, RetryPolicy { times: 3, interval: 0 });

        let entity = &config.entities[0];
        assert_eq!(entity.static_attributes[0].attr_type.as_deref(), Some("string"));
        assert_eq!(entity.static_attributes[0].metadata.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_device_protocols() {
        let protocol: DeviceProtocol = "UltraLight::MQTT".parse().unwrap();
        assert_eq!(protocol.encoding, Encoding::UltraLight);
        assert_eq!(protocol.transport, TransportKind::Mqtt);
        assert_eq!(protocol.to_string(), "UltraLight::MQTT");

        let err = "LoRaWAN".parse::<DeviceProtocol>().unwrap_err();
        assert_eq!(err.name(), "ProtocolNotSupported");
    }

    #[test]
    fn test_ngsi_versions() {
        assert_eq!("1.0".parse::<NgsiVersion>().unwrap(), NgsiVersion::V1);
        assert_eq!("2.0".parse::<NgsiVersion>().unwrap(), NgsiVersion::V2);
        assert!("3.0".parse::<NgsiVersion>().is_err());
    }

    #[test]
    fn test_load_yaml_file() {
        let path = std::env::temp_dir().join(format!("devsim-{}.yaml", uuid::Uuid::new_v4()));
        let yaml = serde_yaml::to_string(&json!({
            "devices": [{
                "device_id": "dev1",
                "protocol": "JSON::HTTP",
                "schedule": "once",
                "attributes": [{"object_id": "t", "value": 21}]
            }]
        }))
        .unwrap();
        std::fs::write(&path, yaml).unwrap();

        let config = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].attributes[0].value, json!(21));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config("/nonexistent/simulation.json").unwrap_err();
        assert!(err.is_fatal());
    }
}
