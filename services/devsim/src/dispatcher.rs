//! Update Dispatcher - resolves a firing's attributes and sends the update
//!
//! Entities go to the Context Broker (NGSI v1 or v2), devices to their IoT
//! agent (UltraLight or JSON, over HTTP or MQTT). Every outcome is reported
//! on the run's event stream.

use crate::config::{
    Attribute, ContextBrokerConfig, DeviceProtocol, DomainConfig, Encoding, IotaConfig, NgsiVersion, TransportKind,
};
use crate::error::{Result, SimulatorError};
use crate::events::{EventNotifier, OutboundRequest, SimulationEvent};
use crate::expander::{DeviceInstance, Element, EntityInstance};
use crate::payload::{self, fiware_headers, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT};
use crate::resolver::ValueResolver;
use crate::scheduler::JobHandler;
use crate::token::SharedToken;
use crate::transport::{HttpTransport, MqttCredentials, MqttTransport};
use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Endpoints and identity a run sends its updates with
#[derive(Debug, Clone, Default)]
pub struct DispatchTargets {
    pub context_broker: Option<ContextBrokerConfig>,
    pub domain: Option<DomainConfig>,
    pub iota: Option<IotaConfig>,
}

/// Where and how a built update goes
enum Delivery {
    Http(crate::events::HttpRequest),
    Mqtt {
        publication: crate::events::MqttPublication,
        credentials: Option<MqttCredentials>,
    },
}

impl Delivery {
    fn outbound(&self) -> OutboundRequest {
        match self {
            Self::Http(request) => OutboundRequest::Http(request.clone()),
            Self::Mqtt { publication, .. } => OutboundRequest::Mqtt(publication.clone()),
        }
    }
}

pub struct UpdateDispatcher {
    targets: DispatchTargets,
    resolver: ValueResolver,
    http: Arc<dyn HttpTransport>,
    mqtt: Arc<dyn MqttTransport>,
    token: SharedToken,
    notifier: EventNotifier,
}

impl UpdateDispatcher {
    pub fn new(
        targets: DispatchTargets,
        resolver: ValueResolver,
        http: Arc<dyn HttpTransport>,
        mqtt: Arc<dyn MqttTransport>,
        token: SharedToken,
        notifier: EventNotifier,
    ) -> Self {
        Self {
            targets,
            resolver,
            http,
            mqtt,
            token,
            notifier,
        }
    }

    /// Resolve, build and send one update
    pub async fn dispatch(&self, element: &Element, attributes: &[Attribute]) {
        let resolved = match self.resolve_attributes(element, attributes).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Value resolution failed for '{}': {}", element.id(), e);
                self.notifier.emit(SimulationEvent::error(e));
                return;
            },
        };

        let delivery = match self.build(element, &resolved) {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!("Update of '{}' not sent: {}", element.id(), e);
                self.notifier.emit(SimulationEvent::error(e));
                return;
            },
        };

        let request = delivery.outbound();
        self.notifier.emit(SimulationEvent::UpdateRequest {
            request: request.clone(),
        });

        let event = match self.send(&delivery).await {
            Ok(response) => SimulationEvent::UpdateResponse { request, response },
            Err((error, response)) => {
                warn!("Update of '{}' failed: {}", element.id(), error);
                SimulationEvent::request_error(error, request, response)
            },
        };
        self.notifier.emit(event);
    }

    /// Static attributes first, then the group, each with freshly resolved
    /// values for the attribute and its metadata
    async fn resolve_attributes(&self, element: &Element, attributes: &[Attribute]) -> Result<Vec<Attribute>> {
        let now = Local::now();
        let mut resolved = Vec::with_capacity(element.static_attributes().len() + attributes.len());
        for attribute in element.static_attributes().iter().chain(attributes) {
            let mut attribute = attribute.clone();
            attribute.value = self.resolver.resolve(&attribute.value, &now).await?;
            for metadata in attribute.metadata.iter_mut().flatten() {
                metadata.value = self.resolver.resolve(&metadata.value, &now).await?;
            }
            resolved.push(attribute);
        }
        Ok(resolved)
    }

    fn build(&self, element: &Element, attributes: &[Attribute]) -> Result<Delivery> {
        match element {
            Element::Entity(entity) => self.build_entity_update(entity, attributes),
            Element::Device(device) => self.build_device_update(device, attributes),
        }
    }

    fn build_entity_update(&self, entity: &EntityInstance, attributes: &[Attribute]) -> Result<Delivery> {
        let broker = self
            .targets
            .context_broker
            .as_ref()
            .ok_or_else(|| SimulatorError::NgsiVersionNotSupported("no Context Broker configured".to_string()))?;
        let version: NgsiVersion = broker.ngsi_version.as_deref().unwrap_or_default().parse()?;

        let token = self.token.get();
        let headers = fiware_headers(self.targets.domain.as_ref(), token.as_deref(), CONTENT_TYPE_JSON);
        let base_url = broker.base_url();
        let request = match version {
            NgsiVersion::V1 => {
                payload::ngsi_v1_update(&base_url, headers, &entity.entity_name, &entity.entity_type, attributes)
            },
            NgsiVersion::V2 => {
                payload::ngsi_v2_update(&base_url, headers, &entity.entity_name, &entity.entity_type, attributes)
            },
        };
        Ok(Delivery::Http(request))
    }

    fn build_device_update(&self, device: &DeviceInstance, attributes: &[Attribute]) -> Result<Delivery> {
        let protocol: DeviceProtocol = device.parsed_protocol()?;
        let not_configured = || {
            SimulatorError::ProtocolNotSupported(format!("no IoT agent endpoint configured for protocol {}", protocol))
        };
        let endpoint = self
            .targets
            .iota
            .as_ref()
            .and_then(|iota| iota.agent(protocol.encoding))
            .and_then(|agent| agent.endpoint(protocol.transport))
            .ok_or_else(not_configured)?;
        let api_key = device
            .effective_api_key(self.targets.iota.as_ref())
            .unwrap_or_default();

        match protocol.transport {
            TransportKind::Http => {
                let token = self.token.get();
                let request = match protocol.encoding {
                    Encoding::UltraLight => payload::ultralight_http(
                        &endpoint.base_url(),
                        fiware_headers(self.targets.domain.as_ref(), token.as_deref(), CONTENT_TYPE_TEXT),
                        &device.device_id,
                        &api_key,
                        attributes,
                    ),
                    Encoding::Json => payload::json_http(
                        &endpoint.base_url(),
                        fiware_headers(self.targets.domain.as_ref(), token.as_deref(), CONTENT_TYPE_JSON),
                        &device.device_id,
                        &api_key,
                        attributes,
                    ),
                };
                Ok(Delivery::Http(request))
            },
            TransportKind::Mqtt => {
                let body = match protocol.encoding {
                    Encoding::UltraLight => payload::ultralight_payload(attributes),
                    Encoding::Json => payload::json_payload(attributes).to_string(),
                };
                let credentials = match (&endpoint.user, &endpoint.password) {
                    (Some(user), Some(password)) => Some(MqttCredentials {
                        user: user.clone(),
                        password: password.clone(),
                    }),
                    _ => None,
                };
                Ok(Delivery::Mqtt {
                    publication: payload::mqtt_measure(&endpoint.base_url(), &device.device_id, &api_key, body),
                    credentials,
                })
            },
        }
    }

    async fn send(&self, delivery: &Delivery) -> std::result::Result<Value, (SimulatorError, Option<Value>)> {
        match delivery {
            Delivery::Http(request) => {
                let response = self.http.send(request).await.map_err(|e| (e, None))?;
                debug!("{} answered {}", request.url, response.status);
                if response.is_success() {
                    Ok(response.body_value())
                } else {
                    let body = response.body_value();
                    Err((
                        SimulatorError::UnexpectedStatus {
                            status: response.status,
                            body: (!response.body.is_empty()).then(|| response.body.clone()),
                        },
                        Some(body),
                    ))
                }
            },
            Delivery::Mqtt {
                publication,
                credentials,
            } => {
                self.mqtt
                    .publish(publication, credentials.as_ref())
                    .await
                    .map_err(|e| (e, None))?;
                Ok(Value::Null)
            },
        }
    }
}

#[async_trait]
impl JobHandler for UpdateDispatcher {
    async fn fire(&self, element: &Element, attributes: &[Attribute]) {
        self.dispatch(element, attributes).await;
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::events::{EventStream, MqttPublication, RequestBody};
    use crate::config::DeviceTemplate;
    use crate::expander::expand_device;
    use crate::transport::{HttpResponse, ReqwestHttpTransport};
    use devsim_calc::InterpolatorRegistry;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingMqtt {
        published: Mutex<Vec<MqttPublication>>,
    }

    #[async_trait]
    impl MqttTransport for RecordingMqtt {
        async fn publish(&self, publication: &MqttPublication, _credentials: Option<&MqttCredentials>) -> Result<()> {
            self.published.lock().push(publication.clone());
            Ok(())
        }
    }

    struct StatusHttp(u16);

    #[async_trait]
    impl HttpTransport for StatusHttp {
        async fn send(&self, _request: &crate::events::HttpRequest) -> Result<HttpResponse> {
            Ok(HttpResponse {
                status: self.0,
                headers: Vec::new(),
                body: String::new(),
            })
        }
    }

    fn targets() -> DispatchTargets {
        serde_json::from_value::<crate::config::SimulationConfig>(json!({
            "domain": {"service": "smartcity", "subservice": "/parks"},
            "contextBroker": {"protocol": "http", "host": "cb", "port": 1026, "ngsiVersion": "3.0"},
            "iota": {
                "ultralight": {
                    "api_key": "ul-key",
                    "http": {"protocol": "http", "host": "iota", "port": 7896},
                    "mqtt": {"protocol": "mqtt", "host": "broker", "port": 1883}
                }
            }
        }))
        .map(|config| DispatchTargets {
            context_broker: config.context_broker,
            domain: config.domain,
            iota: config.iota,
        })
        .unwrap()
    }

    fn dispatcher(http: Arc<dyn HttpTransport>, mqtt: Arc<dyn MqttTransport>) -> (UpdateDispatcher, EventStream) {
        let (notifier, stream) = EventNotifier::channel();
        let dispatcher = UpdateDispatcher::new(
            targets(),
            ValueResolver::new(Arc::new(InterpolatorRegistry::new())),
            http,
            mqtt,
            SharedToken::default(),
            notifier,
        );
        (dispatcher, stream)
    }

    fn device(protocol: &str) -> Element {
        let template: DeviceTemplate = serde_json::from_value(json!({
            "device_id": "dev1",
            "protocol": protocol,
            "schedule": "once",
            "attributes": [
                {"object_id": "t", "value": "time-step-after-interpolator([[0,21],[24,21]])"},
                {"object_id": "s", "value": "on"}
            ]
        }))
        .unwrap();
        expand_device(&template).remove(0)
    }

    #[tokio::test]
    async fn test_ultralight_over_mqtt() {
        let mqtt = Arc::new(RecordingMqtt::default());
        let (dispatcher, mut stream) = dispatcher(Arc::new(StatusHttp(200)), mqtt.clone());
        let element = device("UltraLight::MQTT");

        dispatcher.dispatch(&element, element.recurring_attributes()).await;

        let published = mqtt.published.lock().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].url, "mqtt://broker:1883");
        assert_eq!(published[0].topic, "/ul-key/dev1/attrs");
        assert_eq!(published[0].payload, "t|21|s|on");
        assert_eq!(stream.recv().await.unwrap().name(), "update-request");
        assert_eq!(stream.recv().await.unwrap().name(), "update-response");
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error_with_request() {
        let (dispatcher, mut stream) = dispatcher(Arc::new(StatusHttp(500)), Arc::new(RecordingMqtt::default()));
        let element = device("UltraLight::HTTP");

        dispatcher.dispatch(&element, element.recurring_attributes()).await;

        let request = stream.recv().await.unwrap();
        let SimulationEvent::UpdateRequest { request } = request else {
            panic!("expected update-request");
        };
        let http = request.as_http().unwrap();
        assert_eq!(http.url, "http://iota:7896/iot/d?i=dev1&k=ul-key");
        assert_eq!(http.header("Content-Type"), Some("text/plain"));
        assert_eq!(http.body, Some(RequestBody::Text("t|21|s|on".to_string())));

        match stream.recv().await.unwrap() {
            SimulationEvent::Error { error, request, .. } => {
                assert_eq!(error.name(), "UnexpectedStatus");
                assert!(request.is_some());
            },
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_unsupported_version_sends_nothing() {
        let (dispatcher, stream) = dispatcher(
            Arc::new(ReqwestHttpTransport::new().unwrap()),
            Arc::new(RecordingMqtt::default()),
        );
        let element = Element::Entity(EntityInstance {
            entity_name: "EntityName1".to_string(),
            entity_type: "Type1".to_string(),
            schedule: Some("once".to_string()),
            active: Vec::new(),
            static_attributes: vec![serde_json::from_value(json!({"name": "active1", "type": "Text", "value": "1"})).unwrap()],
        });

        dispatcher.dispatch(&element, &[]).await;
        drop(dispatcher);

        let events: Vec<SimulationEvent> = stream.collect().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            SimulationEvent::Error { error, request, .. } => {
                assert_eq!(error.name(), "NGSIVersionNotSupported");
                assert!(request.is_none());
            },
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_unsupported_protocol_sends_nothing() {
        let mqtt = Arc::new(RecordingMqtt::default());
        let (dispatcher, mut stream) = dispatcher(Arc::new(StatusHttp(200)), mqtt.clone());
        let element = device("LoRaWAN::HTTP");

        dispatcher.dispatch(&element, element.recurring_attributes()).await;

        match stream.recv().await.unwrap() {
            SimulationEvent::Error { error, request, .. } => {
                assert_eq!(error.name(), "ProtocolNotSupported");
                assert!(request.is_none());
            },
            other => panic!("unexpected event {}", other.name()),
        }
        assert!(mqtt.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_values_are_resolved() {
        let (dispatcher, _stream) = dispatcher(Arc::new(StatusHttp(200)), Arc::new(RecordingMqtt::default()));
        let attribute: Attribute = serde_json::from_value(json!({
            "name": "temperature",
            "type": "Number",
            "value": "time-step-after-interpolator([[0,21],[24,21]])",
            "metadata": [
                {"name": "accuracy", "type": "Number", "value": "time-step-after-interpolator([[0,5],[24,5]])"},
                {"name": "unit", "type": "Text", "value": "CEL"}
            ]
        }))
        .unwrap();
        let element = Element::Entity(EntityInstance {
            entity_name: "Room1".to_string(),
            entity_type: "Room".to_string(),
            schedule: Some("once".to_string()),
            active: vec![attribute],
            static_attributes: Vec::new(),
        });

        let resolved = dispatcher
            .resolve_attributes(&element, element.recurring_attributes())
            .await
            .unwrap();
        assert_eq!(resolved[0].value, json!(21));
        let metadata = resolved[0].metadata.as_ref().unwrap();
        assert_eq!(metadata[0].value, json!(5));
        assert_eq!(metadata[1].value, json!("CEL"));
    }
}
