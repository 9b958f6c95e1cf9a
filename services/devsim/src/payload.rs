//! Update request builders
//!
//! Wire shapes of NGSI v1/v2 entity updates and of the UltraLight and JSON
//! device measures. Attributes passed here already carry resolved values.

use crate::config::{Attribute, DomainConfig, Metadata};
use crate::events::{HttpRequest, MqttPublication, RequestBody};
use serde_json::{json, Map, Value};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// Headers of every request sent to FIWARE components
pub fn fiware_headers(domain: Option<&DomainConfig>, token: Option<&str>, content_type: &str) -> Vec<(String, String)> {
    let mut headers = vec![
        ("Content-Type".to_string(), content_type.to_string()),
        ("Accept".to_string(), CONTENT_TYPE_JSON.to_string()),
    ];
    if let Some(service) = domain.and_then(|d| d.service.as_ref()) {
        headers.push(("Fiware-Service".to_string(), service.clone()));
    }
    if let Some(subservice) = domain.and_then(|d| d.subservice.as_ref()) {
        headers.push(("Fiware-ServicePath".to_string(), subservice.clone()));
    }
    if let Some(token) = token {
        headers.push(("X-Auth-Token".to_string(), token.to_string()));
    }
    headers
}

/// `POST {broker}/v1/updateContext` with one APPEND context element
pub fn ngsi_v1_update(
    base_url: &str,
    headers: Vec<(String, String)>,
    entity_name: &str,
    entity_type: &str,
    attributes: &[Attribute],
) -> HttpRequest {
    let attributes: Vec<Value> = attributes
        .iter()
        .map(|attribute| {
            let metadatas: Vec<Value> = attribute.metadata.iter().flatten().map(metadata_v1).collect();
            json!({
                "name": attribute.name.clone().unwrap_or_default(),
                "type": attribute.attr_type.clone().unwrap_or_default(),
                "value": attribute.value,
                "metadatas": metadatas,
            })
        })
        .collect();

    HttpRequest {
        method: "POST".to_string(),
        url: format!("{}/v1/updateContext", base_url),
        headers,
        body: Some(RequestBody::Json(json!({
            "contextElements": [{
                "id": entity_name,
                "type": entity_type,
                "isPattern": false,
                "attributes": attributes,
            }],
            "updateAction": "APPEND",
        }))),
    }
}

fn metadata_v1(metadata: &Metadata) -> Value {
    json!({
        "name": metadata.name.clone().unwrap_or_default(),
        "type": metadata.meta_type.clone().unwrap_or_default(),
        "value": metadata.value,
    })
}

/// `POST {broker}/v2/op/update` with one APPEND entity
pub fn ngsi_v2_update(
    base_url: &str,
    headers: Vec<(String, String)>,
    entity_name: &str,
    entity_type: &str,
    attributes: &[Attribute],
) -> HttpRequest {
    let mut entity = Map::new();
    entity.insert("id".to_string(), json!(entity_name));
    entity.insert("type".to_string(), json!(entity_type));
    for attribute in attributes {
        let mut entry = json!({
            "type": attribute.attr_type.clone().unwrap_or_default(),
            "value": attribute.value,
        });
        if let Some(metadata) = attribute.metadata.as_ref().filter(|m| !m.is_empty()) {
            let metadata: Map<String, Value> = metadata
                .iter()
                .map(|m| {
                    (
                        m.name.clone().unwrap_or_default(),
                        json!({"type": m.meta_type.clone().unwrap_or_default(), "value": m.value}),
                    )
                })
                .collect();
            entry["metadata"] = Value::Object(metadata);
        }
        entity.insert(attribute.name.clone().unwrap_or_default(), entry);
    }

    HttpRequest {
        method: "POST".to_string(),
        url: format!("{}/v2/op/update", base_url),
        headers,
        body: Some(RequestBody::Json(json!({
            "actionType": "APPEND",
            "entities": [Value::Object(entity)],
        }))),
    }
}

/// Text of a value inside an UltraLight measure
fn ultralight_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => match number.as_f64() {
            Some(f) if number.is_f64() => devsim_calc::number_to_json(f).to_string(),
            _ => number.to_string(),
        },
        other => other.to_string(),
    }
}

/// `object_id|value|object_id|value...`
pub fn ultralight_payload(attributes: &[Attribute]) -> String {
    attributes
        .iter()
        .map(|attribute| {
            format!(
                "{}|{}",
                attribute.object_id.as_deref().unwrap_or_default(),
                ultralight_value(&attribute.value)
            )
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// `{object_id: value, ...}`
pub fn json_payload(attributes: &[Attribute]) -> Value {
    let measures: Map<String, Value> = attributes
        .iter()
        .map(|attribute| {
            (
                attribute.object_id.clone().unwrap_or_default(),
                attribute.value.clone(),
            )
        })
        .collect();
    Value::Object(measures)
}

fn measure_url(base_url: &str, resource: &str, device_id: &str, api_key: &str) -> String {
    format!("{}/iot/{}?i={}&k={}", base_url, resource, device_id, api_key)
}

/// UltraLight measure over HTTP
pub fn ultralight_http(
    base_url: &str,
    headers: Vec<(String, String)>,
    device_id: &str,
    api_key: &str,
    attributes: &[Attribute],
) -> HttpRequest {
    HttpRequest {
        method: "POST".to_string(),
        url: measure_url(base_url, "d", device_id, api_key),
        headers,
        body: Some(RequestBody::Text(ultralight_payload(attributes))),
    }
}

/// JSON measure over HTTP
pub fn json_http(
    base_url: &str,
    headers: Vec<(String, String)>,
    device_id: &str,
    api_key: &str,
    attributes: &[Attribute],
) -> HttpRequest {
    HttpRequest {
        method: "POST".to_string(),
        url: measure_url(base_url, "json", device_id, api_key),
        headers,
        body: Some(RequestBody::Json(json_payload(attributes))),
    }
}

pub fn mqtt_topic(api_key: &str, device_id: &str) -> String {
    format!("/{}/{}/attrs", api_key, device_id)
}

pub fn mqtt_measure(broker_url: &str, device_id: &str, api_key: &str, payload: String) -> MqttPublication {
    MqttPublication {
        url: broker_url.to_string(),
        topic: mqtt_topic(api_key, device_id),
        payload,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn attribute(value: Value) -> Attribute {
        serde_json::from_value(json!({
            "name": "active1",
            "type": "Text",
            "object_id": "a1",
            "value": value,
        }))
        .unwrap()
    }

    #[test]
    fn test_headers() {
        let domain = DomainConfig {
            service: Some("smartcity".to_string()),
            subservice: Some("/parks".to_string()),
        };
        let headers = fiware_headers(Some(&domain), Some("tok"), CONTENT_TYPE_JSON);
        let find = |name: &str| headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());
        assert_eq!(find("Fiware-Service"), Some("smartcity"));
        assert_eq!(find("Fiware-ServicePath"), Some("/parks"));
        assert_eq!(find("X-Auth-Token"), Some("tok"));

        let headers = fiware_headers(None, None, CONTENT_TYPE_TEXT);
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_ngsi_v1_body() {
        let request = ngsi_v1_update("http://cb:1026", Vec::new(), "EntityName1", "Type1", &[attribute(json!("1"))]);
        assert_eq!(request.url, "http://cb:1026/v1/updateContext");
        let body = request.body.as_ref().and_then(RequestBody::as_json).unwrap();
        assert_eq!(body["updateAction"], "APPEND");
        let element = &body["contextElements"][0];
        assert_eq!(element["id"], "EntityName1");
        assert_eq!(element["type"], "Type1");
        assert_eq!(element["isPattern"], json!(false));
        assert_eq!(element["attributes"][0]["name"], "active1");
        assert_eq!(element["attributes"][0]["value"], "1");
        assert_eq!(element["attributes"][0]["metadatas"], json!([]));
    }

    #[test]
    fn test_ngsi_v1_body_with_metadata() {
        let mut attr = attribute(json!(21));
        attr.metadata = Some(vec![Metadata {
            name: Some("accuracy".to_string()),
            meta_type: Some("Number".to_string()),
            value: json!(0.5),
        }]);
        let request = ngsi_v1_update("http://cb:1026", Vec::new(), "EntityName1", "Type1", &[attr]);
        let body = request.body.as_ref().and_then(RequestBody::as_json).unwrap();
        assert_eq!(
            body["contextElements"][0]["attributes"][0]["metadatas"],
            json!([{"name": "accuracy", "type": "Number", "value": 0.5}])
        );
    }

    #[test]
    fn test_ngsi_v2_body_with_metadata() {
        let mut attr = attribute(json!("1"));
        attr.metadata = Some(vec![Metadata {
            name: Some("accuracy".to_string()),
            meta_type: Some("Number".to_string()),
            value: json!(0.5),
        }]);
        let request = ngsi_v2_update("http://cb:1026", Vec::new(), "EntityName1", "Type1", &[attr]);
        assert_eq!(request.url, "http://cb:1026/v2/op/update");
        let body = request.body.as_ref().and_then(RequestBody::as_json).unwrap();
        assert_eq!(body["actionType"], "APPEND");
        let entity = &body["entities"][0];
        assert_eq!(entity["id"], "EntityName1");
        assert_eq!(entity["active1"]["value"], "1");
        assert_eq!(entity["active1"]["metadata"]["accuracy"]["value"], 0.5);
    }

    #[test]
    fn test_ultralight_payload() {
        let mut t = attribute(json!(21.0));
        t.object_id = Some("t".to_string());
        let mut s = attribute(json!("on"));
        s.object_id = Some("s".to_string());
        let mut h = attribute(json!(40.5));
        h.object_id = Some("h".to_string());
        assert_eq!(ultralight_payload(&[t, s, h]), "t|21|s|on|h|40.5");
    }

    #[test]
    fn test_device_requests() {
        let request = ultralight_http("http://iota:7896", Vec::new(), "dev1", "key", &[attribute(json!(1))]);
        assert_eq!(request.url, "http://iota:7896/iot/d?i=dev1&k=key");
        assert_eq!(request.body.as_ref().and_then(RequestBody::as_text), Some("a1|1"));

        let request = json_http("http://iota:7896", Vec::new(), "dev1", "key", &[attribute(json!(1))]);
        assert_eq!(request.url, "http://iota:7896/iot/json?i=dev1&k=key");
        assert_eq!(request.body.as_ref().and_then(RequestBody::as_json), Some(&json!({"a1": 1})));

        let publication = mqtt_measure("mqtt://broker:1883", "dev1", "key", "a1|1".to_string());
        assert_eq!(publication.topic, "/key/dev1/attrs");
    }
}
