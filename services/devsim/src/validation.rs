//! Simulation configuration validation
//!
//! Runs before anything is scheduled. The first violation found is returned
//! as `SimulationConfigurationNotValid`. Checks run in this order: domain,
//! context broker, authentication, IoT agents, entities, devices.

use crate::config::{
    Attribute, DeviceProtocol, DeviceTemplate, Encoding, EndpointConfig, EntityTemplate,
    NgsiVersion, SimulationConfig, TransportKind,
};
use crate::error::{Result, SimulatorError};
use crate::schedule::Schedule;
use devsim_calc::{InterpolatorKind, InterpolatorRegistry};
use serde_json::Value;

fn not_valid(msg: impl Into<String>) -> SimulatorError {
    SimulatorError::config_not_valid(msg)
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Validate a configuration, compiling every interpolator spec it contains
pub fn validate(config: &SimulationConfig, registry: &InterpolatorRegistry) -> Result<()> {
    if config.entities.is_empty() && config.devices.is_empty() {
        return Err(not_valid(
            "No entities and/or devices configuration information available (at least one of them is mandatory)",
        ));
    }

    if !config.entities.is_empty() {
        validate_domain(config)?;
        validate_context_broker(config)?;
    }
    validate_authentication(config)?;
    validate_iota(config)?;

    for (index, entity) in config.entities.iter().enumerate() {
        validate_entity(entity, index, registry)?;
    }
    for (index, device) in config.devices.iter().enumerate() {
        validate_device(device, index, registry)?;
    }

    Ok(())
}

fn validate_domain(config: &SimulationConfig) -> Result<()> {
    let domain = config.domain.as_ref().ok_or_else(|| {
        not_valid("No domain configuration information (the 'domain' property is mandatory if 'entities' are included)")
    })?;
    if is_blank(&domain.service) {
        return Err(not_valid("No service in the domain configuration information ('domain.service' is mandatory if 'entities' are included)"));
    }
    if is_blank(&domain.subservice) {
        return Err(not_valid("No subservice in the domain configuration information ('domain.subservice' is mandatory if 'entities' are included)"));
    }
    Ok(())
}

fn validate_context_broker(config: &SimulationConfig) -> Result<()> {
    let broker = config.context_broker.as_ref().ok_or_else(|| {
        not_valid("No context broker configuration information (the 'contextBroker' property is mandatory if 'entities' are included)")
    })?;
    if is_blank(&broker.protocol) {
        return Err(not_valid("No protocol in the context broker configuration information"));
    }
    if is_blank(&broker.host) {
        return Err(not_valid("No host in the context broker configuration information"));
    }
    if broker.port.is_none() {
        return Err(not_valid("No port in the context broker configuration information"));
    }
    let version = broker
        .ngsi_version
        .as_deref()
        .ok_or_else(|| not_valid("No NGSI version in the context broker configuration information"))?;
    version.parse::<NgsiVersion>().map_err(|_| {
        not_valid(format!(
            "The NGSI version in the context broker configuration information ('{}') is not supported",
            version
        ))
    })?;
    Ok(())
}

fn validate_authentication(config: &SimulationConfig) -> Result<()> {
    let Some(auth) = config.authentication.as_ref() else {
        return Ok(());
    };
    let required = [
        ("protocol", is_blank(&auth.protocol)),
        ("host", is_blank(&auth.host)),
        ("port", auth.port.is_none()),
        ("user", is_blank(&auth.user)),
        ("password", is_blank(&auth.password)),
    ];
    if let Some((field, _)) = required.iter().find(|(_, missing)| *missing) {
        return Err(not_valid(format!(
            "No {} in the authentication configuration information (the 'authentication.{}' property is mandatory)",
            field, field
        )));
    }
    if auth.retry.is_some_and(|retry| retry.times == 0) {
        return Err(not_valid("The authentication retry policy must allow at least one attempt"));
    }
    Ok(())
}

fn validate_endpoint(endpoint: Option<&EndpointConfig>, path: &str) -> Result<()> {
    let endpoint = endpoint.ok_or_else(|| {
        not_valid(format!("No configuration information for '{}' (the property is mandatory)", path))
    })?;
    if is_blank(&endpoint.protocol) {
        return Err(not_valid(format!("No protocol in '{}'", path)));
    }
    if is_blank(&endpoint.host) {
        return Err(not_valid(format!("No host in '{}'", path)));
    }
    if endpoint.port.is_none() {
        return Err(not_valid(format!("No port in '{}'", path)));
    }
    Ok(())
}

fn validate_iota(config: &SimulationConfig) -> Result<()> {
    if config.devices.is_empty() {
        return Ok(());
    }

    // Protocols in use, and whether any device of that protocol relies on the agent API key
    let mut in_use: Vec<(DeviceProtocol, bool)> = Vec::new();
    for device in &config.devices {
        let Some(Ok(protocol)) = device.protocol.as_deref().map(str::parse::<DeviceProtocol>) else {
            // Reported per device
            continue;
        };
        let needs_key = is_blank(&device.api_key);
        match in_use.iter_mut().find(|(p, _)| *p == protocol) {
            Some((_, any_needs_key)) => *any_needs_key |= needs_key,
            None => in_use.push((protocol, needs_key)),
        }
    }
    if in_use.is_empty() {
        return Ok(());
    }

    let iota = config
        .iota
        .as_ref()
        .ok_or_else(|| not_valid("No IoT Agent configuration information (the 'iota' property is mandatory)"))?;

    for (protocol, needs_key) in in_use {
        let agent_name = match protocol.encoding {
            Encoding::UltraLight => "ultralight",
            Encoding::Json => "json",
        };
        let agent = iota.agent(protocol.encoding).ok_or_else(|| {
            not_valid(format!(
                "No {} IoT Agent configuration information (the 'iota.{}' property is mandatory)",
                protocol, agent_name
            ))
        })?;
        let transport_name = match protocol.transport {
            TransportKind::Http => "http",
            TransportKind::Mqtt => "mqtt",
        };
        validate_endpoint(
            agent.endpoint(protocol.transport),
            &format!("iota.{}.{}", agent_name, transport_name),
        )?;
        if needs_key && is_blank(&agent.api_key) {
            return Err(not_valid(format!(
                "No API key in the IoT Agent configuration information (the 'iota.{}.api_key' property is mandatory if {} devices are included with no specific API key information)",
                agent_name, protocol
            )));
        }
    }

    Ok(())
}

fn validate_schedule(schedule: Option<&str>, parent: &str, index: usize) -> Result<()> {
    if let Some(schedule) = schedule {
        schedule.parse::<Schedule>().map_err(|_| {
            not_valid(format!(
                "The {} configuration information at array index position {} includes an invalid schedule: '{}'",
                parent, index, schedule
            ))
        })?;
    }
    Ok(())
}

fn validate_value(
    value: &Value,
    registry: &InterpolatorRegistry,
    location: &str,
) -> Result<()> {
    if value.is_null() {
        return Err(not_valid(format!("{} missing the value property", location)));
    }
    let Value::String(text) = value else {
        return Ok(());
    };
    if let Some(result) = registry.resolve_value_spec(text) {
        result.map_err(|e| {
            not_valid(format!("{} with an invalid interpolator: '{}', due to error: {}", location, text, e))
        })?;
    } else if let Some(name) = InterpolatorKind::unknown_name(text) {
        return Err(not_valid(format!("{} uses an unknown interpolator '{}'", location, name)));
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum AttributeKind {
    Active,
    Static,
    Device,
}

fn validate_attribute(
    attribute: &Attribute,
    kind: AttributeKind,
    parent: &str,
    parent_index: usize,
    index: usize,
    registry: &InterpolatorRegistry,
) -> Result<()> {
    let described = match kind {
        AttributeKind::Active => "an active attribute",
        AttributeKind::Static => "a static attribute",
        AttributeKind::Device => "an attribute",
    };
    let location = format!(
        "The {} configuration information at array index position {} includes {} at array index position {}",
        parent, parent_index, described, index
    );

    match kind {
        AttributeKind::Active | AttributeKind::Static => {
            if is_blank(&attribute.name) {
                return Err(not_valid(format!("{} missing the name property", location)));
            }
            if is_blank(&attribute.attr_type) {
                return Err(not_valid(format!("{} missing the type property", location)));
            }
        },
        AttributeKind::Device => {
            if is_blank(&attribute.object_id) {
                return Err(not_valid(format!("{} missing the object_id property", location)));
            }
        },
    }

    validate_value(&attribute.value, registry, &location)?;
    validate_schedule(attribute.schedule.as_deref(), parent, parent_index)?;

    for (metadata_index, metadata) in attribute.metadata.iter().flatten().enumerate() {
        let missing = if is_blank(&metadata.name) {
            Some("name")
        } else if is_blank(&metadata.meta_type) {
            Some("type")
        } else if metadata.value.is_null() {
            Some("value")
        } else {
            None
        };
        if let Some(field) = missing {
            return Err(not_valid(format!(
                "{} including a metadata entry at array index position {} missing the {} property",
                location, metadata_index, field
            )));
        }
        validate_value(&metadata.value, registry, &location)?;
    }

    Ok(())
}

/// Recurring attributes need a schedule of their own or from their element
fn validate_effective_schedules(
    attributes: &[Attribute],
    element_schedule: Option<&str>,
    has_static: bool,
    parent: &str,
    index: usize,
) -> Result<()> {
    if element_schedule.is_some() {
        return Ok(());
    }
    let unscheduled = attributes.iter().any(|a| a.schedule.is_none());
    if unscheduled || (attributes.is_empty() && has_static) {
        return Err(not_valid(format!(
            "The {} configuration information at array index position {} has attributes with no schedule and no {} schedule",
            parent, index, parent
        )));
    }
    Ok(())
}

fn validate_entity(
    entity: &EntityTemplate,
    index: usize,
    registry: &InterpolatorRegistry,
) -> Result<()> {
    if is_blank(&entity.entity_name) && entity.count.is_none() {
        return Err(not_valid(format!(
            "The entities configuration information at array index position {} should include an entity_name or count properties",
            index
        )));
    }
    if is_blank(&entity.entity_name) && entity.count == Some(0) {
        return Err(not_valid(format!(
            "The entities configuration information at array index position {} has a count lower than 1",
            index
        )));
    }
    if is_blank(&entity.entity_type) {
        return Err(not_valid(format!(
            "The entities configuration information at array index position {} misses the entity_type property",
            index
        )));
    }
    if entity.active.is_empty() && entity.static_attributes.is_empty() {
        return Err(not_valid(format!(
            "The entities configuration information at array index position {} misses static and/or active attributes configuration information",
            index
        )));
    }

    validate_schedule(entity.schedule.as_deref(), "entity", index)?;
    for (i, attribute) in entity.static_attributes.iter().enumerate() {
        validate_attribute(attribute, AttributeKind::Static, "entity", index, i, registry)?;
    }
    for (i, attribute) in entity.active.iter().enumerate() {
        validate_attribute(attribute, AttributeKind::Active, "entity", index, i, registry)?;
    }
    validate_effective_schedules(
        &entity.active,
        entity.schedule.as_deref(),
        !entity.static_attributes.is_empty(),
        "entity",
        index,
    )?;
    Ok(())
}

fn validate_device(
    device: &DeviceTemplate,
    index: usize,
    registry: &InterpolatorRegistry,
) -> Result<()> {
    if is_blank(&device.device_id) && device.count.is_none() {
        return Err(not_valid(format!(
            "The devices configuration information at array index position {} should include an device_id or count properties",
            index
        )));
    }
    if is_blank(&device.device_id) {
        if device.count == Some(0) {
            return Err(not_valid(format!(
                "The devices configuration information at array index position {} has a count lower than 1",
                index
            )));
        }
        if is_blank(&device.entity_type) {
            return Err(not_valid(format!(
                "The devices configuration information at array index position {} uses count and misses the entity_type property used to generate device ids",
                index
            )));
        }
    }
    let protocol = device.protocol.as_deref().ok_or_else(|| {
        not_valid(format!(
            "The devices configuration information at array index position {} should include a protocol property",
            index
        ))
    })?;
    if protocol.parse::<DeviceProtocol>().is_err() {
        return Err(not_valid(format!(
            "The devices configuration information at array index position {} includes a not supported protocol ('{}'), supported: {}",
            index,
            protocol,
            DeviceProtocol::ALL.join(", ")
        )));
    }
    if device.attributes.is_empty() {
        return Err(not_valid(format!(
            "The devices configuration information at array index position {} misses attributes configuration information",
            index
        )));
    }

    validate_schedule(device.schedule.as_deref(), "device", index)?;
    for (i, attribute) in device.attributes.iter().enumerate() {
        validate_attribute(attribute, AttributeKind::Device, "device", index, i, registry)?;
    }
    validate_effective_schedules(&device.attributes, device.schedule.as_deref(), false, "device", index)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> SimulationConfig {
        serde_json::from_value(value).unwrap()
    }

    fn entity_config(entity: Value) -> SimulationConfig {
        config(json!({
            "domain": {"service": "s", "subservice": "/ss"},
            "contextBroker": {"protocol": "http", "host": "localhost", "port": 1026, "ngsiVersion": "2.0"},
            "entities": [entity],
        }))
    }

    fn check(config: &SimulationConfig) -> Result<()> {
        validate(config, &InterpolatorRegistry::new())
    }

    fn message(result: Result<()>) -> String {
        match result {
            Err(SimulatorError::SimulationConfigurationNotValid(msg)) => msg,
            other => panic!("expected a configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_configuration() {
        assert!(message(check(&SimulationConfig::default())).contains("No entities"));
    }

    #[test]
    fn test_valid_entity() {
        let config = entity_config(json!({
            "entity_name": "E1", "entity_type": "T", "schedule": "once",
            "active": [{"name": "a", "type": "Number", "value": "time-linear-interpolator([[0,0],[24,10]])"}],
            "staticAttributes": [{"name": "s", "type": "Text", "value": "x"}],
        }));
        check(&config).unwrap();
    }

    #[test]
    fn test_entities_require_domain_and_broker() {
        let mut config = entity_config(json!({
            "entity_name": "E1", "entity_type": "T", "schedule": "once",
            "staticAttributes": [{"name": "s", "type": "Text", "value": "x"}],
        }));
        config.domain = None;
        assert!(message(check(&config)).contains("domain"));

        let mut config = entity_config(json!({
            "entity_name": "E1", "entity_type": "T", "schedule": "once",
            "staticAttributes": [{"name": "s", "type": "Text", "value": "x"}],
        }));
        if let Some(broker) = config.context_broker.as_mut() {
            broker.ngsi_version = Some("3.0".to_string());
        }
        assert!(message(check(&config)).contains("not supported"));
    }

    #[test]
    fn test_invalid_interpolator_spec_is_configuration_error() {
        let config = entity_config(json!({
            "entity_name": "E1", "entity_type": "T", "schedule": "once",
            "active": [{"name": "a", "type": "Number",
                "value": "time-linear-interpolator({\"spec\": [[0,0]], \"return\": {\"type\": \"integer\"}})"}],
        }));
        assert!(message(check(&config)).contains("invalid interpolator"));
    }

    #[test]
    fn test_oversized_date_increment_is_rejected() {
        let config = entity_config(json!({
            "entity_name": "E1", "entity_type": "T", "schedule": "once",
            "active": [{"name": "a", "type": "DateTime",
                "value": "date-increment-interpolator({\"origin\": \"now\", \"increment\": 1e15})"}],
        }));
        assert!(message(check(&config)).contains("invalid interpolator"));
    }

    #[test]
    fn test_unknown_interpolator_is_rejected() {
        let config = entity_config(json!({
            "entity_name": "E1", "entity_type": "T", "schedule": "once",
            "active": [{"name": "a", "type": "Number", "value": "cubic-interpolator([[0,0]])"}],
        }));
        assert!(message(check(&config)).contains("unknown interpolator"));
    }

    #[test]
    fn test_invalid_schedule() {
        let config = entity_config(json!({
            "entity_name": "E1", "entity_type": "T", "schedule": "every day",
            "active": [{"name": "a", "type": "Number", "value": 1}],
        }));
        assert!(message(check(&config)).contains("invalid schedule"));
    }

    #[test]
    fn test_missing_effective_schedule() {
        let config = entity_config(json!({
            "entity_name": "E1", "entity_type": "T",
            "active": [{"name": "a", "type": "Number", "value": 1, "schedule": "once"},
                       {"name": "b", "type": "Number", "value": 2}],
        }));
        assert!(message(check(&config)).contains("no schedule"));
    }

    #[test]
    fn test_metadata_requires_fields() {
        let config = entity_config(json!({
            "entity_name": "E1", "entity_type": "T", "schedule": "once",
            "active": [{"name": "a", "type": "Number", "value": 1, "metadata": [{"name": "m", "value": 1}]}],
        }));
        assert!(message(check(&config)).contains("missing the type property"));
    }

    #[test]
    fn test_devices_require_agent_configuration() {
        let base = json!({
            "devices": [{"device_id": "d1", "protocol": "UltraLight::HTTP", "schedule": "once",
                "attributes": [{"object_id": "t", "value": 1}]}],
        });
        assert!(message(check(&config(base.clone()))).contains("'iota'"));

        let mut with_agent = base.clone();
        with_agent["iota"] = json!({"ultralight": {"http": {"protocol": "http", "host": "localhost", "port": 7896}}});
        assert!(message(check(&config(with_agent.clone()))).contains("api_key"));

        with_agent["iota"]["ultralight"]["api_key"] = json!("key");
        check(&config(with_agent)).unwrap();
    }

    #[test]
    fn test_device_protocol_and_count() {
        let counted = config(json!({
            "iota": {"json": {"api_key": "k", "mqtt": {"protocol": "mqtt", "host": "localhost", "port": 1883}}},
            "devices": [{"count": 2, "protocol": "JSON::MQTT", "schedule": "once",
                "attributes": [{"object_id": "t", "value": 1}]}],
        }));
        assert!(message(check(&counted)).contains("entity_type"));

        let unsupported = config(json!({
            "devices": [{"device_id": "d", "protocol": "LoRa::HTTP", "schedule": "once",
                "attributes": [{"object_id": "t", "value": 1}]}],
        }));
        assert!(message(check(&unsupported)).contains("not supported protocol"));
    }

    #[test]
    fn test_authentication_fields() {
        let mut config = entity_config(json!({
            "entity_name": "E1", "entity_type": "T", "schedule": "once",
            "staticAttributes": [{"name": "s", "type": "Text", "value": "x"}],
        }));
        config.authentication = Some(serde_json::from_value(json!({
            "protocol": "https", "host": "localhost", "port": 5001, "user": "u"
        })).unwrap());
        assert!(message(check(&config)).contains("password"));
    }
}
