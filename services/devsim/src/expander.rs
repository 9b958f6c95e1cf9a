//! Element expansion
//!
//! Turns entity and device templates into concrete element instances. A
//! template with `count = N` yields N instances identified `{entity_type}:{i}`
//! for `i` in `1..=N`; every instance owns its own copy of the attributes.

use crate::config::{Attribute, DeviceProtocol, DeviceTemplate, EntityTemplate, IotaConfig, SimulationConfig};
use crate::error::Result;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Entity,
    Device,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity => f.write_str("entity"),
            Self::Device => f.write_str("device"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityInstance {
    pub entity_name: String,
    pub entity_type: String,
    pub schedule: Option<String>,
    pub active: Vec<Attribute>,
    pub static_attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInstance {
    pub device_id: String,
    pub protocol: String,
    pub api_key: Option<String>,
    pub schedule: Option<String>,
    pub attributes: Vec<Attribute>,
}

impl DeviceInstance {
    pub fn parsed_protocol(&self) -> Result<DeviceProtocol> {
        self.protocol.parse()
    }

    /// The device's own API key, falling back to the agent default of its protocol
    pub fn effective_api_key(&self, iota: Option<&IotaConfig>) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        let protocol = self.parsed_protocol().ok()?;
        iota?.agent(protocol.encoding)?.api_key.clone()
    }
}

/// A concrete entity or device of one simulation run
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Entity(EntityInstance),
    Device(DeviceInstance),
}

impl Element {
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Entity(_) => ElementType::Entity,
            Self::Device(_) => ElementType::Device,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Entity(e) => &e.entity_name,
            Self::Device(d) => &d.device_id,
        }
    }

    pub fn schedule(&self) -> Option<&str> {
        match self {
            Self::Entity(e) => e.schedule.as_deref(),
            Self::Device(d) => d.schedule.as_deref(),
        }
    }

    /// Attributes re-resolved at every firing: active attributes or device attributes
    pub fn recurring_attributes(&self) -> &[Attribute] {
        match self {
            Self::Entity(e) => &e.active,
            Self::Device(d) => &d.attributes,
        }
    }

    pub fn static_attributes(&self) -> &[Attribute] {
        match self {
            Self::Entity(e) => &e.static_attributes,
            Self::Device(_) => &[],
        }
    }
}

/// Blank names count as absent so that `count` still applies
fn given_name(name: &Option<String>) -> Option<&String> {
    name.as_ref().filter(|n| !n.trim().is_empty())
}

fn generated_id(entity_type: Option<&str>, index: u32) -> String {
    format!("{}:{}", entity_type.unwrap_or_default(), index)
}

pub fn expand_entity(template: &EntityTemplate) -> Vec<Element> {
    let instance = |entity_name: String| {
        Element::Entity(EntityInstance {
            entity_name,
            entity_type: template.entity_type.clone().unwrap_or_default(),
            schedule: template.schedule.clone(),
            active: template.active.clone(),
            static_attributes: template.static_attributes.clone(),
        })
    };

    match (given_name(&template.entity_name), template.count) {
        (Some(name), _) => vec![instance(name.clone())],
        (None, Some(count)) => (1..=count)
            .map(|i| instance(generated_id(template.entity_type.as_deref(), i)))
            .collect(),
        (None, None) => Vec::new(),
    }
}

pub fn expand_device(template: &DeviceTemplate) -> Vec<Element> {
    let instance = |device_id: String| {
        Element::Device(DeviceInstance {
            device_id,
            protocol: template.protocol.clone().unwrap_or_default(),
            api_key: template.api_key.clone(),
            schedule: template.schedule.clone(),
            attributes: template.attributes.clone(),
        })
    };

    match (given_name(&template.device_id), template.count) {
        (Some(id), _) => vec![instance(id.clone())],
        (None, Some(count)) => (1..=count)
            .map(|i| instance(generated_id(template.entity_type.as_deref(), i)))
            .collect(),
        (None, None) => Vec::new(),
    }
}

/// Expand every entity then every device template of a configuration
pub fn expand_all(config: &SimulationConfig) -> Vec<Element> {
    config
        .entities
        .iter()
        .flat_map(expand_entity)
        .chain(config.devices.iter().flat_map(expand_device))
        .collect()
}
