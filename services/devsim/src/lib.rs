//! devsim Library
//!
//! Simulation core of the IoT device and entity simulator. A run expands the
//! configured entity and device templates, groups their attributes by
//! schedule, and fires one job per group. Every firing resolves the
//! attribute values and sends an update to the NGSI Context Broker or to an
//! IoT agent over HTTP or MQTT.
//!
//! ## Architecture
//!
//! - `config` / `validation`: simulation file model, loading and checks
//! - `expander` / `grouper`: concrete elements and their schedule groups
//! - `schedule` / `scheduler`: cron-like schedules and the job timers
//! - `resolver` / `dispatcher` / `payload`: values, wire shapes and sending
//! - `token`: identity service token and its renewal
//! - `events`: the event stream each run reports on
//! - `transport`: HTTP and MQTT seams with reqwest and rumqttc backends

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod expander;
pub mod grouper;
pub mod logging;
pub mod payload;
pub mod resolver;
pub mod schedule;
pub mod scheduler;
pub mod simulator;
pub mod token;
pub mod transport;
pub mod validation;

pub use config::{load_config, SimulationConfig};
pub use error::{Result, SimulatorError};
pub use events::{EventNotifier, EventStream, OutboundRequest, SimulationEvent};
pub use simulator::DeviceSimulator;
