//! Simulator error types
//!
//! Every variant carries owned strings so errors can be cloned into events.

use devsim_calc::CalcError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SimulatorError {
    /// Structural or semantic configuration error, detected before anything runs
    #[error("Simulation configuration not valid: {0}")]
    SimulationConfigurationNotValid(String),

    #[error("Invalid interpolation spec: {0}")]
    InvalidInterpolationSpec(String),

    /// Runtime failure computing one attribute value
    #[error("Value resolution error: {0}")]
    ValueResolutionError(String),

    #[error("Token not available: {0}")]
    TokenNotAvailable(String),

    #[error("NGSI version not supported: {0}")]
    NgsiVersionNotSupported(String),

    #[error("Protocol not supported: {0}")]
    ProtocolNotSupported(String),

    /// Network or broker failure
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status code {status}")]
    UnexpectedStatus { status: u16, body: Option<String> },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SimulatorError {
    pub fn config_not_valid(msg: impl Into<String>) -> Self {
        Self::SimulationConfigurationNotValid(msg.into())
    }

    pub fn value_resolution(msg: impl Into<String>) -> Self {
        Self::ValueResolutionError(msg.into())
    }

    pub fn token_not_available(msg: impl Into<String>) -> Self {
        Self::TokenNotAvailable(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Stable error name, as reported in events
    pub fn name(&self) -> &'static str {
        match self {
            Self::SimulationConfigurationNotValid(_) => "SimulationConfigurationNotValid",
            Self::InvalidInterpolationSpec(_) => "InvalidInterpolationSpec",
            Self::ValueResolutionError(_) => "ValueResolutionError",
            Self::TokenNotAvailable(_) => "TokenNotAvailable",
            Self::NgsiVersionNotSupported(_) => "NGSIVersionNotSupported",
            Self::ProtocolNotSupported(_) => "ProtocolNotSupported",
            Self::Transport(_) => "TransportError",
            Self::UnexpectedStatus { .. } => "UnexpectedStatus",
            Self::Config(_) => "ConfigError",
            Self::Serialization(_) => "SerializationError",
        }
    }

    /// Errors that end the whole run rather than a single firing
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SimulationConfigurationNotValid(_) | Self::TokenNotAvailable(_) | Self::Config(_)
        )
    }
}

impl From<CalcError> for SimulatorError {
    fn from(err: CalcError) -> Self {
        match err {
            CalcError::InvalidSpec(msg) => Self::InvalidInterpolationSpec(msg),
            other => Self::ValueResolutionError(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SimulatorError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<rumqttc::ClientError> for SimulatorError {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::Transport(format!("MQTT client error: {}", err))
    }
}

impl From<serde_json::Error> for SimulatorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<figment::Error> for SimulatorError {
    fn from(err: figment::Error) -> Self {
        Self::SimulationConfigurationNotValid(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SimulatorError>;

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_error_mapping() {
        let err: SimulatorError = CalcError::invalid_spec("bad").into();
        assert_eq!(err.name(), "InvalidInterpolationSpec");

        let err: SimulatorError = CalcError::variable_not_found("x").into();
        assert_eq!(err.name(), "ValueResolutionError");
        assert!(!err.is_fatal());

        let err: SimulatorError = CalcError::out_of_range("date overflow").into();
        assert_eq!(err.name(), "ValueResolutionError");
    }

    #[test]
    fn test_fatal_errors() {
        assert!(SimulatorError::token_not_available("503").is_fatal());
        assert!(SimulatorError::config_not_valid("no entities").is_fatal());
        assert!(!SimulatorError::ProtocolNotSupported("X".into()).is_fatal());
    }
}
