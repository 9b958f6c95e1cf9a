//! Error types for devsim-calc

use thiserror::Error;

/// Calculation errors
#[derive(Debug, Clone, Error)]
pub enum CalcError {
    /// The parameter spec of an interpolator failed its shape validation
    #[error("Invalid interpolation spec: {0}")]
    InvalidSpec(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Function error: {0}")]
    Function(String),

    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    /// A computed value left its representable range
    #[error("Value out of range: {0}")]
    OutOfRange(String),
}

impl CalcError {
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    pub fn expression(msg: impl Into<String>) -> Self {
        Self::Expression(msg.into())
    }

    pub fn function(msg: impl Into<String>) -> Self {
        Self::Function(msg.into())
    }

    pub fn variable_not_found(name: impl Into<String>) -> Self {
        Self::VariableNotFound(name.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    /// True when the error comes from a malformed spec rather than a runtime evaluation
    pub fn is_invalid_spec(&self) -> bool {
        matches!(self, Self::InvalidSpec(_))
    }
}

pub type Result<T> = std::result::Result<T, CalcError>;
