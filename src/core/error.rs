use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimulationError {
    #[error("invalid profile field `{field}`: {reason}")]
    InvalidProfile { field: String, reason: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("simulation cancelled")]
    Cancelled,
}

impl SimulationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProfile {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Field path for input errors, used by the HTTP layer.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidProfile { field, .. } => Some(field),
            _ => None,
        }
    }
}
