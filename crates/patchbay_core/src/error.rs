use thiserror::Error;

use crate::types::PortDirection;

/// Errors raised while wiring a patch or configuring its modules.
///
/// Every variant leaves the patch in a usable state: a failed `connect`
/// records nothing and a failed parameter write stores the documented
/// fallback.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchError {
    #[error("module '{0}' not found")]
    ModuleNotFound(String),

    #[error("{direction} '{port}' not found in {module}")]
    PortNotFound {
        module: String,
        port: String,
        direction: PortDirection,
    },

    #[error("connection already exists: {0}")]
    DuplicateConnection(String),

    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("invalid value '{value}' for {module}.{parameter}")]
    InvalidParameterValue {
        module: String,
        parameter: String,
        value: String,
    },

    #[error("{module} has no parameter '{parameter}'")]
    UnknownParameter { module: String, parameter: String },

    #[error("unknown module type '{0}'")]
    UnknownModuleType(String),

    #[error("invalid config for {module_type}: {reason}")]
    InvalidConfig { module_type: String, reason: String },

    #[error("cycle detected between modules: {}", .0.join(", "))]
    CycleDetected(Vec<String>),
}

pub type Result<T> = std::result::Result<T, PatchError>;

impl PatchError {
    pub(crate) fn invalid_value(
        module: &str,
        parameter: &str,
        value: impl std::fmt::Display,
    ) -> Self {
        PatchError::InvalidParameterValue {
            module: module.to_string(),
            parameter: parameter.to_string(),
            value: value.to_string(),
        }
    }

    pub(crate) fn unknown_parameter(module: &str, parameter: &str) -> Self {
        PatchError::UnknownParameter {
            module: module.to_string(),
            parameter: parameter.to_string(),
        }
    }
}
