//! Expansion errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("{resource} has unsupported parameters: {}", .properties.join(","))]
    UnsupportedProperties {
        resource: String,
        properties: Vec<String>,
    },

    #[error("{resource} is missing required parameter {property}")]
    MissingProperty { resource: String, property: String },

    #[error("{resource} has an invalid {property}: {message}")]
    InvalidProperty {
        resource: String,
        property: String,
        message: String,
    },

    #[error("{0} would be overwritten by an expanded resource")]
    Conflict(String),

    #[error("invalid template fragment: {0}")]
    Fragment(String),

    #[error(transparent)]
    Build(#[from] ondemand_core::Error),
}

pub type ExpansionResult<T> = std::result::Result<T, ExpansionError>;
