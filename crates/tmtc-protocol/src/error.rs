//! Error types for the route engine.

use thiserror::Error;
use tmtc_codec::CodecError;
use tmtc_common::{EntityId, ValueError};

/// Errors produced by field primitives and expressions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FieldError {
    /// An expression could not be compiled.
    #[error("invalid expression '{expression}': {reason}")]
    Expression { expression: String, reason: String },

    /// A computed field failed to evaluate.
    #[error("cannot evaluate field '{field}': {reason}")]
    Evaluation { field: String, reason: String },

    /// A literal could not be parsed or a counter could not be formatted.
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Result type alias for field operations.
pub type FieldResult<T> = Result<T, FieldError>;

/// Errors detected while materialising a route from its configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A mapping refers to a message definition that does not exist.
    #[error("unknown message definition '{0}'")]
    UnknownMessage(String),

    /// Two message definitions share the same id.
    #[error("duplicate message definition '{0}'")]
    DuplicateMessage(String),

    /// Two inbound mappings share a (message, secondary id) key.
    #[error("duplicate inbound mapping for message '{message}' secondary id '{secondary_id}'")]
    DuplicateInbound { message: String, secondary_id: String },

    /// Two outbound mappings share the same id.
    #[error("duplicate outbound mapping '{0}'")]
    DuplicateOutbound(String),

    /// A command-match refers to an unknown outbound mapping.
    #[error("unknown outbound mapping '{0}'")]
    UnknownOutbound(String),

    /// A mapping is structurally invalid.
    #[error("invalid mapping '{id}': {reason}")]
    InvalidMapping { id: String, reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors surfaced by route operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RouteError {
    /// No activity-driven mapping targets the activity.
    #[error("no outbound mapping for activity {activity_id}")]
    NoOutboundMapping { activity_id: EntityId },

    /// The mapping kind cannot be used by this operation.
    #[error("outbound mapping '{mapping}' of kind {kind} cannot be used here")]
    UnsupportedMappingKind { mapping: String, kind: String },

    /// No outbound mapping has this id.
    #[error("unknown outbound mapping '{0}'")]
    UnknownMapping(String),

    /// Writing to the device connection failed.
    #[error("transmission failed: {0}")]
    Transmission(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Result type alias for route operations.
pub type RouteResult<T> = Result<T, RouteError>;
