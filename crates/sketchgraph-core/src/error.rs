use serde::Serialize;
use thiserror::Error;

use crate::expression::ExpressionError;
use crate::types::ScopeId;

#[derive(Error, Debug)]
pub enum SketchGraphError {
    #[error("Master sketch \"{name}\" not found in element {element_id}")]
    SketchNotFound { name: String, element_id: String },

    #[error("Malformed sketch entity {entity_id} in feature {feature_id}: {reason}")]
    MalformedSketch {
        feature_id: String,
        entity_id: String,
        reason: String,
    },

    #[error("Reference decode failure: {0}")]
    DecodeFailure(String),

    #[error("Expression parse failure: {0}")]
    ExpressionParse(#[from] ExpressionError),

    #[error("Failed to fetch {scope}: {reason}")]
    ScopeFetch { scope: ScopeId, reason: String },

    #[error("Malformed derive feature {feature_id}: {reason}")]
    MalformedDerivation { feature_id: String, reason: String },

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SketchGraphError>;

/// A failure confined to one scope. The scope's contribution is dropped and
/// extraction continues with the remaining scopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeError {
    pub scope: ScopeId,
    pub message: String,
}

impl ScopeError {
    pub fn new(scope: ScopeId, error: &SketchGraphError) -> Self {
        Self {
            scope,
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for ScopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.scope, self.message)
    }
}
