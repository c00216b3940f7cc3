// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Library error type

use thiserror::Error;

/// Errors raised while converting or deploying solution templates
#[derive(Debug, Error)]
pub enum SolutionError {
    /// The portal rejected a request or could not be reached.
    ///
    /// This is the envelope every REST failure is wrapped in; `item_ids`
    /// names the items the failing call was about, when known.
    #[error("request failed ({code}): {message}")]
    Request {
        /// HTTP status or portal error code
        code: i64,
        /// Message reported by the portal or the transport
        message: String,
        /// Items involved in the failing call
        item_ids: Vec<String>,
    },

    /// Transport level failure from the HTTP client
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failure
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A URL could not be parsed
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Parser message
        reason: String,
    },

    /// Templates depend on each other in a loop
    #[error("cyclic dependency involving item {0}")]
    CyclicDependency(String),

    /// A template referenced by id is not part of the solution
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Deployment failed and created items were rolled back
    #[error("deployment of {item_id} failed: {source}")]
    Deploy {
        /// Source item id of the template that failed
        item_id: String,
        /// Underlying failure
        #[source]
        source: Box<SolutionError>,
    },
}

impl SolutionError {
    /// Build a request failure about the given items
    pub fn request(code: i64, message: impl Into<String>, item_ids: &[&str]) -> Self {
        Self::Request {
            code,
            message: message.into(),
            item_ids: item_ids.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Attach item ids to a request failure; other variants pass through
    #[must_use]
    pub fn with_ids(self, ids: &[&str]) -> Self {
        match self {
            Self::Request { code, message, mut item_ids } => {
                for id in ids {
                    if !item_ids.iter().any(|i| i == id) {
                        item_ids.push((*id).to_string());
                    }
                }
                Self::Request { code, message, item_ids }
            }
            other => other,
        }
    }

    /// Item ids carried by this error
    #[must_use]
    pub fn item_ids(&self) -> Vec<String> {
        match self {
            Self::Request { item_ids, .. } => item_ids.clone(),
            Self::Deploy { item_id, source } => {
                let mut ids = vec![item_id.clone()];
                ids.extend(source.item_ids().into_iter().filter(|i| i != item_id));
                ids
            }
            _ => Vec::new(),
        }
    }
}

/// Result alias for library operations
pub type Result<T> = std::result::Result<T, SolutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_ids_dedupes() {
        let err = SolutionError::request(400, "bad", &["a"]).with_ids(&["a", "b"]);
        assert_eq!(err.item_ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_deploy_error_collects_ids() {
        let err = SolutionError::Deploy {
            item_id: "x".into(),
            source: Box::new(SolutionError::request(500, "boom", &["x", "y"])),
        };
        assert_eq!(err.item_ids(), vec!["x".to_string(), "y".to_string()]);
        assert!(err.to_string().contains("deployment of x failed"));
    }
}
