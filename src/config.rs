//! Deserializable configuration for the logger and the request middleware.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{BypassRule, error::Result};

/// Settings of a [`ContextLogger`](crate::ContextLogger).
///
/// # Examples
///
/// ```
/// use request_logger::LoggerConfig;
///
/// let config = LoggerConfig::from_json(r#"{
///     "development": true,
///     "request_id_prefix": "API-",
///     "fixed_key_values": { "service": "billing" },
///     "extra_fields": ["tenant"]
/// }"#)?;
///
/// assert!(config.development);
/// assert_eq!(config.extra_fields, ["tenant"]);
/// # Ok::<(), request_logger::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Enables `debug` records, otherwise the minimum level is `info`.
    pub development: bool,
    pub request_id_prefix: String,
    /// Key-values attached to every record, in key order.
    pub fixed_key_values: BTreeMap<String, serde_json::Value>,
    /// Names of context fields that are attached to records.
    pub extra_fields: Vec<String>,
}

impl LoggerConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the document is not a valid
    /// configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Settings of a [`RequestLoggingLayer`](crate::middleware::RequestLoggingLayer).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Emit an "Incoming request" record with the request details.
    pub log_request_details: bool,
    /// Emit a "Request completed" record with the request latency.
    pub log_completion: bool,
    pub bypass: Vec<BypassRule>,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            log_request_details: true,
            log_completion: true,
            bypass: Vec::new(),
        }
    }
}

impl MiddlewareConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the document is not a valid
    /// configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
