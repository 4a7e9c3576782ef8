//! # Error Handling
//!
//! This module defines the centralized error type for `material-tracker`.
//! It uses `thiserror` to build a single `Error` enum covering every failure
//! mode of the engine, and a `Result<T>` alias used throughout the crate.
//!
//! ## Taxonomy
//!
//! - **`Connection`**: an adapter cannot reach its source. Retryable and
//!   reported as a health signal; it never aborts polling of other materials.
//! - **`WorkingCopyCorrupt`**: the local copy could not be reused. Recovered
//!   locally by a destructive recreate.
//! - **`ConfigParse`** / **`ConfigMerge`**: a config-repo produced invalid or
//!   conflicting content. The last good partial config is retained.
//! - **`UnresolvedSecret`** / **`Crypto`**: fatal for the single operation
//!   using the secret. Never retried.
//! - **`MaterialUpdate`**: the generic, redacted adapter failure that callers
//!   see. Callers only distinguish success from failure.
//!
//! Every message carried by a variant has already passed through
//! [`crate::redact::Redactor`]; nothing in here formats raw credentials.

use thiserror::Error;

/// Main error type for material-tracker operations
#[derive(Error, Debug)]
pub enum Error {
    /// The source could not be reached.
    #[error("Connection error for {material}: {message}")]
    Connection { material: String, message: String },

    /// The working copy on disk cannot be reused in place.
    #[error("Working copy at {path} is unusable: {message}")]
    WorkingCopyCorrupt { path: String, message: String },

    /// A config-repo's content failed to parse.
    ///
    /// Also used for the server configuration file, with an optional hint.
    #[error("Configuration parsing error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// A partial config conflicts with the rest of the merged configuration.
    #[error("Configuration merge error in {origin}: {message}")]
    ConfigMerge { origin: String, message: String },

    /// A deferred secret parameter was used before it was resolved.
    #[error("SecretParam '{key}' is used before it is resolved.")]
    UnresolvedSecret { key: String },

    /// Encrypting or decrypting a credential failed.
    #[error("Crypto error: {message}")]
    Crypto { message: String },

    /// Generic, redacted adapter failure.
    #[error("Material update failed for {material}: {message}")]
    MaterialUpdate { material: String, message: String },

    /// One or more materials of a pipeline could not be checked.
    #[error("Trigger check failed for pipeline {pipeline}: {}", failures.join("; "))]
    TriggerCheck {
        pipeline: String,
        failures: Vec<String>,
    },

    /// An external tool exited unsuccessfully.
    #[error("Command failed: {command} - {stderr}")]
    Command { command: String, stderr: String },

    /// An external tool did not finish in time and was killed.
    #[error("Command timed out after {seconds}s: {command}")]
    CommandTimeout { command: String, seconds: u64 },

    /// An external tool produced output that could not be understood.
    #[error("Unexpected {tool} output: {message}")]
    ToolOutput { tool: String, message: String },

    /// No plugin is registered for the given id.
    #[error("Plugin not found: {plugin_id}")]
    PluginNotFound { plugin_id: String },

    /// Material configuration failed validation.
    #[error("Validation failed: {}", problems.join("; "))]
    Validation { problems: Vec<String> },

    /// The persistence collaborator failed.
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// An error occurred with an in-memory filesystem operation.
    #[error("Filesystem operation error: {message}")]
    Filesystem { message: String },

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// A semantic versioning parsing error, wrapped from `semver::Error`.
    #[error("Semver parsing error: {0}")]
    Semver(#[from] semver::Error),
}

impl Error {
    /// Whether retrying the same operation later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::CommandTimeout { .. }
        )
    }

    /// Helper for mapping a poisoned lock into an error.
    pub(crate) fn poisoned(context: &str) -> Self {
        Error::LockPoisoned {
            context: context.to_string(),
        }
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
