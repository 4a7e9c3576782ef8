//! Deferred secret parameters.
//!
//! A password may be configured literally or as a placeholder of the form
//! `{{SECRET:[store_id][lookup_key]}}`. Placeholders are resolved by an
//! external secret store before the material is used; resolution is an
//! explicit step that yields a literal value or an error.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn secret_param_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\{\{SECRET:\[(?P<store>[^\]]+)\]\[(?P<key>[^\]]+)\]\}\}$")
            .unwrap_or_else(|e| panic!("invalid secret param pattern: {e}"))
    })
}

/// Reference to a value held in an external secret store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretParam {
    pub store_id: String,
    pub key: String,
}

impl SecretParam {
    pub fn new(store_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            key: key.into(),
        }
    }

    /// Parse a `{{SECRET:[store][key]}}` placeholder.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = secret_param_pattern().captures(raw.trim())?;
        Some(Self::new(&caps["store"], &caps["key"]))
    }
}

impl fmt::Display for SecretParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{SECRET:[{}][{}]}}}}", self.store_id, self.key)
    }
}

/// A password as known at use time.
#[derive(Clone, PartialEq, Eq)]
pub enum SecretValue {
    Literal(String),
    Deferred(SecretParam),
}

impl SecretValue {
    /// Classify a configured password string.
    pub fn from_config(raw: &str) -> Self {
        match SecretParam::parse(raw) {
            Some(param) => SecretValue::Deferred(param),
            None => SecretValue::Literal(raw.to_string()),
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, SecretValue::Deferred(_))
    }

    /// The literal value, failing fast on an unresolved placeholder.
    pub fn expose(&self) -> Result<&str> {
        match self {
            SecretValue::Literal(value) => Ok(value),
            SecretValue::Deferred(param) => Err(Error::UnresolvedSecret {
                key: param.key.clone(),
            }),
        }
    }

    /// Resolve a deferred value through the given store.
    pub fn resolve(&self, resolver: &dyn SecretResolver) -> Result<SecretValue> {
        match self {
            SecretValue::Literal(_) => Ok(self.clone()),
            SecretValue::Deferred(param) => resolver.resolve(param).map(SecretValue::Literal),
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretValue::Literal(_) => write!(f, "Literal({})", crate::redact::MASK),
            SecretValue::Deferred(param) => write!(f, "Deferred({})", param),
        }
    }
}

/// External secret store lookup.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, param: &SecretParam) -> Result<String>;
}

/// Resolver backed by a fixed map, mostly useful for tests and the CLI's
/// environment-variable lookups.
#[derive(Debug, Default, Clone)]
pub struct MapSecretResolver {
    values: std::collections::HashMap<SecretParam, String>,
}

impl MapSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, param: SecretParam, value: impl Into<String>) -> Self {
        self.values.insert(param, value.into());
        self
    }
}

impl SecretResolver for MapSecretResolver {
    fn resolve(&self, param: &SecretParam) -> Result<String> {
        self.values
            .get(param)
            .cloned()
            .ok_or_else(|| Error::UnresolvedSecret {
                key: param.key.clone(),
            })
    }
}

/// Resolves `{{SECRET:[env][NAME]}}` from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretResolver;

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, param: &SecretParam) -> Result<String> {
        if param.store_id != "env" {
            return Err(Error::UnresolvedSecret {
                key: param.key.clone(),
            });
        }
        std::env::var(&param.key).map_err(|_| Error::UnresolvedSecret {
            key: param.key.clone(),
        })
    }
}
