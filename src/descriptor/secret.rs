//! # Secret Descriptor
//!
//! Logical secret name, target location and the opaque value.
//! The value is wiped on drop and never printed.

use crate::error::{ProvisionError, ResourceKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::LazyLock;
use zeroize::Zeroizing;

// Secrets Manager allows letters, numbers and / _ + = . @ -
static SECRET_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_+=.@-]+$").expect("segment regex is valid"));

/// Hierarchical secret name `<app>/<resource>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretName {
    app: String,
    resource: String,
}

impl SecretName {
    pub fn new(app: &str, resource: &str) -> Result<Self, ProvisionError> {
        format!("{app}/{resource}").parse()
    }

    /// Application namespace owning the secret
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Resource path below the application namespace
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl FromStr for SecretName {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (app, resource) = s.trim().split_once('/').ok_or_else(|| {
            ProvisionError::invalid(
                ResourceKind::Secret,
                format!("secret name '{s}' must have the form <app>/<resource>"),
            )
        })?;
        if s.len() > 512 {
            return Err(ProvisionError::invalid(
                ResourceKind::Secret,
                "secret name exceeds 512 characters",
            ));
        }
        if !SECRET_SEGMENT.is_match(app)
            || resource.is_empty()
            || !resource.split('/').all(|part| SECRET_SEGMENT.is_match(part))
        {
            return Err(ProvisionError::invalid(
                ResourceKind::Secret,
                format!("secret name '{s}' contains invalid characters"),
            ));
        }
        Ok(Self {
            app: app.to_string(),
            resource: resource.to_string(),
        })
    }
}

impl TryFrom<String> for SecretName {
    type Error = ProvisionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SecretName> for String {
    fn from(name: SecretName) -> Self {
        name.to_string()
    }
}

impl std::fmt::Display for SecretName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app, self.resource)
    }
}

/// Opaque secret value
#[derive(Clone)]
pub struct SecretValue(Zeroizing<String>);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Raw value, only for handing to a provider
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> ContentHash {
        ContentHash::of(self.0.as_bytes())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretValue(<redacted>)")
    }
}

/// SHA-256 content hash, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upstream secret in the cloud secret store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretDescriptor {
    pub name: SecretName,
    pub region: String,
    pub cluster: String,
    /// Only needed to seed a missing secret or to rotate
    #[serde(skip)]
    pub value: Option<SecretValue>,
}

impl SecretDescriptor {
    pub fn with_value(mut self, value: SecretValue) -> Self {
        self.value = Some(value);
        self
    }
}
