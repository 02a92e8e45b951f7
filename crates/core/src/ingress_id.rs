//! Ingress identifiers as issued by the control plane.
//!
//! Format: `<name>@<namespace>.<group...>`, e.g. `whoami@default.ingress.networking.k8s.io`.
//! Name and namespace are not re-validated against Kubernetes naming rules.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IngressId {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngressIdError {
    #[error("ingress id {0:?}: expected at least 3 dot-separated segments")]
    TooFewSegments(String),
    #[error("ingress id {0:?}: expected exactly one '@' between name and namespace")]
    NameNamespace(String),
}

impl IngressId {
    pub fn parse(id: &str) -> Result<Self, IngressIdError> {
        let parts: Vec<&str> = id.split('.').collect();
        if parts.len() < 3 {
            return Err(IngressIdError::TooFewSegments(id.to_string()));
        }
        let key: Vec<&str> = parts[0].split('@').collect();
        match key.as_slice() {
            [name, namespace] => Ok(Self { name: (*name).to_string(), namespace: (*namespace).to_string() }),
            _ => Err(IngressIdError::NameNamespace(id.to_string())),
        }
    }
}

impl FromStr for IngressId {
    type Err = IngressIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for IngressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
