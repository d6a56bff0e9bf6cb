//! Applicability and namespace exemption checks
//!
//! A review is only considered when it creates or updates a Pod itself (no
//! subresource). Namespaces can opt out through [`OVERRIDE_ENABLED_ANNOTATION`],
//! and a fixed set of system namespaces is always exempt.

use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, Operation};

use crate::{
    Error, Result, EXEMPT_NAMESPACE_NAMES, EXEMPT_NAMESPACE_PREFIXES, OVERRIDE_ENABLED_ANNOTATION,
};

/// Resource name of Pods in admission requests
pub const PODS_RESOURCE: &str = "pods";

/// Returns true if the request creates or updates a Pod (not a subresource)
pub fn is_applicable(request: &AdmissionRequest<DynamicObject>) -> bool {
    request.resource.resource == PODS_RESOURCE
        && request.sub_resource.as_deref().unwrap_or_default().is_empty()
        && matches!(request.operation, Operation::Create | Operation::Update)
}

/// Interpret the request payload as a Pod
pub fn decode_pod(request: &AdmissionRequest<DynamicObject>) -> Result<Pod> {
    let object = request
        .object
        .as_ref()
        .ok_or_else(|| Error::bad_request("request carries no object"))?;

    if let Some(types) = &object.types {
        if types.kind != "Pod" {
            return Err(Error::bad_request(format!("expected Pod, got {}", types.kind)));
        }
    }

    let value = serde_json::to_value(object)?;
    serde_json::from_value(value).map_err(|e| Error::bad_request(e.to_string()))
}

/// Why a namespace is skipped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exemption {
    /// The namespace annotation disables overrides
    OptedOut,
    /// The namespace is a reserved system namespace
    SystemNamespace,
}

/// Namespaces that are never overridden, by exact name or prefix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExemptNamespaces {
    names: Vec<String>,
    prefixes: Vec<String>,
}

impl Default for ExemptNamespaces {
    fn default() -> Self {
        Self::new(EXEMPT_NAMESPACE_NAMES, EXEMPT_NAMESPACE_PREFIXES)
    }
}

impl ExemptNamespaces {
    /// Build an exemption list from names and prefixes
    pub fn new<N, P>(names: N, prefixes: P) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if `name` matches an exempt name or prefix
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name) || self.prefixes.iter().any(|p| name.starts_with(p))
    }
}

/// Decide whether overrides are skipped for a namespace
///
/// The opt-out annotation is checked first: present with any value other
/// than `"true"` exempts the namespace. Only then is the system list
/// consulted, so `"true"` never re-enables a system namespace.
pub fn namespace_exemption(ns: &Namespace, exempt: &ExemptNamespaces) -> Option<Exemption> {
    let enabled = ns
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(OVERRIDE_ENABLED_ANNOTATION));
    if matches!(enabled, Some(value) if value != "true") {
        return Some(Exemption::OptedOut);
    }

    let name = ns.metadata.name.as_deref().unwrap_or_default();
    if exempt.contains(name) {
        return Some(Exemption::SystemNamespace);
    }

    None
}
