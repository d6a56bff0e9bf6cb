//! Admission decision for Pod create/update reviews
//!
//! [`OverrideAdmission`] composes the gate, the namespace limit resolver, the
//! mutator and the patch generator. Every failure becomes a denial whose
//! status code reflects the [`FailureKind`] of the error; nothing is
//! downgraded to "allow".

use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Container, Pod};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use tracing::{debug, error, info};

use crate::config::OverrideConfig;
use crate::gate::{self, ExemptNamespaces};
use crate::limits::min_resource_limits;
use crate::mutator::{ApplyMode, Floors, Mutator, RESOURCE_CPU, RESOURCE_MEMORY};
use crate::patch;
use crate::store::{LimitRangeLister, NamespaceLister};
use crate::{Error, FailureKind, Result};

/// The resource override admission engine
///
/// Immutable once built; safe to share across concurrent requests.
#[derive(Clone)]
pub struct OverrideAdmission {
    config: OverrideConfig,
    floors: Floors,
    exemptions: ExemptNamespaces,
    mode: ApplyMode,
    namespaces: Arc<dyn NamespaceLister>,
    limit_ranges: Arc<dyn LimitRangeLister>,
}

impl fmt::Debug for OverrideAdmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideAdmission")
            .field("config", &self.config)
            .field("floors", &self.floors)
            .field("exemptions", &self.exemptions)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl OverrideAdmission {
    /// Create an engine with default floors and system namespace exemptions
    pub fn new(
        config: OverrideConfig,
        namespaces: Arc<dyn NamespaceLister>,
        limit_ranges: Arc<dyn LimitRangeLister>,
    ) -> Self {
        Self {
            config,
            floors: Floors::default(),
            exemptions: ExemptNamespaces::default(),
            mode: ApplyMode::Mutate,
            namespaces,
            limit_ranges,
        }
    }

    /// Replace the absolute CPU and memory floors
    pub fn with_floors(mut self, floors: Floors) -> Self {
        self.floors = floors;
        self
    }

    /// Replace the list of namespaces that are never overridden
    pub fn with_exemptions(mut self, exemptions: ExemptNamespaces) -> Self {
        self.exemptions = exemptions;
        self
    }

    /// Check containers against the derived values instead of rewriting them
    pub fn with_mode(mut self, mode: ApplyMode) -> Self {
        self.mode = mode;
        self
    }

    /// The configuration this engine applies
    pub fn config(&self) -> &OverrideConfig {
        &self.config
    }

    /// Returns true if the request creates or updates a Pod
    pub fn is_applicable(&self, request: &AdmissionRequest<DynamicObject>) -> bool {
        gate::is_applicable(request)
    }

    /// Returns true if the request's namespace is not subject to overrides
    ///
    /// Fails with a bad request if the payload is not a Pod and with a lookup
    /// error if the namespace is not cached.
    pub fn is_exempt(&self, request: &AdmissionRequest<DynamicObject>) -> Result<bool> {
        gate::decode_pod(request)?;
        let name = request.namespace.as_deref().unwrap_or_default();
        let namespace = self.namespaces.get(name)?;

        match gate::namespace_exemption(&namespace, &self.exemptions) {
            Some(reason) => {
                debug!(uid = %request.uid, namespace = name, ?reason, "Namespace exempt from overrides");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Decide the review: allow unchanged, allow with a patch, or deny
    pub fn admit(&self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        if !self.is_applicable(request) {
            debug!(uid = %request.uid, "Request not applicable, allowing unchanged");
            return AdmissionResponse::from(request);
        }

        match self.is_exempt(request) {
            Ok(true) => return AdmissionResponse::from(request),
            Ok(false) => {}
            Err(e) => return deny(request, &e),
        }

        match self.mutate(request) {
            Ok(response) => response,
            Err(e) => deny(request, &e),
        }
    }

    fn mutate(&self, request: &AdmissionRequest<DynamicObject>) -> Result<AdmissionResponse> {
        let original = gate::decode_pod(request)?;
        let namespace = request.namespace.as_deref().unwrap_or_default();

        let limit_ranges = self.limit_ranges.list(namespace)?;
        let ranges = limit_ranges.iter().map(Arc::as_ref);
        let cpu_floor = min_resource_limits(ranges.clone(), RESOURCE_CPU);
        let memory_floor = min_resource_limits(ranges, RESOURCE_MEMORY);

        let mutator = Mutator::new(&self.config, &self.floors, cpu_floor, memory_floor)
            .with_mode(self.mode);

        let mut mutated = original.clone();
        if let Some(spec) = mutated.spec.as_mut() {
            if let Some(init) = spec.init_containers.as_mut() {
                mutate_all(&mutator, init, "spec.initContainers")?;
            }
            mutate_all(&mutator, &mut spec.containers, "spec.containers")?;
        }

        let patch = patch::diff(&original, &mutated)?;
        info!(
            uid = %request.uid,
            namespace,
            pod = pod_name(&original),
            patch_ops = patch.0.len(),
            "Applying resource overrides"
        );

        AdmissionResponse::from(request)
            .with_patch(patch)
            .map_err(|e| Error::patch(e.to_string()))
    }
}

fn mutate_all(mutator: &Mutator<'_>, containers: &mut [Container], list: &str) -> Result<()> {
    for (i, container) in containers.iter_mut().enumerate() {
        mutator
            .mutate(container)
            .map_err(|e| e.at(&format!("{list}[{i}]")))?;
    }
    Ok(())
}

fn pod_name(pod: &Pod) -> &str {
    pod.metadata
        .name
        .as_deref()
        .or(pod.metadata.generate_name.as_deref())
        .unwrap_or_default()
}

/// Denial response for `err`, with the status code of its failure category
pub fn deny(request: &AdmissionRequest<DynamicObject>, err: &Error) -> AdmissionResponse {
    let kind = err.category();
    match kind {
        FailureKind::InternalServerError => {
            error!(uid = %request.uid, error = %err, "Resource override failed")
        }
        _ => debug!(uid = %request.uid, error = %err, "Denying admission request"),
    }

    let mut response = AdmissionResponse::from(request).deny(err.to_string());
    response.result.code = kind.code();
    response.result.reason = kind.reason().to_string();
    response
}
