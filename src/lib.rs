//! Cluster Resource Override - mutating admission engine for Pod resources
//!
//! Sits in the admission path of Pod create/update requests and rewrites
//! container requests and limits from configured ratios, never dropping a
//! value below the namespace's limit-range minimums.
//!
//! # Modules
//!
//! - [`quantity`] - Exact, format-preserving resource quantity arithmetic
//! - [`limits`] - Namespace floors resolved from LimitRange objects
//! - [`gate`] - Applicability and namespace exemption checks
//! - [`mutator`] - Ratio-based container resource mutation
//! - [`patch`] - JSON patch of the changed container resource fields
//! - [`admission`] - The admission decision composed from the above
//! - [`store`] - Namespace and LimitRange lookups served from a local cache
//! - [`config`] - Override configuration loading and validation
//! - [`webhook`] - HTTP endpoint for AdmissionReview requests
//! - [`error`] - Error types for the engine

#![deny(missing_docs)]

pub mod admission;
pub mod config;
pub mod error;
pub mod gate;
pub mod limits;
pub mod mutator;
pub mod patch;
pub mod quantity;
pub mod store;
pub mod webhook;

pub use admission::OverrideAdmission;
pub use config::OverrideConfig;
pub use error::{Error, FailureKind};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Namespace annotation that enables or disables overrides for a namespace
///
/// Any value other than `"true"` disables the policy for that namespace.
pub const OVERRIDE_ENABLED_ANNOTATION: &str =
    "autoscaling.openshift.io/cluster-resource-override-enabled";

/// Absolute CPU floor for any derived CPU request or limit, in milli-cores
pub const DEFAULT_CPU_FLOOR_MILLI: i64 = 1;

/// Absolute memory floor for any derived memory request: 1Mi
pub const DEFAULT_MEMORY_FLOOR_BYTES: i64 = 1024 * 1024;

/// Milli-cores granted per byte of memory limit: 1000 milli-cores per GiB
pub const CPU_BASE_SCALE_FACTOR: f64 = 1000.0 / (1024.0 * 1024.0 * 1024.0);

/// Namespaces that are never overridden
pub const EXEMPT_NAMESPACE_NAMES: [&str; 3] = ["openshift", "kubernetes", "kube"];

/// Namespace prefixes that are never overridden
pub const EXEMPT_NAMESPACE_PREFIXES: [&str; 3] = ["openshift-", "kubernetes-", "kube-"];

/// Default listen address for the webhook HTTPS server
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8443";
