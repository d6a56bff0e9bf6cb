//! Error types for the resource override admission engine

use thiserror::Error;

/// Main error type for override admission operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The admission payload is not the expected object kind
    #[error("unexpected object: {0}")]
    BadRequest(String),

    /// A namespace or limit range could not be read from the local cache
    #[error("{0}")]
    Lookup(String),

    /// A container resource field could not be mutated or validated
    #[error("{path} {message}")]
    Mutation {
        /// Location of the offending field, e.g. `spec.containers[2].resources.requests.cpu`
        path: String,
        /// What went wrong at that field
        message: String,
    },

    /// The original and mutated objects could not be diffed
    #[error("patch error: {0}")]
    Patch(String),

    /// A resource quantity string could not be parsed or represented
    #[error("invalid quantity: {0}")]
    Quantity(String),

    /// Invalid override configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The webhook server could not be started or stopped unexpectedly
    #[error("server error: {0}")]
    Server(String),

    /// The engine has not finished initializing
    #[error("not initialized")]
    NotInitialized,

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a bad-request error with the given message
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Create a lookup error with the given message
    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    /// Create a mutation error located at `path`
    pub fn mutation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mutation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a patch error with the given message
    pub fn patch(msg: impl Into<String>) -> Self {
        Self::Patch(msg.into())
    }

    /// Create a quantity error with the given message
    pub fn quantity(msg: impl Into<String>) -> Self {
        Self::Quantity(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a server error with the given message
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }

    /// Prefix the field path of a mutation error, leaving other variants untouched
    pub fn at(self, prefix: &str) -> Self {
        match self {
            Self::Mutation { path, message } => Self::Mutation {
                path: format!("{prefix}.{path}"),
                message,
            },
            other => other,
        }
    }

    /// The admission failure category this error is reported as
    pub fn category(&self) -> FailureKind {
        match self {
            Self::BadRequest(_) => FailureKind::BadRequest,
            Self::Lookup(_) | Self::Kube(_) => FailureKind::Forbidden,
            Self::Mutation { .. }
            | Self::Patch(_)
            | Self::Quantity(_)
            | Self::Config(_)
            | Self::Server(_)
            | Self::NotInitialized
            | Self::Serialization(_) => FailureKind::InternalServerError,
        }
    }
}

/// Denial categories of an admission response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Payload could not be interpreted
    BadRequest,
    /// Policy could not be evaluated safely
    Forbidden,
    /// Mutation or patch construction defect
    InternalServerError,
}

impl FailureKind {
    /// HTTP status code carried in the response `Status`
    pub fn code(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::InternalServerError => 500,
        }
    }

    /// Machine-readable reason carried in the response `Status`
    pub fn reason(&self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequest",
            Self::Forbidden => "Forbidden",
            Self::InternalServerError => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Categories in the Admission Path
    // ==========================================================================

    /// Story: a payload that is not a Pod is the caller's fault
    #[test]
    fn story_unexpected_object_is_bad_request() {
        let err = Error::bad_request("expected Pod, got Deployment");
        assert!(err.to_string().contains("unexpected object"));
        assert_eq!(err.category(), FailureKind::BadRequest);
        assert_eq!(err.category().code(), 400);
    }

    /// Story: a namespace cache miss means the policy cannot be evaluated
    #[test]
    fn story_lookup_failure_is_forbidden() {
        let err = Error::lookup("namespace \"team-a\" not found");
        assert_eq!(err.to_string(), "namespace \"team-a\" not found");
        assert_eq!(err.category(), FailureKind::Forbidden);
        assert_eq!(err.category().code(), 403);
    }

    /// Story: mutation failures name the offending field
    #[test]
    fn story_mutation_failure_is_located() {
        let err = Error::mutation("resources.requests.cpu", "mutated, expected: 200m, got 100m")
            .at("spec.containers[2]");

        assert_eq!(
            err.to_string(),
            "spec.containers[2].resources.requests.cpu mutated, expected: 200m, got 100m"
        );
        assert_eq!(err.category(), FailureKind::InternalServerError);
        assert_eq!(err.category().code(), 500);
    }

    #[test]
    fn at_leaves_non_mutation_errors_alone() {
        let err = Error::patch("container count differs").at("spec.containers[0]");
        assert_eq!(err.to_string(), "patch error: container count differs");
    }

    #[test]
    fn every_internal_error_maps_to_500() {
        for err in [
            Error::patch("x"),
            Error::quantity("x"),
            Error::config("x"),
            Error::NotInitialized,
            Error::Serialization(serde_json::from_str::<()>("invalid").unwrap_err()),
        ] {
            assert_eq!(err.category(), FailureKind::InternalServerError, "{err}");
        }
    }
}
