//! Mutating admission webhook for Pod resources
//!
//! Serves AdmissionReview requests over HTTPS and hands them to the
//! [`OverrideAdmission`] engine. The server starts before the engine is
//! ready: until [`WebhookState::initialize`] has run, every review is denied
//! with an internal error and `/readyz` reports unavailable.

pub mod pods;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::sync::RwLock;
use tracing::info;

use crate::{Error, OverrideAdmission, Result};

/// Path the admission controller posts Pod reviews to
pub const MUTATE_PODS_PATH: &str = "/mutate/pods";

/// Aggregated API path for the same reviews
pub const AGGREGATED_PATH: &str =
    "/apis/admission.autoscaling.openshift.io/v1/clusterresourceoverrides";

/// Shared state for webhook handlers
#[derive(Default)]
pub struct WebhookState {
    engine: RwLock<Option<Arc<OverrideAdmission>>>,
}

impl WebhookState {
    /// Create an uninitialized webhook state
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the engine; fails if one is already installed
    pub async fn initialize(&self, engine: OverrideAdmission) -> Result<()> {
        let mut slot = self.engine.write().await;
        if slot.is_some() {
            return Err(Error::config("admission engine already initialized"));
        }
        *slot = Some(Arc::new(engine));
        info!("Admission engine initialized");
        Ok(())
    }

    /// The installed engine, if initialization has completed
    pub async fn engine(&self) -> Option<Arc<OverrideAdmission>> {
        self.engine.read().await.clone()
    }

    /// Returns true once the engine is installed
    pub async fn is_ready(&self) -> bool {
        self.engine.read().await.is_some()
    }
}

/// Create the webhook router
///
/// - POST /mutate/pods - Pod resource overrides
/// - POST /apis/admission.autoscaling.openshift.io/v1/clusterresourceoverrides - same, aggregated path
/// - GET /healthz - liveness
/// - GET /readyz - 503 until the engine is initialized
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(MUTATE_PODS_PATH, post(pods::mutate_handler))
        .route(AGGREGATED_PATH, post(pods::mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

async fn readyz_handler(State(state): State<Arc<WebhookState>>) -> (StatusCode, &'static str) {
    if state.is_ready().await {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not initialized")
    }
}

/// Serve the webhook over HTTPS until the server stops
pub async fn serve(
    state: Arc<WebhookState>,
    addr: SocketAddr,
    cert_file: &Path,
    key_file: &Path,
) -> Result<()> {
    let tls_config = RustlsConfig::from_pem_file(cert_file, key_file)
        .await
        .map_err(|e| Error::config(format!("TLS config error: {e}")))?;

    info!(addr = %addr, "Starting admission webhook server");
    axum_server::bind_rustls(addr, tls_config)
        .serve(webhook_router(state).into_make_service())
        .await
        .map_err(|e| Error::server(e.to_string()))
}
