//! Pod Mutation Handler
//!
//! Decodes the AdmissionReview, runs it through the installed engine and
//! wraps the decision back into a review.

use std::sync::Arc;

use axum::{extract::State, Json};
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
};
use tracing::{error, warn};

use super::WebhookState;
use crate::admission::deny;
use crate::Error;

/// Handle a mutating admission review for Pods
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = match state.engine().await {
        Some(engine) => engine.admit(&req),
        None => {
            warn!(uid = %req.uid, "Admission request received before initialization");
            deny(&req, &Error::NotInitialized)
        }
    };
    Json(response.into_review())
}
