//! Deployment API endpoints
//!
//! List, restart, re-image and diagnose deployments. Mutations run to
//! completion inside the request so the caller always sees the outcome.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use k8s_openapi::api::apps::v1::Deployment;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::auth::Caller;
use crate::api::response::ApiResponse;
use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::k8s::RESTARTED_AT_ANNOTATION;

/// What the UI needs to show about one deployment
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DeploymentSummary {
    pub name: String,
    pub namespace: String,
    pub images: Vec<String>,
    pub replicas: i32,
    pub ready_replicas: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restarted_at: Option<String>,
}

impl From<&Deployment> for DeploymentSummary {
    fn from(deployment: &Deployment) -> Self {
        let spec = deployment.spec.as_ref();
        let template = spec.map(|s| &s.template);

        let images = template
            .and_then(|t| t.spec.as_ref())
            .map(|pod| {
                pod.containers
                    .iter()
                    .map(|c| c.image.clone().unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default();

        let restarted_at = template
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.annotations.as_ref())
            .and_then(|a| a.get(RESTARTED_AT_ANNOTATION))
            .cloned();

        DeploymentSummary {
            name: deployment.metadata.name.clone().unwrap_or_default(),
            namespace: deployment.metadata.namespace.clone().unwrap_or_default(),
            images,
            // The API server defaults an unset replica count to 1.
            replicas: spec.and_then(|s| s.replicas).unwrap_or(1),
            ready_replicas: deployment
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
            restarted_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateImageRequest {
    pub image: String,
}

/// Diagnosis result; `failing` is false when no container is stuck
#[derive(Debug, Serialize, Deserialize)]
pub struct DiagnosisResponse {
    pub failing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

/// List deployments in a namespace
///
/// GET /api/namespaces/:namespace/deployments
pub async fn list(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> AppResult<ApiResponse<Vec<DeploymentSummary>>> {
    let deployments = state.deployments.list_deployments(&namespace).await?;
    Ok(ApiResponse::success(
        deployments.iter().map(DeploymentSummary::from).collect(),
    ))
}

/// Trigger a rolling restart
///
/// POST /api/namespaces/:namespace/deployments/:name/restart
pub async fn restart(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    caller: Caller,
) -> AppResult<ApiResponse<DeploymentSummary>> {
    info!(%namespace, %name, caller = %caller.0, "Restarting deployment");

    let updated = state.mutator.restart(&namespace, &name).await?;
    Ok(ApiResponse::success(DeploymentSummary::from(&updated)))
}

/// Change the image of the deployment's first container
///
/// POST /api/namespaces/:namespace/deployments/:name/image
pub async fn update_image(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    caller: Caller,
    payload: Result<Json<UpdateImageRequest>, JsonRejection>,
) -> AppResult<ApiResponse<DeploymentSummary>> {
    let Json(req) = payload?;
    let image = req.image.trim();
    if image.is_empty() {
        return Err(AppError::bad_request("image must not be empty"));
    }

    info!(%namespace, %name, image, caller = %caller.0, "Updating deployment image");

    let updated = state.mutator.update_image(&namespace, &name, image).await?;
    Ok(ApiResponse::success(DeploymentSummary::from(&updated)))
}

/// Report why the deployment's pods fail to start, if they do
///
/// GET /api/namespaces/:namespace/deployments/:name/diagnosis
pub async fn diagnose(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> AppResult<ApiResponse<DiagnosisResponse>> {
    let failure = state.diagnostics.diagnose(&namespace, &name).await?;

    let response = match failure {
        Some(f) => DiagnosisResponse {
            failing: true,
            reason: Some(f.reason.to_string()),
            message: Some(f.message),
            pod: Some(f.pod),
            container: Some(f.container),
        },
        None => DiagnosisResponse {
            failing: false,
            reason: None,
            message: None,
            pod: None,
            container: None,
        },
    };
    Ok(ApiResponse::success(response))
}
