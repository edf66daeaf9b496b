use axum::extract::State;
use tracing::info;

use crate::api::response::ApiResponse;
use crate::api::AppState;
use crate::error::AppResult;

/// List namespaces visible to the service account
///
/// GET /api/namespaces
pub async fn list(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<String>>> {
    let namespaces = state.namespaces.list_namespaces().await?;
    info!(count = namespaces.len(), "Listed namespaces");
    Ok(ApiResponse::success(namespaces))
}
