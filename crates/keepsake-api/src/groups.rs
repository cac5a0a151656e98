use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use keepsake_core::CapsuleError;
use keepsake_types::api::AddMemberRequest;

use crate::error::ApiError;
use crate::state::AppState;

/// Seed the local membership table. Stands in for the external membership
/// service that a production deployment would consult.
pub async fn add_member(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        db.add_group_member(&group_id.to_string(), &req.user_id.to_string())
    })
    .await
    .map_err(|e| CapsuleError::Storage(anyhow::anyhow!("member task join error: {}", e)))?
    .map_err(CapsuleError::Storage)?;

    Ok(StatusCode::NO_CONTENT)
}
