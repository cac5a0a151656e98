use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use uuid::Uuid;

use keepsake_core::{CapsuleError, readiness, store::CapsuleStore};
use keepsake_types::api::{
    CapsuleResponse, CreateCapsuleRequest, GroupCapsuleResponse, OpenCapsuleRequest,
    OpenCapsuleResponse,
};
use keepsake_types::models::CapsuleDraft;

use crate::error::ApiError;
use crate::state::AppState;

/// The BaaS identity layer is out of scope; the acting user arrives as an
/// opaque header instead.
const ACTOR_HEADER: &str = "x-actor-id";

fn actor_id(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| {
            ApiError(CapsuleError::Validation(format!(
                "missing or invalid {} header",
                ACTOR_HEADER
            )))
        })
}

pub async fn create_capsule(
    State(state): State<AppState>,
    Json(req): Json<CreateCapsuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let draft = CapsuleDraft {
        owner_id: req.owner_id,
        title: req.title,
        category: req.category,
        year: req.year,
        release_at: req.release_at,
        content_ref: req.content_ref,
        group_ids: req.group_ids,
    };

    let (capsule, links) = state.scheduler.create(draft).await?;

    Ok((
        StatusCode::CREATED,
        Json(CapsuleResponse {
            id: capsule.id,
            owner_id: capsule.owner_id,
            title: capsule.title,
            category: capsule.category,
            year: capsule.year,
            release_at: capsule.release_at,
            created_at: capsule.created_at,
            content_ref: capsule.content_ref,
            group_ids: links.iter().map(|l| l.group_id).collect(),
        }),
    ))
}

/// Active (unopened) capsules for a group, nearest release first, with
/// readiness computed at response time for countdown display.
pub async fn list_group_capsules(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_active(group_id))
        .await
        .map_err(|e| CapsuleError::Storage(anyhow::anyhow!("list task join error: {}", e)))?
        .map_err(CapsuleError::Storage)?;

    let now = state.clock.now();
    let items: Vec<GroupCapsuleResponse> = rows
        .into_iter()
        .map(|(capsule, link)| GroupCapsuleResponse {
            capsule_id: capsule.id,
            group_id: link.group_id,
            title: capsule.title.clone(),
            category: capsule.category.clone(),
            year: capsule.year,
            release_at: capsule.release_at,
            scheduled_at: link.scheduled_at,
            readiness: readiness::evaluate(&capsule, &link, now),
            remaining_secs: readiness::remaining(&capsule, now).num_seconds().max(0) as u64,
        })
        .collect();

    Ok(Json(items))
}

pub async fn open_capsule(
    State(state): State<AppState>,
    Path(capsule_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<OpenCapsuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor_id(&headers)?;

    let outcome = state.opener.open(capsule_id, req.group_id, actor).await?;

    Ok(Json(OpenCapsuleResponse {
        capsule_id: outcome.capsule_id,
        group_id: outcome.group_id,
        opened_at: outcome.opened_at,
        already_opened: outcome.already_opened,
    }))
}

pub async fn delete_capsule(
    State(state): State<AppState>,
    Path(capsule_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.delete(capsule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
