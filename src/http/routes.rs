//! API handlers
//!
//! Store and provider calls are blocking; every handler moves its work onto the
//! blocking pool and opens its own connection there.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState, SharedState};
use crate::db;
use crate::profile::{self, ContextOverrides, ProfileUpdate};
use crate::reconcile::{self, EditMode, RoadmapEdit, RoadmapError};
use crate::schema::{
    compute_progress, Milestone, Plan, PlanMilestone, ProfilePreferences, Roadmap, RoadmapState,
};

async fn run_blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(ApiError::worker_failed)?
}

fn connect(state: &AppState) -> Result<Connection, ApiError> {
    Ok(db::open_connection(&state.db_path)?)
}

fn required(value: Option<String>, message: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(message))
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

// === Profile preferences ===

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OwnerQuery {
    pub user_id: Option<String>,
}

/// GET /api/pathManagement?userId=
pub async fn get_preferences(
    State(state): State<SharedState>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> Result<Json<ProfilePreferences>, ApiError> {
    let Query(query) = query?;
    let user_id = required(query.user_id, "User ID is required.")?;
    run_blocking(move || {
        let conn = connect(&state)?;
        Ok(profile::get_or_create_preferences(&conn, &user_id)?)
    })
    .await
    .map(Json)
}

/// POST /api/pathManagement
pub async fn upsert_preferences(
    State(state): State<SharedState>,
    body: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<ProfilePreferences>, ApiError> {
    let Json(update) = body?;
    run_blocking(move || {
        let conn = connect(&state)?;
        Ok(profile::upsert_preferences(&conn, update)?)
    })
    .await
    .map(Json)
}

// === Plan generation ===

/// Roadmap as held by a client; only the plan content is trusted.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientRoadmap {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub goal: String,
    pub milestones: Vec<Milestone>,
}

impl ClientRoadmap {
    fn into_roadmap(self) -> Roadmap {
        let progress = compute_progress(&self.milestones);
        Roadmap {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            goal: self.goal,
            milestones: self.milestones,
            created_at: String::new(),
            updated_at: String::new(),
            progress,
            version: 0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlusRequest {
    pub user_id: Option<String>,
    pub current_roadmap: Option<ClientRoadmap>,
    pub completed_milestones: Option<Vec<Milestone>>,
    pub feedback: String,
    pub milestone_index: Option<usize>,
    pub user_data: Option<ContextOverrides>,
    #[serde(flatten)]
    pub context: ContextOverrides,
}

/// POST /api/plus - generate a plan, or modify one when `currentRoadmap` is sent
pub async fn plan_plus(
    State(state): State<SharedState>,
    body: Result<Json<PlusRequest>, JsonRejection>,
) -> Result<Json<Plan>, ApiError> {
    let Json(request) = body?;
    run_blocking(move || {
        let conn = connect(&state)?;
        let prefs = profile::preferences_or_default(&conn, request.user_id.as_deref())?;

        let Some(current) = request.current_roadmap else {
            let context = profile::build_context(&prefs, request.context);
            return Ok(state.gateway.generate_plan(&context)?);
        };

        let index = request
            .milestone_index
            .ok_or_else(|| ApiError::bad_request("milestoneIndex is required to modify a roadmap."))?;
        let roadmap = current.into_roadmap();
        let mut overrides = request.user_data.unwrap_or(request.context);
        if overrides.goal.trim().is_empty() {
            overrides.goal = roadmap.goal.clone();
        }
        let context = profile::build_context(&prefs, overrides);
        let completed = request
            .completed_milestones
            .unwrap_or_else(|| roadmap.completed_milestones());
        Ok(state
            .gateway
            .modify_plan(&roadmap, &completed, &request.feedback, &context, index)?)
    })
    .await
    .map(Json)
}

// === Roadmaps ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoadmapRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub goal: String,
    pub milestones: Vec<PlanMilestone>,
}

/// POST /api/roadmaps
pub async fn create_roadmap(
    State(state): State<SharedState>,
    body: Result<Json<CreateRoadmapRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Roadmap>), ApiError> {
    let Json(request) = body?;
    let roadmap = run_blocking(move || {
        let conn = connect(&state)?;
        let plan = Plan {
            goal: request.goal.trim().to_string(),
            milestones: request.milestones,
        };
        Ok(reconcile::create_from_plan(
            &conn,
            plan,
            &request.user_id,
            &request.title,
        )?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(roadmap)))
}

/// GET /api/roadmaps?userId=
pub async fn list_roadmaps(
    State(state): State<SharedState>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> Result<Json<Vec<Roadmap>>, ApiError> {
    let Query(query) = query?;
    let user_id = required(query.user_id, "User ID is required.")?;
    run_blocking(move || {
        let conn = connect(&state)?;
        Ok(reconcile::list_roadmaps(&conn, &user_id)?)
    })
    .await
    .map(Json)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplaceRoadmapRequest {
    pub id: Option<String>,
    #[serde(flatten)]
    pub edit: RoadmapEdit,
}

/// PUT /api/roadmaps - full replace, id in the body
pub async fn replace_roadmap(
    State(state): State<SharedState>,
    body: Result<Json<ReplaceRoadmapRequest>, JsonRejection>,
) -> Result<Json<Roadmap>, ApiError> {
    let Json(request) = body?;
    let id = required(request.id, "Roadmap ID is required.")?;
    run_blocking(move || {
        let conn = connect(&state)?;
        Ok(reconcile::edit_roadmap(
            &conn,
            &id,
            request.edit,
            EditMode::Replace,
        )?)
    })
    .await
    .map(Json)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoadmapQuery {
    pub id: Option<String>,
    pub user_id: Option<String>,
}

/// PATCH /api/updateRoadmap?id=
pub async fn patch_roadmap(
    State(state): State<SharedState>,
    query: Result<Query<RoadmapQuery>, QueryRejection>,
    body: Result<Json<RoadmapEdit>, JsonRejection>,
) -> Result<Json<Roadmap>, ApiError> {
    let Query(query) = query?;
    let Json(edit) = body?;
    let id = required(query.id, "Roadmap ID is required.")?;
    run_blocking(move || {
        let conn = connect(&state)?;
        Ok(reconcile::edit_roadmap(&conn, &id, edit, EditMode::Patch)?)
    })
    .await
    .map(Json)
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: &'static str,
    pub id: String,
}

/// DELETE /api/roadmaps?id=&userId=
pub async fn delete_roadmap(
    State(state): State<SharedState>,
    query: Result<Query<RoadmapQuery>, QueryRejection>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let Query(query) = query?;
    let id = required(query.id, "Roadmap ID is required.")?;
    let owner = query.user_id;
    run_blocking(move || {
        let mut conn = connect(&state)?;
        let deleted = reconcile::delete_roadmap(&mut conn, &id, owner.as_deref())?;
        Ok(DeleteResponse {
            message: "Roadmap deleted successfully",
            id: deleted.id,
        })
    })
    .await
    .map(Json)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateRoadmapRequest {
    pub user_id: String,
    pub title: Option<String>,
    #[serde(flatten)]
    pub context: ContextOverrides,
}

/// POST /api/roadmaps/generate - generate a plan and save it as a new roadmap
pub async fn generate_roadmap(
    State(state): State<SharedState>,
    body: Result<Json<GenerateRoadmapRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Roadmap>), ApiError> {
    let Json(request) = body?;
    let roadmap = run_blocking(move || {
        let conn = connect(&state)?;
        let prefs = profile::get_or_create_preferences(&conn, &request.user_id)?;
        let context = profile::build_context(&prefs, request.context);
        let plan = state.gateway.generate_plan(&context)?;
        let title = request.title.unwrap_or_else(|| context.goal.clone());
        Ok(reconcile::create_from_plan(
            &conn,
            plan,
            &prefs.user_id,
            &title,
        )?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(roadmap)))
}

/// GET /api/roadmaps/:id
pub async fn get_roadmap(
    State(state): State<SharedState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<Roadmap>, ApiError> {
    let Path(id) = path?;
    run_blocking(move || {
        let conn = connect(&state)?;
        Ok(reconcile::get_roadmap(&conn, &id)?)
    })
    .await
    .map(Json)
}

/// POST /api/roadmaps/:id/milestones/:index/complete
pub async fn complete_milestone(
    State(state): State<SharedState>,
    path: Result<Path<(String, usize)>, PathRejection>,
) -> Result<Json<Roadmap>, ApiError> {
    let Path((id, index)) = path?;
    run_blocking(move || {
        let conn = connect(&state)?;
        Ok(reconcile::complete_milestone(&conn, &id, index)?)
    })
    .await
    .map(Json)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RatingRequest {
    pub rating: Option<u8>,
    pub feedback: Option<String>,
}

/// POST /api/roadmaps/:id/milestones/:index/rating
pub async fn rate_milestone(
    State(state): State<SharedState>,
    path: Result<Path<(String, usize)>, PathRejection>,
    body: Result<Json<RatingRequest>, JsonRejection>,
) -> Result<Json<Roadmap>, ApiError> {
    let Path((id, index)) = path?;
    let Json(request) = body?;
    run_blocking(move || {
        let conn = connect(&state)?;
        Ok(reconcile::rate_milestone(
            &conn,
            &id,
            index,
            request.rating,
            request.feedback,
        )?)
    })
    .await
    .map(Json)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModifyRoadmapRequest {
    pub milestone_index: Option<usize>,
    pub feedback: String,
    #[serde(flatten)]
    pub context: ContextOverrides,
}

/// POST /api/roadmaps/:id/modify - revise pending milestones from feedback
pub async fn modify_roadmap(
    State(state): State<SharedState>,
    path: Result<Path<String>, PathRejection>,
    body: Result<Json<ModifyRoadmapRequest>, JsonRejection>,
) -> Result<Json<Roadmap>, ApiError> {
    let Path(id) = path?;
    let Json(request) = body?;
    run_blocking(move || {
        let conn = connect(&state)?;
        let roadmap = reconcile::get_roadmap(&conn, &id)?;
        if roadmap.state() == RoadmapState::Completed {
            return Err(RoadmapError::AlreadyCompleted.into());
        }
        let index = request
            .milestone_index
            .ok_or_else(|| ApiError::bad_request("milestoneIndex is required."))?;
        if index >= roadmap.milestones.len() {
            return Err(RoadmapError::IndexOutOfRange {
                index,
                len: roadmap.milestones.len(),
            }
            .into());
        }

        let prefs = profile::preferences_or_default(&conn, Some(&roadmap.user_id))?;
        let mut overrides = request.context;
        if overrides.goal.trim().is_empty() {
            overrides.goal = roadmap.goal.clone();
        }
        let context = profile::build_context(&prefs, overrides);
        let plan = state.gateway.modify_plan(
            &roadmap,
            &roadmap.completed_milestones(),
            &request.feedback,
            &context,
            index,
        )?;
        Ok(reconcile::apply_modification(&conn, &id, &plan)?)
    })
    .await
    .map(Json)
}
