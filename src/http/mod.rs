//! HTTP JSON API
//!
//! Provides:
//! - Profile preferences (get-or-create, upsert)
//! - Plan generation and modification without persistence
//! - Roadmap lifecycle: create, list, get, replace, patch, delete
//! - Milestone completion and rating
//! - Server-side generate-and-save and modify-and-reconcile

pub mod error;
pub mod routes;

use crate::gateway::PlanGateway;
use axum::{
    routing::{get, patch, post},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;

pub use error::ApiError;

/// State shared across handlers. Each request opens its own connection to
/// `db_path`; the store is the only shared resource.
pub struct AppState {
    pub db_path: PathBuf,
    pub gateway: PlanGateway,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db_path: PathBuf, gateway: PlanGateway) -> Self {
        Self { db_path, gateway }
    }
}

/// Create the API router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        // Profile preferences
        .route(
            "/api/pathManagement",
            get(routes::get_preferences).post(routes::upsert_preferences),
        )
        // Plan generation
        .route("/api/plus", post(routes::plan_plus))
        // Roadmaps
        .route(
            "/api/roadmaps",
            post(routes::create_roadmap)
                .get(routes::list_roadmaps)
                .put(routes::replace_roadmap)
                .delete(routes::delete_roadmap),
        )
        .route("/api/updateRoadmap", patch(routes::patch_roadmap))
        .route("/api/roadmaps/generate", post(routes::generate_roadmap))
        .route("/api/roadmaps/:id", get(routes::get_roadmap))
        .route(
            "/api/roadmaps/:id/milestones/:index/complete",
            post(routes::complete_milestone),
        )
        .route(
            "/api/roadmaps/:id/milestones/:index/rating",
            post(routes::rate_milestone),
        )
        .route("/api/roadmaps/:id/modify", post(routes::modify_roadmap))
        .with_state(state)
}
