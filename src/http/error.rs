use crate::db::StoreError;
use crate::gateway::GenerationError;
use crate::profile::ProfileError;
use crate::reconcile::RoadmapError;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

/// Structured failure returned by every handler.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    pub retryable: Option<bool>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "validation",
            message: message.into(),
            retryable: None,
        }
    }

    fn internal(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind,
            message: message.into(),
            retryable: None,
        }
    }

    pub fn worker_failed(err: tokio::task::JoinError) -> Self {
        error!("request worker failed: {err}");
        Self::internal("internal", "The request could not be completed.")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "kind": self.kind,
        });
        if let Some(retryable) = self.retryable {
            body["retryable"] = json!(retryable);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        error!("store failure: {err}");
        Self::internal("store_error", "Saving or loading data failed. Try again.")
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        let status = match &err {
            GenerationError::Validation(_) | GenerationError::EmptyOutput => {
                StatusCode::BAD_REQUEST
            }
            GenerationError::ProviderFailure { .. } | GenerationError::MalformedOutput(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let retryable = match &err {
            GenerationError::ProviderFailure { retryable, .. } => Some(*retryable),
            _ => None,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
            retryable,
        }
    }
}

impl From<ProfileError> for ApiError {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::Validation(message) => Self::bad_request(message),
            ProfileError::Store(store) => store.into(),
        }
    }
}

impl From<RoadmapError> for ApiError {
    fn from(err: RoadmapError) -> Self {
        let status = match &err {
            RoadmapError::NotFound => StatusCode::NOT_FOUND,
            RoadmapError::IndexOutOfRange { .. } | RoadmapError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            RoadmapError::ConsistencyViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RoadmapError::AlreadyCompleted | RoadmapError::Conflict { .. } => StatusCode::CONFLICT,
            RoadmapError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if let RoadmapError::Store(store) = err {
            return store.into();
        }
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
            retryable: None,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(format!("Invalid path: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(format!("Invalid query string: {}", rejection.body_text()))
    }
}
