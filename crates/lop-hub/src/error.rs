use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lop_core::CollaboratorFailureKind;
use lop_leveling::{ClaimError, LevelingError, PermissionDenied, SnapshotError};
use lop_storage::StorageError;
use serde_json::json;
use tracing::error;

/// Short denial sent back to the platform adapter. Internal details are
/// logged here and never put in the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "permission_denied", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub fn unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "storage_unavailable",
            "xp storage is unavailable, try again later",
        )
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "request could not be completed",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "code": self.code, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidSettings(err) => Self::validation(err.to_string()),
            StorageError::OutOfRange { field, value } => {
                Self::validation(format!("{field} {value} is too large"))
            }
            other => {
                error!(event = "storage_error", error = %other);
                Self::unavailable()
            }
        }
    }
}

impl From<PermissionDenied> for ApiError {
    fn from(err: PermissionDenied) -> Self {
        Self::forbidden(format!("you may not run {}", err.operation))
    }
}

impl From<LevelingError> for ApiError {
    fn from(err: LevelingError) -> Self {
        match err {
            LevelingError::Storage(err) => err.into(),
            LevelingError::Validation(message) => Self::validation(message),
            LevelingError::PermissionDenied(err) => err.into(),
            LevelingError::Contention { .. } => {
                Self::conflict("busy", "that member's xp is changing, try again")
            }
            LevelingError::Collaborator(err) => {
                error!(event = "collaborator_error", error = %err);
                Self::unavailable()
            }
            LevelingError::Internal(message) => {
                error!(event = "leveling_internal_error", error = %message);
                Self::internal()
            }
        }
    }
}

impl From<SnapshotError> for ApiError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::PermissionDenied(err) => err.into(),
            SnapshotError::Document(err) => Self::validation(err.to_string()),
            SnapshotError::Storage(err) => err.into(),
        }
    }
}

impl From<ClaimError> for ApiError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::PermissionDenied(err) => err.into(),
            ClaimError::AlreadyRun { .. } => {
                Self::conflict("claim_all_done", "claim-all has already been run here")
            }
            ClaimError::InProgress { .. } => {
                Self::conflict("claim_all_running", "claim-all is already running")
            }
            ClaimError::NoSnapshot { .. } => {
                Self::not_found("no legacy snapshot has been imported")
            }
            ClaimError::Directory(err) if err.kind == CollaboratorFailureKind::NotFound => {
                Self::not_found("member list has not been pushed for this guild")
            }
            ClaimError::Directory(err) => {
                error!(event = "member_directory_error", error = %err);
                Self::unavailable()
            }
            ClaimError::Storage(err) => err.into(),
        }
    }
}
