use axum::{
    extract::rejection::{BytesRejection, JsonRejection, PathRejection, QueryRejection},
    extract::multipart::MultipartRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Serialize;

use crate::drive::DriveError;

#[derive(Debug, thiserror::Error)]
pub enum IpcrError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IpcrError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Storage(_) => "File storage is unavailable, please retry".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<DieselError> for IpcrError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::NotFound => Self::NotFound("Record not found".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Self::Conflict(format!("Duplicate record: {}", info.message()))
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for IpcrError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for IpcrError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<DriveError> for IpcrError {
    fn from(e: DriveError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<JsonRejection> for IpcrError {
    fn from(e: JsonRejection) -> Self {
        Self::Validation(format!("Invalid request body: {}", e.body_text()))
    }
}

impl From<PathRejection> for IpcrError {
    fn from(e: PathRejection) -> Self {
        Self::Validation(format!("Invalid path: {}", e.body_text()))
    }
}

impl From<QueryRejection> for IpcrError {
    fn from(e: QueryRejection) -> Self {
        Self::Validation(format!("Invalid query: {}", e.body_text()))
    }
}

impl From<BytesRejection> for IpcrError {
    fn from(e: BytesRejection) -> Self {
        Self::Validation(format!("Invalid request body: {}", e.body_text()))
    }
}

impl From<MultipartRejection> for IpcrError {
    fn from(e: MultipartRejection) -> Self {
        Self::Validation(format!("Invalid upload: {}", e.body_text()))
    }
}

/// Uniform result shape returned by every action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ActionResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ActionResponse<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl IntoResponse for IpcrError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("IPCR action failed: {self}");
        }
        (status, Json(ActionResponse::failure(self.public_message()))).into_response()
    }
}

pub type IpcrResult<T> = Result<T, IpcrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(IpcrError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(IpcrError::Forbidden("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(IpcrError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(IpcrError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let err = IpcrError::Database("relation ipcr_forms does not exist".into());
        assert_eq!(err.public_message(), "Internal server error");
        let err = IpcrError::NotFound("Form not found".into());
        assert_eq!(err.public_message(), "Not found: Form not found");
    }

    #[test]
    fn test_failure_body_shape() {
        let body = serde_json::to_value(ActionResponse::failure("Form not found")).unwrap();
        assert_eq!(body, serde_json::json!({ "success": false, "error": "Form not found" }));
        let body = serde_json::to_value(ActionResponse::ok(42)).unwrap();
        assert_eq!(body, serde_json::json!({ "success": true, "data": 42 }));
    }

    #[test]
    fn test_missing_row_maps_to_not_found() {
        let err = IpcrError::from(DieselError::NotFound);
        assert!(matches!(err, IpcrError::NotFound(_)));
    }
}
