use std::collections::BTreeMap;

use axum::{
	Json,
	http::StatusCode,
	response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::revision::StoredRecord;

/// Field name -> list of human readable problems with that field.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Errors surfaced by the sync protocol.
///
/// Request-shape variants (`MalformedRequest`, `UnknownSourceType`,
/// `MissingScope`, `BatchTooLarge`) reject a whole request. The others are resolved per
/// source type (pull) or per record (push).
#[derive(Debug, Error)]
pub enum SyncError {
	#[error("malformed request: {0}")]
	MalformedRequest(String),
	#[error("unknown source type: {0}")]
	UnknownSourceType(String),
	#[error("source type '{source_type}' requires the '{parameter}' scope parameter")]
	MissingScope {
		source_type: String,
		parameter: &'static str,
	},
	#[error("push contains {count} records, the limit is {limit}")]
	BatchTooLarge { count: usize, limit: usize },
	#[error("authentication required")]
	Unauthenticated,
	#[error("forbidden")]
	Forbidden,
	#[error("source type '{0}' is read-only")]
	ReadOnly(String),
	#[error("validation failed")]
	ValidationFailed(FieldErrors),
	#[error("conflict with server revision")]
	Conflict(Option<Box<StoredRecord>>),
	#[error("internal error: {0}")]
	Internal(String),
	#[error(transparent)]
	Store(#[from] crate::revision::StoreError),
}

impl SyncError {
	pub fn status_code(&self) -> StatusCode {
		match self {
			SyncError::MalformedRequest(_)
			| SyncError::UnknownSourceType(_)
			| SyncError::MissingScope { .. }
			| SyncError::BatchTooLarge { .. }
			| SyncError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
			SyncError::Unauthenticated => StatusCode::UNAUTHORIZED,
			SyncError::Forbidden => StatusCode::FORBIDDEN,
			SyncError::ReadOnly(_) => StatusCode::METHOD_NOT_ALLOWED,
			SyncError::Conflict(_) => StatusCode::CONFLICT,
			SyncError::Internal(_) | SyncError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// Message safe to hand to a client. Server-side failures are masked.
	pub fn public_message(&self) -> String {
		match self {
			SyncError::Internal(_) | SyncError::Store(_) => "unexpected server error".to_string(),
			other => other.to_string(),
		}
	}
}

impl IntoResponse for SyncError {
	fn into_response(self) -> Response {
		let status = self.status_code();
		if status.is_server_error() {
			log::error!("request failed: {}", self);
		}
		let body = json!({
			"error": {
				"code": status.as_u16(),
				"message": self.public_message(),
			}
		});
		(status, Json(body)).into_response()
	}
}
