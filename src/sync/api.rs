use axum::{
	Json,
	extract::{
		Query, State,
		rejection::{JsonRejection, QueryRejection},
	},
	http::HeaderMap,
};

use super::{PullRequest, PullResponse, PushParams, PushRequest, PushResponse};
use crate::error::SyncError;
use crate::state::AppState;

/// `POST /pull`
pub async fn pull(
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Result<Json<PullRequest>, JsonRejection>,
) -> Result<Json<PullResponse>, SyncError> {
	let Json(request) = body.map_err(|e| SyncError::MalformedRequest(e.body_text()))?;
	let principal = state.tokens.principal_from_headers(&headers);
	let response = state.pull.pull(principal.as_ref(), &request).await?;
	Ok(Json(response))
}

/// `POST /push?force=<bool>`
pub async fn push(
	State(state): State<AppState>,
	headers: HeaderMap,
	params: Result<Query<PushParams>, QueryRejection>,
	body: Result<Json<PushRequest>, JsonRejection>,
) -> Result<Json<PushResponse>, SyncError> {
	let Query(params) = params.map_err(|e| SyncError::MalformedRequest(e.body_text()))?;
	let Json(request) = body.map_err(|e| SyncError::MalformedRequest(e.body_text()))?;
	let principal = state.tokens.principal_from_headers(&headers);
	let response = state
		.push
		.push(principal.as_ref(), &request, params.force)
		.await?;
	Ok(Json(response))
}
