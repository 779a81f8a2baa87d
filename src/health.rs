use axum::{
	extract::State,
	http::{StatusCode, header::CONTENT_TYPE},
	response::IntoResponse,
};

use crate::state::AppState;

/// Store health endpoint: returns 200 OK when the revision store answers a
/// ping, otherwise returns 503 Service Unavailable.
pub async fn db_health(State(state): State<AppState>) -> impl IntoResponse {
	match state.store.ping().await {
		Ok(()) => (StatusCode::OK, "OK").into_response(),
		Err(e) => {
			log::warn!("health check failed: {}", e);
			(StatusCode::SERVICE_UNAVAILABLE, "store unavailable").into_response()
		}
	}
}

/// Prometheus metrics endpoint: returns metrics in Prometheus text format
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
	let metrics_text = state.metrics.encode();
	(
		StatusCode::OK,
		[(CONTENT_TYPE, prometheus::TEXT_FORMAT)],
		metrics_text,
	)
		.into_response()
}
