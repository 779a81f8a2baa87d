//! Common test utilities and helpers for the sync API tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
	Router,
	body::Body,
	http::{Method, Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use fieldsync::{
	access::{Claims, ProjectGrant, ProjectRole, TokenVerifier},
	build_router,
	observability::MetricsRegistry,
	reference::ReferenceData,
	registry::Registry,
	revision::{MemoryStore, Payload, RevisionEntry, StoredRecord},
	state::AppState,
};
use http_body_util::BodyExt;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const SECRET: &str = "integration-test-secret";

/// In-memory application wired exactly like `fieldsync serve`.
pub struct TestApp {
	pub store: Arc<MemoryStore>,
	pub state: AppState,
}

impl TestApp {
	pub fn new() -> Self {
		Self::with_push_limit(5000)
	}

	pub fn with_push_limit(max_push_records: usize) -> Self {
		let store = Arc::new(MemoryStore::new());
		let state = AppState::new(
			store.clone(),
			Registry::standard(store.clone()),
			ReferenceData::builtin(),
			TokenVerifier::hs256(SECRET, None),
			Arc::new(MetricsRegistry::new().expect("metrics registry")),
			max_push_records,
		);
		Self { store, state }
	}

	pub fn router(&self) -> Router {
		build_router(self.state.clone(), 1024 * 1024)
	}

	pub async fn pull(&self, token: Option<&str>, body: Value) -> (StatusCode, Value) {
		send(self.router(), Method::POST, "/pull", token, Some(body)).await
	}

	pub async fn push(&self, token: Option<&str>, body: Value) -> (StatusCode, Value) {
		send(self.router(), Method::POST, "/push", token, Some(body)).await
	}

	pub async fn force_push(&self, token: Option<&str>, body: Value) -> (StatusCode, Value) {
		send(self.router(), Method::POST, "/push?force=true", token, Some(body)).await
	}

	/// Place a record in the store at an exact revision.
	pub async fn seed(
		&self,
		table: &str,
		record_id: Uuid,
		project: Option<Uuid>,
		revision_num: i64,
		payload: Option<Value>,
	) {
		let entry = RevisionEntry {
			table_name: table.to_string(),
			record_id,
			project_id: project,
			profile_id: None,
			revision_num,
			updated_on: Utc::now() - Duration::hours(24) + Duration::seconds(revision_num),
			deleted: payload.is_none(),
		};
		let record = match payload {
			Some(Value::Object(map)) => StoredRecord::live(entry, map),
			Some(_) => StoredRecord::live(entry, Payload::new()),
			None => StoredRecord::tombstone(entry),
		};
		self.store.restore(record).await;
	}
}

/// Send a request through the router without binding a socket.
pub async fn send(
	router: Router,
	method: Method,
	uri: &str,
	token: Option<&str>,
	body: Option<Value>,
) -> (StatusCode, Value) {
	let mut builder = Request::builder().method(method).uri(uri);
	if let Some(token) = token {
		builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
	}
	let request = match body {
		Some(body) => builder
			.header(header::CONTENT_TYPE, "application/json")
			.body(Body::from(serde_json::to_vec(&body).unwrap()))
			.unwrap(),
		None => builder.body(Body::empty()).unwrap(),
	};

	let response = router.oneshot(request).await.unwrap();
	let status = response.status();
	let bytes = response.into_body().collect().await.unwrap().to_bytes();
	let value = serde_json::from_slice(&bytes)
		.unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
	(status, value)
}

/// Signed bearer token for `profile` with the given project grants.
pub fn token(profile: Uuid, projects: &[(Uuid, ProjectRole)]) -> String {
	let exp = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap()
		.as_secs() + 600;
	let claims = Claims {
		sub: format!("user-{}", profile),
		profile,
		exp,
		iss: None,
		admin: false,
		projects: projects
			.iter()
			.map(|(id, role)| ProjectGrant { id: *id, role: *role })
			.collect(),
	};
	encode(
		&Header::new(Algorithm::HS256),
		&claims,
		&EncodingKey::from_secret(SECRET.as_bytes()),
	)
	.unwrap()
}

/// Ids of the wire records in `list`, in order.
pub fn ids(list: &Value) -> Vec<String> {
	list.as_array()
		.map(|items| {
			items
				.iter()
				.filter_map(|item| item["id"].as_str().map(str::to_string))
				.collect()
		})
		.unwrap_or_default()
}
