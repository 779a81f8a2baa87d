pub mod access;
pub mod config;
pub mod error;
pub mod health;
pub mod observability;
pub mod reference;
pub mod registry;
pub mod revision;
pub mod state;
pub mod sync;
pub mod validation;

use std::sync::Arc;

use anyhow::Context;
use axum::{
	Router,
	extract::DefaultBodyLimit,
	http::header::AUTHORIZATION,
	routing::{get, post},
};
use log::{info, warn};
use tower_http::{
	catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer,
	sensitive_headers::SetSensitiveRequestHeadersLayer,
};

use crate::access::TokenVerifier;
use crate::config::Settings;
use crate::observability::MetricsRegistry;
use crate::reference::ReferenceData;
use crate::registry::Registry;
use crate::revision::{MemoryStore, PgStore, SCHEMA_V1, SyncStore};
use crate::state::AppState;

/// HTTP surface: the two protocol endpoints plus health and metrics.
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
	Router::new()
		.route("/pull", post(sync::api::pull))
		.route("/push", post(sync::api::push))
		.route("/health", get(health::db_health))
		.route("/metrics", get(health::metrics_handler))
		.layer(DefaultBodyLimit::disable())
		.layer(RequestBodyLimitLayer::new(max_body_bytes))
		.layer(SetSensitiveRequestHeadersLayer::new([AUTHORIZATION]))
		.layer(CatchPanicLayer::new())
		.with_state(state)
}

/// Open the configured store. PostgreSQL stores get the schema applied.
pub async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn SyncStore>> {
	match &settings.database_url {
		Some(url) => {
			let store = PgStore::connect(url.as_str())
				.await
				.context("failed to connect to the database")?;
			store
				.apply_migration(SCHEMA_V1)
				.await
				.context("failed to apply the revision log schema")?;
			info!("using PostgreSQL revision store at {}", url.host_str().unwrap_or("localhost"));
			Ok(Arc::new(store))
		}
		None => {
			warn!("no database_url configured; revisions are kept in memory only");
			Ok(Arc::new(MemoryStore::new()))
		}
	}
}

/// Apply the schema to the configured database and exit.
pub async fn migrate(settings: &Settings) -> anyhow::Result<()> {
	let url = settings
		.database_url
		.as_ref()
		.context("migrate requires database_url (or FWS_DATABASE_URL)")?;
	let store = PgStore::connect(url.as_str()).await?;
	store.apply_migration(SCHEMA_V1).await?;
	info!("revision log schema is up to date");
	Ok(())
}

/// Assemble application state from settings.
pub async fn build_state(
	settings: &Settings,
	metrics: Arc<MetricsRegistry>,
) -> anyhow::Result<AppState> {
	let store = open_store(settings).await?;
	let registry = Registry::standard(store.clone());

	let reference = match &settings.reference_data {
		Some(path) => ReferenceData::load(path)
			.with_context(|| format!("failed to load reference data from {}", path))?,
		None => ReferenceData::builtin(),
	};

	let tokens = match &settings.jwt_secret {
		Some(secret) => TokenVerifier::hs256(secret, settings.jwt_issuer.as_deref()),
		None => {
			// A random secret means no token ever verifies.
			warn!("no jwt_secret configured; every request is treated as anonymous");
			TokenVerifier::hs256(&uuid::Uuid::new_v4().to_string(), None)
		}
	};

	Ok(AppState::new(
		store,
		registry,
		reference,
		tokens,
		metrics,
		settings.max_push_records,
	))
}

/// Serve the sync API until Ctrl-C.
pub async fn run(settings: Settings, metrics: Arc<MetricsRegistry>) -> anyhow::Result<()> {
	let state = build_state(&settings, metrics).await?;
	info!(
		"registered {} source types: {}",
		state.registry.len(),
		state
			.registry
			.iter()
			.map(|d| d.name.as_str())
			.collect::<Vec<_>>()
			.join(", ")
	);

	let app = build_router(state, settings.max_body_bytes);
	let addr = format!("{}:{}", settings.host, settings.port);
	let listener = tokio::net::TcpListener::bind(&addr)
		.await
		.with_context(|| format!("failed to bind {}", addr))?;
	info!("fieldsync listening on http://{}", addr);

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await?;
	info!("fieldsync stopped");
	Ok(())
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		warn!("failed to listen for shutdown signal: {}", e);
		std::future::pending::<()>().await;
	}
	info!("shutdown requested");
}
