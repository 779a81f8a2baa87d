use std::sync::Arc;

use crate::access::TokenVerifier;
use crate::observability::MetricsRegistry;
use crate::reference::ReferenceData;
use crate::registry::Registry;
use crate::revision::SyncStore;
use crate::sync::{PullEngine, PushEngine};
use crate::validation::{RecordValidator, RequiredFields};

/// Application state passed to handlers via Axum's `State` extractor.
///
/// Everything is shared behind `Arc`; the registry is built once at start
/// and never changes.
#[derive(Clone)]
pub struct AppState {
	pub store: Arc<dyn SyncStore>,
	pub registry: Arc<Registry>,
	pub pull: Arc<PullEngine>,
	pub push: Arc<PushEngine>,
	pub tokens: Arc<TokenVerifier>,
	pub metrics: Arc<MetricsRegistry>,
}

impl AppState {
	/// Wire the engines with the default record validator.
	pub fn new(
		store: Arc<dyn SyncStore>,
		registry: Registry,
		reference: ReferenceData,
		tokens: TokenVerifier,
		metrics: Arc<MetricsRegistry>,
		max_push_records: usize,
	) -> Self {
		Self::with_validator(
			store,
			registry,
			reference,
			tokens,
			metrics,
			max_push_records,
			Arc::new(RequiredFields),
		)
	}

	pub fn with_validator(
		store: Arc<dyn SyncStore>,
		registry: Registry,
		reference: ReferenceData,
		tokens: TokenVerifier,
		metrics: Arc<MetricsRegistry>,
		max_push_records: usize,
		validator: Arc<dyn RecordValidator>,
	) -> Self {
		let registry = Arc::new(registry);
		let pull = PullEngine::new(
			store.clone(),
			registry.clone(),
			Arc::new(reference),
			metrics.clone(),
		);
		let push = PushEngine::new(
			store.clone(),
			registry.clone(),
			validator,
			metrics.clone(),
			max_push_records,
		);
		Self {
			store,
			registry,
			pull: Arc::new(pull),
			push: Arc::new(push),
			tokens: Arc::new(tokens),
			metrics,
		}
	}
}
