use std::sync::Arc;

use log::{debug, error, info};

use super::{DeletedRecord, PullParams, PullRequest, PullResponse, PullSourceResponse};
use crate::access::{AccessDecision, AccessMode, Principal, check_access};
use crate::error::SyncError;
use crate::observability::MetricsRegistry;
use crate::reference::{REFERENCE_WATERMARK, ReferenceData};
use crate::registry::{Registry, SourceKind, SourceTypeDescriptor};
use crate::revision::{StoreError, SyncStore};

/// Serves incremental or full snapshots per source type since a client
/// watermark. Never writes.
pub struct PullEngine {
	store: Arc<dyn SyncStore>,
	registry: Arc<Registry>,
	reference: Arc<ReferenceData>,
	metrics: Arc<MetricsRegistry>,
}

impl PullEngine {
	pub fn new(
		store: Arc<dyn SyncStore>,
		registry: Arc<Registry>,
		reference: Arc<ReferenceData>,
		metrics: Arc<MetricsRegistry>,
	) -> Self {
		Self {
			store,
			registry,
			reference,
			metrics,
		}
	}

	/// Answer every requested source type. Unknown names and missing scope
	/// parameters reject the whole request before anything is read; after
	/// that, each source type succeeds or fails on its own.
	pub async fn pull(
		&self,
		principal: Option<&Principal>,
		request: &PullRequest,
	) -> Result<PullResponse, SyncError> {
		self.metrics.pull_requests_total.inc();
		let _timer = self.metrics.pull_duration_seconds.start_timer();

		let resolved = request
			.iter()
			.map(|(name, params)| -> Result<_, SyncError> {
				let descriptor = self.registry.resolve(name)?;
				descriptor.require_scope(&params.scope())?;
				Ok((descriptor, params))
			})
			.collect::<Result<Vec<_>, _>>()
			.inspect_err(|_| self.metrics.rejected_requests_total.inc())?;

		let mut response = PullResponse::new();
		for (descriptor, params) in resolved {
			let source = match self.pull_source(principal, descriptor, params).await {
				Ok(source) => source,
				Err(e) => {
					error!("pull of {} failed: {}", descriptor.name, e);
					self.metrics.observe_pull_source(&descriptor.name, "error", 0, 0);
					PullSourceResponse::failed(500, Vec::new(), params.last_revision)
				}
			};
			response.insert(descriptor.name.clone(), source);
		}

		info!(
			"pull for {:?}: {} source types",
			principal.map(|p| p.subject.as_str()),
			response.len()
		);
		Ok(response)
	}

	async fn pull_source(
		&self,
		principal: Option<&Principal>,
		descriptor: &SourceTypeDescriptor,
		params: &PullParams,
	) -> Result<PullSourceResponse, StoreError> {
		let scope = params.scope();
		let decision = check_access(principal, descriptor, &scope, AccessMode::Read).await?;

		if !decision.is_authorized() {
			let record_ids = self.denied_record_ids(descriptor, params).await?;
			let code = match decision {
				AccessDecision::Unauthenticated => 401,
				_ => 403,
			};
			self.metrics.observe_pull_source(
				&descriptor.name,
				if code == 401 { "unauthenticated" } else { "forbidden" },
				0,
				0,
			);
			// A null watermark makes a client that regains access resync fully.
			return Ok(PullSourceResponse::failed(code, record_ids, None));
		}

		if descriptor.kind == SourceKind::Reference {
			let updates = self.reference.snapshot(&descriptor.name).to_vec();
			self.metrics
				.observe_pull_source(&descriptor.name, "authorized", updates.len(), 0);
			return Ok(PullSourceResponse {
				updates,
				deletes: Vec::new(),
				last_revision_num: Some(REFERENCE_WATERMARK),
				error: None,
			});
		}

		let records = self
			.store
			.get_records(&descriptor.table, params.last_revision, scope)
			.await?;

		let mut updates = Vec::new();
		let mut deletes = Vec::new();
		let mut last_revision_num = params.last_revision;
		for record in &records {
			let revision = record.revision_num();
			last_revision_num = Some(last_revision_num.map_or(revision, |n| n.max(revision)));
			if record.is_tombstone() {
				deletes.push(DeletedRecord {
					id: record.entry.record_id,
					last_revision_num: revision,
				});
			} else {
				updates.push(descriptor.serializer.to_wire(record));
			}
		}

		debug!(
			"pulled {} updates and {} deletes of {} since {:?}",
			updates.len(),
			deletes.len(),
			descriptor.name,
			params.last_revision
		);
		self.metrics.observe_pull_source(
			&descriptor.name,
			"authorized",
			updates.len(),
			deletes.len(),
		);

		Ok(PullSourceResponse {
			updates,
			deletes,
			last_revision_num,
			error: None,
		})
	}

	/// Ids of every record in scope, live or tombstoned, so the client can
	/// evict what it may no longer see.
	async fn denied_record_ids(
		&self,
		descriptor: &SourceTypeDescriptor,
		params: &PullParams,
	) -> Result<Vec<String>, StoreError> {
		if descriptor.kind == SourceKind::Reference {
			return Ok(self.reference.record_ids(&descriptor.name));
		}
		let records = self
			.store
			.get_records(&descriptor.table, None, params.scope())
			.await?;
		Ok(records
			.iter()
			.map(|r| r.entry.record_id.to_string())
			.collect())
	}
}
