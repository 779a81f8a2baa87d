use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::{Value, json};

use super::{Envelope, Operation, PushRequest, PushResponse, PushResult};
use crate::access::{AccessMode, Principal, check_access};
use crate::error::SyncError;
use crate::observability::MetricsRegistry;
use crate::registry::{Registry, SourceTypeDescriptor};
use crate::revision::{
	Expectation, Scope, ScopeGuard, StoreError, StoredRecord, SyncStore, WriteOutcome,
	WriteRequest,
};
use crate::validation::RecordValidator;

/// Applies client creates, updates and deletes.
///
/// Source types are applied parents first (see
/// [`Registry::processing_order`]); records within a source type keep their
/// request order. Each record is checked and written on its own, so one bad
/// record never blocks the rest of the batch.
pub struct PushEngine {
	store: Arc<dyn SyncStore>,
	registry: Arc<Registry>,
	validator: Arc<dyn RecordValidator>,
	metrics: Arc<MetricsRegistry>,
	max_records: usize,
}

impl PushEngine {
	pub fn new(
		store: Arc<dyn SyncStore>,
		registry: Arc<Registry>,
		validator: Arc<dyn RecordValidator>,
		metrics: Arc<MetricsRegistry>,
		max_records: usize,
	) -> Self {
		Self {
			store,
			registry,
			validator,
			metrics,
			max_records,
		}
	}

	pub async fn push(
		&self,
		principal: Option<&Principal>,
		request: &PushRequest,
		force: bool,
	) -> Result<PushResponse, SyncError> {
		self.metrics.push_requests_total.inc();
		let _timer = self.metrics.push_duration_seconds.start_timer();

		let count: usize = request.values().map(Vec::len).sum();
		if count > self.max_records {
			self.metrics.rejected_requests_total.inc();
			return Err(SyncError::BatchTooLarge {
				count,
				limit: self.max_records,
			});
		}
		let order = self
			.registry
			.processing_order(request.keys().map(String::as_str))
			.inspect_err(|_| self.metrics.rejected_requests_total.inc())?;

		let mut response = PushResponse::new();
		for descriptor in order {
			let records = request.get(&descriptor.name).map(Vec::as_slice).unwrap_or(&[]);
			let mut results = Vec::with_capacity(records.len());
			for record in records {
				let result = self.push_record(principal, descriptor, record, force).await;
				self.metrics
					.observe_push_record(&descriptor.name, result.status_code);
				results.push(result);
			}
			response.insert(descriptor.name.clone(), results);
		}

		info!(
			"push of {} records by {:?} (force={})",
			count,
			principal.map(|p| p.subject.as_str()),
			force
		);
		Ok(response)
	}

	async fn push_record(
		&self,
		principal: Option<&Principal>,
		descriptor: &SourceTypeDescriptor,
		record: &Value,
		force: bool,
	) -> PushResult {
		match self.apply(principal, descriptor, record, force).await {
			Ok(result) => result,
			Err(e) => {
				let status = e.status_code();
				if status.is_server_error() {
					error!(
						"push to {} failed for record {}: {}",
						descriptor.name,
						record.get("id").unwrap_or(&Value::Null),
						e
					);
				} else {
					debug!("push to {} rejected: {}", descriptor.name, e);
				}
				let message = e.public_message();
				let data = match e {
					SyncError::ValidationFailed(errors) => json!(errors),
					SyncError::Conflict(Some(current)) => descriptor.serializer.to_wire(&current),
					_ => Value::Null,
				};
				PushResult::new(status.as_u16(), message, data)
			}
		}
	}

	async fn apply(
		&self,
		principal: Option<&Principal>,
		descriptor: &SourceTypeDescriptor,
		record: &Value,
		force: bool,
	) -> Result<PushResult, SyncError> {
		if descriptor.read_only {
			return Err(SyncError::ReadOnly(descriptor.name.clone()));
		}
		let Value::Object(fields) = record else {
			return Err(SyncError::ValidationFailed(
				[("record".to_string(), vec!["Expected a JSON object.".to_string()])].into(),
			));
		};
		let envelope = Envelope::parse(fields).map_err(SyncError::ValidationFailed)?;
		let operation = envelope.operation();

		let stored = match self.store.get_record(&descriptor.table, envelope.id).await {
			Ok(record) => Some(record),
			Err(StoreError::NotFound { .. }) => None,
			Err(e) => return Err(e.into()),
		};

		// Deletes keep the scope the record was stored under.
		let scope = match (operation, &stored) {
			(Operation::Delete, Some(current)) => current.entry.scope(),
			(Operation::Delete, None) => descriptor.scope_of(fields).unwrap_or_default(),
			_ => descriptor
				.scope_of(fields)
				.map_err(SyncError::ValidationFailed)?,
		};

		self.require_write(principal, descriptor, &scope).await?;
		if let Some(current) = &stored {
			let stored_scope = current.entry.scope();
			if stored_scope != scope {
				self.require_write(principal, descriptor, &stored_scope).await?;
			}
		}

		let payload = match operation {
			Operation::Delete => None,
			Operation::Create | Operation::Update => {
				let payload = descriptor.serializer.to_domain(fields);
				self.validator
					.validate(descriptor, operation, &payload)
					.map_err(SyncError::ValidationFailed)?;
				Some(payload)
			}
		};

		let expectation = match (force, operation, envelope.last_revision) {
			(true, _, _) => Expectation::Unconditional,
			(false, Operation::Create, _) | (false, _, None) => Expectation::Absent,
			(false, _, Some(n)) => Expectation::AtMost(n),
		};

		// Permissions were checked against `stored`; the write must see the same scope.
		let request = WriteRequest {
			record_id: envelope.id,
			scope,
			expectation,
			scope_guard: ScopeGuard::observed(stored.as_ref()),
			payload,
		};
		match self.store.write(&descriptor.table, request).await {
			Ok(outcome) => Ok(self.outcome_result(descriptor, outcome)),
			Err(StoreError::Conflict { current }) => Err(self.conflict(principal, descriptor, current).await),
			Err(e) => Err(e.into()),
		}
	}

	fn outcome_result(&self, descriptor: &SourceTypeDescriptor, outcome: WriteOutcome) -> PushResult {
		match outcome {
			WriteOutcome::Created(record) => {
				PushResult::new(201, "Created", descriptor.serializer.to_wire(&record))
			}
			WriteOutcome::Updated(record) => {
				PushResult::new(200, "Updated", descriptor.serializer.to_wire(&record))
			}
			WriteOutcome::Deleted(entry) => PushResult::new(
				204,
				"Deleted",
				descriptor.serializer.to_wire(&StoredRecord::tombstone(entry)),
			),
			WriteOutcome::AlreadyDeleted => PushResult::new(204, "Already deleted", Value::Null),
		}
	}

	/// A conflicting record is only disclosed to principals who may read it.
	async fn conflict(
		&self,
		principal: Option<&Principal>,
		descriptor: &SourceTypeDescriptor,
		current: Option<Box<StoredRecord>>,
	) -> SyncError {
		let Some(current) = current else {
			return SyncError::Conflict(None);
		};
		match check_access(principal, descriptor, &current.entry.scope(), AccessMode::Read).await {
			Ok(decision) => match decision.into_error() {
				None => {
					warn!(
						"conflict on {} record {}: server revision {}",
						descriptor.name,
						current.entry.record_id,
						current.revision_num()
					);
					SyncError::Conflict(Some(current))
				}
				Some(denied) => denied,
			},
			Err(e) => e.into(),
		}
	}

	async fn require_write(
		&self,
		principal: Option<&Principal>,
		descriptor: &SourceTypeDescriptor,
		scope: &Scope,
	) -> Result<(), SyncError> {
		let decision = check_access(principal, descriptor, scope, AccessMode::Write).await?;
		match decision.into_error() {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::revision::MemoryStore;
	use crate::validation::RequiredFields;
	use uuid::Uuid;

	fn engine(store: Arc<MemoryStore>, max_records: usize) -> PushEngine {
		let registry = Arc::new(Registry::standard(store.clone()));
		PushEngine::new(
			store,
			registry,
			Arc::new(RequiredFields),
			Arc::new(MetricsRegistry::new().unwrap()),
			max_records,
		)
	}

	#[tokio::test]
	async fn oversized_batch_is_rejected() {
		let engine = engine(Arc::new(MemoryStore::new()), 1);
		let request = PushRequest::from([(
			"sites".to_string(),
			vec![json!({ "id": Uuid::new_v4() }), json!({ "id": Uuid::new_v4() })],
		)]);
		let err = engine.push(None, &request, false).await.unwrap_err();
		assert!(matches!(err, SyncError::BatchTooLarge { count: 2, limit: 1 }));
	}

	#[tokio::test]
	async fn read_only_and_malformed_records_fail_individually() {
		let engine = engine(Arc::new(MemoryStore::new()), 100);
		let principal = Principal::new("tech", Uuid::new_v4());
		let request = PushRequest::from([
			("lookups".to_string(), vec![json!({ "id": Uuid::new_v4() })]),
			(
				"profiles".to_string(),
				vec![json!(["not", "an", "object"]), json!({ "id": "P1" })],
			),
		]);
		let response = engine.push(Some(&principal), &request, false).await.unwrap();
		assert_eq!(response["lookups"][0].status_code, 405);
		assert_eq!(response["profiles"][0].status_code, 400);
		assert_eq!(response["profiles"][1].status_code, 400);
		assert!(response["profiles"][1].data.get("id").is_some());
	}

	#[tokio::test]
	async fn anonymous_push_is_unauthenticated() {
		let engine = engine(Arc::new(MemoryStore::new()), 100);
		let me = Uuid::new_v4();
		let request = PushRequest::from([(
			"profiles".to_string(),
			vec![json!({ "id": me, "_lastRevisionNum": null, "display_name": "Ana" })],
		)]);
		let response = engine.push(None, &request, false).await.unwrap();
		assert_eq!(response["profiles"][0].status_code, 401);
	}

	#[tokio::test]
	async fn missing_required_field_is_a_validation_error() {
		let engine = engine(Arc::new(MemoryStore::new()), 100);
		let me = Uuid::new_v4();
		let principal = Principal::new("tech", me);
		let request = PushRequest::from([(
			"profiles".to_string(),
			vec![json!({ "id": me, "_lastRevisionNum": null })],
		)]);
		let response = engine.push(Some(&principal), &request, false).await.unwrap();
		let result = &response["profiles"][0];
		assert_eq!(result.status_code, 400);
		assert_eq!(result.data["display_name"][0], "This field is required.");
	}
}
