use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
	Payload, RevisionEntry, Scope, StoreError, StoredRecord, SyncStore, WriteOutcome, WritePlan,
	WriteRequest, plan_write, sort_newest_first,
};

type Key = (String, Uuid);

#[derive(Default)]
struct MemoryState {
	/// Last revision handed out. Zero means nothing was ever written.
	last_revision: i64,
	entries: HashMap<Key, RevisionEntry>,
	payloads: HashMap<Key, Payload>,
}

impl MemoryState {
	fn next_revision(&mut self) -> i64 {
		self.last_revision += 1;
		self.last_revision
	}

	fn stored(&self, key: &Key) -> Result<Option<StoredRecord>, StoreError> {
		let Some(entry) = self.entries.get(key) else {
			return Ok(None);
		};
		if entry.deleted {
			return Ok(Some(StoredRecord::tombstone(entry.clone())));
		}
		match self.payloads.get(key) {
			Some(payload) => Ok(Some(StoredRecord::live(entry.clone(), payload.clone()))),
			None => Err(StoreError::MissingPayload {
				table: key.0.clone(),
				record_id: key.1,
			}),
		}
	}

	fn upsert_entry(&mut self, key: &Key, scope: Scope, deleted: bool) -> RevisionEntry {
		let entry = RevisionEntry {
			table_name: key.0.clone(),
			record_id: key.1,
			project_id: scope.project,
			profile_id: scope.profile,
			revision_num: self.next_revision(),
			updated_on: Utc::now(),
			deleted,
		};
		self.entries.insert(key.clone(), entry.clone());
		entry
	}
}

/// Process-local store. Every mutation happens under one write lock, which
/// both serializes revision assignment and makes compare-then-write atomic.
#[derive(Default)]
pub struct MemoryStore {
	state: RwLock<MemoryState>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Load a record exactly as given, keeping its revision number. The
	/// sequence is advanced past it so later writes stay monotonic.
	pub async fn restore(&self, record: StoredRecord) {
		let mut state = self.state.write().await;
		let key = (record.entry.table_name.clone(), record.entry.record_id);
		state.last_revision = state.last_revision.max(record.entry.revision_num);
		match record.state {
			super::RecordState::Live(payload) => {
				state.payloads.insert(key.clone(), payload);
			}
			super::RecordState::Tombstone => {
				state.payloads.remove(&key);
			}
		}
		state.entries.insert(key, record.entry);
	}

	/// Highest revision assigned so far.
	pub async fn last_revision(&self) -> i64 {
		self.state.read().await.last_revision
	}
}

#[async_trait]
impl SyncStore for MemoryStore {
	async fn record_mutation(
		&self,
		table: &str,
		record_id: Uuid,
		scope: Scope,
		deleted: bool,
	) -> Result<i64, StoreError> {
		let mut state = self.state.write().await;
		let key = (table.to_string(), record_id);
		if deleted {
			state.payloads.remove(&key);
		} else if !state.payloads.contains_key(&key) {
			return Err(StoreError::NotFound {
				table: key.0,
				record_id,
			});
		}
		Ok(state.upsert_entry(&key, scope, deleted).revision_num)
	}

	async fn get_record(&self, table: &str, record_id: Uuid) -> Result<StoredRecord, StoreError> {
		let state = self.state.read().await;
		state
			.stored(&(table.to_string(), record_id))?
			.ok_or_else(|| StoreError::NotFound {
				table: table.to_string(),
				record_id,
			})
	}

	async fn get_records(
		&self,
		table: &str,
		since: Option<i64>,
		scope: Scope,
	) -> Result<Vec<StoredRecord>, StoreError> {
		let state = self.state.read().await;
		let mut out = Vec::new();
		for (key, entry) in state.entries.iter() {
			if key.0 != table
				|| since.is_some_and(|s| entry.revision_num <= s)
				|| !scope.matches(entry)
			{
				continue;
			}
			match state.stored(key) {
				Ok(Some(record)) => out.push(record),
				Ok(None) => {}
				// One damaged entry must not hide the rest of the table.
				Err(e) => warn!("skipping {} record {}: {}", table, key.1, e),
			}
		}
		sort_newest_first(&mut out);
		Ok(out)
	}

	async fn write(&self, table: &str, request: WriteRequest) -> Result<WriteOutcome, StoreError> {
		let mut state = self.state.write().await;
		let key = (table.to_string(), request.record_id);
		let current = state.stored(&key)?;

		let plan = plan_write(current.as_ref(), &request)?;
		match (plan, request.payload) {
			(WritePlan::NoOp, _) => Ok(WriteOutcome::AlreadyDeleted),
			(WritePlan::Delete, _) | (_, None) => {
				state.payloads.remove(&key);
				let entry = state.upsert_entry(&key, request.scope, true);
				Ok(WriteOutcome::Deleted(entry))
			}
			(plan, Some(payload)) => {
				state.payloads.insert(key.clone(), payload.clone());
				let entry = state.upsert_entry(&key, request.scope, false);
				let record = StoredRecord::live(entry, payload);
				Ok(if plan == WritePlan::Create {
					WriteOutcome::Created(record)
				} else {
					WriteOutcome::Updated(record)
				})
			}
		}
	}

	async fn ping(&self) -> Result<(), StoreError> {
		Ok(())
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::revision::{Expectation, ScopeGuard};
	use serde_json::json;

	fn payload(name: &str) -> Payload {
		json!({ "name": name }).as_object().cloned().unwrap()
	}

	fn create(id: Uuid, scope: Scope, name: &str) -> WriteRequest {
		WriteRequest {
			record_id: id,
			scope,
			expectation: Expectation::Absent,
			scope_guard: ScopeGuard::Any,
			payload: Some(payload(name)),
		}
	}

	#[tokio::test]
	async fn revisions_are_global_and_monotonic() {
		let store = MemoryStore::new();
		let site = Uuid::new_v4();
		let project = Uuid::new_v4();
		store.write("sites", create(site, Scope::default(), "a")).await.unwrap();
		store.write("projects", create(project, Scope::default(), "p")).await.unwrap();

		let a = store
			.record_mutation("sites", site, Scope::default(), false)
			.await
			.unwrap();
		let b = store
			.record_mutation("projects", project, Scope::default(), false)
			.await
			.unwrap();
		let c = store
			.record_mutation("sites", Uuid::new_v4(), Scope::default(), true)
			.await
			.unwrap();
		assert!(a < b && b < c);
		assert_eq!(store.last_revision().await, c);
	}

	#[tokio::test]
	async fn live_mutation_without_payload_is_refused() {
		let store = MemoryStore::new();
		let project = Uuid::new_v4();
		let kept = Uuid::new_v4();
		store.write("sites", create(kept, Scope::project(project), "a")).await.unwrap();

		let err = store
			.record_mutation("sites", Uuid::new_v4(), Scope::project(project), false)
			.await
			.unwrap_err();
		assert!(matches!(err, StoreError::NotFound { .. }));
		assert_eq!(store.last_revision().await, 1);

		let records = store.get_records("sites", None, Scope::project(project)).await.unwrap();
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].entry.record_id, kept);
	}

	#[tokio::test]
	async fn damaged_entry_is_skipped_by_get_records() {
		let store = MemoryStore::new();
		let project = Uuid::new_v4();
		let kept = Uuid::new_v4();
		store.write("sites", create(kept, Scope::project(project), "a")).await.unwrap();
		{
			let mut state = store.state.write().await;
			let key = ("sites".to_string(), Uuid::new_v4());
			state.upsert_entry(&key, Scope::project(project), false);
		}

		let records = store.get_records("sites", None, Scope::project(project)).await.unwrap();
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].entry.record_id, kept);
	}

	#[tokio::test]
	async fn concurrent_compare_and_swap_has_one_winner() {
		let store = std::sync::Arc::new(MemoryStore::new());
		let id = Uuid::new_v4();
		let created = match store.write("sites", create(id, Scope::default(), "a")).await.unwrap() {
			WriteOutcome::Created(r) => r.revision_num(),
			other => panic!("unexpected {:?}", other),
		};

		let mut handles = Vec::new();
		for i in 0..16 {
			let store = store.clone();
			handles.push(tokio::spawn(async move {
				store
					.write(
						"sites",
						WriteRequest {
							record_id: id,
							scope: Scope::default(),
							expectation: Expectation::AtMost(created),
							scope_guard: ScopeGuard::Any,
							payload: Some(payload(&format!("edit {}", i))),
						},
					)
					.await
			}));
		}
		let (mut updated, mut conflicts) = (0, 0);
		for h in handles {
			match h.await.unwrap() {
				Ok(WriteOutcome::Updated(_)) => updated += 1,
				Err(StoreError::Conflict { current: Some(_) }) => conflicts += 1,
				other => panic!("unexpected {:?}", other),
			}
		}
		assert_eq!(updated, 1);
		assert_eq!(conflicts, 15);
		assert_eq!(store.last_revision().await, created + 1);
	}

	#[tokio::test]
	async fn forced_write_fails_when_record_moved_scope() {
		let store = MemoryStore::new();
		let id = Uuid::new_v4();
		let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
		store.write("sites", create(id, Scope::project(p1), "a")).await.unwrap();
		let seen = store.get_record("sites", id).await.unwrap();
		store
			.write(
				"sites",
				WriteRequest {
					record_id: id,
					scope: Scope::project(p2),
					expectation: Expectation::Unconditional,
					scope_guard: ScopeGuard::Any,
					payload: Some(payload("moved")),
				},
			)
			.await
			.unwrap();

		let err = store
			.write(
				"sites",
				WriteRequest {
					record_id: id,
					scope: Scope::project(p1),
					expectation: Expectation::Unconditional,
					scope_guard: ScopeGuard::observed(Some(&seen)),
					payload: None,
				},
			)
			.await
			.unwrap_err();
		assert!(matches!(err, StoreError::Conflict { current: Some(ref c) } if !c.is_tombstone()));
		assert_eq!(store.get_record("sites", id).await.unwrap().entry.project_id, Some(p2));
	}

	#[tokio::test]
	async fn get_record_of_unknown_pair_is_not_found() {
		let store = MemoryStore::new();
		let err = store.get_record("sites", Uuid::new_v4()).await.unwrap_err();
		assert!(matches!(err, StoreError::NotFound { .. }));
	}

	#[tokio::test]
	async fn delete_leaves_tombstone() {
		let store = MemoryStore::new();
		let id = Uuid::new_v4();
		store.write("sites", create(id, Scope::default(), "a")).await.unwrap();
		let outcome = store
			.write(
				"sites",
				WriteRequest {
					record_id: id,
					scope: Scope::default(),
					expectation: Expectation::AtMost(1),
					scope_guard: ScopeGuard::Any,
					payload: None,
				},
			)
			.await
			.unwrap();
		assert!(matches!(outcome, WriteOutcome::Deleted(ref e) if e.revision_num == 2));

		let record = store.get_record("sites", id).await.unwrap();
		assert!(record.is_tombstone());
		assert_eq!(record.revision_num(), 2);
	}

	#[tokio::test]
	async fn get_records_filters_by_watermark_and_scope() {
		let store = MemoryStore::new();
		let p1 = Uuid::new_v4();
		let p2 = Uuid::new_v4();
		let first = Uuid::new_v4();
		let second = Uuid::new_v4();
		store.write("sites", create(first, Scope::project(p1), "a")).await.unwrap();
		store.write("sites", create(second, Scope::project(p1), "b")).await.unwrap();
		store
			.write("sites", create(Uuid::new_v4(), Scope::project(p2), "c"))
			.await
			.unwrap();
		store
			.write("projects", create(Uuid::new_v4(), Scope::project(p1), "d"))
			.await
			.unwrap();

		let all = store.get_records("sites", None, Scope::project(p1)).await.unwrap();
		assert_eq!(all.len(), 2);
		assert_eq!(all[0].entry.record_id, second);
		assert_eq!(all[1].entry.record_id, first);

		let newer = store.get_records("sites", Some(1), Scope::project(p1)).await.unwrap();
		assert_eq!(newer.len(), 1);
		assert_eq!(newer[0].entry.record_id, second);
	}

	#[tokio::test]
	async fn concurrent_writers_never_share_a_revision() {
		let store = std::sync::Arc::new(MemoryStore::new());
		let mut handles = Vec::new();
		for _ in 0..32 {
			let store = store.clone();
			handles.push(tokio::spawn(async move {
				store
					.write("sites", create(Uuid::new_v4(), Scope::default(), "x"))
					.await
					.unwrap()
			}));
		}
		let mut revisions = Vec::new();
		for h in handles {
			if let WriteOutcome::Created(r) = h.await.unwrap() {
				revisions.push(r.revision_num());
			}
		}
		revisions.sort();
		revisions.dedup();
		assert_eq!(revisions.len(), 32);
	}
}
