//! Revision log: the per-record ledger that orders every mutation.
//!
//! Every write to a synchronized record upserts exactly one
//! [`RevisionEntry`] for `(table_name, record_id)` and stamps it with the
//! next value of a single global sequence. Entries are never removed; a
//! deleted record keeps its entry with `deleted = true` so stale clients can
//! still learn about the deletion.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::{PgStore, SCHEMA_V1};

/// Domain fields of a record, without envelope keys.
pub type Payload = Map<String, Value>;

/// Scope tags used to restrict revision queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
	pub project: Option<Uuid>,
	pub profile: Option<Uuid>,
}

impl Scope {
	pub fn project(project: Uuid) -> Self {
		Self {
			project: Some(project),
			profile: None,
		}
	}

	pub fn profile(profile: Uuid) -> Self {
		Self {
			project: None,
			profile: Some(profile),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.project.is_none() && self.profile.is_none()
	}

	/// Every tag present in the scope must equal the entry's tag.
	pub fn matches(&self, entry: &RevisionEntry) -> bool {
		self.project.is_none_or(|p| entry.project_id == Some(p))
			&& self.profile.is_none_or(|p| entry.profile_id == Some(p))
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionEntry {
	pub table_name: String,
	pub record_id: Uuid,
	pub project_id: Option<Uuid>,
	pub profile_id: Option<Uuid>,
	pub revision_num: i64,
	pub updated_on: DateTime<Utc>,
	pub deleted: bool,
}

impl RevisionEntry {
	pub fn scope(&self) -> Scope {
		Scope {
			project: self.project_id,
			profile: self.profile_id,
		}
	}
}

/// Content side of a stored record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordState {
	Live(Payload),
	Tombstone,
}

/// A revision entry paired with its live payload or marked as a tombstone.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
	pub entry: RevisionEntry,
	pub state: RecordState,
}

impl StoredRecord {
	pub fn live(entry: RevisionEntry, payload: Payload) -> Self {
		Self {
			entry,
			state: RecordState::Live(payload),
		}
	}

	pub fn tombstone(entry: RevisionEntry) -> Self {
		Self {
			entry,
			state: RecordState::Tombstone,
		}
	}

	pub fn is_tombstone(&self) -> bool {
		matches!(self.state, RecordState::Tombstone)
	}

	pub fn payload(&self) -> Option<&Payload> {
		match &self.state {
			RecordState::Live(p) => Some(p),
			RecordState::Tombstone => None,
		}
	}

	pub fn revision_num(&self) -> i64 {
		self.entry.revision_num
	}
}

/// Precondition a write must satisfy against the stored revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
	/// The record must never have been written.
	Absent,
	/// The stored revision must not be newer than the given one.
	AtMost(i64),
	/// Skip the revision comparison.
	Unconditional,
}

/// Scope the stored record must still carry when the write runs. Lets a
/// caller that checked permissions against an earlier read fail the write
/// instead of touching a record that moved in the meantime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScopeGuard {
	#[default]
	Any,
	/// No entry existed when the caller looked.
	Absent,
	Exactly(Scope),
}

impl ScopeGuard {
	/// Guard matching what a read of the record returned.
	pub fn observed(stored: Option<&StoredRecord>) -> Self {
		match stored {
			Some(record) => Self::Exactly(record.entry.scope()),
			None => Self::Absent,
		}
	}

	fn holds(&self, current: Option<&StoredRecord>) -> bool {
		match self {
			Self::Any => true,
			Self::Absent => current.is_none(),
			Self::Exactly(scope) => current.is_some_and(|c| c.entry.scope() == *scope),
		}
	}
}

/// A single compare-and-swap write against one record.
#[derive(Debug, Clone)]
pub struct WriteRequest {
	pub record_id: Uuid,
	pub scope: Scope,
	pub expectation: Expectation,
	/// Checked before the expectation, even when the write is forced.
	pub scope_guard: ScopeGuard,
	/// `None` deletes the record.
	pub payload: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
	Created(StoredRecord),
	Updated(StoredRecord),
	Deleted(RevisionEntry),
	/// Delete of a record that is already gone. Nothing was written.
	AlreadyDeleted,
}

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("record {record_id} not found in {table}")]
	NotFound { table: String, record_id: Uuid },
	/// The stored revision did not satisfy the write's expectation.
	/// `current` is `None` when the record was never written.
	#[error("revision conflict")]
	Conflict { current: Option<Box<StoredRecord>> },
	#[error("live record {record_id} in {table} has no payload")]
	MissingPayload { table: String, record_id: Uuid },
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// What a write should do once the current state is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WritePlan {
	Create,
	Update,
	Delete,
	NoOp,
}

/// Compare the stored record against a write request.
///
/// Shared by every store so the compare step is identical; each store runs it
/// inside the same critical section or transaction as the write itself.
pub(crate) fn plan_write(
	current: Option<&StoredRecord>,
	request: &WriteRequest,
) -> Result<WritePlan, StoreError> {
	let conflict = || StoreError::Conflict {
		current: current.cloned().map(Box::new),
	};
	if !request.scope_guard.holds(current) {
		return Err(conflict());
	}
	let live_revision = current.filter(|c| !c.is_tombstone()).map(|c| c.revision_num());

	match (&request.payload, request.expectation) {
		(None, _) if live_revision.is_none() => Ok(WritePlan::NoOp),
		(None, Expectation::Unconditional) => Ok(WritePlan::Delete),
		(None, Expectation::AtMost(n)) if live_revision.is_some_and(|r| r <= n) => {
			Ok(WritePlan::Delete)
		}
		(None, _) => Err(conflict()),
		(Some(_), Expectation::Unconditional) => Ok(if live_revision.is_some() {
			WritePlan::Update
		} else {
			WritePlan::Create
		}),
		(Some(_), Expectation::Absent) if current.is_none() => Ok(WritePlan::Create),
		(Some(_), Expectation::AtMost(n)) if live_revision.is_some_and(|r| r <= n) => {
			Ok(WritePlan::Update)
		}
		(Some(_), _) => Err(conflict()),
	}
}

/// Storage for the revision log and the live payloads it points at.
///
/// Implementations must serialize revision assignment across all writers and
/// run [`SyncStore::write`] as one atomic compare-then-write step.
#[async_trait]
pub trait SyncStore: Send + Sync + 'static {
	/// Assign the next revision to `(table, record_id)` and upsert its entry.
	/// An existing payload is left untouched unless `deleted` is set. Marking
	/// a record live that has no stored payload fails with
	/// [`StoreError::NotFound`] and assigns nothing.
	async fn record_mutation(
		&self,
		table: &str,
		record_id: Uuid,
		scope: Scope,
		deleted: bool,
	) -> Result<i64, StoreError>;

	async fn get_record(&self, table: &str, record_id: Uuid) -> Result<StoredRecord, StoreError>;

	/// Entries newer than `since` (all entries when `None`) within `scope`,
	/// newest first by `updated_on` then `revision_num`.
	async fn get_records(
		&self,
		table: &str,
		since: Option<i64>,
		scope: Scope,
	) -> Result<Vec<StoredRecord>, StoreError>;

	async fn write(&self, table: &str, request: WriteRequest) -> Result<WriteOutcome, StoreError>;

	/// Lightweight readiness check.
	async fn ping(&self) -> Result<(), StoreError>;
}

/// Newest-first ordering used by every `get_records` implementation.
pub(crate) fn sort_newest_first(records: &mut [StoredRecord]) {
	records.sort_by(|a, b| {
		b.entry
			.updated_on
			.cmp(&a.entry.updated_on)
			.then(b.entry.revision_num.cmp(&a.entry.revision_num))
	});
}
