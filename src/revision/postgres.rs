use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Executor, PgConnection, Row};
use uuid::Uuid;

use super::{
	Payload, RevisionEntry, Scope, StoreError, StoredRecord, SyncStore, WriteOutcome, WritePlan,
	WriteRequest, plan_write,
};

/// Key of the transaction-scoped advisory lock that serializes revision
/// assignment. Holding it until commit makes commit order equal revision
/// order, so a pull can never observe revision N+1 before revision N.
const REVISION_LOCK_KEY: i64 = 0x5359_4e43_5245_56;

/// Schema for the revision log and payload tables. Safe to apply repeatedly.
pub const SCHEMA_V1: &str = include_str!("../../sql/v1/001-create_revision_log.sql");

const SELECT_RECORD: &str = "SELECT r.table_name, r.record_id, r.project_id, r.profile_id, \
	r.revision_num, r.updated_on, r.deleted, d.payload \
	FROM sync_revisions r \
	LEFT JOIN sync_records d ON d.table_name = r.table_name AND d.record_id = r.record_id";

/// PostgreSQL-backed revision log. All statements are parameterized.
pub struct PgStore {
	pool: PgPool,
}

impl PgStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	/// Connect helper using a DATABASE_URL-like string
	pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
		let pool = PgPool::connect(database_url).await?;
		Ok(Self::new(pool))
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	/// Run a schema script such as `sql/v1/001-create_revision_log.sql`.
	pub async fn apply_migration(&self, sql: &str) -> Result<(), StoreError> {
		self.pool.execute(sql).await?;
		Ok(())
	}

	fn row_to_record(row: &PgRow) -> Result<StoredRecord, StoreError> {
		let entry = RevisionEntry {
			table_name: row.try_get("table_name")?,
			record_id: row.try_get("record_id")?,
			project_id: row.try_get("project_id")?,
			profile_id: row.try_get("profile_id")?,
			revision_num: row.try_get("revision_num")?,
			updated_on: row.try_get::<DateTime<Utc>, _>("updated_on")?,
			deleted: row.try_get("deleted")?,
		};
		if entry.deleted {
			return Ok(StoredRecord::tombstone(entry));
		}
		match row.try_get::<Option<Value>, _>("payload")? {
			Some(Value::Object(payload)) => Ok(StoredRecord::live(entry, payload)),
			_ => Err(StoreError::MissingPayload {
				table: entry.table_name,
				record_id: entry.record_id,
			}),
		}
	}

	async fn lock_revisions(conn: &mut PgConnection) -> Result<(), StoreError> {
		sqlx::query("SELECT pg_advisory_xact_lock($1)")
			.bind(REVISION_LOCK_KEY)
			.execute(conn)
			.await?;
		Ok(())
	}

	/// Assign the next revision and upsert the entry. Caller must hold the
	/// revision lock in the same transaction.
	async fn upsert_entry(
		conn: &mut PgConnection,
		table: &str,
		record_id: Uuid,
		scope: Scope,
		deleted: bool,
	) -> Result<RevisionEntry, StoreError> {
		let revision_num: i64 = sqlx::query_scalar("SELECT nextval('sync_revision_seq')")
			.fetch_one(&mut *conn)
			.await?;
		let updated_on = Utc::now();

		sqlx::query(
			"INSERT INTO sync_revisions \
			(table_name, record_id, project_id, profile_id, revision_num, updated_on, deleted) \
			VALUES ($1, $2, $3, $4, $5, $6, $7) \
			ON CONFLICT (table_name, record_id) DO UPDATE SET \
			project_id = EXCLUDED.project_id, \
			profile_id = EXCLUDED.profile_id, \
			revision_num = EXCLUDED.revision_num, \
			updated_on = EXCLUDED.updated_on, \
			deleted = EXCLUDED.deleted",
		)
		.bind(table)
		.bind(record_id)
		.bind(scope.project)
		.bind(scope.profile)
		.bind(revision_num)
		.bind(updated_on)
		.bind(deleted)
		.execute(&mut *conn)
		.await?;

		if deleted {
			sqlx::query("DELETE FROM sync_records WHERE table_name = $1 AND record_id = $2")
				.bind(table)
				.bind(record_id)
				.execute(&mut *conn)
				.await?;
		}

		Ok(RevisionEntry {
			table_name: table.to_string(),
			record_id,
			project_id: scope.project,
			profile_id: scope.profile,
			revision_num,
			updated_on,
			deleted,
		})
	}

	async fn upsert_payload(
		conn: &mut PgConnection,
		table: &str,
		record_id: Uuid,
		payload: &Payload,
	) -> Result<(), StoreError> {
		sqlx::query(
			"INSERT INTO sync_records (table_name, record_id, payload) VALUES ($1, $2, $3) \
			ON CONFLICT (table_name, record_id) DO UPDATE SET payload = EXCLUDED.payload",
		)
		.bind(table)
		.bind(record_id)
		.bind(Value::Object(payload.clone()))
		.execute(conn)
		.await?;
		Ok(())
	}
}

#[async_trait]
impl SyncStore for PgStore {
	async fn record_mutation(
		&self,
		table: &str,
		record_id: Uuid,
		scope: Scope,
		deleted: bool,
	) -> Result<i64, StoreError> {
		let mut tx = self.pool.begin().await?;
		Self::lock_revisions(&mut tx).await?;
		if !deleted {
			let has_payload: bool = sqlx::query_scalar(
				"SELECT EXISTS (SELECT 1 FROM sync_records WHERE table_name = $1 AND record_id = $2)",
			)
			.bind(table)
			.bind(record_id)
			.fetch_one(&mut *tx)
			.await?;
			if !has_payload {
				return Err(StoreError::NotFound {
					table: table.to_string(),
					record_id,
				});
			}
		}
		let entry = Self::upsert_entry(&mut tx, table, record_id, scope, deleted).await?;
		tx.commit().await?;
		Ok(entry.revision_num)
	}

	async fn get_record(&self, table: &str, record_id: Uuid) -> Result<StoredRecord, StoreError> {
		let sql = format!("{SELECT_RECORD} WHERE r.table_name = $1 AND r.record_id = $2");
		let row = sqlx::query(&sql)
			.bind(table)
			.bind(record_id)
			.fetch_optional(&self.pool)
			.await?;
		match row {
			Some(row) => Self::row_to_record(&row),
			None => Err(StoreError::NotFound {
				table: table.to_string(),
				record_id,
			}),
		}
	}

	async fn get_records(
		&self,
		table: &str,
		since: Option<i64>,
		scope: Scope,
	) -> Result<Vec<StoredRecord>, StoreError> {
		let sql = format!(
			"{SELECT_RECORD} WHERE r.table_name = $1 \
			AND ($2::BIGINT IS NULL OR r.revision_num > $2) \
			AND ($3::UUID IS NULL OR r.project_id = $3) \
			AND ($4::UUID IS NULL OR r.profile_id = $4) \
			ORDER BY r.updated_on DESC, r.revision_num DESC"
		);
		let rows = sqlx::query(&sql)
			.bind(table)
			.bind(since)
			.bind(scope.project)
			.bind(scope.profile)
			.fetch_all(&self.pool)
			.await?;
		let mut records = Vec::with_capacity(rows.len());
		for row in &rows {
			match Self::row_to_record(row) {
				Ok(record) => records.push(record),
				// One damaged entry must not hide the rest of the table.
				Err(e @ StoreError::MissingPayload { .. }) => {
					warn!("skipping {} record: {}", table, e)
				}
				Err(e) => return Err(e),
			}
		}
		Ok(records)
	}

	async fn write(&self, table: &str, request: WriteRequest) -> Result<WriteOutcome, StoreError> {
		let mut tx = self.pool.begin().await?;
		Self::lock_revisions(&mut tx).await?;

		let sql = format!(
			"{SELECT_RECORD} WHERE r.table_name = $1 AND r.record_id = $2 FOR UPDATE OF r"
		);
		let current = sqlx::query(&sql)
			.bind(table)
			.bind(request.record_id)
			.fetch_optional(&mut *tx)
			.await?
			.map(|row| Self::row_to_record(&row))
			.transpose()?;

		// Dropping `tx` on an early return rolls the transaction back.
		let plan = plan_write(current.as_ref(), &request)?;
		let outcome = match (plan, request.payload) {
			(WritePlan::NoOp, _) => WriteOutcome::AlreadyDeleted,
			(WritePlan::Delete, _) | (_, None) => {
				let entry =
					Self::upsert_entry(&mut tx, table, request.record_id, request.scope, true)
						.await?;
				WriteOutcome::Deleted(entry)
			}
			(plan, Some(payload)) => {
				Self::upsert_payload(&mut tx, table, request.record_id, &payload).await?;
				let entry =
					Self::upsert_entry(&mut tx, table, request.record_id, request.scope, false)
						.await?;
				let record = StoredRecord::live(entry, payload);
				if plan == WritePlan::Create {
					WriteOutcome::Created(record)
				} else {
					WriteOutcome::Updated(record)
				}
			}
		};

		tx.commit().await?;
		Ok(outcome)
	}

	async fn ping(&self) -> Result<(), StoreError> {
		sqlx::query("SELECT 1").execute(&self.pool).await?;
		Ok(())
	}
}
