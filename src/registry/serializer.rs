use serde_json::{Map, Value, json};

use crate::revision::{Payload, RecordState, StoredRecord};

pub const ID_FIELD: &str = "id";
pub const LAST_REVISION_FIELD: &str = "_lastRevisionNum";
pub const DELETED_FIELD: &str = "_deleted";
pub const DIRTY_FIELD: &str = "_dirty";

/// Converts between wire records and stored domain payloads.
pub trait EntitySerializer: Send + Sync + 'static {
	/// Domain fields of an incoming wire record.
	fn to_domain(&self, record: &Map<String, Value>) -> Payload;

	/// Wire form of a stored record, stamped with cache bookkeeping.
	fn to_wire(&self, record: &StoredRecord) -> Value;
}

/// Plain JSON records: `id` plus underscore-prefixed envelope keys around
/// the domain fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEnvelope;

impl EntitySerializer for JsonEnvelope {
	fn to_domain(&self, record: &Map<String, Value>) -> Payload {
		record
			.iter()
			.filter(|(k, _)| k.as_str() != ID_FIELD && !k.starts_with('_'))
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect()
	}

	fn to_wire(&self, record: &StoredRecord) -> Value {
		let entry = &record.entry;
		match &record.state {
			RecordState::Live(payload) => {
				let mut out = payload.clone();
				out.insert(ID_FIELD.into(), json!(entry.record_id));
				out.insert(LAST_REVISION_FIELD.into(), json!(entry.revision_num));
				out.insert(DELETED_FIELD.into(), Value::Bool(false));
				out.insert(DIRTY_FIELD.into(), Value::Bool(false));
				Value::Object(out)
			}
			RecordState::Tombstone => json!({
				ID_FIELD: entry.record_id,
				LAST_REVISION_FIELD: entry.revision_num,
				DELETED_FIELD: true,
			}),
		}
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::revision::RevisionEntry;
	use chrono::Utc;
	use uuid::Uuid;

	#[test]
	fn envelope_keys_are_stripped_and_stamped() {
		let incoming = json!({
			"id": Uuid::new_v4(),
			"_lastRevisionNum": 4,
			"_deleted": false,
			"_localOnly": true,
			"name": "Weir 3",
			"depth_m": 1.5,
		});
		let payload = JsonEnvelope.to_domain(incoming.as_object().unwrap());
		assert_eq!(payload.len(), 2);
		assert_eq!(payload["name"], "Weir 3");

		let id = Uuid::new_v4();
		let stored = StoredRecord::live(
			RevisionEntry {
				table_name: "sites".into(),
				record_id: id,
				project_id: None,
				profile_id: None,
				revision_num: 12,
				updated_on: Utc::now(),
				deleted: false,
			},
			payload,
		);
		let wire = JsonEnvelope.to_wire(&stored);
		assert_eq!(wire["id"], json!(id));
		assert_eq!(wire["_lastRevisionNum"], 12);
		assert_eq!(wire["_deleted"], false);
		assert_eq!(wire["_dirty"], false);
		assert_eq!(wire["depth_m"], 1.5);
	}
}
