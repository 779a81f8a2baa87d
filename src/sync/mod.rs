//! Pull/push synchronization protocol.
//!
//! Wire shapes are camelCase JSON keyed by source type name. Records carry
//! an envelope of `id`, `_lastRevisionNum` and `_deleted` around their
//! domain fields.

pub mod api;
pub mod pull;
pub mod push;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::FieldErrors;
use crate::registry::serializer::{DELETED_FIELD, ID_FIELD, LAST_REVISION_FIELD};
use crate::revision::Scope;

pub use pull::PullEngine;
pub use push::PushEngine;

/// Per source type pull parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullParams {
	/// Client watermark. `None` requests a full snapshot.
	#[serde(default)]
	pub last_revision: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub project: Option<Uuid>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub profile: Option<Uuid>,
}

impl PullParams {
	pub fn scope(&self) -> Scope {
		Scope {
			project: self.project,
			profile: self.profile,
		}
	}
}

pub type PullRequest = BTreeMap<String, PullParams>;
pub type PullResponse = BTreeMap<String, PullSourceResponse>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedRecord {
	pub id: Uuid,
	#[serde(rename = "_lastRevisionNum")]
	pub last_revision_num: i64,
}

/// Why a source type was not served. Only record ids are disclosed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullError {
	pub code: u16,
	pub record_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSourceResponse {
	pub updates: Vec<Value>,
	pub deletes: Vec<DeletedRecord>,
	pub last_revision_num: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<PullError>,
}

impl PullSourceResponse {
	/// Empty response for a source type that could not be served.
	pub fn failed(code: u16, record_ids: Vec<String>, last_revision_num: Option<i64>) -> Self {
		Self {
			updates: Vec::new(),
			deletes: Vec::new(),
			last_revision_num,
			error: Some(PullError { code, record_ids }),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PushParams {
	/// Skip revision comparison for every record in the push.
	#[serde(default)]
	pub force: bool,
}

pub type PushRequest = BTreeMap<String, Vec<Value>>;
pub type PushResponse = BTreeMap<String, Vec<PushResult>>;

/// Outcome of one pushed record, positionally aligned with the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
	pub status_code: u16,
	pub message: String,
	pub data: Value,
}

impl PushResult {
	pub fn new(status_code: u16, message: impl Into<String>, data: Value) -> Self {
		Self {
			status_code,
			message: message.into(),
			data,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
	Create,
	Update,
	Delete,
}

/// Envelope fields of a pushed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
	pub id: Uuid,
	pub last_revision: Option<i64>,
	pub deleted: bool,
}

impl Envelope {
	pub fn parse(record: &Map<String, Value>) -> Result<Self, FieldErrors> {
		let mut errors = FieldErrors::new();
		let mut problem = |field: &str, message: &str| {
			errors
				.entry(field.to_string())
				.or_default()
				.push(message.to_string());
		};

		let id = match record.get(ID_FIELD) {
			Some(Value::String(s)) => match Uuid::parse_str(s) {
				Ok(id) => Some(id),
				Err(_) => {
					problem(ID_FIELD, "Must be a valid UUID.");
					None
				}
			},
			None | Some(Value::Null) => {
				problem(ID_FIELD, "This field is required.");
				None
			}
			Some(_) => {
				problem(ID_FIELD, "Must be a UUID string.");
				None
			}
		};

		let last_revision = match record.get(LAST_REVISION_FIELD) {
			None | Some(Value::Null) => None,
			Some(v) => match v.as_i64() {
				Some(n) => Some(n),
				None => {
					problem(LAST_REVISION_FIELD, "Must be an integer or null.");
					None
				}
			},
		};

		let deleted = match record.get(DELETED_FIELD) {
			None | Some(Value::Null) => false,
			Some(Value::Bool(b)) => *b,
			Some(_) => {
				problem(DELETED_FIELD, "Must be a boolean.");
				false
			}
		};

		match id {
			Some(id) if errors.is_empty() => Ok(Self {
				id,
				last_revision,
				deleted,
			}),
			_ => Err(errors),
		}
	}

	pub fn operation(&self) -> Operation {
		if self.deleted {
			Operation::Delete
		} else if self.last_revision.is_none() {
			Operation::Create
		} else {
			Operation::Update
		}
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use serde_json::json;

	fn envelope(value: Value) -> Result<Envelope, FieldErrors> {
		Envelope::parse(value.as_object().unwrap())
	}

	#[test]
	fn operation_is_classified_from_envelope() {
		let id = Uuid::new_v4().to_string();
		let create = envelope(json!({ "id": id, "_lastRevisionNum": null })).unwrap();
		assert_eq!(create.operation(), Operation::Create);
		let update = envelope(json!({ "id": id, "_lastRevisionNum": 7 })).unwrap();
		assert_eq!(update.operation(), Operation::Update);
		let delete =
			envelope(json!({ "id": id, "_lastRevisionNum": 7, "_deleted": true })).unwrap();
		assert_eq!(delete.operation(), Operation::Delete);
	}

	#[test]
	fn malformed_envelope_reports_each_field() {
		let errors = envelope(json!({ "_lastRevisionNum": "seven", "_deleted": "yes" })).unwrap_err();
		assert_eq!(errors.len(), 3);
		let errors = envelope(json!({ "id": "S1" })).unwrap_err();
		assert!(errors.contains_key("id"));
	}

	#[test]
	fn pull_params_use_camel_case() {
		let params: PullParams = serde_json::from_value(json!({ "lastRevision": 10 })).unwrap();
		assert_eq!(params.last_revision, Some(10));
		assert!(params.scope().is_empty());

		let response = PullSourceResponse::failed(403, vec!["a".into()], None);
		let wire = serde_json::to_value(&response).unwrap();
		assert_eq!(wire["lastRevisionNum"], Value::Null);
		assert_eq!(wire["error"]["recordIds"], json!(["a"]));
	}
}
