//! Static reference data (lookup tables) served without revision tracking.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Value, json};
use thiserror::Error;

use crate::registry::serializer::ID_FIELD;

/// Watermark returned for reference data, which has no revision history.
pub const REFERENCE_WATERMARK: i64 = -1;

#[derive(Debug, Error)]
pub enum ReferenceDataError {
	#[error("failed to read reference data: {0}")]
	Io(#[from] std::io::Error),
	#[error("failed to parse reference data: {0}")]
	Json(#[from] serde_json::Error),
	#[error("reference data must be a JSON object keyed by source type")]
	NotAnObject,
	#[error("reference data for '{0}' is not an array")]
	NotAnArray(String),
	#[error("row {index} of '{table}' has no string id")]
	MissingId { table: String, index: usize },
}

/// Lookup rows keyed by source type name.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
	tables: BTreeMap<String, Vec<Value>>,
}

impl ReferenceData {
	pub fn empty() -> Self {
		Self::default()
	}

	/// Parse `{ "<source type>": [ { "id": ..., ... }, ... ] }`.
	pub fn from_value(value: Value) -> Result<Self, ReferenceDataError> {
		let Value::Object(map) = value else {
			return Err(ReferenceDataError::NotAnObject);
		};
		let mut tables = BTreeMap::new();
		for (name, rows) in map {
			let Value::Array(rows) = rows else {
				return Err(ReferenceDataError::NotAnArray(name));
			};
			for (index, row) in rows.iter().enumerate() {
				if !row.get(ID_FIELD).is_some_and(Value::is_string) {
					return Err(ReferenceDataError::MissingId { table: name, index });
				}
			}
			tables.insert(name, rows);
		}
		Ok(Self { tables })
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self, ReferenceDataError> {
		let text = std::fs::read_to_string(path)?;
		Self::from_value(serde_json::from_str(&text)?)
	}

	/// Built-in lookups used when no reference data file is configured.
	pub fn builtin() -> Self {
		let value = json!({
			"lookups": [
				{ "id": "5d0b3a1e-4c0e-4a8e-9f51-0c5c1b1f0a01", "kind": "unit", "code": "mg_l", "label": "mg/L" },
				{ "id": "5d0b3a1e-4c0e-4a8e-9f51-0c5c1b1f0a02", "kind": "unit", "code": "deg_c", "label": "°C" },
				{ "id": "5d0b3a1e-4c0e-4a8e-9f51-0c5c1b1f0a03", "kind": "unit", "code": "us_cm", "label": "µS/cm" },
				{ "id": "5d0b3a1e-4c0e-4a8e-9f51-0c5c1b1f0b01", "kind": "parameter", "code": "do", "label": "Dissolved oxygen" },
				{ "id": "5d0b3a1e-4c0e-4a8e-9f51-0c5c1b1f0b02", "kind": "parameter", "code": "temp", "label": "Water temperature" },
				{ "id": "5d0b3a1e-4c0e-4a8e-9f51-0c5c1b1f0b03", "kind": "parameter", "code": "cond", "label": "Conductivity" },
			]
		});
		// Built from a literal with valid ids; cannot fail.
		Self::from_value(value).unwrap_or_default()
	}

	/// Full snapshot for a source type, empty when unknown.
	pub fn snapshot(&self, name: &str) -> &[Value] {
		self.tables.get(name).map(Vec::as_slice).unwrap_or(&[])
	}

	pub fn record_ids(&self, name: &str) -> Vec<String> {
		self.snapshot(name)
			.iter()
			.filter_map(|row| row.get(ID_FIELD).and_then(Value::as_str))
			.map(str::to_string)
			.collect()
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn builtin_lookups_are_available() {
		let data = ReferenceData::builtin();
		assert_eq!(data.snapshot("lookups").len(), 6);
		assert_eq!(data.record_ids("lookups").len(), 6);
		assert!(data.snapshot("unknown").is_empty());
	}

	#[test]
	fn load_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"{{"lookups": [{{"id": "a3c4", "kind": "unit", "code": "m"}}]}}"#
		)
		.unwrap();
		let data = ReferenceData::load(file.path()).unwrap();
		assert_eq!(data.snapshot("lookups")[0]["code"], "m");
	}

	#[test]
	fn rows_without_id_are_rejected() {
		let err = ReferenceData::from_value(json!({ "lookups": [{ "code": "m" }] })).unwrap_err();
		assert!(matches!(err, ReferenceDataError::MissingId { index: 0, .. }));
		let err = ReferenceData::from_value(json!({ "lookups": {} })).unwrap_err();
		assert!(matches!(err, ReferenceDataError::NotAnArray(_)));
	}
}
