//! Field-level validation of pushed records.

use serde_json::Value;

use crate::error::FieldErrors;
use crate::registry::SourceTypeDescriptor;
use crate::revision::Payload;
use crate::sync::Operation;

/// External validation collaborator. Runs for creates and updates before the
/// record is written; an `Err` becomes a 400 push result carrying the map.
pub trait RecordValidator: Send + Sync + 'static {
	fn validate(
		&self,
		descriptor: &SourceTypeDescriptor,
		operation: Operation,
		payload: &Payload,
	) -> Result<(), FieldErrors>;
}

/// Every field in the descriptor's `required_fields` must be present and
/// non-null.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredFields;

impl RecordValidator for RequiredFields {
	fn validate(
		&self,
		descriptor: &SourceTypeDescriptor,
		_operation: Operation,
		payload: &Payload,
	) -> Result<(), FieldErrors> {
		let errors: FieldErrors = descriptor
			.required_fields
			.iter()
			.filter(|field| matches!(payload.get(field.as_str()), None | Some(Value::Null)))
			.map(|field| (field.clone(), vec!["This field is required.".to_string()]))
			.collect();
		if errors.is_empty() { Ok(()) } else { Err(errors) }
	}
}
