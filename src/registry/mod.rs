//! Source type registry.
//!
//! The registry is an immutable table built once at process start and handed
//! to the engines through the application state. Names cannot be added at
//! runtime.

pub mod serializer;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::access::{AuthenticatedOnly, CapabilityCheck, ProjectCapabilities};
use crate::error::{FieldErrors, SyncError};
use crate::revision::{Scope, SyncStore};

pub use serializer::{EntitySerializer, JsonEnvelope};

/// Name of the collection whose records own every project-scoped record.
pub const PROJECTS: &str = "projects";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
	/// Mutations are tracked in the revision log.
	Tracked,
	/// Static lookup table without revision history.
	Reference,
}

/// Scope parameters a pull must supply for the source type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeRequirement {
	pub project: bool,
	pub profile: bool,
}

impl ScopeRequirement {
	pub const NONE: ScopeRequirement = ScopeRequirement {
		project: false,
		profile: false,
	};
	pub const PROJECT: ScopeRequirement = ScopeRequirement {
		project: true,
		profile: false,
	};
	pub const PROFILE: ScopeRequirement = ScopeRequirement {
		project: false,
		profile: true,
	};
}

/// Record fields that carry the project/profile scope tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFields {
	pub project: Option<String>,
	pub profile: Option<String>,
}

#[derive(Clone)]
pub struct SourceTypeDescriptor {
	pub name: String,
	/// Revision log table the records are tracked under.
	pub table: String,
	pub kind: SourceKind,
	pub required_scope: ScopeRequirement,
	pub scope_fields: ScopeFields,
	pub read_only: bool,
	/// Lower priorities are pushed first so parents exist before children.
	pub priority: u8,
	pub required_fields: Vec<String>,
	pub serializer: Arc<dyn EntitySerializer>,
	pub permissions: Arc<dyn CapabilityCheck>,
}

impl std::fmt::Debug for SourceTypeDescriptor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SourceTypeDescriptor")
			.field("name", &self.name)
			.field("table", &self.table)
			.field("kind", &self.kind)
			.field("required_scope", &self.required_scope)
			.field("scope_fields", &self.scope_fields)
			.field("read_only", &self.read_only)
			.field("priority", &self.priority)
			.finish()
	}
}

impl SourceTypeDescriptor {
	/// A revision-tracked collection stored under a table of the same name.
	pub fn tracked(name: impl Into<String>, permissions: Arc<dyn CapabilityCheck>) -> Self {
		let name = name.into();
		Self {
			table: name.clone(),
			name,
			kind: SourceKind::Tracked,
			required_scope: ScopeRequirement::NONE,
			scope_fields: ScopeFields::default(),
			read_only: false,
			priority: 0,
			required_fields: Vec::new(),
			serializer: Arc::new(JsonEnvelope),
			permissions,
		}
	}

	/// A read-only lookup collection served as a full snapshot.
	pub fn reference(name: impl Into<String>, permissions: Arc<dyn CapabilityCheck>) -> Self {
		Self {
			kind: SourceKind::Reference,
			read_only: true,
			..Self::tracked(name, permissions)
		}
	}

	pub fn with_required_scope(mut self, required: ScopeRequirement) -> Self {
		self.required_scope = required;
		self
	}

	pub fn with_project_field(mut self, field: impl Into<String>) -> Self {
		self.scope_fields.project = Some(field.into());
		self
	}

	pub fn with_profile_field(mut self, field: impl Into<String>) -> Self {
		self.scope_fields.profile = Some(field.into());
		self
	}

	pub fn with_priority(mut self, priority: u8) -> Self {
		self.priority = priority;
		self
	}

	pub fn with_required_fields(mut self, fields: &[&str]) -> Self {
		self.required_fields = fields.iter().map(|f| f.to_string()).collect();
		self
	}

	pub fn with_serializer(mut self, serializer: Arc<dyn EntitySerializer>) -> Self {
		self.serializer = serializer;
		self
	}

	/// Check that a pull supplied every scope parameter this type requires.
	pub fn require_scope(&self, scope: &Scope) -> Result<(), SyncError> {
		let missing = if self.required_scope.project && scope.project.is_none() {
			Some("project")
		} else if self.required_scope.profile && scope.profile.is_none() {
			Some("profile")
		} else {
			None
		};
		match missing {
			Some(parameter) => Err(SyncError::MissingScope {
				source_type: self.name.clone(),
				parameter,
			}),
			None => Ok(()),
		}
	}

	/// Read the scope tags a wire record carries in its scope fields.
	///
	/// Fields backing a required scope parameter must hold a UUID string;
	/// optional ones may be absent or null.
	pub fn scope_of(&self, record: &Map<String, Value>) -> Result<Scope, FieldErrors> {
		let mut errors = FieldErrors::new();
		let project = read_scope_field(
			record,
			self.scope_fields.project.as_deref(),
			self.required_scope.project,
			&mut errors,
		);
		let profile = read_scope_field(
			record,
			self.scope_fields.profile.as_deref(),
			self.required_scope.profile,
			&mut errors,
		);
		if errors.is_empty() {
			Ok(Scope { project, profile })
		} else {
			Err(errors)
		}
	}
}

fn read_scope_field(
	record: &Map<String, Value>,
	field: Option<&str>,
	required: bool,
	errors: &mut FieldErrors,
) -> Option<Uuid> {
	let field = field?;
	match record.get(field) {
		None | Some(Value::Null) => {
			if required {
				errors
					.entry(field.to_string())
					.or_default()
					.push("This field is required.".to_string());
			}
			None
		}
		Some(Value::String(s)) => match Uuid::parse_str(s) {
			Ok(id) => Some(id),
			Err(_) => {
				errors
					.entry(field.to_string())
					.or_default()
					.push(format!("'{}' is not a valid UUID.", s));
				None
			}
		},
		Some(_) => {
			errors
				.entry(field.to_string())
				.or_default()
				.push("Must be a UUID string.".to_string());
			None
		}
	}
}

/// Immutable name -> descriptor table.
#[derive(Debug, Clone, Default)]
pub struct Registry {
	types: BTreeMap<String, SourceTypeDescriptor>,
}

impl Registry {
	pub fn new(descriptors: impl IntoIterator<Item = SourceTypeDescriptor>) -> Self {
		Self {
			types: descriptors
				.into_iter()
				.map(|d| (d.name.clone(), d))
				.collect(),
		}
	}

	/// The collections of the field data platform.
	pub fn standard(store: Arc<dyn SyncStore>) -> Self {
		let projects: Arc<dyn CapabilityCheck> = Arc::new(ProjectCapabilities::new(store, PROJECTS));
		let anyone: Arc<dyn CapabilityCheck> = Arc::new(AuthenticatedOnly);

		Self::new([
			SourceTypeDescriptor::tracked(PROJECTS, projects.clone())
				.with_required_scope(ScopeRequirement::PROFILE)
				.with_project_field("id")
				.with_profile_field("owner")
				.with_required_fields(&["name", "owner"]),
			SourceTypeDescriptor::tracked("profiles", projects.clone())
				.with_required_scope(ScopeRequirement::PROFILE)
				.with_profile_field("id")
				.with_required_fields(&["display_name"]),
			SourceTypeDescriptor::tracked("sites", projects.clone())
				.with_required_scope(ScopeRequirement::PROJECT)
				.with_project_field("project")
				.with_priority(1)
				.with_required_fields(&["name", "project"]),
			SourceTypeDescriptor::tracked("site_visits", projects.clone())
				.with_required_scope(ScopeRequirement::PROJECT)
				.with_project_field("project")
				.with_priority(2)
				.with_required_fields(&["site", "project", "visited_on"]),
			SourceTypeDescriptor::tracked("observations", projects)
				.with_required_scope(ScopeRequirement::PROJECT)
				.with_project_field("project")
				.with_priority(3)
				.with_required_fields(&["site", "project", "parameter"]),
			SourceTypeDescriptor::reference("lookups", anyone),
		])
	}

	pub fn resolve(&self, name: &str) -> Result<&SourceTypeDescriptor, SyncError> {
		self.types
			.get(name)
			.ok_or_else(|| SyncError::UnknownSourceType(name.to_string()))
	}

	pub fn iter(&self) -> impl Iterator<Item = &SourceTypeDescriptor> {
		self.types.values()
	}

	pub fn len(&self) -> usize {
		self.types.len()
	}

	pub fn is_empty(&self) -> bool {
		self.types.is_empty()
	}

	/// Resolve every name, then order them parents first: ascending priority,
	/// ties broken by name. Fails on the first unknown name.
	pub fn processing_order<'a, I>(&self, names: I) -> Result<Vec<&SourceTypeDescriptor>, SyncError>
	where
		I: IntoIterator<Item = &'a str>,
	{
		let mut resolved = names
			.into_iter()
			.map(|n| self.resolve(n))
			.collect::<Result<Vec<_>, _>>()?;
		resolved.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
		Ok(resolved)
	}
}
