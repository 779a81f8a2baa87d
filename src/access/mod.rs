//! Scope and permission resolution.
//!
//! The resolver never mutates state: it answers whether a principal may read
//! or write a source type under a given project/profile scope by delegating
//! to the capability check configured on the source type's descriptor.

pub mod token;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;
use crate::registry::SourceTypeDescriptor;
use crate::revision::{Scope, StoreError, SyncStore};

pub use token::{Claims, ProjectGrant, TokenVerifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
	Viewer,
	Contributor,
	Manager,
}

impl ProjectRole {
	pub fn allows(self, mode: AccessMode) -> bool {
		match mode {
			AccessMode::Read => true,
			AccessMode::Write => !matches!(self, ProjectRole::Viewer),
		}
	}
}

/// Authenticated caller, as established by the token verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
	pub subject: String,
	pub profile_id: Uuid,
	pub admin: bool,
	pub projects: HashMap<Uuid, ProjectRole>,
}

impl Principal {
	pub fn new(subject: impl Into<String>, profile_id: Uuid) -> Self {
		Self {
			subject: subject.into(),
			profile_id,
			admin: false,
			projects: HashMap::new(),
		}
	}

	pub fn with_project(mut self, project: Uuid, role: ProjectRole) -> Self {
		self.projects.insert(project, role);
		self
	}

	pub fn with_admin(mut self, admin: bool) -> Self {
		self.admin = admin;
		self
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
	Read,
	Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
	Authorized,
	Unauthenticated,
	Forbidden,
}

impl AccessDecision {
	pub fn is_authorized(self) -> bool {
		matches!(self, AccessDecision::Authorized)
	}

	/// Error equivalent of a denial; `None` when authorized.
	pub fn into_error(self) -> Option<SyncError> {
		match self {
			AccessDecision::Authorized => None,
			AccessDecision::Unauthenticated => Some(SyncError::Unauthenticated),
			AccessDecision::Forbidden => Some(SyncError::Forbidden),
		}
	}
}

/// External capability-check collaborator.
#[async_trait]
pub trait CapabilityCheck: Send + Sync + 'static {
	async fn check(
		&self,
		principal: Option<&Principal>,
		source_type: &str,
		scope: &Scope,
		mode: AccessMode,
	) -> Result<AccessDecision, StoreError>;
}

/// Resolve access for `descriptor` under `scope`.
pub async fn check_access(
	principal: Option<&Principal>,
	descriptor: &SourceTypeDescriptor,
	scope: &Scope,
	mode: AccessMode,
) -> Result<AccessDecision, StoreError> {
	let decision = descriptor
		.permissions
		.check(principal, &descriptor.name, scope, mode)
		.await?;
	if !decision.is_authorized() {
		log::debug!(
			"access to {} ({:?}) denied for {:?}: {:?}",
			descriptor.name,
			mode,
			principal.map(|p| p.subject.as_str()),
			decision
		);
	}
	Ok(decision)
}

/// Any authenticated principal is authorized.
pub struct AuthenticatedOnly;

#[async_trait]
impl CapabilityCheck for AuthenticatedOnly {
	async fn check(
		&self,
		principal: Option<&Principal>,
		_source_type: &str,
		_scope: &Scope,
		_mode: AccessMode,
	) -> Result<AccessDecision, StoreError> {
		Ok(match principal {
			Some(_) => AccessDecision::Authorized,
			None => AccessDecision::Unauthenticated,
		})
	}
}

/// Default rules for project- and profile-scoped collections.
///
/// A profile-scoped request is authorized for the profile's own principal. A
/// project-scoped request is authorized when the token grants a role on the
/// project that allows the mode, or when the principal owns the project
/// record in the store. Admins are always authorized.
pub struct ProjectCapabilities {
	store: Arc<dyn SyncStore>,
	projects_table: String,
}

impl ProjectCapabilities {
	pub fn new(store: Arc<dyn SyncStore>, projects_table: impl Into<String>) -> Self {
		Self {
			store,
			projects_table: projects_table.into(),
		}
	}

	async fn owns_project(&self, principal: &Principal, project: Uuid) -> Result<bool, StoreError> {
		match self.store.get_record(&self.projects_table, project).await {
			Ok(record) => {
				Ok(!record.is_tombstone() && record.entry.profile_id == Some(principal.profile_id))
			}
			Err(StoreError::NotFound { .. }) => Ok(false),
			Err(e) => Err(e),
		}
	}
}

#[async_trait]
impl CapabilityCheck for ProjectCapabilities {
	async fn check(
		&self,
		principal: Option<&Principal>,
		_source_type: &str,
		scope: &Scope,
		mode: AccessMode,
	) -> Result<AccessDecision, StoreError> {
		let Some(principal) = principal else {
			return Ok(AccessDecision::Unauthenticated);
		};
		if principal.admin || scope.is_empty() {
			return Ok(AccessDecision::Authorized);
		}
		if scope.profile == Some(principal.profile_id) {
			return Ok(AccessDecision::Authorized);
		}
		if let Some(project) = scope.project {
			let granted = principal
				.projects
				.get(&project)
				.is_some_and(|role| role.allows(mode));
			if granted || self.owns_project(principal, project).await? {
				return Ok(AccessDecision::Authorized);
			}
		}
		Ok(AccessDecision::Forbidden)
	}
}
