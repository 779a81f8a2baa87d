use axum::http::{HeaderMap, header::AUTHORIZATION};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Principal, ProjectRole};

/// Claims carried by the bearer tokens mobile clients present.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Claims {
	pub sub: String,
	/// Profile the token was issued for.
	pub profile: Uuid,
	pub exp: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iss: Option<String>,
	#[serde(default)]
	pub admin: bool,
	#[serde(default)]
	pub projects: Vec<ProjectGrant>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectGrant {
	pub id: Uuid,
	pub role: ProjectRole,
}

impl From<Claims> for Principal {
	fn from(claims: Claims) -> Self {
		Principal {
			subject: claims.sub,
			profile_id: claims.profile,
			admin: claims.admin,
			projects: claims.projects.into_iter().map(|g| (g.id, g.role)).collect(),
		}
	}
}

/// Verifies HS256 bearer tokens issued by the identity service.
pub struct TokenVerifier {
	key: DecodingKey,
	validation: Validation,
}

impl TokenVerifier {
	pub fn hs256(secret: &str, issuer: Option<&str>) -> Self {
		let mut validation = Validation::new(Algorithm::HS256);
		validation.validate_aud = false;
		if let Some(iss) = issuer {
			validation.set_issuer(&[iss]);
		}
		Self {
			key: DecodingKey::from_secret(secret.as_bytes()),
			validation,
		}
	}

	pub fn verify(&self, token: &str) -> Result<Principal, jsonwebtoken::errors::Error> {
		let data = decode::<Claims>(token, &self.key, &self.validation)?;
		debug!("Token validated successfully for subject: {}", data.claims.sub);
		Ok(data.claims.into())
	}

	/// Principal for the request, or `None` when no valid bearer token was
	/// presented. Anonymous requests are not rejected here: the capability
	/// check reports them as unauthenticated per source type.
	pub fn principal_from_headers(&self, headers: &HeaderMap) -> Option<Principal> {
		let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
		let token = value
			.strip_prefix("Bearer ")
			.or_else(|| value.strip_prefix("bearer "))?;
		match self.verify(token.trim()) {
			Ok(principal) => Some(principal),
			Err(e) => {
				warn!("rejecting bearer token: {}", e);
				None
			}
		}
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use axum::http::HeaderValue;
	use jsonwebtoken::{EncodingKey, Header, encode};
	use std::time::{SystemTime, UNIX_EPOCH};

	const SECRET: &str = "unit-test-secret";

	fn token_for(claims: &Claims, secret: &str) -> String {
		encode(
			&Header::new(Algorithm::HS256),
			claims,
			&EncodingKey::from_secret(secret.as_bytes()),
		)
		.unwrap()
	}

	fn claims(project: Uuid) -> Claims {
		let now = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap()
			.as_secs();
		Claims {
			sub: "field-tech".to_string(),
			profile: Uuid::new_v4(),
			exp: now + 600,
			iss: None,
			admin: false,
			projects: vec![ProjectGrant {
				id: project,
				role: ProjectRole::Contributor,
			}],
		}
	}

	#[test]
	fn valid_token_yields_principal_with_grants() {
		let project = Uuid::new_v4();
		let claims = claims(project);
		let verifier = TokenVerifier::hs256(SECRET, None);

		let principal = verifier.verify(&token_for(&claims, SECRET)).unwrap();
		assert_eq!(principal.subject, "field-tech");
		assert_eq!(principal.profile_id, claims.profile);
		assert_eq!(principal.projects.get(&project), Some(&ProjectRole::Contributor));
	}

	#[test]
	fn bad_signature_is_anonymous() {
		let verifier = TokenVerifier::hs256(SECRET, None);
		let token = token_for(&claims(Uuid::new_v4()), "some-other-secret");

		let mut headers = HeaderMap::new();
		headers.insert(
			AUTHORIZATION,
			HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
		);
		assert!(verifier.principal_from_headers(&headers).is_none());
		assert!(verifier.principal_from_headers(&HeaderMap::new()).is_none());
	}

	#[test]
	fn issuer_is_enforced_when_configured() {
		let verifier = TokenVerifier::hs256(SECRET, Some("https://id.example.org"));
		let mut c = claims(Uuid::new_v4());
		assert!(verifier.verify(&token_for(&c, SECRET)).is_err());
		c.iss = Some("https://id.example.org".to_string());
		assert!(verifier.verify(&token_for(&c, SECRET)).is_ok());
	}
}
