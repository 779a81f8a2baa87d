use std::path::Path;
use std::str::FromStr;

use log::Level;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Runtime configuration for fieldsync.
///
/// Values are loaded from (in order): `/etc/fieldsync/fieldsync.json`, the
/// user config folder (optional), an explicit file given on the command line,
/// and environment variables prefixed with `FWS_` (e.g. `FWS_PORT`).
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Settings {
	pub host: String,
	pub port: u16,
	/// PostgreSQL connection string. The in-memory store is used when unset.
	pub database_url: Option<Url>,
	pub log_level: Level,
	/// HS256 secret shared with the identity service.
	pub jwt_secret: Option<String>,
	/// Expected `iss` claim, not checked when unset.
	pub jwt_issuer: Option<String>,
	/// Upper bound on the number of records in one push.
	pub max_push_records: usize,
	pub max_body_bytes: usize,
	/// JSON file with lookup tables; built-in lookups are served when unset.
	pub reference_data: Option<String>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			host: "0.0.0.0".to_string(),
			port: 8080,
			database_url: None,
			log_level: Level::Info,
			jwt_secret: None,
			jwt_issuer: None,
			max_push_records: 5000,
			max_body_bytes: 16 * 1024 * 1024,
			reference_data: None,
		}
	}
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error: {0}")]
	Config(#[from] config::ConfigError),
	#[error("invalid value for {name}: {value}")]
	InvalidEnv { name: &'static str, value: String },
}

pub fn load(path: Option<&Path>) -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder()
		.add_source(config::File::with_name("/etc/fieldsync/fieldsync.json").required(false));

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("fieldsync").join("fieldsync.json");
		builder = builder.add_source(config::File::from(user_config_path).required(false));
	}
	if let Some(path) = path {
		builder = builder.add_source(config::File::from(path).required(true));
	}

	builder = builder.add_source(
		config::Environment::with_prefix("FWS")
			.prefix_separator("_")
			.separator("__"),
	);

	let cfg = builder.build()?;

	let mut s: Settings = cfg.try_deserialize()?;

	// Direct environment variables always win over file values.
	if let Some(h) = env_string("FWS_HOST") {
		s.host = h;
	}
	if let Some(p) = env_parsed("FWS_PORT")? {
		s.port = p;
	}
	if let Some(db) = env_string("FWS_DATABASE_URL") {
		s.database_url = Some(Url::parse(&db).map_err(|_| SettingsError::InvalidEnv {
			name: "FWS_DATABASE_URL",
			value: db.clone(),
		})?);
	}
	if let Some(l) = env_parsed("FWS_LOG_LEVEL")? {
		s.log_level = l;
	}
	if let Some(secret) = env_string("FWS_JWT_SECRET") {
		s.jwt_secret = Some(secret);
	}
	if let Some(iss) = env_string("FWS_JWT_ISSUER") {
		s.jwt_issuer = Some(iss);
	}
	if let Some(n) = env_parsed("FWS_MAX_PUSH_RECORDS")? {
		s.max_push_records = n;
	}
	if let Some(n) = env_parsed("FWS_MAX_BODY_BYTES")? {
		s.max_body_bytes = n;
	}
	if let Some(r) = env_string("FWS_REFERENCE_DATA") {
		s.reference_data = Some(r);
	}

	Ok(s)
}

fn env_string(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: FromStr>(name: &'static str) -> Result<Option<T>, SettingsError> {
	match env_string(name) {
		Some(value) => value
			.parse::<T>()
			.map(Some)
			.map_err(|_| SettingsError::InvalidEnv { name, value }),
		None => Ok(None),
	}
}
