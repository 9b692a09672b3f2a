// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::FlagkeeperConfigLayer;
use crate::sections::{DatabaseConfigLayer, LogFormat, LoggingConfigLayer, Mode};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<FlagkeeperConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<FlagkeeperConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(FlagkeeperConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file yields an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// `./flagkeeper.toml`
	pub fn local() -> Self {
		Self::new("flagkeeper.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<FlagkeeperConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(FlagkeeperConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: FlagkeeperConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: FLAGKEEPER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<FlagkeeperConfigLayer, ConfigError> {
		debug!("loading environment variables");
		layer_from_env(|name| std::env::var(name).ok())
	}
}

/// Builds a layer from a variable lookup. Empty values count as unset.
pub(crate) fn layer_from_env<F>(lookup: F) -> Result<FlagkeeperConfigLayer, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

	Ok(FlagkeeperConfigLayer {
		mode: parse_var::<Mode>("FLAGKEEPER_MODE", var("FLAGKEEPER_MODE"))?,
		database: Some(DatabaseConfigLayer {
			url: var("FLAGKEEPER_DATABASE_URL"),
			max_connections: parse_var::<u32>(
				"FLAGKEEPER_DATABASE_MAX_CONNECTIONS",
				var("FLAGKEEPER_DATABASE_MAX_CONNECTIONS"),
			)?,
			run_migrations: parse_bool(
				"FLAGKEEPER_DATABASE_RUN_MIGRATIONS",
				var("FLAGKEEPER_DATABASE_RUN_MIGRATIONS"),
			)?,
		}),
		logging: Some(LoggingConfigLayer {
			level: var("FLAGKEEPER_LOG_LEVEL"),
			format: parse_var::<LogFormat>("FLAGKEEPER_LOG_FORMAT", var("FLAGKEEPER_LOG_FORMAT"))?,
		}),
	})
}

fn parse_var<T>(name: &str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	match value {
		Some(v) => v
			.parse()
			.map(Some)
			.map_err(|e| ConfigError::invalid_value(name, format!("invalid value '{v}': {e}"))),
		None => Ok(None),
	}
}

fn parse_bool(name: &str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
	match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
		None => Ok(None),
		Some("1" | "true" | "yes") => Ok(Some(true)),
		Some("0" | "false" | "no") => Ok(Some(false)),
		Some(other) => Err(ConfigError::invalid_value(
			name,
			format!("invalid boolean value '{other}'"),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	fn env(vars: &[(&str, &str)]) -> Result<FlagkeeperConfigLayer, ConfigError> {
		let vars: HashMap<String, String> = vars
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		layer_from_env(|name| vars.get(name).cloned())
	}

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Environment > Precedence::ConfigFile);
		assert!(Precedence::ConfigFile > Precedence::Defaults);
	}

	#[test]
	fn test_defaults_source_returns_empty_layer() {
		let layer = DefaultsSource.load().unwrap();
		assert!(layer.database.is_none());
		assert!(layer.mode.is_none());
	}

	#[test]
	fn test_toml_source_missing_file_returns_empty() {
		let layer = TomlSource::new("/nonexistent/flagkeeper.toml").load().unwrap();
		assert!(layer.database.is_none());
	}

	#[test]
	fn test_toml_source_reads_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("flagkeeper.toml");
		std::fs::write(
			&path,
			"mode = \"development\"\n[database]\nurl = \"sqlite::memory:\"\nrun_migrations = false\n",
		)
		.unwrap();

		let layer = TomlSource::new(&path).load().unwrap();
		assert_eq!(layer.mode, Some(Mode::Development));
		let database = layer.database.unwrap();
		assert_eq!(database.url.as_deref(), Some("sqlite::memory:"));
		assert_eq!(database.run_migrations, Some(false));
	}

	#[test]
	fn test_toml_source_reports_parse_errors() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("flagkeeper.toml");
		std::fs::write(&path, "[database\nurl = 1").unwrap();

		let err = TomlSource::new(&path).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}

	#[test]
	fn test_env_values_are_parsed() {
		let layer = env(&[
			("FLAGKEEPER_MODE", "development"),
			("FLAGKEEPER_DATABASE_URL", "sqlite:/tmp/flags.db"),
			("FLAGKEEPER_DATABASE_MAX_CONNECTIONS", "12"),
			("FLAGKEEPER_DATABASE_RUN_MIGRATIONS", "no"),
			("FLAGKEEPER_LOG_LEVEL", "trace"),
			("FLAGKEEPER_LOG_FORMAT", "json"),
		])
		.unwrap();

		assert_eq!(layer.mode, Some(Mode::Development));
		let database = layer.database.unwrap();
		assert_eq!(database.url.as_deref(), Some("sqlite:/tmp/flags.db"));
		assert_eq!(database.max_connections, Some(12));
		assert_eq!(database.run_migrations, Some(false));
		let logging = layer.logging.unwrap();
		assert_eq!(logging.level.as_deref(), Some("trace"));
		assert_eq!(logging.format, Some(LogFormat::Json));
	}

	#[test]
	fn test_empty_env_values_are_unset() {
		let layer = env(&[("FLAGKEEPER_DATABASE_URL", ""), ("FLAGKEEPER_MODE", "")]).unwrap();
		assert!(layer.mode.is_none());
		assert!(layer.database.unwrap().url.is_none());
	}

	#[test]
	fn test_invalid_env_values_are_rejected() {
		for (key, value) in [
			("FLAGKEEPER_DATABASE_MAX_CONNECTIONS", "many"),
			("FLAGKEEPER_DATABASE_RUN_MIGRATIONS", "maybe"),
			("FLAGKEEPER_LOG_FORMAT", "xml"),
			("FLAGKEEPER_MODE", "staging"),
		] {
			let err = env(&[(key, value)]).unwrap_err();
			match err {
				ConfigError::InvalidValue { key: reported, .. } => assert_eq!(reported, key),
				other => panic!("unexpected error {other:?}"),
			}
		}
	}
}
