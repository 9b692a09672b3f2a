// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for flagkeeper.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Consistent environment variable naming (`FLAGKEEPER_*`)
//!
//! # Usage
//!
//! ```ignore
//! use flagkeeper_server_config::load_config;
//!
//! let config = load_config(None)?;
//! println!("database at {}", config.database.url);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::FlagkeeperConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use std::path::PathBuf;

use tracing::{debug, info};

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagkeeperConfig {
	pub mode: Mode,
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`FLAGKEEPER_*`)
/// 2. Config file (`config_path`, or `./flagkeeper.toml` when `None`)
/// 3. Built-in defaults
pub fn load_config(config_path: Option<PathBuf>) -> Result<FlagkeeperConfig, ConfigError> {
	let toml = match config_path {
		Some(path) => TomlSource::new(path),
		None => TomlSource::local(),
	};
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(toml),
		Box::new(EnvSource),
	])
}

/// Merges the given sources by precedence and resolves the result.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<FlagkeeperConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = FlagkeeperConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: FlagkeeperConfigLayer) -> Result<FlagkeeperConfig, ConfigError> {
	let mode = layer.mode.unwrap_or_default();
	let database = layer.database.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize(mode);

	validate(&database, &logging)?;

	info!(
		mode = %mode,
		database = %database.url,
		max_connections = database.max_connections,
		run_migrations = database.run_migrations,
		log_level = %logging.level,
		"configuration loaded"
	);

	Ok(FlagkeeperConfig {
		mode,
		database,
		logging,
	})
}

fn validate(database: &DatabaseConfig, logging: &LoggingConfig) -> Result<(), ConfigError> {
	if database.url.trim().is_empty() {
		return Err(ConfigError::invalid_value("database.url", "must not be empty"));
	}
	if database.max_connections == 0 {
		return Err(ConfigError::invalid_value(
			"database.max_connections",
			"must be at least 1",
		));
	}
	if logging.level.trim().is_empty() {
		return Err(ConfigError::invalid_value("logging.level", "must not be empty"));
	}
	Ok(())
}
