// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database configuration.

use serde::Deserialize;

const DEFAULT_URL: &str = "sqlite:./flagkeeper.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Database configuration (runtime, fully resolved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
	pub url: String,
	pub max_connections: u32,
	/// Apply the schema on startup
	pub run_migrations: bool,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		DatabaseConfigLayer::default().finalize()
	}
}

/// Database configuration layer (partial, for merging).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfigLayer {
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub max_connections: Option<u32>,
	#[serde(default)]
	pub run_migrations: Option<bool>,
}

impl DatabaseConfigLayer {
	pub fn merge(&mut self, other: DatabaseConfigLayer) {
		if other.url.is_some() {
			self.url = other.url;
		}
		if other.max_connections.is_some() {
			self.max_connections = other.max_connections;
		}
		if other.run_migrations.is_some() {
			self.run_migrations = other.run_migrations;
		}
	}

	pub fn finalize(self) -> DatabaseConfig {
		DatabaseConfig {
			url: self.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
			max_connections: self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
			run_migrations: self.run_migrations.unwrap_or(true),
		}
	}
}
