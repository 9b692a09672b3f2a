// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Logging configuration.

use serde::Deserialize;

use super::Mode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	/// Human readable, one event per line
	#[default]
	Pretty,
	/// One JSON object per event
	Json,
}

impl std::str::FromStr for LogFormat {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"pretty" | "text" => Ok(LogFormat::Pretty),
			"json" => Ok(LogFormat::Json),
			other => Err(format!("unknown log format '{other}', expected pretty or json")),
		}
	}
}

/// Logging configuration (runtime, fully resolved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
	/// `EnvFilter` directive, e.g. `info` or `flagkeeper_server_flags=debug`
	pub level: String,
	pub format: LogFormat,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		LoggingConfigLayer::default().finalize(Mode::default())
	}
}

/// Logging configuration layer (partial, for merging).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfigLayer {
	#[serde(default)]
	pub level: Option<String>,
	#[serde(default)]
	pub format: Option<LogFormat>,
}

impl LoggingConfigLayer {
	pub fn merge(&mut self, other: LoggingConfigLayer) {
		if other.level.is_some() {
			self.level = other.level;
		}
		if other.format.is_some() {
			self.format = other.format;
		}
	}

	pub fn finalize(self, mode: Mode) -> LoggingConfig {
		LoggingConfig {
			level: self
				.level
				.unwrap_or_else(|| mode.default_log_level().to_string()),
			format: self.format.unwrap_or_default(),
		}
	}
}
