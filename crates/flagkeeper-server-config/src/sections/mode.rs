// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

/// Deployment mode. Development turns on debug logging unless a level is
/// configured explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
	Development,
	#[default]
	Production,
}

impl Mode {
	pub fn as_str(&self) -> &'static str {
		match self {
			Mode::Development => "development",
			Mode::Production => "production",
		}
	}

	pub fn default_log_level(&self) -> &'static str {
		match self {
			Mode::Development => "debug",
			Mode::Production => "info",
		}
	}
}

impl std::fmt::Display for Mode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for Mode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"development" | "dev" => Ok(Mode::Development),
			"production" | "prod" => Ok(Mode::Production),
			other => Err(format!("unknown mode '{other}', expected development or production")),
		}
	}
}
