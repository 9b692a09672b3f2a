// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration as read from a single source.

use serde::Deserialize;

use crate::sections::{DatabaseConfigLayer, LoggingConfigLayer, Mode};

/// Every field is optional so that a source only overrides what it sets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlagkeeperConfigLayer {
	#[serde(default)]
	pub mode: Option<Mode>,
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl FlagkeeperConfigLayer {
	pub fn merge(&mut self, other: FlagkeeperConfigLayer) {
		if other.mode.is_some() {
			self.mode = other.mode;
		}
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_section<T>(current: &mut Option<T>, other: Option<T>, merge: impl FnOnce(&mut T, T)) {
	let Some(other) = other else {
		return;
	};
	match current {
		Some(existing) => merge(existing, other),
		None => *current = Some(other),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_overrides_per_field() {
		let mut base: FlagkeeperConfigLayer = toml::from_str(
			r#"
			mode = "development"

			[database]
			url = "sqlite:./a.db"
			max_connections = 3
			"#,
		)
		.unwrap();
		let over: FlagkeeperConfigLayer = toml::from_str(
			r#"
			[database]
			url = "sqlite:./b.db"

			[logging]
			format = "json"
			"#,
		)
		.unwrap();

		base.merge(over);
		assert_eq!(base.mode, Some(Mode::Development));
		let database = base.database.unwrap();
		assert_eq!(database.url.as_deref(), Some("sqlite:./b.db"));
		assert_eq!(database.max_connections, Some(3));
		assert!(base.logging.unwrap().format.is_some());
	}
}
