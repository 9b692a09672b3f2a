// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rule::Rule;

/// Type of the values served by a flag's variations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
	Boolean,
	String,
	Integer,
	Double,
	Json,
}

impl FlagType {
	pub const ALL: [FlagType; 5] = [
		FlagType::Boolean,
		FlagType::String,
		FlagType::Integer,
		FlagType::Double,
		FlagType::Json,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			FlagType::Boolean => "boolean",
			FlagType::String => "string",
			FlagType::Integer => "integer",
			FlagType::Double => "double",
			FlagType::Json => "json",
		}
	}
}

impl std::fmt::Display for FlagType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFlagTypeError {
	#[error("flag type is required")]
	Empty,
	#[error("flag type {0} not supported")]
	Unsupported(String),
}

impl std::str::FromStr for FlagType {
	type Err = ParseFlagTypeError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"boolean" => Ok(FlagType::Boolean),
			"string" => Ok(FlagType::String),
			"integer" => Ok(FlagType::Integer),
			"double" => Ok(FlagType::Double),
			"json" => Ok(FlagType::Json),
			"" => Err(ParseFlagTypeError::Empty),
			other => Err(ParseFlagTypeError::Unsupported(other.to_string())),
		}
	}
}

/// A feature flag with its variations, targeting rules and default rule.
///
/// `id` is the string form of a UUID. An empty id means "not assigned yet";
/// storage generates one on creation.
///
/// Optional scalars stay `None` when the caller omitted them so that an absent
/// value is never confused with an explicit `false` or empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
	#[serde(default)]
	pub id: String,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(rename = "type")]
	pub variation_type: FlagType,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub variations: Option<BTreeMap<String, Value>>,
	/// Source for a dynamic targeting key
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bucketing_key: Option<String>,
	/// Free-form information such as an issue tracker link
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<BTreeMap<String, Value>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub track_events: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub disable: Option<bool>,
	/// Managed by the caller, never incremented by storage
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(default)]
	pub created_date: DateTime<Utc>,
	#[serde(default)]
	pub last_updated_date: DateTime<Utc>,
	#[serde(default)]
	pub last_modified_by: String,
	/// Mandatory once persisted. `None` is only valid for unsaved input.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub default_rule: Option<Rule>,
	#[serde(rename = "targeting", default, skip_serializing_if = "Vec::is_empty")]
	pub rules: Vec<Rule>,
}

impl Flag {
	pub fn new(name: impl Into<String>, variation_type: FlagType) -> Self {
		Self {
			id: String::new(),
			name: name.into(),
			description: None,
			variation_type,
			variations: None,
			bucketing_key: None,
			metadata: None,
			track_events: None,
			disable: None,
			version: None,
			created_date: DateTime::<Utc>::default(),
			last_updated_date: DateTime::<Utc>::default(),
			last_modified_by: String::new(),
			default_rule: None,
			rules: Vec::new(),
		}
	}

	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = id.into();
		self
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());
		self
	}

	pub fn with_variation(mut self, name: impl Into<String>, value: Value) -> Self {
		self
			.variations
			.get_or_insert_with(BTreeMap::new)
			.insert(name.into(), value);
		self
	}

	pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
		self
			.metadata
			.get_or_insert_with(BTreeMap::new)
			.insert(key.into(), value);
		self
	}

	pub fn with_bucketing_key(mut self, key: impl Into<String>) -> Self {
		self.bucketing_key = Some(key.into());
		self
	}

	pub fn with_track_events(mut self, track_events: bool) -> Self {
		self.track_events = Some(track_events);
		self
	}

	pub fn with_disable(mut self, disable: bool) -> Self {
		self.disable = Some(disable);
		self
	}

	pub fn with_version(mut self, version: impl Into<String>) -> Self {
		self.version = Some(version.into());
		self
	}

	pub fn with_dates(mut self, created: DateTime<Utc>, last_updated: DateTime<Utc>) -> Self {
		self.created_date = created;
		self.last_updated_date = last_updated;
		self
	}

	pub fn with_last_modified_by(mut self, who: impl Into<String>) -> Self {
		self.last_modified_by = who.into();
		self
	}

	pub fn with_default_rule(mut self, rule: Rule) -> Self {
		self.default_rule = Some(rule);
		self
	}

	pub fn with_rule(mut self, rule: Rule) -> Self {
		self.rules.push(rule);
		self
	}

	/// Returns true when the flag is explicitly disabled.
	pub fn is_disabled(&self) -> bool {
		self.disable.unwrap_or(false)
	}
}
