// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A rule selecting a variation for the users its query matches.
///
/// A valid rule populates exactly one result strategy: `variation_result`,
/// `percentages` or `progressive_rollout`. Storage does not enforce this and
/// keeps whatever combination it is given.
///
/// Default rules have no query and cannot be disabled; storage clears both
/// fields when persisting a default rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
	/// Empty until storage assigns one
	#[serde(default)]
	pub id: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub name: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub query: String,
	#[serde(rename = "variation", default, skip_serializing_if = "Option::is_none")]
	pub variation_result: Option<String>,
	/// Variation name to weight, e.g. `{"A": 10.0, "B": 90.0}`
	#[serde(rename = "percentage", default, skip_serializing_if = "Option::is_none")]
	pub percentages: Option<BTreeMap<String, f64>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub progressive_rollout: Option<ProgressiveRollout>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub disable: bool,
}

impl Rule {
	/// Rule serving a single variation.
	pub fn serving(variation: impl Into<String>) -> Self {
		Self {
			variation_result: Some(variation.into()),
			..Default::default()
		}
	}

	/// Rule splitting traffic between variations.
	pub fn split<I, K>(percentages: I) -> Self
	where
		I: IntoIterator<Item = (K, f64)>,
		K: Into<String>,
	{
		Self {
			percentages: Some(
				percentages
					.into_iter()
					.map(|(variation, weight)| (variation.into(), weight))
					.collect(),
			),
			..Default::default()
		}
	}

	/// Rule ramping from one variation to another over time.
	pub fn rollout(progressive_rollout: ProgressiveRollout) -> Self {
		Self {
			progressive_rollout: Some(progressive_rollout),
			..Default::default()
		}
	}

	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = id.into();
		self
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = name.into();
		self
	}

	pub fn with_query(mut self, query: impl Into<String>) -> Self {
		self.query = query.into();
		self
	}

	pub fn with_disable(mut self, disable: bool) -> Self {
		self.disable = disable;
		self
	}
}

/// Time-bounded linear ramp between an initial and an end step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressiveRollout {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub initial: Option<ProgressiveRolloutStep>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub end: Option<ProgressiveRolloutStep>,
}

impl ProgressiveRollout {
	pub fn new(initial: ProgressiveRolloutStep, end: ProgressiveRolloutStep) -> Self {
		Self {
			initial: Some(initial),
			end: Some(end),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressiveRolloutStep {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub variation: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub percentage: Option<f64>,
	/// Start date for the initial step, end date for the end step
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub date: Option<DateTime<Utc>>,
}

impl ProgressiveRolloutStep {
	pub fn new(variation: impl Into<String>, percentage: f64, date: DateTime<Utc>) -> Self {
		Self {
			variation: Some(variation.into()),
			percentage: Some(percentage),
			date: Some(date),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn test_split_collects_weights() {
		let rule = Rule::split([("A", 10.0), ("B", 90.0)]);
		let percentages = rule.percentages.unwrap();
		assert_eq!(percentages.len(), 2);
		assert_eq!(percentages["B"], 90.0);
		assert!(rule.variation_result.is_none());
	}

	#[test]
	fn test_rule_wire_format() {
		let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
		let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
		let rule = Rule::rollout(ProgressiveRollout::new(
			ProgressiveRolloutStep::new("A", 0.0, start),
			ProgressiveRolloutStep::new("B", 100.0, end),
		))
		.with_query("beta eq true");

		let json = serde_json::to_value(&rule).unwrap();
		assert_eq!(json["progressiveRollout"]["initial"]["variation"], "A");
		assert_eq!(json["progressiveRollout"]["end"]["percentage"], 100.0);
		assert!(json.get("disable").is_none());
		assert!(json.get("name").is_none());

		let back: Rule = serde_json::from_value(json).unwrap();
		assert_eq!(back, rule);
	}

	#[test]
	fn test_integer_percentages_deserialize_as_floats() {
		let rule: Rule = serde_json::from_str(r#"{"percentage": {"A": 30, "B": 70}}"#).unwrap();
		assert_eq!(rule.percentages.unwrap()["A"], 30.0);
	}
}
