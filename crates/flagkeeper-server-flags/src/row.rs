// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Row model for the `feature_flags` and `rules` tables, and the converters
//! between rows and the domain model.
//!
//! JSON blobs (`variations`, `metadata`, `percentages`) are encoded here and
//! nowhere else. Progressive rollouts are flattened into six nullable rule
//! columns.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use flagkeeper_flags_core::{Flag, FlagType, ProgressiveRollout, ProgressiveRolloutStep, Rule};

use crate::error::ConvertError;

/// Order index reserved for the default rule.
pub const DEFAULT_RULE_ORDER_INDEX: i64 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct FlagRow {
	pub id: Uuid,
	pub name: String,
	pub description: Option<String>,
	/// JSON encoded variation map
	pub variations: String,
	pub flag_type: String,
	pub bucketing_key: Option<String>,
	/// JSON encoded metadata map, NULL when the flag has none
	pub metadata: Option<String>,
	pub track_events: Option<bool>,
	pub disable: Option<bool>,
	pub version: Option<String>,
	pub created_date: DateTime<Utc>,
	pub last_updated_date: DateTime<Utc>,
	pub last_modified_by: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleRow {
	pub id: Uuid,
	pub feature_flag_id: Uuid,
	pub is_default: bool,
	pub name: String,
	pub query: String,
	pub variation_result: Option<String>,
	/// JSON encoded percentage map
	pub percentages: Option<String>,
	pub disable: bool,
	pub progressive_rollout_initial_variation: Option<String>,
	pub progressive_rollout_end_variation: Option<String>,
	pub progressive_rollout_initial_percentage: Option<f64>,
	pub progressive_rollout_end_percentage: Option<f64>,
	pub progressive_rollout_start_date: Option<DateTime<Utc>>,
	pub progressive_rollout_end_date: Option<DateTime<Utc>>,
	pub order_index: i64,
}

/// Parses a caller supplied identifier, generating one when it is empty.
pub fn parse_or_generate_id(raw: &str) -> Result<Uuid, ConvertError> {
	if raw.is_empty() {
		return Ok(Uuid::new_v4());
	}
	Uuid::parse_str(raw).map_err(|source| ConvertError::InvalidUuid {
		value: raw.to_string(),
		source,
	})
}

/// Parses an identifier used for lookups. Unlike [`parse_or_generate_id`] an
/// empty string is rejected.
pub fn parse_id(raw: &str) -> Result<Uuid, ConvertError> {
	Uuid::parse_str(raw).map_err(|source| ConvertError::InvalidUuid {
		value: raw.to_string(),
		source,
	})
}

/// Fixed-width RFC 3339 so that lexical and chronological order agree.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl FlagRow {
	/// Maps a flag onto its row. Rules are converted separately with
	/// [`RuleRow::from_rule`].
	pub fn from_flag(flag: &Flag) -> Result<Self, ConvertError> {
		let id = parse_or_generate_id(&flag.id)?;
		let variations =
			serde_json::to_string(&flag.variations).map_err(ConvertError::json("variations"))?;
		let metadata = flag
			.metadata
			.as_ref()
			.map(serde_json::to_string)
			.transpose()
			.map_err(ConvertError::json("metadata"))?;

		Ok(FlagRow {
			id,
			name: flag.name.clone(),
			description: flag.description.clone(),
			variations,
			flag_type: flag.variation_type.to_string(),
			bucketing_key: flag.bucketing_key.clone(),
			metadata,
			track_events: flag.track_events,
			disable: flag.disable,
			version: flag.version.clone(),
			created_date: flag.created_date,
			last_updated_date: flag.last_updated_date,
			last_modified_by: flag.last_modified_by.clone(),
		})
	}

	/// Rebuilds the domain flag from its row and all of its rule rows.
	///
	/// Exactly one rule row must be flagged `is_default`; it becomes the
	/// flag's default rule. The remaining rows are ordered by `order_index`.
	pub fn into_flag(self, rules: Vec<RuleRow>) -> Result<Flag, ConvertError> {
		let mut default_rule = None;
		let mut targeting = Vec::with_capacity(rules.len());
		for row in rules {
			if row.is_default {
				default_rule = Some(row.into_rule()?);
			} else {
				targeting.push(row);
			}
		}
		let default_rule =
			default_rule.ok_or(ConvertError::DefaultRuleRequired { flag_id: self.id })?;

		targeting.sort_by_key(|row| row.order_index);
		let rules = targeting
			.into_iter()
			.map(RuleRow::into_rule)
			.collect::<Result<Vec<_>, _>>()?;

		let variations: Option<BTreeMap<String, Value>> =
			serde_json::from_str(&self.variations).map_err(ConvertError::json("variations"))?;
		let metadata: Option<BTreeMap<String, Value>> = self
			.metadata
			.as_deref()
			.map(serde_json::from_str)
			.transpose()
			.map_err(ConvertError::json("metadata"))?
			.flatten();
		let variation_type: FlagType = self.flag_type.parse()?;

		Ok(Flag {
			id: self.id.to_string(),
			name: self.name,
			description: self.description,
			variation_type,
			variations,
			bucketing_key: self.bucketing_key,
			metadata,
			track_events: self.track_events,
			disable: self.disable,
			version: self.version,
			created_date: self.created_date,
			last_updated_date: self.last_updated_date,
			last_modified_by: self.last_modified_by,
			default_rule: Some(default_rule),
			rules,
		})
	}
}

impl RuleRow {
	/// Maps a rule onto its row.
	///
	/// A default rule always lands at [`DEFAULT_RULE_ORDER_INDEX`] with an
	/// empty query and `disable = false`, whatever the caller passed.
	///
	/// Percentages must be finite: JSON has no NaN or infinity, and a NaN
	/// `REAL` reads back as NULL.
	pub fn from_rule(
		rule: &Rule,
		feature_flag_id: Uuid,
		is_default: bool,
		order_index: i64,
	) -> Result<Self, ConvertError> {
		let id = parse_or_generate_id(&rule.id)?;
		if let Some(weights) = &rule.percentages {
			for weight in weights.values() {
				require_finite("percentages", *weight)?;
			}
		}
		let percentages = rule
			.percentages
			.as_ref()
			.map(serde_json::to_string)
			.transpose()
			.map_err(ConvertError::json("percentages"))?;

		let (initial, end) = match &rule.progressive_rollout {
			Some(rollout) => (rollout.initial.clone(), rollout.end.clone()),
			None => (None, None),
		};
		let initial = initial.unwrap_or_default();
		let end = end.unwrap_or_default();
		if let Some(percentage) = initial.percentage {
			require_finite("progressiveRollout.initial.percentage", percentage)?;
		}
		if let Some(percentage) = end.percentage {
			require_finite("progressiveRollout.end.percentage", percentage)?;
		}

		let (query, disable, order_index) = if is_default {
			(String::new(), false, DEFAULT_RULE_ORDER_INDEX)
		} else {
			(rule.query.clone(), rule.disable, order_index)
		};

		Ok(RuleRow {
			id,
			feature_flag_id,
			is_default,
			name: rule.name.clone(),
			query,
			variation_result: rule.variation_result.clone(),
			percentages,
			disable,
			progressive_rollout_initial_variation: initial.variation,
			progressive_rollout_end_variation: end.variation,
			progressive_rollout_initial_percentage: initial.percentage,
			progressive_rollout_end_percentage: end.percentage,
			progressive_rollout_start_date: initial.date,
			progressive_rollout_end_date: end.date,
			order_index,
		})
	}

	/// Rebuilds the domain rule.
	///
	/// A rollout step with no variation, percentage or date has no columns to
	/// live in, so it reads back as `None`. A rollout whose steps are both
	/// empty reads back as `progressive_rollout: None`.
	pub fn into_rule(self) -> Result<Rule, ConvertError> {
		let percentages: Option<BTreeMap<String, f64>> = self
			.percentages
			.as_deref()
			.map(serde_json::from_str)
			.transpose()
			.map_err(ConvertError::json("percentages"))?
			.flatten();

		let initial = step(
			self.progressive_rollout_initial_variation,
			self.progressive_rollout_initial_percentage,
			self.progressive_rollout_start_date,
		);
		let end = step(
			self.progressive_rollout_end_variation,
			self.progressive_rollout_end_percentage,
			self.progressive_rollout_end_date,
		);
		let progressive_rollout = if initial.is_some() || end.is_some() {
			Some(ProgressiveRollout { initial, end })
		} else {
			None
		};

		Ok(Rule {
			id: self.id.to_string(),
			name: self.name,
			query: self.query,
			variation_result: self.variation_result,
			percentages,
			progressive_rollout,
			disable: self.disable,
		})
	}
}

fn require_finite(field: &'static str, value: f64) -> Result<(), ConvertError> {
	if value.is_finite() {
		Ok(())
	} else {
		Err(ConvertError::NonFinite { field, value })
	}
}

fn step(
	variation: Option<String>,
	percentage: Option<f64>,
	date: Option<DateTime<Utc>>,
) -> Option<ProgressiveRolloutStep> {
	if variation.is_none() && percentage.is_none() && date.is_none() {
		return None;
	}
	Some(ProgressiveRolloutStep {
		variation,
		percentage,
		date,
	})
}

fn decode_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, sqlx::Error> {
	let raw: String = row.try_get(column)?;
	Uuid::parse_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
		index: column.to_string(),
		source: Box::new(e),
	})
}

fn decode_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
	let raw: String = row.try_get(column)?;
	parse_timestamp(column, &raw)
}

fn decode_optional_timestamp(
	row: &SqliteRow,
	column: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
	let raw: Option<String> = row.try_get(column)?;
	raw.map(|s| parse_timestamp(column, &s)).transpose()
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, sqlx::Error> {
	DateTime::parse_from_rfc3339(raw)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| sqlx::Error::ColumnDecode {
			index: column.to_string(),
			source: Box::new(e),
		})
}

impl<'r> FromRow<'r, SqliteRow> for FlagRow {
	fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
		Ok(FlagRow {
			id: decode_uuid(row, "id")?,
			name: row.try_get("name")?,
			description: row.try_get("description")?,
			variations: row.try_get("variations")?,
			flag_type: row.try_get("type")?,
			bucketing_key: row.try_get("bucketing_key")?,
			metadata: row.try_get("metadata")?,
			track_events: row.try_get("track_events")?,
			disable: row.try_get("disable")?,
			version: row.try_get("version")?,
			created_date: decode_timestamp(row, "created_date")?,
			last_updated_date: decode_timestamp(row, "last_updated_date")?,
			last_modified_by: row.try_get("last_modified_by")?,
		})
	}
}

impl<'r> FromRow<'r, SqliteRow> for RuleRow {
	fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
		Ok(RuleRow {
			id: decode_uuid(row, "id")?,
			feature_flag_id: decode_uuid(row, "feature_flag_id")?,
			is_default: row.try_get("is_default")?,
			name: row.try_get("name")?,
			query: row.try_get("query")?,
			variation_result: row.try_get("variation_result")?,
			percentages: row.try_get("percentages")?,
			disable: row.try_get("disable")?,
			progressive_rollout_initial_variation: row
				.try_get("progressive_rollout_initial_variation")?,
			progressive_rollout_end_variation: row.try_get("progressive_rollout_end_variation")?,
			progressive_rollout_initial_percentage: row
				.try_get("progressive_rollout_initial_percentage")?,
			progressive_rollout_end_percentage: row.try_get("progressive_rollout_end_percentage")?,
			progressive_rollout_start_date: decode_optional_timestamp(
				row,
				"progressive_rollout_start_date",
			)?,
			progressive_rollout_end_date: decode_optional_timestamp(row, "progressive_rollout_end_date")?,
			order_index: row.try_get("order_index")?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{sample_flag, FLAG_ID};
	use chrono::TimeZone;
	use proptest::prelude::*;

	fn rows_for(flag: &Flag) -> (FlagRow, Vec<RuleRow>) {
		let flag_row = FlagRow::from_flag(flag).unwrap();
		let mut rules = vec![RuleRow::from_rule(
			flag.default_rule.as_ref().unwrap(),
			flag_row.id,
			true,
			DEFAULT_RULE_ORDER_INDEX,
		)
		.unwrap()];
		for (index, rule) in flag.rules.iter().enumerate() {
			rules.push(RuleRow::from_rule(rule, flag_row.id, false, index as i64).unwrap());
		}
		(flag_row, rules)
	}

	#[test]
	fn test_round_trip_full_flag() {
		let flag = sample_flag();
		let (row, rules) = rows_for(&flag);
		assert_eq!(row.into_flag(rules).unwrap(), flag);
	}

	#[test]
	fn test_round_trip_minimal_flag() {
		let created = Utc.with_ymd_and_hms(2024, 10, 25, 11, 50, 27).unwrap();
		let flag = Flag::new("minimal", FlagType::Boolean)
			.with_id(FLAG_ID)
			.with_dates(created, created)
			.with_default_rule(Rule::serving("on").with_id("a6c9b1a8-5b73-4f7e-9d8e-2b1f0a3c4d5e"));

		let (row, rules) = rows_for(&flag);
		assert_eq!(row.variations, "null");
		assert_eq!(row.metadata, None);
		assert_eq!(row.into_flag(rules).unwrap(), flag);
	}

	#[test]
	fn test_empty_id_is_generated() {
		let flag = Flag::new("new", FlagType::String);
		let row = FlagRow::from_flag(&flag).unwrap();
		assert!(!row.id.is_nil());
	}

	#[test]
	fn test_malformed_id_is_rejected() {
		let flag = Flag::new("bad", FlagType::String).with_id("not-a-uuid");
		let err = FlagRow::from_flag(&flag).unwrap_err();
		assert_eq!(err.kind(), crate::ErrorKind::InvalidUuid);

		let err = RuleRow::from_rule(&Rule::serving("A").with_id("zzz"), Uuid::new_v4(), false, 0)
			.unwrap_err();
		assert_eq!(err.kind(), crate::ErrorKind::InvalidUuid);
	}

	#[test]
	fn test_missing_default_rule_fails() {
		let flag = sample_flag();
		let (row, rules) = rows_for(&flag);
		let without_default: Vec<RuleRow> = rules.into_iter().filter(|r| !r.is_default).collect();

		let err = row.into_flag(without_default).unwrap_err();
		assert!(matches!(err, ConvertError::DefaultRuleRequired { .. }));
		assert_eq!(err.kind(), crate::ErrorKind::DefaultRuleRequired);
	}

	#[test]
	fn test_rules_are_ordered_by_index() {
		let flag = sample_flag();
		let (row, mut rules) = rows_for(&flag);
		rules.reverse();

		let rebuilt = row.into_flag(rules).unwrap();
		assert_eq!(rebuilt.rules, flag.rules);
		assert_eq!(rebuilt.default_rule, flag.default_rule);
	}

	#[test]
	fn test_rollout_is_flattened() {
		let flag = sample_flag();
		let rollout_rule = flag
			.rules
			.iter()
			.find(|r| r.progressive_rollout.is_some())
			.unwrap();
		let row = RuleRow::from_rule(rollout_rule, Uuid::new_v4(), false, 1).unwrap();

		assert_eq!(row.progressive_rollout_initial_variation.as_deref(), Some("A"));
		assert_eq!(row.progressive_rollout_end_variation.as_deref(), Some("B"));
		assert_eq!(row.progressive_rollout_initial_percentage, Some(0.0));
		assert_eq!(row.progressive_rollout_end_percentage, Some(100.0));
		assert!(row.progressive_rollout_start_date.is_some());
		assert!(row.progressive_rollout_end_date.is_some());
	}

	#[test]
	fn test_non_finite_percentages_are_rejected() {
		for weight in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
			let rule = Rule::split([("A", weight), ("B", 50.0)]);
			let err = RuleRow::from_rule(&rule, Uuid::new_v4(), false, 0).unwrap_err();
			assert!(matches!(err, ConvertError::NonFinite { field: "percentages", .. }));
			assert_eq!(err.kind(), crate::ErrorKind::ConversionError);
		}
	}

	#[test]
	fn test_non_finite_rollout_percentages_are_rejected() {
		let date = Utc.with_ymd_and_hms(2024, 10, 25, 0, 0, 0).unwrap();
		let initial_nan = Rule::rollout(ProgressiveRollout::new(
			ProgressiveRolloutStep::new("A", f64::NAN, date),
			ProgressiveRolloutStep::new("B", 100.0, date),
		));
		let err = RuleRow::from_rule(&initial_nan, Uuid::new_v4(), false, 0).unwrap_err();
		assert!(matches!(
			err,
			ConvertError::NonFinite {
				field: "progressiveRollout.initial.percentage",
				..
			}
		));

		let end_infinite = Rule::rollout(ProgressiveRollout::new(
			ProgressiveRolloutStep::new("A", 0.0, date),
			ProgressiveRolloutStep::new("B", f64::INFINITY, date),
		));
		let err = RuleRow::from_rule(&end_infinite, Uuid::new_v4(), true, 0).unwrap_err();
		assert!(matches!(
			err,
			ConvertError::NonFinite {
				field: "progressiveRollout.end.percentage",
				..
			}
		));
		assert_eq!(err.kind(), crate::ErrorKind::ConversionError);
	}

	#[test]
	fn test_empty_rollout_reads_back_as_none() {
		let rule = Rule {
			progressive_rollout: Some(ProgressiveRollout::default()),
			..Rule::serving("A")
		};
		let row = RuleRow::from_rule(&rule, Uuid::new_v4(), false, 0).unwrap();
		assert!(row.progressive_rollout_initial_variation.is_none());
		assert!(row.progressive_rollout_end_percentage.is_none());

		let read = row.into_rule().unwrap();
		assert_eq!(read.progressive_rollout, None);
		assert_eq!(read.variation_result.as_deref(), Some("A"));
	}

	#[test]
	fn test_integer_percentages_are_read_as_floats() {
		let mut row = RuleRow::from_rule(&Rule::default(), Uuid::new_v4(), false, 0).unwrap();
		row.percentages = Some(r#"{"A": 25, "B": 75}"#.to_string());

		let rule = row.into_rule().unwrap();
		assert_eq!(rule.percentages.unwrap()["A"], 25.0_f64);
	}

	#[test]
	fn test_bad_json_is_a_conversion_error() {
		let flag = sample_flag();
		let (mut row, rules) = rows_for(&flag);
		row.variations = "{not json".to_string();

		let err = row.into_flag(rules).unwrap_err();
		assert_eq!(err.kind(), crate::ErrorKind::ConversionError);
	}

	#[test]
	fn test_unknown_flag_type_is_a_conversion_error() {
		let flag = sample_flag();
		let (mut row, rules) = rows_for(&flag);
		row.flag_type = "float".to_string();

		let err = row.into_flag(rules).unwrap_err();
		assert_eq!(err.kind(), crate::ErrorKind::ConversionError);
	}

	#[test]
	fn test_timestamps_sort_lexically() {
		let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
		let b = a + chrono::Duration::nanoseconds(1);
		assert!(format_timestamp(&a) < format_timestamp(&b));
		assert_eq!(format_timestamp(&a).len(), format_timestamp(&b).len());
	}

	proptest! {
		#[test]
		fn default_rule_is_always_normalized(
			query in ".{0,20}",
			disable in any::<bool>(),
			order_index in -5i64..50,
		) {
			let rule = Rule::serving("A").with_query(query).with_disable(disable);
			let row = RuleRow::from_rule(&rule, Uuid::new_v4(), true, order_index).unwrap();

			prop_assert_eq!(row.order_index, DEFAULT_RULE_ORDER_INDEX);
			prop_assert_eq!(row.query.as_str(), "");
			prop_assert!(!row.disable);
			prop_assert!(row.is_default);
		}

		#[test]
		fn targeting_rule_keeps_its_fields(
			query in ".{0,20}",
			disable in any::<bool>(),
			order_index in 0i64..50,
		) {
			let rule = Rule::serving("A").with_query(query.clone()).with_disable(disable);
			let row = RuleRow::from_rule(&rule, Uuid::new_v4(), false, order_index).unwrap();

			prop_assert_eq!(row.order_index, order_index);
			prop_assert_eq!(row.query, query);
			prop_assert_eq!(row.disable, disable);
		}

		#[test]
		fn flag_round_trips(
			name in "[a-z][a-z0-9_]{2,20}",
			description in proptest::option::of("[ -~]{0,30}"),
			disable in proptest::option::of(any::<bool>()),
			track_events in proptest::option::of(any::<bool>()),
			weights in proptest::collection::btree_map("[a-z]{1,5}", 0u32..=100, 0..4),
			queries in proptest::collection::vec("[a-z]{1,8} eq [0-9]{1,3}", 0..5),
		) {
			let created = Utc.with_ymd_and_hms(2024, 10, 25, 11, 50, 27).unwrap();
			let mut flag = Flag::new(name, FlagType::Integer)
				.with_id(Uuid::new_v4().to_string())
				.with_dates(created, created)
				.with_variation("low", serde_json::json!(1))
				.with_default_rule(Rule::serving("low").with_id(Uuid::new_v4().to_string()));
			flag.description = description;
			flag.disable = disable;
			flag.track_events = track_events;
			for query in queries {
				flag.rules.push(
					Rule::split(weights.iter().map(|(k, w)| (k.clone(), f64::from(*w))))
						.with_id(Uuid::new_v4().to_string())
						.with_query(query),
				);
			}

			let (row, rules) = rows_for(&flag);
			prop_assert_eq!(row.into_flag(rules).unwrap(), flag);
		}
	}
}
