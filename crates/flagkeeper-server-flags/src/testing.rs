// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{TimeZone, Utc};
use serde_json::json;
use sqlx::sqlite::SqlitePool;

use flagkeeper_flags_core::{Flag, FlagType, ProgressiveRollout, ProgressiveRolloutStep, Rule};

use crate::error::ErrorKind;
use crate::pool::{create_pool, run_migrations};
use crate::repository::FlagStorage;

pub const FLAG_ID: &str = "6f1b3c2a-9d4e-4b8a-a7c1-0e5d2f3b4a69";
pub const DEFAULT_RULE_ID: &str = "0c2d9e7b-3a41-4f6c-8b5e-7d1a2c3e4f50";
pub const RULE_1_ID: &str = "1a2b3c4d-5e6f-4a7b-8c9d-0e1f2a3b4c5d";
pub const RULE_2_ID: &str = "2b3c4d5e-6f7a-4b8c-9d0e-1f2a3b4c5d6e";

pub async fn create_test_pool() -> SqlitePool {
	let pool = create_pool("sqlite::memory:", 1).await.unwrap();
	run_migrations(&pool).await.unwrap();
	pool
}

/// A flag using every persisted field: a percentage rule, a progressive
/// rollout rule and a default rule. All ids are assigned.
pub fn sample_flag() -> Flag {
	let created = Utc.with_ymd_and_hms(2024, 10, 25, 11, 50, 27).unwrap();
	let rollout_start = Utc.with_ymd_and_hms(2024, 11, 1, 0, 0, 0).unwrap();
	let rollout_end = Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();

	Flag::new("checkout-redesign", FlagType::String)
		.with_id(FLAG_ID)
		.with_description("new checkout flow")
		.with_variation("A", json!("control"))
		.with_variation("B", json!("redesign"))
		.with_bucketing_key("teamId")
		.with_metadata("issue", json!("https://issues.example.com/FLAG-12"))
		.with_track_events(true)
		.with_disable(false)
		.with_version("1.0.0")
		.with_dates(created, created)
		.with_last_modified_by("alice")
		.with_rule(
			Rule::split([("A", 40.0), ("B", 60.0)])
				.with_id(RULE_1_ID)
				.with_name("beta users")
				.with_query("beta eq true"),
		)
		.with_rule(
			Rule::rollout(ProgressiveRollout::new(
				ProgressiveRolloutStep::new("A", 0.0, rollout_start),
				ProgressiveRolloutStep::new("B", 100.0, rollout_end),
			))
			.with_id(RULE_2_ID)
			.with_query("country eq \"FR\"")
			.with_disable(true),
		)
		.with_default_rule(Rule::serving("A").with_id(DEFAULT_RULE_ID).with_name("default"))
}

/// Minimal valid flag with a fresh id, for tests that need several flags.
pub fn simple_flag(name: &str) -> Flag {
	let created = Utc.with_ymd_and_hms(2024, 10, 25, 11, 50, 27).unwrap();
	Flag::new(name, FlagType::Boolean)
		.with_id(uuid::Uuid::new_v4().to_string())
		.with_variation("on", json!(true))
		.with_variation("off", json!(false))
		.with_dates(created, created)
		.with_last_modified_by("tests")
		.with_default_rule(Rule::serving("off").with_id(uuid::Uuid::new_v4().to_string()))
}

/// Behaviour every [`FlagStorage`] implementation must share.
pub async fn check_storage_contract(storage: &dyn FlagStorage) {
	storage.ping().await.unwrap();
	assert!(storage.get_flags().await.unwrap().is_empty());

	let flag = sample_flag();
	assert_eq!(storage.create_flag(&flag).await.unwrap(), FLAG_ID);
	assert_eq!(storage.get_flag_by_id(FLAG_ID).await.unwrap(), flag);
	assert_eq!(storage.get_flag_by_name(&flag.name).await.unwrap(), flag);

	let mut without_default = simple_flag("no-default");
	without_default.default_rule = None;
	let err = storage.create_flag(&without_default).await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::DefaultRuleRequired);
	assert_eq!(storage.get_flags().await.unwrap().len(), 1);

	// Names and rule ids stay unique across flags.
	let other = simple_flag("other");
	storage.create_flag(&other).await.unwrap();
	let other_default_id = other.default_rule.as_ref().unwrap().id.clone();

	let mut renamed = flag.clone();
	renamed.name = other.name.clone();
	let err = storage.update_flag(&renamed).await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::UnknownError);

	for taken in [other_default_id.as_str(), DEFAULT_RULE_ID] {
		let mut stolen = flag.clone();
		stolen.rules.push(Rule::serving("B").with_id(taken).with_query("x eq 1"));
		let err = storage.update_flag(&stolen).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::UnknownError);
	}

	let mut clashing = simple_flag("clashing");
	clashing.rules.push(Rule::serving("on").with_id(RULE_1_ID));
	let err = storage.create_flag(&clashing).await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::UnknownError);

	assert_eq!(storage.get_flag_by_id(FLAG_ID).await.unwrap(), flag);
	assert_eq!(storage.get_flag_by_id(&other.id).await.unwrap(), other);
	storage.delete_flag_by_id(&other.id).await.unwrap();
	assert_eq!(storage.get_flags().await.unwrap().len(), 1);

	let mut reordered = flag.clone();
	reordered.rules.reverse();
	storage.update_flag(&reordered).await.unwrap();
	let stored = storage.get_flag_by_id(FLAG_ID).await.unwrap();
	let ids: Vec<&str> = stored.rules.iter().map(|r| r.id.as_str()).collect();
	assert_eq!(ids, vec![RULE_2_ID, RULE_1_ID]);
	assert_eq!(stored, reordered);

	let mut no_default = flag.clone();
	no_default.default_rule = None;
	let err = storage.update_flag(&no_default).await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::DefaultRuleRequired);

	let unknown = simple_flag("unknown");
	let err = storage.update_flag(&unknown).await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);
	let err = storage.get_flag_by_id(&unknown.id).await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);

	storage.delete_flag_by_id(&unknown.id).await.unwrap();
	assert_eq!(storage.get_flags().await.unwrap().len(), 1);
	storage.delete_flag_by_id(FLAG_ID).await.unwrap();
	assert!(storage.get_flags().await.unwrap().is_empty());
	let err = storage.get_flag_by_id(FLAG_ID).await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);
}
