// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool};
use sqlx::{Connection, Transaction};
use tracing::instrument;
use uuid::Uuid;

use flagkeeper_flags_core::{Flag, Rule};

use crate::error::{Result, StorageError};
use crate::pool::create_pool;
use crate::reconcile;
use crate::row::{format_timestamp, parse_id, FlagRow, RuleRow, DEFAULT_RULE_ORDER_INDEX};

/// Storage contract for feature flags.
///
/// Every flag returned carries its default rule and its targeting rules in
/// `order_index` order. Every error is a [`StorageError`].
#[async_trait]
pub trait FlagStorage: Send + Sync {
	/// All flags, most recently updated first. Empty when there are none.
	async fn get_flags(&self) -> Result<Vec<Flag>>;
	async fn get_flag_by_id(&self, id: &str) -> Result<Flag>;
	async fn get_flag_by_name(&self, name: &str) -> Result<Flag>;
	/// Persists a new flag and returns its id, generated when `flag.id` is empty.
	async fn create_flag(&self, flag: &Flag) -> Result<String>;
	/// Replaces the stored flag with `flag`, reconciling its rules by id.
	async fn update_flag(&self, flag: &Flag) -> Result<()>;
	/// Removes the flag and its rules. Unknown ids are not an error.
	async fn delete_flag_by_id(&self, id: &str) -> Result<()>;
	async fn ping(&self) -> Result<()>;
}

/// SQLite implementation of the flag storage.
#[derive(Clone)]
pub struct SqliteFlagStorage {
	pool: SqlitePool,
}

impl SqliteFlagStorage {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
		Ok(Self::new(create_pool(database_url, max_connections).await?))
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	/// Closes the pool. Every later operation fails with
	/// `DATABASE_NOT_INITIALIZED`.
	pub async fn close(&self) {
		self.pool.close().await;
		tracing::info!("flag storage closed");
	}

	async fn load(&self, row: FlagRow) -> Result<Flag> {
		let rules = sqlx::query_as::<_, RuleRow>(
			r#"
			SELECT id, feature_flag_id, is_default, name, query, variation_result, percentages,
				   disable, progressive_rollout_initial_variation, progressive_rollout_end_variation,
				   progressive_rollout_initial_percentage, progressive_rollout_end_percentage,
				   progressive_rollout_start_date, progressive_rollout_end_date, order_index
			FROM rules
			WHERE feature_flag_id = ?
			ORDER BY order_index ASC
			"#,
		)
		.bind(row.id.to_string())
		.fetch_all(&self.pool)
		.await?;

		row.into_flag(rules).map_err(StorageError::from_loaded)
	}
}

/// Commits on success and rolls back on error. A rollback failure is
/// reported together with the error that caused it.
async fn finish<T>(tx: Transaction<'_, Sqlite>, outcome: Result<T>) -> Result<T> {
	match outcome {
		Ok(value) => {
			tx.commit().await?;
			Ok(value)
		}
		Err(err) => match tx.rollback().await {
			Ok(()) => Err(err),
			Err(rollback) => Err(err.with_rollback_failure(rollback)),
		},
	}
}

fn require_default_rule(flag: &Flag) -> Result<&Rule> {
	flag
		.default_rule
		.as_ref()
		.ok_or_else(StorageError::default_rule_required)
}

/// Rewrites caller supplied rule ids in canonical form so they compare equal
/// to stored ids.
fn canonical_rules(rules: &[Rule]) -> Result<Vec<Rule>> {
	rules
		.iter()
		.map(|rule| {
			let mut rule = rule.clone();
			if !rule.id.is_empty() {
				rule.id = parse_id(&rule.id)?.to_string();
			}
			Ok(rule)
		})
		.collect()
}

async fn insert_flag_row(conn: &mut SqliteConnection, row: &FlagRow) -> Result<()> {
	sqlx::query(
		r#"
		INSERT INTO feature_flags (id, name, description, variations, type, bucketing_key,
								   metadata, track_events, disable, version, created_date,
								   last_updated_date, last_modified_by)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(row.id.to_string())
	.bind(&row.name)
	.bind(&row.description)
	.bind(&row.variations)
	.bind(&row.flag_type)
	.bind(&row.bucketing_key)
	.bind(&row.metadata)
	.bind(row.track_events)
	.bind(row.disable)
	.bind(&row.version)
	.bind(format_timestamp(&row.created_date))
	.bind(format_timestamp(&row.last_updated_date))
	.bind(&row.last_modified_by)
	.execute(&mut *conn)
	.await?;
	Ok(())
}

async fn insert_rule_row(conn: &mut SqliteConnection, row: &RuleRow) -> Result<()> {
	sqlx::query(
		r#"
		INSERT INTO rules (id, feature_flag_id, is_default, name, query, variation_result,
						   percentages, disable, progressive_rollout_initial_variation,
						   progressive_rollout_end_variation, progressive_rollout_initial_percentage,
						   progressive_rollout_end_percentage, progressive_rollout_start_date,
						   progressive_rollout_end_date, order_index)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(row.id.to_string())
	.bind(row.feature_flag_id.to_string())
	.bind(row.is_default)
	.bind(&row.name)
	.bind(&row.query)
	.bind(&row.variation_result)
	.bind(&row.percentages)
	.bind(row.disable)
	.bind(&row.progressive_rollout_initial_variation)
	.bind(&row.progressive_rollout_end_variation)
	.bind(row.progressive_rollout_initial_percentage)
	.bind(row.progressive_rollout_end_percentage)
	.bind(row.progressive_rollout_start_date.as_ref().map(format_timestamp))
	.bind(row.progressive_rollout_end_date.as_ref().map(format_timestamp))
	.bind(row.order_index)
	.execute(&mut *conn)
	.await?;
	Ok(())
}

/// Updates the content and position of a stored rule, keeping its id.
/// Returns the number of rows touched.
async fn update_rule_row(conn: &mut SqliteConnection, row: &RuleRow, filter: RuleFilter) -> Result<u64> {
	let sql = match filter {
		RuleFilter::Default => {
			r#"
			UPDATE rules
			SET name = ?, query = ?, variation_result = ?, percentages = ?, disable = ?,
				progressive_rollout_initial_variation = ?, progressive_rollout_end_variation = ?,
				progressive_rollout_initial_percentage = ?, progressive_rollout_end_percentage = ?,
				progressive_rollout_start_date = ?, progressive_rollout_end_date = ?,
				order_index = ?
			WHERE feature_flag_id = ? AND is_default = 1
			"#
		}
		RuleFilter::Targeting => {
			r#"
			UPDATE rules
			SET name = ?, query = ?, variation_result = ?, percentages = ?, disable = ?,
				progressive_rollout_initial_variation = ?, progressive_rollout_end_variation = ?,
				progressive_rollout_initial_percentage = ?, progressive_rollout_end_percentage = ?,
				progressive_rollout_start_date = ?, progressive_rollout_end_date = ?,
				order_index = ?
			WHERE feature_flag_id = ? AND is_default = 0 AND id = ?
			"#
		}
	};

	let mut query = sqlx::query(sql)
		.bind(&row.name)
		.bind(&row.query)
		.bind(&row.variation_result)
		.bind(&row.percentages)
		.bind(row.disable)
		.bind(&row.progressive_rollout_initial_variation)
		.bind(&row.progressive_rollout_end_variation)
		.bind(row.progressive_rollout_initial_percentage)
		.bind(row.progressive_rollout_end_percentage)
		.bind(row.progressive_rollout_start_date.as_ref().map(format_timestamp))
		.bind(row.progressive_rollout_end_date.as_ref().map(format_timestamp))
		.bind(row.order_index)
		.bind(row.feature_flag_id.to_string());
	if filter == RuleFilter::Targeting {
		query = query.bind(row.id.to_string());
	}

	let result = query.execute(&mut *conn).await?;
	Ok(result.rows_affected())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleFilter {
	Default,
	Targeting,
}

async fn create_in_tx(conn: &mut SqliteConnection, flag: &FlagRow, rules: &[RuleRow]) -> Result<()> {
	insert_flag_row(conn, flag).await?;
	for rule in rules {
		insert_rule_row(conn, rule).await?;
	}
	Ok(())
}

async fn update_in_tx(
	conn: &mut SqliteConnection,
	flag: &FlagRow,
	default_rule: &Rule,
	incoming: &[Rule],
) -> Result<()> {
	let flag_id = flag.id.to_string();

	let stored: Option<(String,)> = sqlx::query_as("SELECT id FROM feature_flags WHERE id = ?")
		.bind(&flag_id)
		.fetch_optional(&mut *conn)
		.await?;
	if stored.is_none() {
		return Err(StorageError::not_found(format!("flag {flag_id} not found")));
	}

	let existing: Vec<(String,)> = sqlx::query_as(
		"SELECT id FROM rules WHERE feature_flag_id = ? AND is_default = 0 ORDER BY order_index ASC",
	)
	.bind(&flag_id)
	.fetch_all(&mut *conn)
	.await?;

	let plan = reconcile::plan(
		existing.iter().map(|(id,)| id.as_str()),
		default_rule,
		incoming,
	);
	tracing::debug!(
		deletes = plan.deletes.len(),
		inserts = plan.inserts.len(),
		updates = plan.updates.len(),
		"reconciling rules"
	);

	let default_row = RuleRow::from_rule(
		plan.default_rule.rule,
		flag.id,
		true,
		plan.default_rule.order_index,
	)?;
	if update_rule_row(conn, &default_row, RuleFilter::Default).await? == 0 {
		tracing::warn!(flag_id = %flag_id, "stored flag had no default rule, inserting one");
		insert_rule_row(conn, &default_row).await?;
	}

	for rule_id in &plan.deletes {
		sqlx::query("DELETE FROM rules WHERE id = ? AND feature_flag_id = ?")
			.bind(rule_id)
			.bind(&flag_id)
			.execute(&mut *conn)
			.await?;
	}

	for planned in &plan.inserts {
		let row = RuleRow::from_rule(planned.rule, flag.id, false, planned.order_index)?;
		insert_rule_row(conn, &row).await?;
	}

	for planned in &plan.updates {
		let row = RuleRow::from_rule(planned.rule, flag.id, false, planned.order_index)?;
		update_rule_row(conn, &row, RuleFilter::Targeting).await?;
	}

	// type and created_date are fixed at creation.
	sqlx::query(
		r#"
		UPDATE feature_flags
		SET name = ?, description = ?, variations = ?, bucketing_key = ?, metadata = ?,
			track_events = ?, disable = ?, version = ?, last_updated_date = ?,
			last_modified_by = ?
		WHERE id = ?
		"#,
	)
	.bind(&flag.name)
	.bind(&flag.description)
	.bind(&flag.variations)
	.bind(&flag.bucketing_key)
	.bind(&flag.metadata)
	.bind(flag.track_events)
	.bind(flag.disable)
	.bind(&flag.version)
	.bind(format_timestamp(&flag.last_updated_date))
	.bind(&flag.last_modified_by)
	.bind(&flag_id)
	.execute(&mut *conn)
	.await?;

	Ok(())
}

async fn delete_in_tx(conn: &mut SqliteConnection, id: Uuid) -> Result<(u64, u64)> {
	let rules = sqlx::query("DELETE FROM rules WHERE feature_flag_id = ?")
		.bind(id.to_string())
		.execute(&mut *conn)
		.await?;
	let flags = sqlx::query("DELETE FROM feature_flags WHERE id = ?")
		.bind(id.to_string())
		.execute(&mut *conn)
		.await?;
	Ok((flags.rows_affected(), rules.rows_affected()))
}

#[async_trait]
impl FlagStorage for SqliteFlagStorage {
	#[instrument(skip(self))]
	async fn get_flags(&self) -> Result<Vec<Flag>> {
		let rows = sqlx::query_as::<_, FlagRow>(
			r#"
			SELECT id, name, description, variations, type, bucketing_key, metadata,
				   track_events, disable, version, created_date, last_updated_date,
				   last_modified_by
			FROM feature_flags
			ORDER BY last_updated_date DESC
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		let rule_rows = sqlx::query_as::<_, RuleRow>(
			r#"
			SELECT id, feature_flag_id, is_default, name, query, variation_result, percentages,
				   disable, progressive_rollout_initial_variation, progressive_rollout_end_variation,
				   progressive_rollout_initial_percentage, progressive_rollout_end_percentage,
				   progressive_rollout_start_date, progressive_rollout_end_date, order_index
			FROM rules
			ORDER BY feature_flag_id, order_index ASC
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		let mut rules_by_flag: HashMap<Uuid, Vec<RuleRow>> = HashMap::new();
		for rule in rule_rows {
			rules_by_flag.entry(rule.feature_flag_id).or_default().push(rule);
		}

		let flags = rows
			.into_iter()
			.map(|row| {
				let rules = rules_by_flag.remove(&row.id).unwrap_or_default();
				row.into_flag(rules).map_err(StorageError::from_loaded)
			})
			.collect::<Result<Vec<_>>>()?;

		tracing::debug!(count = flags.len(), "loaded flags");
		Ok(flags)
	}

	#[instrument(skip(self), fields(flag_id = %id))]
	async fn get_flag_by_id(&self, id: &str) -> Result<Flag> {
		let id = parse_id(id)?;
		let row = sqlx::query_as::<_, FlagRow>(
			r#"
			SELECT id, name, description, variations, type, bucketing_key, metadata,
				   track_events, disable, version, created_date, last_updated_date,
				   last_modified_by
			FROM feature_flags
			WHERE id = ?
			"#,
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?
		.ok_or_else(|| StorageError::not_found(format!("flag {id} not found")))?;

		self.load(row).await
	}

	#[instrument(skip(self), fields(flag_name = %name))]
	async fn get_flag_by_name(&self, name: &str) -> Result<Flag> {
		let row = sqlx::query_as::<_, FlagRow>(
			r#"
			SELECT id, name, description, variations, type, bucketing_key, metadata,
				   track_events, disable, version, created_date, last_updated_date,
				   last_modified_by
			FROM feature_flags
			WHERE name = ?
			"#,
		)
		.bind(name)
		.fetch_optional(&self.pool)
		.await?
		.ok_or_else(|| StorageError::not_found(format!("flag named {name:?} not found")))?;

		self.load(row).await
	}

	#[instrument(skip(self, flag), fields(flag_id = %flag.id, flag_name = %flag.name))]
	async fn create_flag(&self, flag: &Flag) -> Result<String> {
		let default_rule = require_default_rule(flag)?;
		let flag_row = FlagRow::from_flag(flag)?;

		let mut rule_rows = Vec::with_capacity(flag.rules.len() + 1);
		rule_rows.push(RuleRow::from_rule(
			default_rule,
			flag_row.id,
			true,
			DEFAULT_RULE_ORDER_INDEX,
		)?);
		for (index, rule) in flag.rules.iter().enumerate() {
			rule_rows.push(RuleRow::from_rule(rule, flag_row.id, false, index as i64)?);
		}

		let mut tx = self.pool.begin().await?;
		let outcome = create_in_tx(&mut tx, &flag_row, &rule_rows).await;
		finish(tx, outcome).await?;

		tracing::info!(flag_id = %flag_row.id, rules = rule_rows.len(), "flag created");
		Ok(flag_row.id.to_string())
	}

	#[instrument(skip(self, flag), fields(flag_id = %flag.id, flag_name = %flag.name))]
	async fn update_flag(&self, flag: &Flag) -> Result<()> {
		let default_rule = require_default_rule(flag)?;
		parse_id(&flag.id)?;
		let flag_row = FlagRow::from_flag(flag)?;
		let incoming = canonical_rules(&flag.rules)?;

		let mut tx = self.pool.begin().await?;
		let outcome = update_in_tx(&mut tx, &flag_row, default_rule, &incoming).await;
		finish(tx, outcome).await?;

		tracing::info!(flag_id = %flag_row.id, "flag updated");
		Ok(())
	}

	#[instrument(skip(self), fields(flag_id = %id))]
	async fn delete_flag_by_id(&self, id: &str) -> Result<()> {
		let id = parse_id(id)?;

		let mut tx = self.pool.begin().await?;
		let outcome = delete_in_tx(&mut tx, id).await;
		let (flags, rules) = finish(tx, outcome).await?;

		if flags == 0 {
			tracing::debug!(flag_id = %id, "flag already absent");
		} else {
			tracing::info!(flag_id = %id, rules, "flag deleted");
		}
		Ok(())
	}

	#[instrument(skip(self))]
	async fn ping(&self) -> Result<()> {
		if self.pool.is_closed() {
			return Err(StorageError::not_initialized());
		}
		let mut conn = self.pool.acquire().await?;
		conn.ping().await?;
		Ok(())
	}
}
