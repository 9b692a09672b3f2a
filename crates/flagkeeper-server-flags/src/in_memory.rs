// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process [`FlagStorage`] used by tests.
//!
//! It follows the same contract as the SQL gateway, including the default
//! rule invariant, id-based rule reconciliation and the uniqueness of flag
//! names and rule ids, but does not validate that ids are UUIDs. Any operation can be made to fail with a chosen
//! [`ErrorKind`] through a [`FailurePlan`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use flagkeeper_flags_core::{Flag, Rule};

use crate::error::{ErrorKind, Result, StorageError};
use crate::reconcile;
use crate::repository::FlagStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
	GetFlags,
	GetFlagById,
	GetFlagByName,
	CreateFlag,
	UpdateFlag,
	DeleteFlagById,
	Ping,
}

/// Errors to return instead of running an operation.
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
	failures: HashMap<Operation, ErrorKind>,
}

impl FailurePlan {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn fail(mut self, operation: Operation, kind: ErrorKind) -> Self {
		self.failures.insert(operation, kind);
		self
	}

	fn check(&self, operation: Operation) -> Result<()> {
		match self.failures.get(&operation) {
			Some(kind) => Err(StorageError::new(
				*kind,
				format!("injected failure for {operation:?}"),
			)),
			None => Ok(()),
		}
	}
}

#[derive(Debug, Default)]
pub struct InMemoryFlagStorage {
	flags: RwLock<Vec<Flag>>,
	failures: RwLock<FailurePlan>,
	closed: AtomicBool,
}

impl InMemoryFlagStorage {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_failures(plan: FailurePlan) -> Self {
		Self {
			failures: RwLock::new(plan),
			..Self::default()
		}
	}

	/// Injects (`Some`) or clears (`None`) a failure for one operation.
	pub async fn set_failure(&self, operation: Operation, kind: Option<ErrorKind>) {
		let mut plan = self.failures.write().await;
		match kind {
			Some(kind) => plan.failures.insert(operation, kind),
			None => plan.failures.remove(&operation),
		};
	}

	pub fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
	}

	pub async fn len(&self) -> usize {
		self.flags.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.flags.read().await.is_empty()
	}

	async fn enter(&self, operation: Operation) -> Result<()> {
		self.failures.read().await.check(operation)?;
		if self.closed.load(Ordering::SeqCst) {
			return Err(StorageError::not_initialized());
		}
		Ok(())
	}
}

fn assign_id(id: &mut String) {
	if id.is_empty() {
		*id = Uuid::new_v4().to_string();
	}
}

fn normalize_default(rule: &Rule) -> Rule {
	let mut rule = rule.clone();
	rule.query.clear();
	rule.disable = false;
	assign_id(&mut rule.id);
	rule
}

fn require_default_rule(flag: &Flag) -> Result<&Rule> {
	flag
		.default_rule
		.as_ref()
		.ok_or_else(StorageError::default_rule_required)
}

fn rule_ids(flag: &Flag) -> impl Iterator<Item = &str> + '_ {
	flag
		.default_rule
		.iter()
		.chain(flag.rules.iter())
		.map(|rule| rule.id.as_str())
}

fn conflict(message: String) -> StorageError {
	StorageError::new(ErrorKind::UnknownError, message)
}

/// Fails when one of `ids` is already taken or repeats within `ids`.
fn claim_rule_ids<'a>(
	taken: &mut HashSet<&'a str>,
	ids: impl Iterator<Item = &'a str>,
) -> Result<()> {
	for id in ids {
		if !taken.insert(id) {
			return Err(conflict(format!("rule {id} already exists")));
		}
	}
	Ok(())
}

#[async_trait]
impl FlagStorage for InMemoryFlagStorage {
	async fn get_flags(&self) -> Result<Vec<Flag>> {
		self.enter(Operation::GetFlags).await?;
		let mut flags = self.flags.read().await.clone();
		flags.sort_by(|a, b| b.last_updated_date.cmp(&a.last_updated_date));
		Ok(flags)
	}

	async fn get_flag_by_id(&self, id: &str) -> Result<Flag> {
		self.enter(Operation::GetFlagById).await?;
		self
			.flags
			.read()
			.await
			.iter()
			.find(|flag| flag.id == id)
			.cloned()
			.ok_or_else(|| StorageError::not_found(format!("flag {id} not found")))
	}

	async fn get_flag_by_name(&self, name: &str) -> Result<Flag> {
		self.enter(Operation::GetFlagByName).await?;
		self
			.flags
			.read()
			.await
			.iter()
			.find(|flag| flag.name == name)
			.cloned()
			.ok_or_else(|| StorageError::not_found(format!("flag named {name:?} not found")))
	}

	async fn create_flag(&self, flag: &Flag) -> Result<String> {
		self.enter(Operation::CreateFlag).await?;
		let default_rule = require_default_rule(flag)?;

		let mut stored = flag.clone();
		assign_id(&mut stored.id);
		stored.default_rule = Some(normalize_default(default_rule));
		for rule in &mut stored.rules {
			assign_id(&mut rule.id);
		}

		let mut flags = self.flags.write().await;
		if flags.iter().any(|f| f.id == stored.id || f.name == stored.name) {
			return Err(conflict(format!(
				"flag {} or name {:?} already exists",
				stored.id, stored.name
			)));
		}
		let mut taken: HashSet<&str> = flags.iter().flat_map(rule_ids).collect();
		claim_rule_ids(&mut taken, rule_ids(&stored))?;
		drop(taken);

		let id = stored.id.clone();
		flags.push(stored);
		Ok(id)
	}

	async fn update_flag(&self, flag: &Flag) -> Result<()> {
		self.enter(Operation::UpdateFlag).await?;
		let default_rule = require_default_rule(flag)?;

		let mut flags = self.flags.write().await;
		let index = flags
			.iter()
			.position(|f| f.id == flag.id)
			.ok_or_else(|| StorageError::not_found(format!("flag {} not found", flag.id)))?;

		let mut taken: HashSet<&str> = HashSet::new();
		for (i, other) in flags.iter().enumerate() {
			if i == index {
				continue;
			}
			if other.name == flag.name {
				return Err(conflict(format!("flag name {:?} already exists", flag.name)));
			}
			taken.extend(rule_ids(other));
		}

		let plan = reconcile::plan(
			flags[index].rules.iter().map(|r| r.id.as_str()),
			default_rule,
			&flag.rules,
		);

		// Inserted rules must not reuse an id held by another flag or by this
		// flag's default rule.
		taken.extend(flags[index].default_rule.iter().map(|rule| rule.id.as_str()));
		claim_rule_ids(
			&mut taken,
			plan
				.inserts
				.iter()
				.map(|planned| planned.rule.id.as_str())
				.filter(|id| !id.is_empty()),
		)?;
		drop(taken);

		let current = &mut flags[index];
		let mut rules: Vec<(i64, Rule)> = plan
			.inserts
			.iter()
			.chain(plan.updates.iter())
			.map(|planned| (planned.order_index, planned.rule.clone()))
			.collect();
		rules.sort_by_key(|(index, _)| *index);

		let mut next_default = normalize_default(plan.default_rule.rule);
		if let Some(existing) = &current.default_rule {
			next_default.id = existing.id.clone();
		}

		let mut next = flag.clone();
		next.variation_type = current.variation_type;
		next.created_date = current.created_date;
		next.default_rule = Some(next_default);
		next.rules = rules
			.into_iter()
			.map(|(_, mut rule)| {
				assign_id(&mut rule.id);
				rule
			})
			.collect();
		*current = next;
		Ok(())
	}

	async fn delete_flag_by_id(&self, id: &str) -> Result<()> {
		self.enter(Operation::DeleteFlagById).await?;
		self.flags.write().await.retain(|flag| flag.id != id);
		Ok(())
	}

	async fn ping(&self) -> Result<()> {
		self.enter(Operation::Ping).await
	}
}
