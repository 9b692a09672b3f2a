// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Rule set reconciliation for flag updates.
//!
//! An update replaces a flag's targeting rules wholesale. Instead of deleting
//! and re-inserting every row, the incoming rules are diffed against the
//! stored ones by id:
//!
//! - stored ids missing from the incoming set are deleted
//! - incoming ids not stored yet are inserted
//! - ids present on both sides are updated in place
//!
//! Inserted and updated rules take their position in the incoming sequence
//! as `order_index`, so reordering is a series of updates. The default rule is
//! never part of the diff: it is always updated in place.
//!
//! A targeting rule with an empty id never matches a stored rule and is
//! always inserted. When the incoming sequence repeats an id, the last
//! occurrence wins.

use std::collections::{HashMap, HashSet};

use flagkeeper_flags_core::Rule;

use crate::row::DEFAULT_RULE_ORDER_INDEX;

/// A rule to write, with the order index it must be stored at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedRule<'a> {
	pub order_index: i64,
	pub rule: &'a Rule,
}

/// Write operations turning a stored rule set into the incoming one.
#[derive(Debug, Clone, PartialEq)]
pub struct RulePlan<'a> {
	/// Always updated in place at [`DEFAULT_RULE_ORDER_INDEX`]
	pub default_rule: PlannedRule<'a>,
	/// Stored rule ids to remove, in stored order
	pub deletes: Vec<String>,
	/// New rules, in incoming order
	pub inserts: Vec<PlannedRule<'a>>,
	/// Surviving rules, in incoming order
	pub updates: Vec<PlannedRule<'a>>,
}

impl RulePlan<'_> {
	pub fn is_reorder_only(&self) -> bool {
		self.deletes.is_empty() && self.inserts.is_empty()
	}
}

/// Diffs the stored targeting rule ids against the incoming targeting rules.
pub fn plan<'a, I, S>(existing_ids: I, default_rule: &'a Rule, incoming: &'a [Rule]) -> RulePlan<'a>
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut last_position: HashMap<&str, usize> = HashMap::new();
	for (position, rule) in incoming.iter().enumerate() {
		if !rule.id.is_empty() {
			last_position.insert(rule.id.as_str(), position);
		}
	}

	let mut existing: Vec<String> = Vec::new();
	let mut seen = HashSet::new();
	for id in existing_ids {
		let id = id.as_ref();
		if seen.insert(id.to_string()) {
			existing.push(id.to_string());
		}
	}

	let deletes = existing
		.iter()
		.filter(|id| !last_position.contains_key(id.as_str()))
		.cloned()
		.collect();

	let mut inserts = Vec::new();
	let mut updates = Vec::new();
	for (position, rule) in incoming.iter().enumerate() {
		let planned = PlannedRule {
			order_index: position as i64,
			rule,
		};
		if rule.id.is_empty() {
			inserts.push(planned);
			continue;
		}
		if last_position.get(rule.id.as_str()) != Some(&position) {
			continue;
		}
		if seen.contains(rule.id.as_str()) {
			updates.push(planned);
		} else {
			inserts.push(planned);
		}
	}

	RulePlan {
		default_rule: PlannedRule {
			order_index: DEFAULT_RULE_ORDER_INDEX,
			rule: default_rule,
		},
		deletes,
		inserts,
		updates,
	}
}
