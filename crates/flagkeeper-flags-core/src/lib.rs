// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the flagkeeper feature flag store.
//!
//! This crate holds the canonical in-memory representation of a feature flag
//! and its rules. It has no persistence concerns: the relational mapping lives
//! in `flagkeeper-server-flags`.
//!
//! A flag carries:
//! - Typed variations (boolean, string, integer, double or JSON values)
//! - An ordered list of targeting rules
//! - Exactly one default rule, applied when no targeting rule matches
//!
//! # Example
//!
//! ```
//! use flagkeeper_flags_core::{Flag, FlagType, Rule};
//!
//! let flag = Flag::new("checkout.new_flow", FlagType::Boolean)
//! 	.with_variation("enabled", serde_json::json!(true))
//! 	.with_variation("disabled", serde_json::json!(false))
//! 	.with_default_rule(Rule::serving("disabled"))
//! 	.with_rule(Rule::serving("enabled").with_query("beta eq true"));
//!
//! assert_eq!(flag.rules.len(), 1);
//! assert!(flag.default_rule.is_some());
//! ```

pub mod clock;
pub mod flag;
pub mod rule;

pub use clock::{Clock, FixedClock, SystemClock};
pub use flag::{Flag, FlagType, ParseFlagTypeError};
pub use rule::{ProgressiveRollout, ProgressiveRolloutStep, Rule};
