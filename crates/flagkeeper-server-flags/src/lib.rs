// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Relational storage for flagkeeper feature flags.
//!
//! A flag is stored as one `feature_flags` row plus one `rules` row per rule.
//! Exactly one rule row per flag is the default rule; it always sits at
//! order index `-1`, targeting rules use their 0-based position.
//!
//! # Architecture
//!
//! - `row` - Row model and the converters between rows and domain flags
//! - `error` - Storage error taxonomy and driver error classification
//! - `reconcile` - Rule set diffing used when a flag is updated
//! - `repository` - The `FlagStorage` contract and its SQLite gateway
//! - `in_memory` - In-process `FlagStorage` with failure injection
//! - `service` - Name conflicts, timestamps and authorship on top of storage
//! - `pool` - Pool creation and schema migrations
//!
//! # Example
//!
//! ```ignore
//! use flagkeeper_server_flags::{FlagService, SqliteFlagStorage, run_migrations};
//!
//! let storage = SqliteFlagStorage::connect("sqlite:./flagkeeper.db", 5).await?;
//! run_migrations(storage.pool()).await?;
//!
//! let service = FlagService::new(storage);
//! let flag = service.create_flag(flag, "alice").await?;
//! let flag = service.set_flag_status(&flag.id, true, "alice").await?;
//! ```

pub mod error;
pub mod in_memory;
pub mod pool;
pub mod reconcile;
pub mod repository;
pub mod row;
pub mod service;

#[cfg(test)]
mod testing;

pub use error::{classify, ConvertError, ErrorKind, Result, StorageError};
pub use in_memory::{FailurePlan, InMemoryFlagStorage, Operation};
pub use pool::{create_pool, run_migrations};
pub use reconcile::{plan, PlannedRule, RulePlan};
pub use repository::{FlagStorage, SqliteFlagStorage};
pub use row::{FlagRow, RuleRow, DEFAULT_RULE_ORDER_INDEX};
pub use service::{FlagService, FlagServiceError};

// Re-export core types for convenience
pub use flagkeeper_flags_core::*;
