// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Storage error taxonomy.
//!
//! Every [`FlagStorage`](crate::FlagStorage) operation reports failures as a
//! [`StorageError`] carrying one of a small set of [`ErrorKind`]s. Driver,
//! identifier-parsing and JSON errors are classified at the storage boundary
//! and kept only as the error's `source`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Postgres SQLSTATE for "invalid text representation", raised for malformed
/// UUID literals.
const INVALID_TEXT_REPRESENTATION: &str = "22P02";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
	NotFound,
	InvalidUuid,
	ConversionError,
	DefaultRuleRequired,
	DatabaseNotInitialized,
	UnknownError,
}

impl ErrorKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorKind::NotFound => "NOT_FOUND",
			ErrorKind::InvalidUuid => "INVALID_UUID",
			ErrorKind::ConversionError => "CONVERSION_ERROR",
			ErrorKind::DefaultRuleRequired => "DEFAULT_RULE_REQUIRED",
			ErrorKind::DatabaseNotInitialized => "DATABASE_NOT_INITIALIZED",
			ErrorKind::UnknownError => "UNKNOWN_ERROR",
		}
	}
}

impl std::fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StorageError {
	kind: ErrorKind,
	message: String,
	#[source]
	source: Option<BoxError>,
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
			source: None,
		}
	}

	pub fn with_source(kind: ErrorKind, message: impl Into<String>, source: impl Into<BoxError>) -> Self {
		Self {
			kind,
			message: message.into(),
			source: Some(source.into()),
		}
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::NotFound, message)
	}

	pub fn default_rule_required() -> Self {
		Self::new(ErrorKind::DefaultRuleRequired, "default rule is required")
	}

	pub fn not_initialized() -> Self {
		Self::new(
			ErrorKind::DatabaseNotInitialized,
			"database connection is not initialized",
		)
	}

	pub fn kind(&self) -> ErrorKind {
		self.kind
	}

	pub fn message(&self) -> &str {
		&self.message
	}

	pub fn is_not_found(&self) -> bool {
		self.kind == ErrorKind::NotFound
	}

	/// Converts a failure to map rows loaded from the store.
	///
	/// A missing default rule on read is a corrupt row set rather than a caller
	/// mistake, so it is reported as [`ErrorKind::UnknownError`].
	pub(crate) fn from_loaded(err: ConvertError) -> Self {
		let kind = match err.kind() {
			ErrorKind::DefaultRuleRequired => ErrorKind::UnknownError,
			other => other,
		};
		tracing::warn!(error = %err, kind = %kind, "stored flag could not be converted");
		Self::with_source(kind, err.to_string(), err)
	}

	pub(crate) fn with_rollback_failure(mut self, rollback: sqlx::Error) -> Self {
		tracing::error!(error = %self, rollback_error = %rollback, "transaction rollback failed");
		self.message = format!("{}; rollback failed: {rollback}", self.message);
		self
	}
}

/// Maps a driver error onto the storage taxonomy.
pub fn classify(err: &sqlx::Error) -> ErrorKind {
	match err {
		sqlx::Error::RowNotFound => ErrorKind::NotFound,
		sqlx::Error::PoolClosed => ErrorKind::DatabaseNotInitialized,
		sqlx::Error::Database(db) if db.code().as_deref() == Some(INVALID_TEXT_REPRESENTATION) => {
			ErrorKind::InvalidUuid
		}
		sqlx::Error::ColumnDecode { source, .. } if source.downcast_ref::<uuid::Error>().is_some() => {
			ErrorKind::InvalidUuid
		}
		sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => ErrorKind::ConversionError,
		_ => ErrorKind::UnknownError,
	}
}

impl From<sqlx::Error> for StorageError {
	fn from(err: sqlx::Error) -> Self {
		let kind = classify(&err);
		if kind == ErrorKind::UnknownError {
			tracing::warn!(error = %err, "unclassified database error");
		}
		Self::with_source(kind, err.to_string(), err)
	}
}

impl From<uuid::Error> for StorageError {
	fn from(err: uuid::Error) -> Self {
		Self::with_source(ErrorKind::InvalidUuid, err.to_string(), err)
	}
}

impl From<serde_json::Error> for StorageError {
	fn from(err: serde_json::Error) -> Self {
		Self::with_source(ErrorKind::ConversionError, err.to_string(), err)
	}
}

impl From<ConvertError> for StorageError {
	fn from(err: ConvertError) -> Self {
		Self::with_source(err.kind(), err.to_string(), err)
	}
}

/// Failure to map between the domain model and row model.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
	#[error("invalid identifier '{value}': {source}")]
	InvalidUuid {
		value: String,
		#[source]
		source: uuid::Error,
	},

	#[error("invalid JSON in {field}: {source}")]
	Json {
		field: &'static str,
		#[source]
		source: serde_json::Error,
	},

	#[error("{field} must be a finite number, got {value}")]
	NonFinite { field: &'static str, value: f64 },

	#[error("flag {flag_id} has no default rule")]
	DefaultRuleRequired { flag_id: Uuid },

	#[error("invalid flag type: {0}")]
	FlagType(#[from] flagkeeper_flags_core::ParseFlagTypeError),
}

impl ConvertError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			ConvertError::InvalidUuid { .. } => ErrorKind::InvalidUuid,
			ConvertError::Json { .. } | ConvertError::NonFinite { .. } | ConvertError::FlagType(_) => {
				ErrorKind::ConversionError
			}
			ConvertError::DefaultRuleRequired { .. } => ErrorKind::DefaultRuleRequired,
		}
	}

	pub(crate) fn json(field: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
		move |source| ConvertError::Json { field, source }
	}
}
