// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag management on top of a [`FlagStorage`].
//!
//! The service owns the concerns storage leaves to its caller: rejecting
//! duplicate names, stamping dates from a [`Clock`] and recording who made a
//! change.

use std::sync::Arc;

use tracing::instrument;

use flagkeeper_flags_core::{Clock, Flag, SystemClock};

use crate::error::{ErrorKind, StorageError};
use crate::repository::FlagStorage;

#[derive(Debug, thiserror::Error)]
pub enum FlagServiceError {
	#[error("flag with name {0:?} already exists")]
	Conflict(String),

	#[error(transparent)]
	Storage(#[from] StorageError),
}

impl FlagServiceError {
	/// Storage error kind, `None` for a name conflict.
	pub fn kind(&self) -> Option<ErrorKind> {
		match self {
			FlagServiceError::Conflict(_) => None,
			FlagServiceError::Storage(err) => Some(err.kind()),
		}
	}
}

pub type Result<T> = std::result::Result<T, FlagServiceError>;

pub struct FlagService<S> {
	storage: S,
	clock: Arc<dyn Clock>,
}

impl<S: FlagStorage> FlagService<S> {
	pub fn new(storage: S) -> Self {
		Self::with_clock(storage, Arc::new(SystemClock))
	}

	pub fn with_clock(storage: S, clock: Arc<dyn Clock>) -> Self {
		Self { storage, clock }
	}

	pub fn storage(&self) -> &S {
		&self.storage
	}

	#[instrument(skip(self))]
	pub async fn list_flags(&self) -> Result<Vec<Flag>> {
		Ok(self.storage.get_flags().await?)
	}

	#[instrument(skip(self))]
	pub async fn get_flag(&self, id: &str) -> Result<Flag> {
		Ok(self.storage.get_flag_by_id(id).await?)
	}

	#[instrument(skip(self))]
	pub async fn get_flag_by_name(&self, name: &str) -> Result<Flag> {
		Ok(self.storage.get_flag_by_name(name).await?)
	}

	/// Stores a new flag and returns it as persisted.
	#[instrument(skip(self, flag), fields(flag_name = %flag.name))]
	pub async fn create_flag(&self, mut flag: Flag, modified_by: &str) -> Result<Flag> {
		match self.storage.get_flag_by_name(&flag.name).await {
			Ok(_) => return Err(FlagServiceError::Conflict(flag.name)),
			Err(err) if err.is_not_found() => {}
			Err(err) => return Err(err.into()),
		}

		if flag.id.is_empty() {
			flag.id = uuid::Uuid::new_v4().to_string();
		}
		let now = self.clock.now();
		flag.created_date = now;
		flag.last_updated_date = now;
		flag.last_modified_by = modified_by.to_string();

		let id = self.storage.create_flag(&flag).await?;
		tracing::info!(flag_id = %id, modified_by, "flag created");
		Ok(self.storage.get_flag_by_id(&id).await?)
	}

	/// Replaces flag `id` with `flag`. The creation date is kept.
	#[instrument(skip(self, flag), fields(flag_name = %flag.name))]
	pub async fn update_flag(&self, id: &str, mut flag: Flag, modified_by: &str) -> Result<Flag> {
		let current = self.storage.get_flag_by_id(id).await?;

		flag.id = current.id;
		flag.created_date = current.created_date;
		flag.last_updated_date = self.clock.now();
		flag.last_modified_by = modified_by.to_string();

		self.storage.update_flag(&flag).await?;
		tracing::info!(flag_id = %flag.id, modified_by, "flag updated");
		Ok(self.storage.get_flag_by_id(&flag.id).await?)
	}

	/// Enables (`disable = false`) or disables flag `id`.
	#[instrument(skip(self))]
	pub async fn set_flag_status(&self, id: &str, disable: bool, modified_by: &str) -> Result<Flag> {
		let mut flag = self.storage.get_flag_by_id(id).await?;
		flag.disable = Some(disable);
		flag.last_updated_date = self.clock.now();
		flag.last_modified_by = modified_by.to_string();

		self.storage.update_flag(&flag).await?;
		tracing::info!(flag_id = %flag.id, disable, modified_by, "flag status changed");
		Ok(self.storage.get_flag_by_id(&flag.id).await?)
	}

	#[instrument(skip(self))]
	pub async fn delete_flag(&self, id: &str) -> Result<()> {
		self.storage.delete_flag_by_id(id).await?;
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn health(&self) -> Result<()> {
		Ok(self.storage.ping().await?)
	}
}
