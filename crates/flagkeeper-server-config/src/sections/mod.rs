// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod database;
mod logging;
mod mode;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use mode::Mode;
