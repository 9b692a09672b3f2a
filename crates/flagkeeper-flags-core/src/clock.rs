// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Time source used to stamp flag creation and update dates.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync {
	fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Clock frozen at a given instant until advanced explicitly. Meant for tests.
#[derive(Debug)]
pub struct FixedClock {
	now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
	pub fn new(now: DateTime<Utc>) -> Self {
		Self {
			now: Mutex::new(now),
		}
	}

	pub fn advance(&self, by: Duration) {
		let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
		*now += by;
	}
}

impl Clock for FixedClock {
	fn now(&self) -> DateTime<Utc> {
		*self.now.lock().unwrap_or_else(|e| e.into_inner())
	}
}
