// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database layer shared by the Loom automation server crates.

pub mod error;
pub mod job;
pub mod pool;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{DbError, Result};
pub use job::{BackgroundJob, JobRun, JobRunRepository, JobRunStatus, JobRunStore, TriggerSource};
pub use pool::{apply_migration, create_pool, run_migrations};
