// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod database;
mod http;
mod jobs;
mod logging;
mod notifications;
mod runner;
mod scheduler;
mod tower;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use http::{HttpConfig, HttpConfigLayer};
pub use jobs::{JobsConfig, JobsConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use notifications::{NotificationsConfig, NotificationsConfigLayer};
pub use runner::{RunnerConfig, RunnerConfigLayer};
pub use scheduler::{SchedulerConfig, SchedulerConfigLayer};
pub use tower::{TowerAuth, TowerConfig, TowerConfigLayer};
