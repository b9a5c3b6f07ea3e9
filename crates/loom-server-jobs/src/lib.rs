// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background work for the automation server.
//!
//! [`JobScheduler`] runs periodic jobs and records their history in SQLite.
//! [`TaskQueue`] runs one-off tasks on a fixed pool of workers. Both share the
//! same retry policy (see [`retry`]).

pub mod context;
pub mod error;
pub mod health;
pub mod job;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod types;

pub use context::{CancellationToken, JobContext};
pub use error::{JobError, Result};
pub use health::{HealthState, JobHealthStatus, JobsHealthStatus, LastRunInfo};
pub use job::Job;
pub use queue::{QueueError, TaskQueue, TaskQueueHandle};
pub use retry::{calculate_backoff_delay, MAX_RETRIES};
pub use scheduler::JobScheduler;
pub use types::{JobKind, JobOutput};

pub use loom_server_db::{JobRun, JobRunRepository, JobRunStatus, TriggerSource};
