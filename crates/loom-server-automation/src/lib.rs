// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server-side automation: persistence, runners and scheduling.
//!
//! - [`AutomationStore`]: SQLite storage for definitions, executions, logs and schedules
//! - [`AutomationService`]: the caller-facing operations
//! - [`LocalRunner`]: runs playbooks as child processes
//! - [`RemoteAdapter`]: launches and tracks jobs on Tower/AWX
//! - [`ScheduleTrigger`]: turns due schedules into executions
//! - [`TemplateSync`]: imports job templates as definitions
//! - [`Notifier`]: reports finished executions to the log and a webhook

pub mod dispatch;
pub mod error;
pub mod notify;
pub mod playbook;
pub mod remote;
pub mod repository;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod sync;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use dispatch::ExecutionDispatcher;
pub use error::{AutomationServerError, Result};
pub use notify::{ExecutionNotifier, Notification, NotificationKind, Notifier};
pub use playbook::{validate_playbook_file, PlaybookCheck, PlaybookError};
pub use remote::RemoteAdapter;
pub use repository::{run_migrations, AutomationStore, ExecutionFilter, SqliteAutomationRepository};
pub use runner::{LocalRunner, RunOutcome};
pub use scheduler::{ScheduleTrigger, TickReport};
pub use service::AutomationService;
pub use sync::{SyncReport, TemplateSync};
