// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loom automation server.
//!
//! Serves the automation HTTP API and runs the background work behind it:
//! schedule ticks, local playbook runs, remote launches and status polls,
//! and retention cleanup.

pub mod api;
pub mod auth;
pub mod dispatcher;
pub mod error;
pub mod jobs;
pub mod routes;

pub use api::{create_router, AppState};
pub use dispatcher::QueueDispatcher;
pub use error::ServerError;
