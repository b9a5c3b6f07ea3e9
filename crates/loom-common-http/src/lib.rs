// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for Loom automation.
//!
//! - [`builder`]: a `reqwest` client builder carrying the Loom User-Agent
//! - [`retry`]: exponential backoff with jitter for transient failures

mod client;
mod retry;

pub use client::{builder, user_agent};
pub use retry::{retry, RetryConfig, RetryableError};
