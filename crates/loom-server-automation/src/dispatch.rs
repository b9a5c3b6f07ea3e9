// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use loom_automation_core::{Execution, JobDefinition};

use crate::error::Result;

/// Hands an approved execution to whatever runs it.
///
/// Implementations must return quickly; the run itself happens elsewhere.
#[async_trait]
pub trait ExecutionDispatcher: Send + Sync {
	async fn dispatch(&self, execution: &Execution, definition: &JobDefinition) -> Result<()>;
}
