// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Who may run a definition, and who may approve a run.

use crate::definition::JobDefinition;
use crate::error::{AutomationError, Result};
use crate::execution::{Execution, ExecutionStatus};

/// Approver recorded on executions created by the scheduler.
pub const SYSTEM_APPROVER: &str = "system:scheduler";

/// Whether `user` may execute `definition`.
///
/// Disabled definitions are never executable. A non-empty allow list
/// restricts execution to its members; otherwise any authenticated user may run it.
pub fn can_execute(definition: &JobDefinition, user: &str) -> bool {
	if !definition.is_enabled || user.trim().is_empty() {
		return false;
	}
	definition.allowed_users.is_empty() || definition.allowed_users.contains(user)
}

/// Status a fresh submission starts in.
pub fn initial_status(definition: &JobDefinition) -> ExecutionStatus {
	if definition.requires_approval {
		ExecutionStatus::Pending
	} else {
		ExecutionStatus::Approved
	}
}

/// Checks that `approver` may approve `execution`.
pub fn check_approver(
	definition: &JobDefinition,
	execution: &Execution,
	approver: &str,
) -> Result<()> {
	if execution.status != ExecutionStatus::Pending {
		return Err(AutomationError::StateConflict {
			execution_id: execution.execution_id.clone(),
			from: execution.status,
			to: ExecutionStatus::Approved,
		});
	}
	if !can_execute(definition, approver) {
		return Err(AutomationError::Permission(format!(
			"{approver} may not approve runs of {}",
			definition.name
		)));
	}
	if approver == execution.executor {
		return Err(AutomationError::Permission(
			"an execution cannot be approved by its own executor".to_string(),
		));
	}
	Ok(())
}

/// Checks that `user` may cancel `execution`.
///
/// The executor may always cancel its own run. Anyone else must be named in
/// the definition's allow list; an open definition lets only the executor cancel.
pub fn check_canceller(definition: &JobDefinition, execution: &Execution, user: &str) -> Result<()> {
	if !user.trim().is_empty() && user == execution.executor {
		return Ok(());
	}
	if definition.allowed_users.contains(user) {
		return Ok(());
	}
	Err(AutomationError::Permission(format!(
		"{user} may not cancel execution {}",
		execution.execution_id
	)))
}
