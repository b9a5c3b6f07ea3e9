// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP handlers, one module per resource.

pub mod definitions;
pub mod executions;
pub mod health;
pub mod playbooks;
pub mod schedules;
