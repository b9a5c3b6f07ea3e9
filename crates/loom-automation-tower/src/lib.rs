// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client for the subset of the Ansible Tower / AWX `/api/v2` API used to
//! launch, watch and cancel job templates.
//!
//! ```ignore
//! let client = TowerClient::builder()
//!     .base_url("https://tower.example.com")
//!     .token(token)
//!     .build()?;
//!
//! let job_id = client.launch(42, &LaunchPayload::default()).await?;
//! let job = client.job(job_id).await?;
//! ```

mod client;
mod error;
mod models;

pub use client::{ClientConfig, TowerClient, TowerClientBuilder, TowerCredentials};
pub use error::{Result, TowerError};
pub use models::{
	Choices, JobEvent, JobTemplate, LaunchPayload, LaunchResponse, NamedSummary, Page, RemoteJob,
	SummaryFields, SurveyQuestion, SurveySpec,
};
