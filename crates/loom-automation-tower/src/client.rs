// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use loom_common_http::RetryConfig;
use loom_common_secret::SecretString;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use crate::error::{Result, TowerError};
use crate::models::{
	JobEvent, JobTemplate, LaunchPayload, LaunchResponse, Page, RemoteJob, SurveySpec,
};

const API_PREFIX: &str = "/api/v2";

#[derive(Debug, Clone)]
pub enum TowerCredentials {
	Token(SecretString),
	Basic {
		username: String,
		password: SecretString,
	},
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub request_timeout: Duration,
	pub verify_tls: bool,
	/// Applied to reads. Launch and cancel are sent once.
	pub retry_config: RetryConfig,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			request_timeout: Duration::from_secs(30),
			verify_tls: true,
			retry_config: RetryConfig::default(),
		}
	}
}

pub struct TowerClientBuilder {
	base_url: Option<String>,
	credentials: Option<TowerCredentials>,
	config: ClientConfig,
}

impl TowerClientBuilder {
	pub fn new() -> Self {
		Self {
			base_url: None,
			credentials: None,
			config: ClientConfig::default(),
		}
	}

	/// Server root, e.g. `https://tower.example.com`. `/api/v2` is appended.
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = Some(url.into());
		self
	}

	pub fn token(mut self, token: SecretString) -> Self {
		self.credentials = Some(TowerCredentials::Token(token));
		self
	}

	pub fn basic_auth(mut self, username: impl Into<String>, password: SecretString) -> Self {
		self.credentials = Some(TowerCredentials::Basic {
			username: username.into(),
			password,
		});
		self
	}

	pub fn credentials(mut self, credentials: TowerCredentials) -> Self {
		self.credentials = Some(credentials);
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = timeout;
		self
	}

	pub fn verify_tls(mut self, verify: bool) -> Self {
		self.config.verify_tls = verify;
		self
	}

	pub fn retry_config(mut self, config: RetryConfig) -> Self {
		self.config.retry_config = config;
		self
	}

	pub fn build(self) -> Result<TowerClient> {
		let base_url = self
			.base_url
			.ok_or_else(|| TowerError::InvalidBaseUrl("base URL is not set".to_string()))?;
		let base_url = base_url.trim_end_matches('/').to_string();
		if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
			return Err(TowerError::InvalidBaseUrl(base_url));
		}
		let credentials = self.credentials.ok_or(TowerError::MissingCredentials)?;

		let http_client = loom_common_http::builder()
			.timeout(self.config.request_timeout)
			.danger_accept_invalid_certs(!self.config.verify_tls)
			.build()?;

		info!(
			base_url = %base_url,
			verify_tls = self.config.verify_tls,
			"orchestrator client initialized"
		);

		Ok(TowerClient {
			inner: Arc::new(TowerClientInner {
				base_url,
				credentials,
				http_client,
				config: self.config,
			}),
		})
	}
}

impl Default for TowerClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct TowerClientInner {
	base_url: String,
	credentials: TowerCredentials,
	http_client: Client,
	config: ClientConfig,
}

#[derive(Clone)]
pub struct TowerClient {
	inner: Arc<TowerClientInner>,
}

impl TowerClient {
	pub fn builder() -> TowerClientBuilder {
		TowerClientBuilder::new()
	}

	pub fn base_url(&self) -> &str {
		&self.inner.base_url
	}

	/// Launches a job template and returns the new remote job id.
	#[instrument(skip(self, payload))]
	pub async fn launch(&self, template_id: i64, payload: &LaunchPayload) -> Result<i64> {
		let url = self.api_url(&format!("/job_templates/{template_id}/launch/"));
		let response = self
			.authorize(self.inner.http_client.post(&url).json(payload))
			.send()
			.await?;
		let launched: LaunchResponse = check(response).await?.json().await?;
		info!(template_id, remote_job_id = launched.id, "job template launched");
		Ok(launched.id)
	}

	#[instrument(skip(self))]
	pub async fn job(&self, job_id: i64) -> Result<RemoteJob> {
		self.get_json(&self.api_url(&format!("/jobs/{job_id}/"))).await
	}

	/// Plain-text job output.
	#[instrument(skip(self))]
	pub async fn stdout(&self, job_id: i64) -> Result<String> {
		let url = self.api_url(&format!("/jobs/{job_id}/stdout/?format=txt"));
		loom_common_http::retry(&self.inner.config.retry_config, || async {
			let response = self.authorize(self.inner.http_client.get(&url)).send().await?;
			Ok::<_, TowerError>(check(response).await?.text().await?)
		})
		.await
	}

	/// Every event of a job, across all pages.
	#[instrument(skip(self))]
	pub async fn job_events(&self, job_id: i64) -> Result<Vec<JobEvent>> {
		self
			.get_all_pages(self.api_url(&format!("/jobs/{job_id}/job_events/")))
			.await
	}

	#[instrument(skip(self))]
	pub async fn cancel(&self, job_id: i64) -> Result<()> {
		let url = self.api_url(&format!("/jobs/{job_id}/cancel/"));
		let response = self.authorize(self.inner.http_client.post(&url)).send().await?;
		check(response).await?;
		info!(remote_job_id = job_id, "remote job cancel requested");
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn job_templates(&self) -> Result<Vec<JobTemplate>> {
		self.get_all_pages(self.api_url("/job_templates/")).await
	}

	/// `None` when the template has no survey.
	#[instrument(skip(self))]
	pub async fn survey_spec(&self, template_id: i64) -> Result<Option<SurveySpec>> {
		match self
			.get_json(&self.api_url(&format!("/job_templates/{template_id}/survey_spec/")))
			.await
		{
			Ok(spec) => Ok(Some(spec)),
			Err(TowerError::NotFound(_)) => Ok(None),
			Err(e) => Err(e),
		}
	}

	fn api_url(&self, path: &str) -> String {
		format!("{}{API_PREFIX}{path}", self.inner.base_url)
	}

	/// `next` links are server-relative.
	fn resolve(&self, link: &str) -> String {
		if link.starts_with("http://") || link.starts_with("https://") {
			link.to_string()
		} else {
			format!("{}{link}", self.inner.base_url)
		}
	}

	fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
		match &self.inner.credentials {
			TowerCredentials::Token(token) => request.bearer_auth(token.expose()),
			TowerCredentials::Basic { username, password } => {
				request.basic_auth(username, Some(password.expose()))
			}
		}
	}

	async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
		debug!(url = %url, "orchestrator GET");
		loom_common_http::retry(&self.inner.config.retry_config, || async {
			let response = self.authorize(self.inner.http_client.get(url)).send().await?;
			Ok::<_, TowerError>(check(response).await?.json::<T>().await?)
		})
		.await
	}

	async fn get_all_pages<T: DeserializeOwned>(&self, first: String) -> Result<Vec<T>> {
		let mut items = Vec::new();
		let mut next = Some(first);
		while let Some(url) = next {
			let page: Page<T> = self.get_json(&url).await?;
			items.extend(page.results);
			next = page.next.as_deref().map(|link| self.resolve(link));
		}
		Ok(items)
	}
}

async fn check(response: Response) -> Result<Response> {
	let status = response.status();
	if status.is_success() {
		return Ok(response);
	}

	let retry_after = response
		.headers()
		.get("Retry-After")
		.and_then(|v| v.to_str().ok())
		.and_then(|s| s.parse().ok());
	let url = response.url().path().to_string();
	let body = response.text().await.unwrap_or_default();
	let message = if body.is_empty() { url } else { body };
	Err(TowerError::from_status(status, message, retry_after))
}
