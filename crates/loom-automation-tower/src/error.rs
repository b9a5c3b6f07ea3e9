// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use loom_common_http::RetryableError;
use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TowerError>;

#[derive(Debug, Error)]
pub enum TowerError {
	/// 5xx or 408 from the orchestrator.
	#[error("transient orchestrator error ({status}): {message}")]
	Transient { status: u16, message: String },

	/// Any other non-success status.
	#[error("orchestrator rejected request ({status}): {message}")]
	Fatal { status: u16, message: String },

	#[error("not found: {0}")]
	NotFound(String),

	#[error("rate limited, retry after {retry_after_secs:?}s")]
	RateLimited { retry_after_secs: Option<u64> },

	#[error("request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	#[error("invalid base URL: {0}")]
	InvalidBaseUrl(String),

	#[error("missing credentials: a token or a username and password is required")]
	MissingCredentials,
}

impl TowerError {
	/// Classifies a non-success response status.
	pub fn from_status(status: StatusCode, message: String, retry_after_secs: Option<u64>) -> Self {
		match status {
			StatusCode::NOT_FOUND => TowerError::NotFound(message),
			StatusCode::TOO_MANY_REQUESTS => TowerError::RateLimited { retry_after_secs },
			s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => TowerError::Transient {
				status: s.as_u16(),
				message,
			},
			s => TowerError::Fatal {
				status: s.as_u16(),
				message,
			},
		}
	}

	pub fn is_transient(&self) -> bool {
		self.is_retryable()
	}
}

impl RetryableError for TowerError {
	fn is_retryable(&self) -> bool {
		match self {
			TowerError::Transient { .. } | TowerError::RateLimited { .. } => true,
			TowerError::RequestFailed(e) => e.is_retryable(),
			TowerError::Fatal { .. }
			| TowerError::NotFound(_)
			| TowerError::InvalidBaseUrl(_)
			| TowerError::MissingCredentials => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_classification() {
		assert!(matches!(
			TowerError::from_status(StatusCode::NOT_FOUND, "x".into(), None),
			TowerError::NotFound(_)
		));
		assert!(matches!(
			TowerError::from_status(StatusCode::BAD_GATEWAY, "x".into(), None),
			TowerError::Transient { status: 502, .. }
		));
		assert!(matches!(
			TowerError::from_status(StatusCode::REQUEST_TIMEOUT, "x".into(), None),
			TowerError::Transient { status: 408, .. }
		));
		assert!(matches!(
			TowerError::from_status(StatusCode::TOO_MANY_REQUESTS, "x".into(), Some(3)),
			TowerError::RateLimited {
				retry_after_secs: Some(3)
			}
		));
		assert!(matches!(
			TowerError::from_status(StatusCode::BAD_REQUEST, "x".into(), None),
			TowerError::Fatal { status: 400, .. }
		));
	}

	proptest! {
		#[test]
		fn client_errors_other_than_timeout_and_rate_limit_are_fatal(code in 400u16..500) {
			let status = StatusCode::from_u16(code).unwrap();
			let err = TowerError::from_status(status, String::new(), None);
			let expected = code == 408 || code == 429;
			prop_assert_eq!(err.is_retryable(), expected);
		}

		#[test]
		fn server_errors_are_retryable(code in 500u16..600) {
			let status = StatusCode::from_u16(code).unwrap();
			prop_assert!(TowerError::from_status(status, String::new(), None).is_retryable());
		}
	}
}
