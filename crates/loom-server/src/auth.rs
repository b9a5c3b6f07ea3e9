// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Caller identity.
//!
//! Authentication happens upstream. The identity layer in front of this
//! server forwards the authenticated username in [`USER_HEADER`].

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ServerError;

pub const USER_HEADER: &str = "x-loom-user";

/// The authenticated user making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

impl Caller {
	pub fn name(&self) -> &str {
		&self.0
	}
}

impl<S> FromRequestParts<S> for Caller
where
	S: Send + Sync,
{
	type Rejection = ServerError;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		let user = parts
			.headers
			.get(USER_HEADER)
			.and_then(|v| v.to_str().ok())
			.map(str::trim)
			.filter(|v| !v.is_empty())
			.ok_or_else(|| ServerError::Unauthorized(format!("missing {USER_HEADER} header")))?;
		Ok(Caller(user.to_string()))
	}
}
