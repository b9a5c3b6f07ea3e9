// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use reqwest::{Client, ClientBuilder};

/// Client builder with the standard Loom User-Agent.
///
/// ```ignore
/// let client = loom_common_http::builder()
///     .timeout(Duration::from_secs(30))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// `loom-automation/{version} ({os}-{arch})`
pub fn user_agent() -> String {
	format!(
		"loom-automation/{} ({}-{})",
		env!("CARGO_PKG_VERSION"),
		std::env::consts::OS,
		std::env::consts::ARCH
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn user_agent_names_product_and_platform() {
		let ua = user_agent();
		assert!(ua.starts_with("loom-automation/"));
		assert!(ua.contains(std::env::consts::OS));
	}

	#[test]
	fn builder_builds() {
		assert!(builder().build().is_ok());
	}
}
