// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loading secrets from `VAR` or `VAR_FILE` environment variables.

use std::path::PathBuf;
use std::{env, fs};

use thiserror::Error;

use crate::Secret;

#[derive(Debug, Error)]
pub enum SecretEnvError {
	#[error("failed to read secret file at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("secret file path in {var} is empty")]
	EmptyPath { var: String },
}

/// Loads a secret from `{var}_FILE` if set, otherwise from `{var}`.
///
/// A single trailing newline in the file is stripped. Returns `Ok(None)` when
/// neither variable is set.
pub fn load_secret_env(var: &str) -> Result<Option<Secret<String>>, SecretEnvError> {
	let file_var = format!("{var}_FILE");

	if let Ok(path) = env::var(&file_var) {
		if path.is_empty() {
			return Err(SecretEnvError::EmptyPath { var: file_var });
		}
		let path = PathBuf::from(path);
		let content = fs::read_to_string(&path).map_err(|source| SecretEnvError::Io {
			path: path.clone(),
			source,
		})?;
		let value = content.strip_suffix('\n').unwrap_or(&content).to_string();
		return Ok(Some(Secret::new(value)));
	}

	Ok(env::var(var).ok().map(Secret::new))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	// Each test uses its own variable name; the process environment is shared.

	#[test]
	fn reads_direct_value() {
		env::set_var("LOOM_TEST_SECRET_DIRECT", "token-1");
		let secret = load_secret_env("LOOM_TEST_SECRET_DIRECT").unwrap().unwrap();
		assert_eq!(secret.expose(), "token-1");
		env::remove_var("LOOM_TEST_SECRET_DIRECT");
	}

	#[test]
	fn file_variant_wins_and_strips_newline() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "from-file").unwrap();

		env::set_var("LOOM_TEST_SECRET_BOTH", "from-env");
		env::set_var("LOOM_TEST_SECRET_BOTH_FILE", file.path());
		let secret = load_secret_env("LOOM_TEST_SECRET_BOTH").unwrap().unwrap();
		assert_eq!(secret.expose(), "from-file");
		env::remove_var("LOOM_TEST_SECRET_BOTH");
		env::remove_var("LOOM_TEST_SECRET_BOTH_FILE");
	}

	#[test]
	fn missing_file_is_an_error() {
		env::set_var("LOOM_TEST_SECRET_MISSING_FILE", "/nonexistent/loom/secret");
		let err = load_secret_env("LOOM_TEST_SECRET_MISSING").unwrap_err();
		assert!(matches!(err, SecretEnvError::Io { .. }));
		env::remove_var("LOOM_TEST_SECRET_MISSING_FILE");
	}

	#[test]
	fn unset_is_none() {
		assert!(load_secret_env("LOOM_TEST_SECRET_UNSET").unwrap().is_none());
	}
}
