// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id_type {
	($name:ident, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub Uuid);

		impl $name {
			pub fn new() -> Self {
				Self(Uuid::new_v4())
			}

			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl Default for $name {
			fn default() -> Self {
				Self::new()
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl FromStr for $name {
			type Err = uuid::Error;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Ok(Self(Uuid::parse_str(s)?))
			}
		}

		impl From<Uuid> for $name {
			fn from(id: Uuid) -> Self {
				Self(id)
			}
		}
	};
}

define_id_type!(DefinitionId, "Unique identifier for a job definition.");
define_id_type!(ScheduleId, "Unique identifier for a recurring schedule.");
define_id_type!(
	SurveyParameterId,
	"Unique identifier for a survey parameter."
);

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_id_display_roundtrip() {
		let id = DefinitionId::new();
		let parsed: DefinitionId = id.to_string().parse().unwrap();
		assert_eq!(id, parsed);
	}

	#[test]
	fn test_id_rejects_garbage() {
		assert!("not-a-uuid".parse::<ScheduleId>().is_err());
	}

	#[test]
	fn test_id_serializes_transparently() {
		let id = SurveyParameterId::new();
		let json = serde_json::to_string(&id).unwrap();
		assert_eq!(json, format!("\"{id}\""));
	}
}
