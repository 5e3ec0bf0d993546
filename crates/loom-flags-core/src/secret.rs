// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;

use serde::{Deserialize, Serialize};

/// Placeholder printed in place of the secret.
pub const REDACTED: &str = "[REDACTED]";

/// Client secret sent with every resolve and apply request.
///
/// `Debug` and `Display` never print the value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientSecret(String);

impl ClientSecret {
	pub fn new(secret: impl Into<String>) -> Self {
		Self(secret.into())
	}

	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for ClientSecret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ClientSecret").field(&REDACTED).finish()
	}
}

impl fmt::Display for ClientSecret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn debug_and_display_are_redacted() {
		let secret = ClientSecret::new("cs_live_abc123");
		assert!(!format!("{secret:?}").contains("abc123"));
		assert_eq!(secret.to_string(), REDACTED);
		assert_eq!(secret.expose(), "cs_live_abc123");
	}

	#[test]
	fn whitespace_secret_is_empty() {
		assert!(ClientSecret::new("  ").is_empty());
		assert!(!ClientSecret::new("x").is_empty());
	}
}
