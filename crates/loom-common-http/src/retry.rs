// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Retry with exponential backoff for transient HTTP failures.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};

/// Errors that know whether another attempt could succeed.
pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

impl RetryableError for reqwest::Error {
	fn is_retryable(&self) -> bool {
		if self.is_timeout() || self.is_connect() {
			return true;
		}
		self
			.status()
			.map(|s| is_retryable_status(s.as_u16()))
			.unwrap_or(false)
	}
}

const RETRYABLE_STATUSES: [StatusCode; 6] = [
	StatusCode::TOO_MANY_REQUESTS,
	StatusCode::REQUEST_TIMEOUT,
	StatusCode::INTERNAL_SERVER_ERROR,
	StatusCode::BAD_GATEWAY,
	StatusCode::SERVICE_UNAVAILABLE,
	StatusCode::GATEWAY_TIMEOUT,
];

/// True for HTTP statuses worth another attempt (429, 408 and the 5xx gateway family).
pub fn is_retryable_status(status: u16) -> bool {
	RETRYABLE_STATUSES.iter().any(|s| s.as_u16() == status)
}

/// Backoff policy for [`retry`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
	/// Total attempts, including the first one.
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	/// Randomizes each delay to between 50% and 100% of its nominal value.
	pub jitter: bool,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_millis(200),
			max_delay: Duration::from_secs(5),
			backoff_factor: 2.0,
			jitter: true,
		}
	}
}

impl RetryConfig {
	/// A policy that makes exactly one attempt.
	pub fn no_retry() -> Self {
		Self {
			max_attempts: 1,
			..Default::default()
		}
	}

	/// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let exp = self
			.backoff_factor
			.powi(attempt.saturating_sub(1).min(30) as i32);
		let capped = self.base_delay.mul_f64(exp).min(self.max_delay);

		if self.jitter {
			capped.mul_f64(0.5 + fastrand::f64() * 0.5)
		} else {
			capped
		}
	}
}

/// Runs `f` until it succeeds, returns a non-retryable error, or the attempt
/// budget is exhausted. The last error is returned.
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, mut f: F) -> Result<T, E>
where
	E: RetryableError + std::fmt::Display,
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
{
	let max_attempts = config.max_attempts.max(1);
	let mut attempt = 1;

	loop {
		match f().await {
			Ok(value) => return Ok(value),
			Err(e) if attempt < max_attempts && e.is_retryable() => {
				let delay = config.delay_for(attempt);
				warn!(
					attempt,
					max_attempts,
					delay_ms = delay.as_millis() as u64,
					error = %e,
					"request failed, retrying"
				);
				tokio::time::sleep(delay).await;
				attempt += 1;
			}
			Err(e) => {
				debug!(attempt, error = %e, "request failed, giving up");
				return Err(e);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fmt;
	use std::sync::atomic::{AtomicU32, Ordering};

	#[derive(Debug)]
	struct TestError {
		retryable: bool,
	}

	impl fmt::Display for TestError {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			write!(f, "test error (retryable: {})", self.retryable)
		}
	}

	impl RetryableError for TestError {
		fn is_retryable(&self) -> bool {
			self.retryable
		}
	}

	fn fast_config(max_attempts: u32) -> RetryConfig {
		RetryConfig {
			max_attempts,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(2),
			jitter: false,
			..Default::default()
		}
	}

	#[tokio::test]
	async fn succeeds_after_transient_failures() {
		let counter = AtomicU32::new(0);
		let calls = &counter;

		let result: Result<u32, TestError> = retry(&fast_config(3), || async move {
			let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
			if n < 3 {
				Err(TestError { retryable: true })
			} else {
				Ok(n)
			}
		})
		.await;

		assert_eq!(tokio_test::assert_ok!(result), 3);
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn stops_on_non_retryable_error() {
		let counter = AtomicU32::new(0);
		let calls = &counter;

		let result: Result<(), TestError> = retry(&fast_config(5), || async move {
			calls.fetch_add(1, Ordering::SeqCst);
			Err(TestError { retryable: false })
		})
		.await;

		tokio_test::assert_err!(result);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn gives_up_after_max_attempts() {
		let counter = AtomicU32::new(0);
		let calls = &counter;

		let result: Result<(), TestError> = retry(&fast_config(2), || async move {
			calls.fetch_add(1, Ordering::SeqCst);
			Err(TestError { retryable: true })
		})
		.await;

		tokio_test::assert_err!(result);
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn delay_grows_and_is_capped() {
		let config = RetryConfig {
			base_delay: Duration::from_millis(100),
			max_delay: Duration::from_millis(350),
			backoff_factor: 2.0,
			jitter: false,
			..Default::default()
		};

		assert_eq!(config.delay_for(1), Duration::from_millis(100));
		assert_eq!(config.delay_for(2), Duration::from_millis(200));
		assert_eq!(config.delay_for(3), Duration::from_millis(350));
		assert_eq!(config.delay_for(10), Duration::from_millis(350));
	}

	#[test]
	fn jitter_stays_within_half_to_full() {
		let config = RetryConfig {
			base_delay: Duration::from_millis(100),
			jitter: true,
			..Default::default()
		};

		for _ in 0..100 {
			let d = config.delay_for(1);
			assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
		}
	}

	#[test]
	fn no_retry_makes_one_attempt() {
		assert_eq!(RetryConfig::no_retry().max_attempts, 1);
	}

	#[test]
	fn retryable_statuses() {
		for status in [408, 429, 500, 502, 503, 504] {
			assert!(is_retryable_status(status), "{status}");
		}
		for status in [200, 304, 400, 401, 404, 501] {
			assert!(!is_retryable_status(status), "{status}");
		}
	}
}
