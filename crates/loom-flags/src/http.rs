// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP implementation of the resolve and apply clients.
//!
//! Flag names travel as `flags/<name>` on the wire and are bare everywhere
//! else in the SDK.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loom_common_http::RetryConfig;
use loom_flags_core::{
	AppliedFlag, ClientSecret, EvaluationContext, ResolveReason, ResolvedFlag, ResolvedFlags,
};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::FlagsConfig;
use crate::error::{FlagsError, Result};
use crate::remote::{ApplyClient, ResolveClient, ResolveResponse};

/// SDK name sent with every request.
const SDK_ID: &str = "loom-flags-rust";
/// SDK version sent with every request.
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

const FLAG_PREFIX: &str = "flags/";

/// Talks to the resolver over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFlagsClient {
	http: Client,
	base_url: String,
	client_secret: ClientSecret,
	retry: RetryConfig,
}

impl HttpFlagsClient {
	pub fn new(
		base_url: impl Into<String>,
		client_secret: ClientSecret,
		request_timeout: Duration,
		retry: RetryConfig,
	) -> Result<Self> {
		if client_secret.is_empty() {
			return Err(FlagsError::MissingClientSecret);
		}

		let base_url = base_url.into().trim_end_matches('/').to_string();
		if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
			return Err(FlagsError::InvalidBaseUrl(base_url));
		}

		let http = loom_common_http::new_client_with_timeout(request_timeout)?;

		info!(base_url = %base_url, sdk_id = SDK_ID, sdk_version = SDK_VERSION, "flags http client initialized");
		Ok(Self {
			http,
			base_url,
			client_secret,
			retry,
		})
	}

	pub fn from_config(config: &FlagsConfig) -> Result<Self> {
		let secret = config
			.client_secret
			.clone()
			.ok_or(FlagsError::MissingClientSecret)?;
		Self::new(
			config.base_url.clone(),
			secret,
			config.request_timeout,
			config.retry.clone(),
		)
	}

	pub fn base_url(&self) -> &str {
		&self.base_url
	}

	async fn resolve_once(&self, request: &ResolveRequest<'_>) -> Result<ResolveResponse> {
		let url = format!("{}/v1/flags:resolve", self.base_url);
		let response = self.http.post(&url).json(request).send().await?;

		if response.status() == StatusCode::NOT_MODIFIED {
			debug!("resolve not modified");
			return Ok(ResolveResponse::NotModified);
		}

		let response = check_status(response, "resolve").await?;
		let body = response.text().await?;
		let wire: ResolveResponseBody = serde_json::from_str(&body)
			.map_err(|e| FlagsError::Parse(format!("resolve response: {e}")))?;

		Ok(ResolveResponse::Resolved(wire.into_resolved()))
	}
}

#[async_trait]
impl ResolveClient for HttpFlagsClient {
	async fn resolve(&self, flags: &[String], context: &EvaluationContext) -> Result<ResolveResponse> {
		let request = ResolveRequest {
			client_secret: self.client_secret.expose(),
			evaluation_context: context.to_wire(),
			flags: flags.iter().map(|f| to_wire_name(f)).collect(),
			apply: false,
			sdk: SdkInfo::current(),
		};

		debug!(flags = flags.len(), "resolving flags");
		loom_common_http::retry(&self.retry, || self.resolve_once(&request)).await
	}
}

#[async_trait]
impl ApplyClient for HttpFlagsClient {
	async fn apply(&self, flags: &[AppliedFlag], resolve_token: &str) -> Result<()> {
		let url = format!("{}/v1/flags:apply", self.base_url);
		let request = ApplyRequest {
			client_secret: self.client_secret.expose(),
			resolve_token,
			flags: flags
				.iter()
				.map(|f| WireAppliedFlag {
					flag: to_wire_name(&f.flag),
					apply_time: f.apply_time,
				})
				.collect(),
			send_time: Utc::now(),
			sdk: SdkInfo::current(),
		};

		debug!(resolve_token = %resolve_token, count = flags.len(), "sending apply batch");
		let response = self.http.post(&url).json(&request).send().await?;
		check_status(response, "apply").await?;
		Ok(())
	}
}

async fn check_status(response: Response, operation: &str) -> Result<Response> {
	let status = response.status();

	if status == StatusCode::TOO_MANY_REQUESTS {
		let retry_after = response
			.headers()
			.get("Retry-After")
			.and_then(|v| v.to_str().ok())
			.and_then(|s| s.parse().ok());
		return Err(FlagsError::RateLimited {
			retry_after_secs: retry_after,
		});
	}

	if !status.is_success() {
		let status = status.as_u16();
		let message = response.text().await.unwrap_or_default();
		error!(status, message = %message, operation, "flags request failed");
		return Err(FlagsError::ServerError { status, message });
	}

	Ok(response)
}

fn to_wire_name(flag: &str) -> String {
	format!("{FLAG_PREFIX}{flag}")
}

fn from_wire_name(flag: &str) -> String {
	flag.strip_prefix(FLAG_PREFIX).unwrap_or(flag).to_string()
}

#[derive(Debug, Serialize)]
struct SdkInfo {
	id: &'static str,
	version: &'static str,
}

impl SdkInfo {
	fn current() -> Self {
		Self {
			id: SDK_ID,
			version: SDK_VERSION,
		}
	}
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest<'a> {
	client_secret: &'a str,
	evaluation_context: serde_json::Value,
	flags: Vec<String>,
	apply: bool,
	sdk: SdkInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveResponseBody {
	#[serde(default)]
	resolved_flags: Vec<WireResolvedFlag>,
	resolve_token: String,
}

#[derive(Debug, Deserialize)]
struct WireResolvedFlag {
	flag: String,
	#[serde(default)]
	variant: String,
	#[serde(default)]
	value: serde_json::Value,
	#[serde(default)]
	reason: Option<ResolveReason>,
}

impl ResolveResponseBody {
	fn into_resolved(self) -> ResolvedFlags {
		ResolvedFlags {
			resolve_token: self.resolve_token,
			flags: self
				.resolved_flags
				.into_iter()
				.map(|f| ResolvedFlag {
					flag: from_wire_name(&f.flag),
					variant: f.variant,
					value: f.value,
					reason: f.reason.unwrap_or(ResolveReason::Unspecified),
				})
				.collect(),
		}
	}
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplyRequest<'a> {
	client_secret: &'a str,
	resolve_token: &'a str,
	flags: Vec<WireAppliedFlag>,
	send_time: DateTime<Utc>,
	sdk: SdkInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireAppliedFlag {
	flag: String,
	apply_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use wiremock::matchers::{body_partial_json, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn fast_retry(max_attempts: u32) -> RetryConfig {
		RetryConfig {
			max_attempts,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(5),
			jitter: false,
			..Default::default()
		}
	}

	fn client_for(server: &MockServer, retry: RetryConfig) -> HttpFlagsClient {
		HttpFlagsClient::new(
			server.uri(),
			ClientSecret::new("cs_test"),
			Duration::from_secs(5),
			retry,
		)
		.unwrap()
	}

	#[test]
	fn test_new_rejects_blank_secret() {
		let result = HttpFlagsClient::new(
			"https://flags.example.com",
			ClientSecret::new(""),
			Duration::from_secs(1),
			RetryConfig::default(),
		);
		assert!(matches!(result, Err(FlagsError::MissingClientSecret)));
	}

	#[test]
	fn test_new_rejects_bad_base_url() {
		let result = HttpFlagsClient::new(
			"flags.example.com",
			ClientSecret::new("cs"),
			Duration::from_secs(1),
			RetryConfig::default(),
		);
		assert!(matches!(result, Err(FlagsError::InvalidBaseUrl(_))));
	}

	#[test]
	fn test_new_trims_trailing_slash() {
		let client = HttpFlagsClient::new(
			"https://flags.example.com/",
			ClientSecret::new("cs"),
			Duration::from_secs(1),
			RetryConfig::default(),
		)
		.unwrap();
		assert_eq!(client.base_url(), "https://flags.example.com");
	}

	#[test]
	fn test_from_config_requires_secret() {
		let config = FlagsConfig::default();
		assert!(matches!(
			HttpFlagsClient::from_config(&config),
			Err(FlagsError::MissingClientSecret)
		));
	}

	#[test]
	fn test_wire_names() {
		assert_eq!(to_wire_name("checkout"), "flags/checkout");
		assert_eq!(from_wire_name("flags/checkout"), "checkout");
		assert_eq!(from_wire_name("checkout"), "checkout");
	}

	#[tokio::test]
	async fn test_resolve_strips_prefix_and_parses_reason() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/flags:resolve"))
			.and(body_partial_json(json!({
				"clientSecret": "cs_test",
				"flags": ["flags/f1"],
				"apply": false,
				"evaluationContext": { "targeting_key": "u1" },
			})))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"resolveToken": "t1",
				"resolvedFlags": [{
					"flag": "flags/f1",
					"variant": "flags/f1/variants/on",
					"value": { "enabled": true },
					"reason": "RESOLVE_REASON_MATCH",
				}],
			})))
			.expect(1)
			.mount(&server)
			.await;

		let client = client_for(&server, fast_retry(1));
		let ctx = EvaluationContext::new().with_targeting_key("u1");
		let response = client.resolve(&["f1".to_string()], &ctx).await.unwrap();

		let ResolveResponse::Resolved(resolved) = response else {
			panic!("expected Resolved");
		};
		assert_eq!(resolved.resolve_token, "t1");
		assert_eq!(resolved.flags.len(), 1);
		assert_eq!(resolved.flags[0].flag, "f1");
		assert_eq!(resolved.flags[0].reason, ResolveReason::Match);
		assert_eq!(resolved.flags[0].value["enabled"], true);
	}

	#[tokio::test]
	async fn test_resolve_not_modified() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/flags:resolve"))
			.respond_with(ResponseTemplate::new(304))
			.mount(&server)
			.await;

		let client = client_for(&server, fast_retry(1));
		let response = client
			.resolve(&[], &EvaluationContext::new())
			.await
			.unwrap();
		assert_eq!(response, ResolveResponse::NotModified);
	}

	#[tokio::test]
	async fn test_resolve_retries_server_errors() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/flags:resolve"))
			.respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
			.expect(3)
			.mount(&server)
			.await;

		let client = client_for(&server, fast_retry(3));
		let err = client
			.resolve(&[], &EvaluationContext::new())
			.await
			.unwrap_err();

		assert!(err.is_network());
		assert!(matches!(err, FlagsError::ServerError { status: 503, .. }));
	}

	#[tokio::test]
	async fn test_resolve_does_not_retry_client_errors() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/flags:resolve"))
			.respond_with(ResponseTemplate::new(401).set_body_string("bad secret"))
			.expect(1)
			.mount(&server)
			.await;

		let client = client_for(&server, fast_retry(3));
		let err = client
			.resolve(&[], &EvaluationContext::new())
			.await
			.unwrap_err();
		assert!(matches!(err, FlagsError::ServerError { status: 401, .. }));
	}

	#[tokio::test]
	async fn test_resolve_rate_limited_reads_retry_after() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/flags:resolve"))
			.respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
			.mount(&server)
			.await;

		let client = client_for(&server, fast_retry(1));
		let err = client
			.resolve(&[], &EvaluationContext::new())
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			FlagsError::RateLimited {
				retry_after_secs: Some(30)
			}
		));
	}

	#[tokio::test]
	async fn test_resolve_bad_body_is_parse_error() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/flags:resolve"))
			.respond_with(ResponseTemplate::new(200).set_body_string("{\"nope\":"))
			.mount(&server)
			.await;

		let client = client_for(&server, fast_retry(3));
		let err = client
			.resolve(&[], &EvaluationContext::new())
			.await
			.unwrap_err();
		assert!(err.is_parse());
	}

	#[tokio::test]
	async fn test_apply_sends_prefixed_flags() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/flags:apply"))
			.and(body_partial_json(json!({
				"clientSecret": "cs_test",
				"resolveToken": "t1",
				"sdk": { "id": SDK_ID },
			})))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
			.expect(1)
			.mount(&server)
			.await;

		let client = client_for(&server, fast_retry(1));
		let flags = vec![AppliedFlag {
			flag: "f1".to_string(),
			apply_time: Utc::now(),
		}];
		tokio_test::assert_ok!(client.apply(&flags, "t1").await);

		let requests = server.received_requests().await.unwrap();
		let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
		assert_eq!(body["flags"][0]["flag"], "flags/f1");
		assert!(body["flags"][0]["applyTime"].is_string());
		assert!(body["sendTime"].is_string());
	}

	#[tokio::test]
	async fn test_apply_failure_is_not_retried() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/flags:apply"))
			.respond_with(ResponseTemplate::new(500))
			.expect(1)
			.mount(&server)
			.await;

		let client = client_for(&server, fast_retry(3));
		let err = client.apply(&[], "t1").await.unwrap_err();
		assert!(err.is_network());
	}
}
