// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Interfaces to the remote resolve/apply service.
//!
//! The SDK only depends on these traits. [`crate::HttpFlagsClient`] is the
//! production implementation; tests substitute their own.

use std::sync::Arc;

use async_trait::async_trait;
use loom_flags_core::{AppliedFlag, EvaluationContext, ResolvedFlags};

use crate::error::Result;

/// Outcome of a remote resolve.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveResponse {
	Resolved(ResolvedFlags),
	/// The server has nothing newer than what the client already holds.
	NotModified,
}

#[async_trait]
pub trait ResolveClient: Send + Sync + 'static {
	/// Resolves `flags` for `context`. An empty `flags` slice asks for every flag.
	async fn resolve(&self, flags: &[String], context: &EvaluationContext) -> Result<ResolveResponse>;
}

#[async_trait]
pub trait ApplyClient: Send + Sync + 'static {
	/// Reports that `flags` were shown to the user. `Ok` means the server
	/// accepted the batch.
	async fn apply(&self, flags: &[AppliedFlag], resolve_token: &str) -> Result<()>;
}

pub type SharedResolveClient = Arc<dyn ResolveClient>;
pub type SharedApplyClient = Arc<dyn ApplyClient>;
