//! CLI command handlers.

use std::future::Future;
use std::path::Path;

use orion_llm::{LlmRequest, LlmResponse, LlmRouter, LlmTask, RouterError};
use serde::Serialize;
use tokio::io::AsyncReadExt;

/// Route a request, re-running the whole route while every backend fails.
/// `retries` extra rounds are made after the first one.
pub async fn route_with_retries(
    router: &LlmRouter,
    request: &LlmRequest,
    retries: u32,
) -> Result<LlmResponse, RouterError> {
    with_retries(retries, || router.route(request)).await
}

/// Execute a typed task with the same retry rounds as `route_with_retries`.
/// An invalid task fails on the first round.
pub async fn execute_with_retries(
    router: &LlmRouter,
    task: &LlmTask,
    retries: u32,
) -> Result<LlmResponse, RouterError> {
    with_retries(retries, || router.execute(task.clone())).await
}

async fn with_retries<F, Fut>(retries: u32, mut round_fn: F) -> Result<LlmResponse, RouterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<LlmResponse, RouterError>>,
{
    let mut round = 0;
    loop {
        match round_fn().await {
            Err(RouterError::AllModelsFailed { failures, skipped }) if round < retries => {
                round += 1;
                tracing::warn!(
                    round,
                    retries,
                    failed = failures.len(),
                    skipped = skipped.len(),
                    "all models failed, retrying route"
                );
            }
            result => return result,
        }
    }
}

/// Prompt from the argument, or all of stdin when none was given.
pub async fn read_prompt(arg: Option<String>) -> anyhow::Result<String> {
    let prompt = match arg {
        Some(p) => p,
        None => read_stdin().await?,
    };
    let prompt = prompt.trim().to_string();
    anyhow::ensure!(!prompt.is_empty(), "prompt is empty");
    Ok(prompt)
}

/// Parse an `LlmTask` from a file, or from stdin when no path was given.
pub async fn read_task(path: Option<&Path>) -> anyhow::Result<LlmTask> {
    let raw = match path {
        Some(p) => tokio::fs::read_to_string(p).await?,
        None => read_stdin().await?,
    };
    let task: LlmTask = serde_json::from_str(&raw).map_err(orion_common::OrionError::from)?;
    Ok(task)
}

async fn read_stdin() -> anyhow::Result<String> {
    let mut buf = String::new();
    tokio::io::stdin().read_to_string(&mut buf).await?;
    Ok(buf)
}

/// Routing policy as printed by `orion policy`; keys appear as provider names only.
#[derive(Debug, Serialize)]
pub struct PolicyReport<'a> {
    pub prefer_local: bool,
    pub local_model: &'a str,
    pub local_aliases: &'a [String],
    pub local_backend: bool,
    pub fallback_order: &'a [String],
    pub credentialed_providers: Vec<&'a str>,
    pub registered_backends: Vec<&'a str>,
    pub timeout_seconds: f64,
    pub max_retries: u32,
}

impl<'a> PolicyReport<'a> {
    pub fn new(router: &'a LlmRouter) -> Self {
        let policy = router.policy();
        Self {
            prefer_local: policy.prefer_local,
            local_model: &policy.local_model,
            local_aliases: &policy.local_aliases,
            local_backend: router.has_local_backend(),
            fallback_order: &policy.fallback_order,
            credentialed_providers: policy.credentialed_providers(),
            registered_backends: router.registered_backends(),
            timeout_seconds: policy.timeout.as_secs_f64(),
            max_retries: policy.max_retries,
        }
    }
}
