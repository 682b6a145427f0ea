//! LLM router: local-first completion with an ordered remote fallback chain.
//!
//! Order of attempts for one request:
//!   1. the explicitly requested model, if any
//!   2. the policy's local model, if `prefer_local`
//!   3. each `fallback_order` entry whose provider has a credential
//!
//! Every candidate is tried at most once. The first success wins; otherwise
//! the caller gets `RouterError::AllModelsFailed` with every failure reason.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use secrecy::SecretString;
use thiserror::Error;

use crate::audit::RouteAudit;
use crate::backend::{BackendCall, LlmBackend, LlmError, LlmRequest, LlmResponse, OpenAiCompatibleBackend};
use crate::classification::ModelTarget;
use crate::local::OllamaCliBackend;
use crate::task::{LlmTask, TaskError};

/// Routing policy controlling which backends are tried and in what order.
#[derive(Debug)]
pub struct RoutingPolicy {
    /// Try the local model host before the fallback list.
    pub prefer_local: bool,
    /// Model run by the local host when `prefer_local` is set.
    pub local_model: String,
    /// Bare model names that always resolve to the local host.
    pub local_aliases: Vec<String>,
    /// Remote models tried in order, as `<provider>/<model>`.
    pub fallback_order: Vec<String>,
    /// Provider name → API key.
    pub credentials: HashMap<String, SecretString>,
    /// Upper bound for a single backend call.
    pub timeout: Duration,
    /// Whole-route retries a caller may perform; the router itself tries each backend once.
    pub max_retries: u32,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            prefer_local: true,
            local_model: "mistral".to_string(),
            local_aliases: vec!["mistral".to_string(), "llama2".to_string(), "codellama".to_string()],
            fallback_order: vec![
                "openrouter/anthropic/claude-3-haiku".to_string(),
                "openrouter/cohere/command-r".to_string(),
                "google/palm-chat".to_string(),
            ],
            credentials: HashMap::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl RoutingPolicy {
    pub fn credential(&self, provider: &str) -> Option<&SecretString> {
        self.credentials.get(provider)
    }

    pub fn classify(&self, model_id: &str) -> ModelTarget {
        let mut local_names: Vec<&str> = self.local_aliases.iter().map(String::as_str).collect();
        if !self.local_model.is_empty() {
            local_names.push(&self.local_model);
        }
        ModelTarget::classify(model_id, &local_names)
    }

    /// Provider names with a configured credential, sorted.
    pub fn credentialed_providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.credentials.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Outcome of one candidate that did not produce a response.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// Soft skip: the candidate was never called.
    #[error("no credential for provider '{provider}' (model {model})")]
    CredentialMissing { model: String, provider: String },
    #[error("{backend}: {source}")]
    BackendCallFailed {
        backend: String,
        #[source]
        source: LlmError,
    },
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("All models failed: {}", join_failures(.failures))]
    AllModelsFailed {
        /// One entry per backend actually called, in attempt order.
        failures: Vec<AttemptError>,
        /// Model ids skipped for a missing credential.
        skipped: Vec<String>,
    },
    #[error("Invalid task: {0}")]
    InvalidTask(#[from] TaskError),
}

fn join_failures(failures: &[AttemptError]) -> String {
    if failures.is_empty() {
        return "no backend was attempted".to_string();
    }
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

// ── Router ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Candidate {
    declared: String,
    target: ModelTarget,
}

impl Candidate {
    fn id(&self) -> String {
        self.target.reported_id(&self.declared)
    }
}

/// Routes LLM requests across the local host and remote providers.
pub struct LlmRouter {
    policy: Arc<RoutingPolicy>,
    local: Option<Arc<dyn LlmBackend>>,
    remotes: HashMap<String, Arc<dyn LlmBackend>>,
}

impl LlmRouter {
    pub fn new(policy: Arc<RoutingPolicy>) -> Self {
        Self {
            policy,
            local: None,
            remotes: HashMap::new(),
        }
    }

    pub fn with_local_backend(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    /// Register a remote backend under its provider name, replacing any previous one.
    pub fn register_backend(&mut self, backend: Arc<dyn LlmBackend>) {
        self.remotes.insert(backend.provider().to_string(), backend);
    }

    pub fn registered_backends(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.remotes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn has_local_backend(&self) -> bool {
        self.local.is_some()
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Validate a typed task and route the request it describes.
    pub async fn execute(&self, task: LlmTask) -> Result<LlmResponse, RouterError> {
        let kind = task.kind();
        let request = task.into_request()?;
        tracing::debug!(task_type = kind, "executing LLM task");
        self.route(&request).await
    }

    pub async fn route(&self, request: &LlmRequest) -> Result<LlmResponse, RouterError> {
        self.route_audited(request).await.map(|(response, _)| response)
    }

    /// Route a request and also return the audit record of the winning route.
    pub async fn route_audited(
        &self,
        request: &LlmRequest,
    ) -> Result<(LlmResponse, RouteAudit), RouterError> {
        let started = Instant::now();
        let mut failures: Vec<AttemptError> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();

        for candidate in self.plan(request) {
            match self.attempt(request, &candidate).await {
                Ok(response) => {
                    let attempts = failures.len() + 1;
                    tracing::info!(
                        model = %response.model_used,
                        is_local = candidate.target.is_local(),
                        attempts,
                        "LLM request routed"
                    );
                    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    let audit = RouteAudit::new(&response, attempts, skipped.len(), latency_ms);
                    audit.emit();
                    return Ok((response, audit));
                }
                Err(AttemptError::CredentialMissing { model, provider }) => {
                    tracing::info!(model = %model, provider = %provider, "skipping model: no credential");
                    skipped.push(model);
                }
                Err(failure) => {
                    tracing::warn!(error = %failure, "LLM backend failed");
                    failures.push(failure);
                }
            }
        }

        tracing::error!(
            failed = failures.len(),
            skipped = skipped.len(),
            "all LLM backends failed"
        );
        Err(RouterError::AllModelsFailed { failures, skipped })
    }

    /// Ordered, de-duplicated candidates for one request.
    fn plan(&self, request: &LlmRequest) -> Vec<Candidate> {
        let policy = &self.policy;
        let mut plan = Vec::with_capacity(policy.fallback_order.len() + 2);

        if let Some(model) = request.model() {
            plan.push(Candidate { declared: model.to_string(), target: policy.classify(model) });
        }
        if policy.prefer_local && !policy.local_model.is_empty() {
            plan.push(Candidate {
                declared: policy.local_model.clone(),
                target: ModelTarget::Local { model: policy.local_model.clone() },
            });
        }
        for model in &policy.fallback_order {
            plan.push(Candidate { declared: model.clone(), target: policy.classify(model) });
        }

        let mut seen = HashSet::new();
        plan.retain(|c| seen.insert(c.id()));
        plan
    }

    async fn attempt(
        &self,
        request: &LlmRequest,
        candidate: &Candidate,
    ) -> Result<LlmResponse, AttemptError> {
        let model_id = candidate.id();
        let failed = |source: LlmError| AttemptError::BackendCallFailed {
            backend: model_id.clone(),
            source,
        };

        let (backend, model, credential) = match &candidate.target {
            ModelTarget::Local { model } => {
                let backend = self
                    .local
                    .as_ref()
                    .ok_or_else(|| failed(LlmError::LocalUnavailable(model.clone())))?;
                (backend, model.as_str(), None)
            }
            ModelTarget::Remote { provider, model } => {
                let Some(credential) = self.policy.credential(provider) else {
                    return Err(AttemptError::CredentialMissing {
                        model: candidate.declared.clone(),
                        provider: provider.clone(),
                    });
                };
                let backend = self
                    .remotes
                    .get(provider)
                    .ok_or_else(|| failed(LlmError::UnsupportedProvider(provider.clone())))?;
                (backend, model.as_str(), Some(credential))
            }
        };

        tracing::debug!(model = %model_id, provider = backend.provider(), "calling LLM backend");
        let call = BackendCall { request, model, model_id: &model_id, credential };
        match tokio::time::timeout(self.policy.timeout, backend.complete(call)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(failed(e)),
            Err(_) => Err(failed(LlmError::Timeout(self.policy.timeout))),
        }
    }
}

/// Extra OpenAI-compatible provider, or a base URL override for a built-in one.
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub name: String,
    pub base_url: String,
}

/// Build a router with the built-in `openai` and `openrouter` backends, any
/// extra endpoints, and an optional local model host.
pub fn build_router(
    policy: RoutingPolicy,
    endpoints: Vec<ProviderEndpoint>,
    local: Option<OllamaCliBackend>,
) -> LlmRouter {
    let mut router = LlmRouter::new(Arc::new(policy));
    if let Some(local) = local {
        router = router.with_local_backend(Arc::new(local));
    }

    router.register_backend(Arc::new(OpenAiCompatibleBackend::openai()));
    router.register_backend(Arc::new(OpenAiCompatibleBackend::openrouter()));

    for endpoint in endpoints {
        // Keep OpenRouter's identification headers when only its URL is overridden.
        let backend = match endpoint.name.as_str() {
            "openrouter" => OpenAiCompatibleBackend::openrouter().with_base_url(endpoint.base_url),
            _ => OpenAiCompatibleBackend::new(endpoint.name, endpoint.base_url),
        };
        router.register_backend(Arc::new(backend));
    }

    for model in &router.policy.fallback_order {
        if let ModelTarget::Remote { provider, .. } = router.policy.classify(model) {
            if !router.remotes.contains_key(&provider) {
                tracing::warn!(model = %model, provider = %provider, "fallback model has no registered backend");
            }
        }
    }

    router
}

// ── Tests ─────────────────────────────────────────────────────────────────────
