//! orion-llm: LLM backend abstraction and local/remote fallback routing.
//!
//! A request is tried against an explicitly named model, then the local
//! model host, then each remote fallback model in declared order. The first
//! success wins; if everything fails the caller gets one aggregate error
//! listing every attempt.

pub mod audit;
pub mod backend;
pub mod classification;
pub mod local;
pub mod router;
pub mod task;

pub use backend::{
    BackendCall, LlmBackend, LlmError, LlmRequest, LlmResponse, Message, OpenAiCompatibleBackend,
    Role,
};
pub use audit::RouteAudit;
pub use classification::ModelTarget;
pub use local::OllamaCliBackend;
pub use router::{build_router, AttemptError, LlmRouter, ProviderEndpoint, RouterError, RoutingPolicy};
pub use task::{LlmTask, TaskError};
