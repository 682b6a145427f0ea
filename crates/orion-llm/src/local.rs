//! Local model host backend.
//!
//! Runs a command-line model host (by default `ollama run <model>`), writes
//! the prompt to stdin and takes the trimmed stdout as the completion. A
//! non-zero exit status is a failure carrying the host's stderr.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::backend::{BackendCall, LlmBackend, LlmError, LlmRequest, LlmResponse};

pub const MODEL_PLACEHOLDER: &str = "{model}";

pub struct OllamaCliBackend {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl Default for OllamaCliBackend {
    fn default() -> Self {
        Self::new("ollama", vec!["run".to_string(), MODEL_PLACEHOLDER.to_string()])
    }
}

impl OllamaCliBackend {
    /// `args` may contain `{model}`, replaced with the model name per call.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args, env: HashMap::new() }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command_args(&self, model: &str) -> Vec<String> {
        self.args.iter().map(|a| a.replace(MODEL_PLACEHOLDER, model)).collect()
    }

    /// Flatten system prompt, history and prompt into one text block.
    pub fn build_prompt(request: &LlmRequest) -> String {
        let mut full_prompt = String::new();

        if let Some(system) = request.system_prompt() {
            full_prompt.push_str("System: ");
            full_prompt.push_str(system);
            full_prompt.push_str("\n\n");
        }

        for turn in request.history() {
            full_prompt.push_str(turn.role.label());
            full_prompt.push_str(": ");
            full_prompt.push_str(&turn.content);
            full_prompt.push('\n');
        }

        if full_prompt.is_empty() {
            full_prompt.push_str(request.prompt());
        } else {
            full_prompt.push_str("User: ");
            full_prompt.push_str(request.prompt());
        }
        full_prompt
    }
}

#[async_trait]
impl LlmBackend for OllamaCliBackend {
    async fn complete(&self, call: BackendCall<'_>) -> Result<LlmResponse, LlmError> {
        let prompt = Self::build_prompt(call.request);

        let mut child = Command::new(&self.program)
            .args(self.command_args(call.model))
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LlmError::Spawn { program: self.program.clone(), source })?;

        // The prompt is fed while stdout is drained; either side can exceed the pipe buffer.
        let stdin = child.stdin.take();
        let program = self.program.as_str();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A host that exits without reading stdin reports through its exit status.
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    tracing::debug!(program = %program, error = %e, "stdin closed early");
                }
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output =
            output.map_err(|source| LlmError::Spawn { program: self.program.clone(), source })?;

        if !output.status.success() {
            return Err(LlmError::Process {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let mut metadata = HashMap::new();
        metadata.insert("provider".to_string(), serde_json::json!("ollama"));
        metadata.insert("local".to_string(), serde_json::json!(true));

        Ok(LlmResponse {
            content: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            model_used: call.model_id.to_string(),
            tokens_used: None,
            finish_reason: Some("stop".to_string()),
            metadata,
        })
    }

    fn provider(&self) -> &str { "ollama" }
    fn is_local(&self) -> bool { true }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Message, Role};

    fn call<'a>(request: &'a LlmRequest) -> BackendCall<'a> {
        BackendCall { request, model: "mistral", model_id: "ollama/mistral", credential: None }
    }

    #[test]
    fn test_build_prompt() {
        let request = LlmRequest::new("Hello");
        assert_eq!(OllamaCliBackend::build_prompt(&request), "Hello");

        let request = LlmRequest::new("Hello").with_system_prompt("Be helpful");
        assert_eq!(OllamaCliBackend::build_prompt(&request), "System: Be helpful\n\nUser: Hello");

        let request = LlmRequest::new("And you?").with_history(vec![
            Message::new(Role::User, "Hi"),
            Message::new(Role::Assistant, "Hello!"),
        ]);
        assert_eq!(
            OllamaCliBackend::build_prompt(&request),
            "User: Hi\nAssistant: Hello!\nUser: And you?"
        );
    }

    #[test]
    fn test_default_command() {
        let b = OllamaCliBackend::default();
        assert_eq!(b.program(), "ollama");
        assert_eq!(b.command_args("llama2"), vec!["run", "llama2"]);
        assert!(b.is_local());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_becomes_completion() {
        let b = OllamaCliBackend::new("sh", vec!["-c".into(), "cat; echo".into()]);
        let request = LlmRequest::new("ping");
        let resp = b.complete(call(&request)).await.unwrap();
        assert_eq!(resp.content, "ping");
        assert_eq!(resp.model_used, "ollama/mistral");
        assert_eq!(resp.provider(), Some("ollama"));
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_model_placeholder_and_env_reach_child() {
        let b = OllamaCliBackend::new(
            "sh",
            vec!["-c".into(), "echo \"$0 $ORION_LOCALE\"".into(), MODEL_PLACEHOLDER.into()],
        )
        .with_env("ORION_LOCALE", "tr_TR.UTF-8");
        let request = LlmRequest::new("ignored");
        let resp = b.complete(call(&request)).await.unwrap();
        assert_eq!(resp.content, "mistral tr_TR.UTF-8");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let b = OllamaCliBackend::new("sh", vec!["-c".into(), "echo 'model not found' >&2; exit 3".into()]);
        let request = LlmRequest::new("ping");
        match b.complete(call(&request)).await {
            Err(LlmError::Process { stderr, .. }) => assert_eq!(stderr, "model not found"),
            other => panic!("expected process failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_prompt_and_output_do_not_block() {
        let b = OllamaCliBackend::new("sh", vec!["-c".into(), "cat".into()]);
        let prompt = "orion ".repeat(512 * 1024 / 6);
        let request = LlmRequest::new(prompt.clone());
        let resp = tokio::time::timeout(std::time::Duration::from_secs(10), b.complete(call(&request)))
            .await
            .expect("local host should finish well before the deadline")
            .unwrap();
        assert_eq!(resp.content.len(), prompt.trim().len());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let b = OllamaCliBackend::new("orion-no-such-model-host", vec![]);
        let request = LlmRequest::new("ping");
        let err = b.complete(call(&request)).await.unwrap_err();
        assert!(matches!(err, LlmError::Spawn { .. }));
    }
}
