//! Model identifier classification: which backend path serves a model id.

/// Prefix that pins a model to the local host regardless of its name.
pub const LOCAL_PREFIX: &str = "ollama";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelTarget {
    /// Served by the local model host under `model`.
    Local { model: String },
    /// Served by `provider`'s API; `model` is the provider-side name.
    Remote { provider: String, model: String },
}

impl ModelTarget {
    /// Classify a model id.
    ///
    /// `ollama/<name>` and any bare name in `local_names` are local.
    /// `<provider>/<rest>` is remote with `<rest>` sent on the wire; any other
    /// bare name is treated as its own provider.
    pub fn classify<S: AsRef<str>>(model_id: &str, local_names: &[S]) -> Self {
        match model_id.split_once('/') {
            Some((LOCAL_PREFIX, name)) => ModelTarget::Local { model: name.to_string() },
            Some((provider, rest)) => ModelTarget::Remote {
                provider: provider.to_string(),
                model: rest.to_string(),
            },
            None if local_names.iter().any(|n| n.as_ref() == model_id) => {
                ModelTarget::Local { model: model_id.to_string() }
            }
            None => ModelTarget::Remote {
                provider: model_id.to_string(),
                model: model_id.to_string(),
            },
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ModelTarget::Local { .. })
    }

    /// Identifier reported as `model_used` for a response from this target.
    /// Remote targets report the declared id unchanged.
    pub fn reported_id(&self, declared: &str) -> String {
        match self {
            ModelTarget::Local { model } => format!("{LOCAL_PREFIX}/{model}"),
            ModelTarget::Remote { .. } => declared.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCALS: [&str; 3] = ["mistral", "llama2", "codellama"];

    #[test]
    fn test_ollama_prefix_is_local() {
        assert_eq!(
            ModelTarget::classify("ollama/phi3", &LOCALS),
            ModelTarget::Local { model: "phi3".to_string() }
        );
    }

    #[test]
    fn test_known_bare_name_is_local() {
        let target = ModelTarget::classify("codellama", &LOCALS);
        assert!(target.is_local());
        assert_eq!(target.reported_id("codellama"), "ollama/codellama");
    }

    #[test]
    fn test_provider_prefix_is_remote() {
        let target = ModelTarget::classify("openrouter/anthropic/claude-3-haiku", &LOCALS);
        assert_eq!(
            target,
            ModelTarget::Remote {
                provider: "openrouter".to_string(),
                model: "anthropic/claude-3-haiku".to_string(),
            }
        );
        assert_eq!(
            target.reported_id("openrouter/anthropic/claude-3-haiku"),
            "openrouter/anthropic/claude-3-haiku"
        );
    }

    #[test]
    fn test_unknown_bare_name_is_its_own_provider() {
        assert_eq!(
            ModelTarget::classify("gpt-4o", &LOCALS),
            ModelTarget::Remote { provider: "gpt-4o".to_string(), model: "gpt-4o".to_string() }
        );
    }
}
