//! Configuration loading for Orion.
//! Reads the path given by `--config` / `ORION_CONFIG`, else `orion.toml` in the
//! current directory. A missing default file means built-in defaults.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use orion_common::{OrionError, Result};
use orion_llm::{OllamaCliBackend, ProviderEndpoint, RoutingPolicy};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "orion.toml";

/// Providers whose key may come from `<NAME>_API_KEY` without a `[llm.providers]` entry.
pub const BUILTIN_PROVIDERS: [&str; 4] = ["openrouter", "openai", "anthropic", "google"];

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "bool_true")]
    pub prefer_local: bool,
    #[serde(default = "default_local_model")]
    pub local_model: String,
    #[serde(default = "default_local_aliases")]
    pub local_aliases: Vec<String>,
    #[serde(default = "default_fallback_order")]
    pub fallback_order: Vec<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Provider name → API key, as written in `[llm.api_keys]`.
    #[serde(default)]
    pub api_keys: HashMap<String, SecretString>,
    #[serde(default)]
    pub local: LocalHostConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

fn bool_true()               -> bool   { true }
fn default_local_model()     -> String { "mistral".to_string() }
fn default_timeout_seconds() -> f64    { 30.0 }
fn default_max_retries()     -> u32    { 3 }

fn default_local_aliases() -> Vec<String> {
    vec!["mistral".to_string(), "llama2".to_string(), "codellama".to_string()]
}

fn default_fallback_order() -> Vec<String> {
    vec![
        "openrouter/anthropic/claude-3-haiku".to_string(),
        "openrouter/cohere/command-r".to_string(),
        "google/palm-chat".to_string(),
    ]
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            prefer_local: true,
            local_model: default_local_model(),
            local_aliases: default_local_aliases(),
            fallback_order: default_fallback_order(),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            api_keys: HashMap::new(),
            local: LocalHostConfig::default(),
            providers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalHostConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_local_command")]
    pub command: String,
    #[serde(default = "default_local_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_local_command() -> String { "ollama".to_string() }

fn default_local_args() -> Vec<String> {
    vec!["run".to_string(), orion_llm::local::MODEL_PLACEHOLDER.to_string()]
}

impl Default for LocalHostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_local_command(),
            args: default_local_args(),
            env: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
}


impl Config {
    /// Load and validate the configuration.
    /// An explicit path must exist; the default `orion.toml` may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path: PathBuf = match path {
            Some(p) if !p.exists() => {
                return Err(OrionError::config(format!("config file not found: {}", p.display())));
            }
            Some(p) => p.to_path_buf(),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => PathBuf::from(DEFAULT_CONFIG_FILE),
            None => {
                tracing::info!("no {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
                return Ok(Config::default());
            }
        };

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let llm = &self.llm;
        // Rejects NaN, negatives, zero and values too large for a Duration.
        if !Duration::try_from_secs_f64(llm.timeout_seconds).is_ok_and(|d| !d.is_zero()) {
            return Err(OrionError::config(format!(
                "llm.timeout_seconds must be positive, got {}",
                llm.timeout_seconds
            )));
        }
        if llm.prefer_local && llm.local_model.trim().is_empty() {
            return Err(OrionError::config("llm.local_model must be set when prefer_local is true"));
        }
        if let Some((provider, _)) = llm.api_keys.iter().find(|(_, key)| key.expose_secret().trim().is_empty()) {
            return Err(OrionError::config(format!("llm.api_keys.{provider} is empty")));
        }
        if let Some(entry) = llm.fallback_order.iter().find(|m| m.trim().is_empty()) {
            return Err(OrionError::config(format!("llm.fallback_order contains an empty entry: {entry:?}")));
        }
        if let Some((name, _)) = llm.providers.iter().find(|(_, p)| p.base_url.trim().is_empty()) {
            return Err(OrionError::config(format!("llm.providers.{name}.base_url is empty")));
        }
        if llm.local.command.trim().is_empty() {
            return Err(OrionError::config("llm.local.command is empty"));
        }
        Ok(())
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_timeout_seconds()))
    }

    /// Credentials from the file, completed from `<PROVIDER>_API_KEY` variables.
    pub fn credentials_with<F>(&self, lookup: F) -> HashMap<String, SecretString>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut keys: HashMap<String, SecretString> = self
            .api_keys
            .iter()
            .map(|(provider, key)| (provider.clone(), SecretString::from(key.expose_secret().to_owned())))
            .collect();

        let providers = BUILTIN_PROVIDERS
            .iter()
            .map(|p| p.to_string())
            .chain(self.providers.keys().cloned());
        for provider in providers {
            if keys.contains_key(&provider) {
                continue;
            }
            let var = api_key_var(&provider);
            match lookup(&var) {
                Some(key) if !key.trim().is_empty() => {
                    tracing::debug!(provider = %provider, var = %var, "API key taken from environment");
                    keys.insert(provider, SecretString::from(key));
                }
                Some(_) => tracing::warn!(var = %var, "ignoring empty API key variable"),
                None => {}
            }
        }
        keys
    }

    /// Build the routing policy, reading missing keys from the process environment.
    pub fn routing_policy(&self) -> RoutingPolicy {
        self.routing_policy_with(|var| std::env::var(var).ok())
    }

    pub fn routing_policy_with<F>(&self, lookup: F) -> RoutingPolicy
    where
        F: Fn(&str) -> Option<String>,
    {
        RoutingPolicy {
            prefer_local: self.prefer_local,
            local_model: self.local_model.clone(),
            local_aliases: self.local_aliases.clone(),
            fallback_order: self.fallback_order.clone(),
            credentials: self.credentials_with(lookup),
            timeout: self.timeout(),
            max_retries: self.max_retries,
        }
    }

    pub fn local_backend(&self) -> Option<OllamaCliBackend> {
        if !self.local.enabled {
            return None;
        }
        let backend = self
            .local
            .env
            .iter()
            .fold(
                OllamaCliBackend::new(self.local.command.clone(), self.local.args.clone()),
                |backend, (key, value)| backend.with_env(key.clone(), value.clone()),
            );
        Some(backend)
    }

    pub fn endpoints(&self) -> Vec<ProviderEndpoint> {
        self.providers
            .iter()
            .map(|(name, p)| ProviderEndpoint { name: name.clone(), base_url: p.base_url.clone() })
            .collect()
    }
}

/// `my-provider` → `MY_PROVIDER_API_KEY`.
pub fn api_key_var(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase().replace(['-', '.'], "_"))
}
