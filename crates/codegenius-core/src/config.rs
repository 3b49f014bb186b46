use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{GeniusError, Result};

/// Known model variants, keyed by the `model.size` configuration value.
pub const MODEL_VARIANTS: &[(&str, &str)] = &[
    ("1.3b", "deepseek-coder:1.3b-instruct"),
    ("6.7b", "deepseek-coder:6.7b-instruct"),
    ("16b", "deepseek-coder-v2:16b-instruct"),
    ("33b", "deepseek-coder:33b-instruct"),
];

/// Top-level configuration. Validated once at session start; components
/// receive the sections they need by reference.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeniusConfig {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub generation: GenerationParams,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Consumed by the external fine-tuning pipeline; tolerated and ignored
    /// by this core.
    #[serde(default)]
    pub fine_tuning: Option<toml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model variant: "1.3b", "6.7b", "16b" or "33b".
    #[serde(default = "default_model_size")]
    pub size: String,

    /// Quantization: "none", "4bit" or "8bit".
    #[serde(default = "default_quantization")]
    pub quantization: String,

    /// Device placement hint: "auto", "cuda" or "cpu".
    #[serde(default = "default_device")]
    pub device: String,

    /// Base URL of the model server.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Declared context window of the model, in tokens.
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Fine-tuned checkpoint overriding the variant table.
    #[serde(default)]
    pub custom_model_path: Option<String>,

    /// Per-call endpoint timeout in seconds.
    #[serde(default = "default_endpoint_timeout_secs")]
    pub timeout_secs: u64,
}

impl ModelConfig {
    /// Resolve the model identifier sent to the endpoint.
    pub fn model_id(&self) -> Result<String> {
        if let Some(path) = &self.custom_model_path {
            return Ok(path.clone());
        }
        MODEL_VARIANTS
            .iter()
            .find(|(size, _)| *size == self.size)
            .map(|(_, id)| (*id).to_string())
            .ok_or_else(|| {
                GeniusError::Config(format!(
                    "unknown model size '{}', expected one of 1.3b, 6.7b, 16b, 33b",
                    self.size
                ))
            })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            size: default_model_size(),
            quantization: default_quantization(),
            device: default_device(),
            base_url: default_base_url(),
            context_window: default_context_window(),
            custom_model_path: None,
            timeout_secs: default_endpoint_timeout_secs(),
        }
    }
}

/// Sampling parameters applied to every generation request of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Hard cap on output length.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Sampling randomness in [0, 1].
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling mass in (0, 1].
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum estimated token cost of one batch.
    #[serde(default = "default_batch_token_budget")]
    pub batch_token_budget: usize,

    /// Flush a partial batch once its oldest request has waited this long.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Concurrent dispatch workers; sized to the endpoint's safe concurrency.
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,

    /// Internal retries for transient endpoint faults.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay of the exponential backoff between retries.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Overall wait bound for one submission.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Capacity of the pending-request queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl SchedulerConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_token_budget: default_batch_token_budget(),
            flush_interval_ms: default_flush_interval_ms(),
            dispatch_workers: default_dispatch_workers(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Regeneration attempts after a validation failure.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Token budget for the symbol-registry excerpt in a file prompt.
    #[serde(default = "default_prompt_token_budget")]
    pub prompt_token_budget: usize,

    /// Deadline for one whole synthesis session, in seconds.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
}

impl SynthesisConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            prompt_token_budget: default_prompt_token_budget(),
            session_timeout_secs: default_session_timeout_secs(),
        }
    }
}

impl GeniusConfig {
    /// Load from a TOML file. Unknown keys are tolerated so external
    /// collaborators can share the same file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GeniusError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| GeniusError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        info!("loaded configuration from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    /// Validate once at session start rather than on each call.
    pub fn validate(&self) -> Result<()> {
        self.model.model_id()?;
        match self.model.quantization.as_str() {
            "none" | "4bit" | "8bit" => {}
            other => {
                return Err(GeniusError::Config(format!(
                    "unknown quantization '{}', expected none, 4bit or 8bit",
                    other
                )))
            }
        }
        if !(0.0..=1.0).contains(&self.generation.temperature) {
            return Err(GeniusError::Config(format!(
                "temperature {} outside [0, 1]",
                self.generation.temperature
            )));
        }
        if !(self.generation.top_p > 0.0 && self.generation.top_p <= 1.0) {
            return Err(GeniusError::Config(format!(
                "top_p {} outside (0, 1]",
                self.generation.top_p
            )));
        }
        if self.generation.max_tokens == 0 {
            return Err(GeniusError::Config("max_tokens must be positive".into()));
        }
        if self.scheduler.batch_token_budget == 0 {
            return Err(GeniusError::Config("batch_token_budget must be positive".into()));
        }
        if self.scheduler.dispatch_workers == 0 {
            return Err(GeniusError::Config("dispatch_workers must be positive".into()));
        }
        if self.generation.max_tokens > self.model.context_window {
            return Err(GeniusError::Config(format!(
                "max_tokens {} exceeds the model context window {}",
                self.generation.max_tokens, self.model.context_window
            )));
        }
        if self.fine_tuning.is_some() {
            warn!("fine_tuning configuration present; ignored by the synthesis core");
        }
        Ok(())
    }
}

fn default_model_size() -> String {
    "6.7b".to_string()
}

fn default_quantization() -> String {
    "4bit".to_string()
}

fn default_device() -> String {
    "auto".to_string()
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_context_window() -> usize {
    16384
}

fn default_endpoint_timeout_secs() -> u64 {
    90
}

fn default_max_tokens() -> usize {
    2048
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.95
}

fn default_batch_token_budget() -> usize {
    16384
}

fn default_flush_interval_ms() -> u64 {
    50
}

fn default_dispatch_workers() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_queue_capacity() -> usize {
    256
}

fn default_retry_limit() -> u32 {
    3
}

fn default_prompt_token_budget() -> usize {
    2048
}

fn default_session_timeout_secs() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        GeniusConfig::default().validate().unwrap();
    }

    #[test]
    fn model_id_resolution() {
        let mut model = ModelConfig::default();
        assert_eq!(model.model_id().unwrap(), "deepseek-coder:6.7b-instruct");

        model.custom_model_path = Some("checkpoints/mine".into());
        assert_eq!(model.model_id().unwrap(), "checkpoints/mine");

        model.custom_model_path = None;
        model.size = "9000b".into();
        assert!(model.model_id().is_err());
    }

    #[test]
    fn rejects_out_of_range_sampling() {
        let mut config = GeniusConfig::default();
        config.generation.temperature = 1.5;
        assert!(config.validate().is_err());

        let mut config = GeniusConfig::default();
        config.generation.top_p = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_max_tokens_beyond_context() {
        let mut config = GeniusConfig::default();
        config.generation.max_tokens = config.model.context_window + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_toml_with_fine_tuning_section() {
        let raw = r#"
            [model]
            size = "1.3b"
            quantization = "8bit"

            [generation]
            max_tokens = 512
            temperature = 0.2

            [fine_tuning]
            epochs = 3
            dataset = "internal"
        "#;
        let config: GeniusConfig = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.model.size, "1.3b");
        assert_eq!(config.generation.max_tokens, 512);
        assert!(config.fine_tuning.is_some());
    }
}
