//! Evaluation configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Global evaluation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Host generated apps bind to
    pub host: String,

    /// First port handed out; each framework/level pair takes the next one
    pub base_port: u16,

    pub aws_region: Option<String>,
    pub aws_profile: Option<String>,

    /// Concurrency hint; jobs currently run one at a time
    pub max_active: usize,

    /// Overrides every framework's startup timeout when set
    pub startup_timeout_secs: Option<u64>,

    /// Grace period between SIGTERM and SIGKILL on teardown
    pub teardown_grace_secs: u64,

    pub enable_gate2: bool,
    pub enable_gate3: bool,
    pub gate3_grader_model: Option<String>,
    pub gate3_log_dir: Option<PathBuf>,
    pub gate3_max_samples: Option<usize>,

    /// Model endpoint configuration
    pub llm: LlmConfig,

    /// External tool locations
    pub tools: ToolConfig,

    /// Browser capture configuration
    pub capture: CaptureConfig,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: 8501,
            aws_region: None,
            aws_profile: None,
            max_active: 4,
            startup_timeout_secs: None,
            teardown_grace_secs: 10,
            enable_gate2: true,
            enable_gate3: false,
            gate3_grader_model: None,
            gate3_log_dir: None,
            gate3_max_samples: None,
            llm: LlmConfig::default(),
            tools: ToolConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

/// OpenAI-compatible chat endpoint (LiteLLM proxy or similar)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            api_key: None,
            request_timeout_secs: 300,
            max_tokens: 8192,
        }
    }
}

/// Paths of the external tools the harness shells out to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// `uv` binary used to create job environments
    pub uv_binary: PathBuf,
    /// `node` binary with Playwright importable
    pub node_binary: PathBuf,
    /// CPython used for the Gate 1 compile; unset or unusable falls back to
    /// the built-in parser
    pub python_binary: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            uv_binary: PathBuf::from("uv"),
            node_binary: PathBuf::from("node"),
            python_binary: Some(PathBuf::from("python3")),
        }
    }
}

/// Headless browser settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigation_timeout_ms: u64,
    /// Per-interaction timeout inside the probe sequence
    pub action_timeout_ms: u64,
    /// Hard limit on one browser session
    pub session_timeout_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            viewport_width: 1440,
            viewport_height: 900,
            navigation_timeout_ms: 60_000,
            action_timeout_ms: 3_000,
            session_timeout_secs: 180,
        }
    }
}

impl EvalConfig {
    /// Load configuration from file, falling back to defaults when it is absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations that cannot run. Checked before any job starts.
    pub fn validate(&self) -> Result<()> {
        if self.enable_gate3
            && self
                .gate3_grader_model
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
        {
            return Err(Error::InvalidConfig(
                "gate3_grader_model is required when Gate 3 is enabled (pass --gate3-grader-model ...)"
                    .to_string(),
            ));
        }
        if self.gate3_max_samples == Some(0) {
            return Err(Error::InvalidConfig(
                "gate3_max_samples must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory Gate 3 logs are written to
    pub fn gate3_log_dir(&self) -> PathBuf {
        self.gate3_log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("logs").join("gate3"))
    }
}
