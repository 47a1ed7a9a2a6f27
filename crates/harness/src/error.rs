//! Error types for the gate pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Dependency installation failed: {0}")]
    Install(String),

    #[error("Failed to start app: {0}")]
    Launch(String),

    #[error("Timed out waiting for 200 OK: {url}{}", last_error_suffix(.last_error))]
    ReadinessTimeout {
        url: String,
        last_error: Option<String>,
    },

    #[error("Playwright not found. Install with: npm install playwright && npx playwright install chromium")]
    PlaywrightNotFound,

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Model call failed: {0}")]
    Model(String),

    #[error("No model endpoint configured (set llm.api_base or UIBENCH_LLM_API_BASE)")]
    MissingApiBase,

    #[error("Configuration error: {0}")]
    Config(#[from] uibench_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(err) => format!(". Last error: {}", err),
        None => String::new(),
    }
}

impl HarnessError {
    /// Short error kind recorded in gate results
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Install(_) => "InstallError",
            HarnessError::Launch(_) => "LaunchError",
            HarnessError::ReadinessTimeout { .. } => "TimeoutError",
            HarnessError::PlaywrightNotFound => "PlaywrightNotFound",
            HarnessError::Capture(_) => "CaptureError",
            HarnessError::Timeout(_) => "TimeoutError",
            HarnessError::Model(_) | HarnessError::MissingApiBase => "ModelError",
            HarnessError::Config(_) => "ConfigError",
            HarnessError::Io(_) => "OSError",
            HarnessError::Json(_) => "JSONError",
            HarnessError::Http(_) => "HTTPError",
            HarnessError::Image(_) => "ImageError",
        }
    }

    /// `<Kind>: <message>` form stored in gate results
    pub fn describe(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
