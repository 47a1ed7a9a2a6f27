//! uibench Common Library
//!
//! Data model, framework registry and configuration shared by the gate
//! pipeline and the command-line front end.

pub mod config;
pub mod error;
pub mod framework;
pub mod stage;
pub mod types;

// Re-export commonly used types
pub use config::{CaptureConfig, EvalConfig, LlmConfig, ToolConfig};
pub use error::{Error, Result};
pub use framework::{framework_config, FrameworkRuntimeConfig};
pub use stage::JobStage;
pub use types::*;

/// uibench version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
