//! Core types for uibench

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;

/// GUI framework a generated app targets.
///
/// The set is closed: every name outside the five known frameworks parses to
/// `Unsupported`, which carries the original name so it can still be reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Framework {
    Streamlit,
    Gradio,
    Shiny,
    Panel,
    Dash,
    Unsupported(String),
}

impl Framework {
    /// All frameworks the harness can run live
    pub const SUPPORTED: [Framework; 5] = [
        Framework::Streamlit,
        Framework::Gradio,
        Framework::Shiny,
        Framework::Panel,
        Framework::Dash,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Framework::Streamlit => "streamlit",
            Framework::Gradio => "gradio",
            Framework::Shiny => "shiny",
            Framework::Panel => "panel",
            Framework::Dash => "dash",
            Framework::Unsupported(name) => name,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Framework::Unsupported(_))
    }
}

impl From<&str> for Framework {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "streamlit" => Framework::Streamlit,
            "gradio" => Framework::Gradio,
            "shiny" => Framework::Shiny,
            "panel" => Framework::Panel,
            "dash" => Framework::Dash,
            _ => Framework::Unsupported(value.trim().to_string()),
        }
    }
}

impl From<String> for Framework {
    fn from(value: String) -> Self {
        Framework::from(value.as_str())
    }
}

impl From<Framework> for String {
    fn from(value: Framework) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Difficulty of the generated app task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl ChallengeLevel {
    pub const ALL: [ChallengeLevel; 4] = [
        ChallengeLevel::Beginner,
        ChallengeLevel::Intermediate,
        ChallengeLevel::Advanced,
        ChallengeLevel::Expert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeLevel::Beginner => "beginner",
            ChallengeLevel::Intermediate => "intermediate",
            ChallengeLevel::Advanced => "advanced",
            ChallengeLevel::Expert => "expert",
        }
    }
}

impl FromStr for ChallengeLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(ChallengeLevel::Beginner),
            "intermediate" => Ok(ChallengeLevel::Intermediate),
            "advanced" => Ok(ChallengeLevel::Advanced),
            "expert" => Ok(ChallengeLevel::Expert),
            other => Err(Error::UnknownLevel(other.to_string())),
        }
    }
}

impl std::fmt::Display for ChallengeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured app description returned by the generation model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedAppSpec {
    /// Full `app.py` source
    pub code: String,
    /// Shell command to run the app from its directory
    pub run_command: String,
    /// Contents of requirements.txt
    pub requirements_txt: String,
    /// Extra setup/run notes
    pub instructions: String,
}

impl GeneratedAppSpec {
    /// Placeholder used whenever the model output cannot be parsed
    pub fn fallback() -> Self {
        Self {
            code: "# Failed to parse response".to_string(),
            run_command: "python app.py".to_string(),
            requirements_txt: String::new(),
            instructions: "Failed to parse model response.".to_string(),
        }
    }
}

/// One (framework, level, model) unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub framework: Framework,
    pub level: ChallengeLevel,
    pub model_id: String,
    pub port: u16,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate1Result {
    pub ok: bool,
    pub error: Option<String>,
}

impl Gate1Result {
    pub fn passed() -> Self {
        Self { ok: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// What one interaction probe did during capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub step: String,
    pub ok: bool,
    /// Number of elements the step acted on
    #[serde(default)]
    pub acted: u32,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gate2Result {
    pub ok: bool,
    pub url: Option<String>,
    /// Legacy single-screenshot field; points at the final capture
    pub screenshot_path: Option<String>,
    pub screenshot_before_path: Option<String>,
    pub screenshot_after_path: Option<String>,
    pub error: Option<String>,
    pub skipped_reason: Option<String>,
    #[serde(default)]
    pub interactions: Vec<ProbeOutcome>,
    #[serde(default)]
    pub visual_change_percent: Option<f64>,
    #[serde(default)]
    pub screenshot_before_sha256: Option<String>,
    #[serde(default)]
    pub screenshot_after_sha256: Option<String>,
    #[serde(default)]
    pub app_output_tail: Option<String>,
}

impl Gate2Result {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate3Result {
    /// Grading ran to completion
    pub ok: bool,
    /// Semantic verdict; `None` when solver and grader cannot be reconciled
    pub passed: Option<bool>,
    pub solver_answer: Option<String>,
    pub grader_score: Option<String>,
    pub grader_explanation: Option<String>,
    pub inspect_log: Option<String>,
    pub error: Option<String>,
    pub skipped_reason: Option<String>,
}

impl Gate3Result {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Aggregate record for one job, as written to the run summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub framework: Framework,
    pub level: ChallengeLevel,
    pub model_id: String,
    pub output_dir: String,
    pub gate1: Gate1Result,
    pub gate2: Gate2Result,
    pub gate3: Option<Gate3Result>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_names_round_trip() {
        for framework in Framework::SUPPORTED {
            assert_eq!(Framework::from(framework.as_str()), framework);
        }
        assert_eq!(
            Framework::from("NiceGUI"),
            Framework::Unsupported("NiceGUI".to_string())
        );
        assert!(!Framework::from("nicegui").is_supported());
    }

    #[test]
    fn test_framework_serializes_as_name() {
        let json = serde_json::to_string(&Framework::Panel).unwrap();
        assert_eq!(json, "\"panel\"");
        let parsed: Framework = serde_json::from_str("\"tkinter\"").unwrap();
        assert_eq!(parsed, Framework::Unsupported("tkinter".to_string()));
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("Expert".parse::<ChallengeLevel>().unwrap(), ChallengeLevel::Expert);
        assert!(matches!(
            "legendary".parse::<ChallengeLevel>(),
            Err(Error::UnknownLevel(_))
        ));
        let values: Vec<&str> = ChallengeLevel::ALL.iter().map(|l| l.as_str()).collect();
        assert_eq!(values, ["beginner", "intermediate", "advanced", "expert"]);
    }

    #[test]
    fn test_eval_result_json_shape() {
        let result = EvalResult {
            framework: Framework::Dash,
            level: ChallengeLevel::Beginner,
            model_id: "m".to_string(),
            output_dir: "runs/dash/beginner/m".to_string(),
            gate1: Gate1Result::passed(),
            gate2: Gate2Result::skipped("Gate 2 disabled"),
            gate3: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["framework"], "dash");
        assert_eq!(value["level"], "beginner");
        assert_eq!(value["gate1"]["ok"], true);
        assert_eq!(value["gate2"]["skipped_reason"], "Gate 2 disabled");
        assert!(value["gate3"].is_null());
    }
}
