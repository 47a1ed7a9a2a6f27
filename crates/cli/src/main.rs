//! uibench CLI - Main Entry Point
//!
//! Generates one app per framework × level × model, runs the gates on each
//! and writes a JSON summary of every result.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use uibench_common::{ChallengeLevel, EvalConfig, Framework};
use uibench_harness::{EvalRunner, RunPlan};

mod output;
mod progress;

const DEFAULT_FRAMEWORKS: &str = "streamlit,gradio,shiny,panel,dash";
const DEFAULT_LEVELS: &str = "beginner,intermediate,advanced,expert";

/// Log line encoding on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// uibench - gate pipeline for LLM-generated Python GUI apps
#[derive(Parser, Debug)]
#[command(name = "uibench")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Comma-separated frameworks
    #[arg(long, default_value = DEFAULT_FRAMEWORKS)]
    frameworks: String,

    /// Comma-separated challenge levels
    #[arg(long, default_value = DEFAULT_LEVELS)]
    levels: String,

    /// Comma-separated model ids
    #[arg(long)]
    models: String,

    /// Output directory for generated apps and the run summary
    #[arg(long, default_value = "runs")]
    out: PathBuf,

    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host generated apps bind to
    #[arg(long)]
    host: Option<String>,

    /// First port handed out to jobs
    #[arg(long)]
    base_port: Option<u16>,

    #[arg(long)]
    aws_region: Option<String>,

    #[arg(long)]
    aws_profile: Option<String>,

    /// Concurrency hint (jobs currently run one at a time)
    #[arg(long)]
    max_active: Option<usize>,

    /// Skip launching and capturing the apps
    #[arg(long)]
    no_gate2: bool,

    /// Grade the screenshots with a solver and a grader model
    #[arg(long)]
    gate3: bool,

    #[arg(long)]
    gate3_grader_model: Option<String>,

    #[arg(long)]
    gate3_log_dir: Option<PathBuf>,

    /// Concurrent Gate 3 samples per model
    #[arg(long)]
    gate3_max_samples: Option<usize>,

    /// OpenAI-compatible endpoint (LiteLLM proxy)
    #[arg(long, env = "UIBENCH_LLM_API_BASE")]
    llm_api_base: Option<String>,

    #[arg(long, env = "UIBENCH_LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Result listing format
    #[arg(long, default_value = "table")]
    format: output::OutputFormat,

    /// Log format
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Split a comma list, trimming items and dropping empty ones
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl Cli {
    fn plan(&self) -> anyhow::Result<RunPlan> {
        let frameworks: Vec<Framework> = split_list(&self.frameworks)
            .into_iter()
            .map(Framework::from)
            .collect();
        let levels = split_list(&self.levels)
            .iter()
            .map(|level| level.parse::<ChallengeLevel>())
            .collect::<Result<Vec<_>, _>>()?;
        let models = split_list(&self.models);
        if models.is_empty() {
            bail!("--models must name at least one model");
        }

        Ok(RunPlan {
            frameworks,
            levels,
            models,
            out_dir: self.out.clone(),
        })
    }

    /// Configuration file (or defaults) with flag overrides applied
    fn eval_config(&self) -> anyhow::Result<EvalConfig> {
        let mut config = match &self.config {
            Some(path) => EvalConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => EvalConfig::default(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.base_port {
            config.base_port = port;
        }
        if self.aws_region.is_some() {
            config.aws_region = self.aws_region.clone();
        }
        if self.aws_profile.is_some() {
            config.aws_profile = self.aws_profile.clone();
        }
        if let Some(max_active) = self.max_active {
            config.max_active = max_active;
        }
        if self.no_gate2 {
            config.enable_gate2 = false;
        }
        if self.gate3 {
            config.enable_gate3 = true;
        }
        if self.gate3_grader_model.is_some() {
            config.gate3_grader_model = self.gate3_grader_model.clone();
        }
        if self.gate3_log_dir.is_some() {
            config.gate3_log_dir = self.gate3_log_dir.clone();
        }
        if self.gate3_max_samples.is_some() {
            config.gate3_max_samples = self.gate3_max_samples;
        }
        if self.llm_api_base.is_some() {
            config.llm.api_base = self.llm_api_base.clone();
        }
        if self.llm_api_key.is_some() {
            config.llm.api_key = self.llm_api_key.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let logger = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => logger.init(),
        LogFormat::Json => logger.json().init(),
    }

    let plan = cli.plan()?.deduplicated();
    let config = cli.eval_config()?;
    config.validate()?;
    info!(
        "Writing results to {} (gate2={}, gate3={})",
        plan.out_dir.display(),
        config.enable_gate2,
        config.enable_gate3
    );

    let total_jobs = plan.job_count();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let display = tokio::spawn(progress::track(rx, total_jobs as u64));

    let runner = EvalRunner::from_config(config).with_events(tx);
    let outcome = runner.run_evaluation(&plan).await;
    // Dropping the runner closes the event channel
    drop(runner);
    display.await.context("progress display")?;

    let outcome = outcome?;
    output::print_results(&outcome.results, cli.format)?;
    println!();
    println!("Summary written to {}", outcome.summary_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["uibench"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" gradio, ,dash ,"), vec!["gradio", "dash"]);
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn test_default_plan() {
        let plan = parse(&["--models", "m1,m2"]).plan().unwrap();
        assert_eq!(plan.frameworks, Framework::SUPPORTED.to_vec());
        assert_eq!(plan.levels, ChallengeLevel::ALL.to_vec());
        assert_eq!(plan.models, vec!["m1", "m2"]);
        assert_eq!(plan.out_dir, PathBuf::from("runs"));
    }

    #[test]
    fn test_plan_rejects_bad_lists() {
        assert!(parse(&["--models", " , "]).plan().is_err());
        assert!(parse(&["--models", "m", "--levels", "beginner,legendary"])
            .plan()
            .is_err());
        assert!(Cli::try_parse_from(["uibench"]).is_err());
    }

    #[test]
    fn test_unknown_framework_is_kept() {
        let plan = parse(&["--models", "m", "--frameworks", "gradio,NiceGUI"])
            .plan()
            .unwrap();
        assert_eq!(plan.frameworks[1], Framework::Unsupported("NiceGUI".to_string()));
    }

    #[test]
    fn test_log_format() {
        assert_eq!(parse(&["--models", "m"]).log_format, LogFormat::Text);
        assert_eq!(
            parse(&["--models", "m", "--log-format", "json"]).log_format,
            LogFormat::Json
        );
        assert!(Cli::try_parse_from(["uibench", "--models", "m", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn test_repeated_list_items_run_once() {
        let plan = parse(&["--models", "m,m", "--frameworks", "dash,gradio,dash", "--levels", "expert"])
            .plan()
            .unwrap()
            .deduplicated();
        assert_eq!(plan.frameworks, vec![Framework::Dash, Framework::Gradio]);
        assert_eq!(plan.job_count(), 2);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uibench.toml");
        std::fs::write(
            &path,
            "host = \"0.0.0.0\"\nbase_port = 9000\nenable_gate3 = true\n\n[llm]\napi_base = \"http://proxy:4000\"\n",
        )
        .unwrap();

        let config_arg = path.to_string_lossy().to_string();
        let config = parse(&[
            "--models",
            "m",
            "--config",
            &config_arg,
            "--base-port",
            "9100",
            "--no-gate2",
            "--gate3-grader-model",
            "grader",
        ])
        .eval_config()
        .unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.base_port, 9100);
        assert!(!config.enable_gate2);
        assert!(config.enable_gate3);
        assert_eq!(config.gate3_grader_model.as_deref(), Some("grader"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let config = parse(&["--models", "m", "--config", "/nonexistent/uibench.toml"])
            .eval_config()
            .unwrap();
        assert_eq!(config.base_port, 8501);
        assert!(config.enable_gate2);
    }
}
