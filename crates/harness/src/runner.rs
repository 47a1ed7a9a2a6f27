//! Run aggregator: plan jobs, generate apps, run the gates, write the summary

use chrono::Local;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use uibench_common::{
    ChallengeLevel, Error as CommonError, EvalConfig, EvalResult, Framework, Gate1Result,
    Gate2Result, Gate3Result, GeneratedAppSpec, Job, JobStage,
};

use crate::error::{HarnessError, HarnessResult};
use crate::gates::{GateRunner, SCREENSHOT_AFTER, SCREENSHOT_BEFORE};
use crate::generation::generate_app;
use crate::grading::{grade_screenshots, Gate3Case, GradingOptions};
use crate::llm::{ChatClient, ChatModel};

/// What to evaluate
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub frameworks: Vec<Framework>,
    pub levels: Vec<ChallengeLevel>,
    pub models: Vec<String>,
    pub out_dir: PathBuf,
}

impl RunPlan {
    /// Same plan with repeated frameworks, levels and models dropped. Jobs
    /// are keyed by their directory, so each combination may appear once.
    pub fn deduplicated(&self) -> RunPlan {
        RunPlan {
            frameworks: first_occurrences(&self.frameworks),
            levels: first_occurrences(&self.levels),
            models: first_occurrences(&self.models),
            out_dir: self.out_dir.clone(),
        }
    }

    /// Number of jobs the plan runs
    pub fn job_count(&self) -> usize {
        self.frameworks.len() * self.levels.len() * self.models.len()
    }
}

fn first_occurrences<T: Clone + PartialEq>(items: &[T]) -> Vec<T> {
    let mut unique: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(item) {
            unique.push(item.clone());
        }
    }
    unique
}

/// Progress notifications for front ends
#[derive(Debug, Clone)]
pub enum RunEvent {
    ModelStarted {
        model_id: String,
        jobs: usize,
    },
    Generating {
        model_id: String,
        framework: Framework,
        level: ChallengeLevel,
    },
    GatesStarted {
        model_id: String,
        framework: Framework,
        level: ChallengeLevel,
    },
    JobFinished(Box<EvalResult>),
    GradingStarted {
        model_id: String,
        cases: usize,
    },
    ModelFinished {
        model_id: String,
    },
    SummaryWritten {
        path: PathBuf,
    },
}

/// Results of a finished run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub results: Vec<EvalResult>,
    pub summary_path: PathBuf,
}

/// A framework/level pair with its port, shared by every model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    pub framework: Framework,
    pub level: ChallengeLevel,
    pub port: u16,
}

/// Hands out consecutive ports for one run
#[derive(Debug)]
pub struct PortAllocator {
    next: Option<u16>,
}

impl PortAllocator {
    pub fn new(base_port: u16) -> Self {
        Self {
            next: Some(base_port),
        }
    }

    pub fn allocate(&mut self) -> uibench_common::Result<u16> {
        let port = self.next.ok_or_else(|| {
            CommonError::InvalidConfig("port range exhausted (ports above 65535)".to_string())
        })?;
        self.next = port.checked_add(1);
        Ok(port)
    }
}

/// Framework-major job plan with ports `base_port..base_port + F*L`
pub fn plan_jobs(
    frameworks: &[Framework],
    levels: &[ChallengeLevel],
    base_port: u16,
) -> uibench_common::Result<Vec<PlannedJob>> {
    let mut ports = PortAllocator::new(base_port);
    let mut planned = Vec::with_capacity(frameworks.len() * levels.len());
    for framework in frameworks {
        for level in levels {
            planned.push(PlannedJob {
                framework: framework.clone(),
                level: *level,
                port: ports.allocate()?,
            });
        }
    }
    Ok(planned)
}

/// Directory-safe form of a model id: keeps `[A-Za-z0-9._-]`, strips
/// leading and trailing dots
pub fn safe_dir_name(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "model".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Write an artifact with trailing whitespace trimmed and one final newline
pub fn write_artifact(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", content.trim_end()))
}

fn write_app_artifacts(dir: &Path, spec: &GeneratedAppSpec) -> std::io::Result<()> {
    write_artifact(&dir.join("app.py"), &spec.code)?;
    write_artifact(&dir.join("requirements.txt"), &spec.requirements_txt)?;
    write_artifact(&dir.join("INSTRUCTIONS.md"), &spec.instructions)?;
    write_artifact(&dir.join("RUN_COMMAND.txt"), &spec.run_command)?;
    Ok(())
}

/// Drives a whole evaluation run
pub struct EvalRunner {
    config: EvalConfig,
    gates: GateRunner,
    chat: Option<Arc<dyn ChatModel>>,
    chat_unavailable: String,
    events: Option<UnboundedSender<RunEvent>>,
}

impl EvalRunner {
    pub fn new(config: EvalConfig, gates: GateRunner, chat: Option<Arc<dyn ChatModel>>) -> Self {
        Self {
            config,
            gates,
            chat,
            chat_unavailable: HarnessError::MissingApiBase.to_string(),
            events: None,
        }
    }

    /// Production wiring from configuration. A missing model endpoint is not
    /// fatal here; it surfaces as per-job generation and grading errors.
    pub fn from_config(config: EvalConfig) -> Self {
        let gates = GateRunner::from_config(&config);
        match ChatClient::from_config(&config) {
            Ok(client) => Self::new(config, gates, Some(Arc::new(client))),
            Err(e) => {
                warn!("Model endpoint unavailable: {}", e);
                let mut runner = Self::new(config, gates, None);
                runner.chat_unavailable = e.to_string();
                runner
            }
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run every framework × level × model job and write the summary.
    ///
    /// Only configuration errors (checked before any job starts) and failure
    /// to write the summary are returned as errors.
    pub async fn run_evaluation(&self, plan: &RunPlan) -> HarnessResult<RunOutcome> {
        self.config.validate()?;
        let plan = &plan.deduplicated();
        let planned = plan_jobs(&plan.frameworks, &plan.levels, self.config.base_port)?;

        std::fs::create_dir_all(&plan.out_dir)?;
        info!(
            "Evaluating {} job(s) per model across {} model(s) (max_active={}, jobs run sequentially)",
            planned.len(),
            plan.models.len(),
            self.config.max_active
        );

        let mut all_results = Vec::with_capacity(planned.len() * plan.models.len());
        for model_id in &plan.models {
            let mut model_results = self.run_model(model_id, &planned, &plan.out_dir).await?;
            all_results.append(&mut model_results);
        }

        let summary_path = plan.out_dir.join(format!(
            "summary_{}.json",
            Local::now().format("%Y%m%d_%H%M%S")
        ));
        std::fs::write(&summary_path, serde_json::to_string_pretty(&all_results)?)?;
        info!("Wrote summary: {}", summary_path.display());
        self.emit(RunEvent::SummaryWritten {
            path: summary_path.clone(),
        });

        Ok(RunOutcome {
            results: all_results,
            summary_path,
        })
    }

    async fn run_model(
        &self,
        model_id: &str,
        planned: &[PlannedJob],
        out_dir: &Path,
    ) -> HarnessResult<Vec<EvalResult>> {
        info!("Model: {}", model_id);
        self.emit(RunEvent::ModelStarted {
            model_id: model_id.to_string(),
            jobs: planned.len(),
        });

        let model_slug = safe_dir_name(model_id);
        let jobs: Vec<Job> = planned
            .iter()
            .map(|p| Job {
                framework: p.framework.clone(),
                level: p.level,
                model_id: model_id.to_string(),
                port: p.port,
                output_dir: out_dir
                    .join(p.framework.as_str())
                    .join(p.level.as_str())
                    .join(&model_slug),
            })
            .collect();

        let mut generated = Vec::with_capacity(jobs.len());
        for job in &jobs {
            self.emit(RunEvent::Generating {
                model_id: model_id.to_string(),
                framework: job.framework.clone(),
                level: job.level,
            });
            generated.push(self.generate(job).await);
        }

        let mut results = Vec::with_capacity(jobs.len());
        let mut stages = Vec::with_capacity(jobs.len());
        for (job, generation) in jobs.iter().zip(generated) {
            self.emit(RunEvent::GatesStarted {
                model_id: model_id.to_string(),
                framework: job.framework.clone(),
                level: job.level,
            });
            let mut stage = JobStage::default();
            let result = self.run_job_gates(job, generation, &mut stage).await?;
            info!(
                "[{}/{}] gate1={} gate2={}",
                job.framework, job.level, result.gate1.ok, result.gate2.ok
            );
            results.push(result);
            stages.push(stage);
        }

        self.run_gate3(model_id, &mut results, &mut stages).await?;

        for (result, stage) in results.iter().zip(stages.iter_mut()) {
            stage.advance(JobStage::Done)?;
            self.emit(RunEvent::JobFinished(Box::new(result.clone())));
        }
        self.emit(RunEvent::ModelFinished {
            model_id: model_id.to_string(),
        });
        Ok(results)
    }

    async fn generate(&self, job: &Job) -> HarnessResult<GeneratedAppSpec> {
        let chat = self
            .chat
            .as_ref()
            .ok_or_else(|| HarnessError::Model(self.chat_unavailable.clone()))?;
        generate_app(
            chat.as_ref(),
            &job.model_id,
            &job.framework,
            job.level,
            &self.config.host,
            job.port,
        )
        .await
    }

    /// Gates 1 and 2 for one job. They are independent: Gate 2 runs even
    /// when Gate 1 fails. Job-level failures (generation, job directory,
    /// artifacts) become a failed record; only stage violations propagate.
    async fn run_job_gates(
        &self,
        job: &Job,
        generation: HarnessResult<GeneratedAppSpec>,
        stage: &mut JobStage,
    ) -> HarnessResult<EvalResult> {
        let output_dir = job.output_dir.to_string_lossy().to_string();

        let artifact_failure = |e: std::io::Error| {
            let e = HarnessError::from(e);
            error!("Failed to write artifacts to {}: {}", output_dir, e);
            (
                format!("artifact write failed: {}", e.describe()),
                "artifact write failed",
            )
        };
        let prepared = std::fs::create_dir_all(&job.output_dir)
            .map_err(&artifact_failure)
            .and_then(|_| {
                generation.map_err(|e| {
                    error!("Generation failed for {}/{}: {}", job.framework, job.level, e);
                    (format!("generation failed: {}", e), "generation failed")
                })
            })
            .and_then(|spec| {
                write_app_artifacts(&job.output_dir, &spec).map_err(&artifact_failure)
            });

        if let Err((gate1_error, gate2_error)) = prepared {
            stage.advance(JobStage::Gate1Checked)?;
            stage.advance(JobStage::Gate2Skipped)?;
            return Ok(EvalResult {
                framework: job.framework.clone(),
                level: job.level,
                model_id: job.model_id.clone(),
                output_dir,
                gate1: Gate1Result::failed(gate1_error),
                gate2: Gate2Result::failed(gate2_error),
                gate3: None,
            });
        }

        let gate1 = self.gates.run_gate1(&job.output_dir.join("app.py")).await;
        stage.advance(JobStage::Gate1Checked)?;

        let gate2 = if self.config.enable_gate2 {
            self.gates
                .run_gate2(&job.framework, &job.output_dir, job.port)
                .await
        } else {
            Gate2Result::skipped("Gate 2 disabled")
        };
        stage.advance(if gate2.skipped_reason.is_some() {
            JobStage::Gate2Skipped
        } else {
            JobStage::Gate2Ran
        })?;

        Ok(EvalResult {
            framework: job.framework.clone(),
            level: job.level,
            model_id: job.model_id.clone(),
            output_dir,
            gate1,
            gate2,
            gate3: None,
        })
    }

    /// Gate 3 batch for one model's results
    async fn run_gate3(
        &self,
        model_id: &str,
        results: &mut [EvalResult],
        stages: &mut [JobStage],
    ) -> HarnessResult<()> {
        if !self.config.enable_gate3 {
            for stage in stages.iter_mut() {
                stage.advance(JobStage::Gate3Skipped)?;
            }
            return Ok(());
        }

        let mut cases = Vec::new();
        let mut queued = Vec::new();
        for (i, result) in results.iter_mut().enumerate() {
            match gate3_case(result) {
                Ok(case) => {
                    cases.push(case);
                    queued.push(i);
                }
                Err(skipped) => result.gate3 = Some(skipped),
            }
        }

        if !cases.is_empty() {
            self.emit(RunEvent::GradingStarted {
                model_id: model_id.to_string(),
                cases: cases.len(),
            });
            let mut graded = self.grade(model_id, &cases).await;
            for &i in &queued {
                let gate3 = match &mut graded {
                    Ok(by_dir) => by_dir.remove(&results[i].output_dir).unwrap_or_else(|| {
                        Gate3Result::failed("No Gate 3 result produced for this case")
                    }),
                    Err(message) => Gate3Result::failed(message.clone()),
                };
                results[i].gate3 = Some(gate3);
            }
        }

        for (i, stage) in stages.iter_mut().enumerate() {
            stage.advance(if queued.contains(&i) {
                JobStage::Gate3Ran
            } else {
                JobStage::Gate3Skipped
            })?;
        }
        Ok(())
    }

    /// Grade a batch; the error is the message recorded on every queued case
    async fn grade(
        &self,
        model_id: &str,
        cases: &[Gate3Case],
    ) -> Result<HashMap<String, Gate3Result>, String> {
        let chat = self
            .chat
            .as_ref()
            .ok_or_else(|| format!("Gate 3 unavailable: {}", self.chat_unavailable))?;
        let grader = self.config.gate3_grader_model.as_deref().unwrap_or_default();
        let options = GradingOptions {
            log_dir: self.config.gate3_log_dir(),
            max_samples: self.config.gate3_max_samples,
        };

        grade_screenshots(chat.as_ref(), cases, model_id, grader, &options)
            .await
            .map_err(|e| {
                error!("Gate 3 failed for {}: {}", model_id, e);
                format!("Gate 3 failed: {}", e)
            })
    }
}

/// Gate 3 case for a result, or the skip result explaining why there is none
fn gate3_case(result: &EvalResult) -> Result<Gate3Case, Gate3Result> {
    if !result.gate2.ok {
        return Err(Gate3Result::skipped("Gate 2 did not produce screenshots"));
    }

    let output_dir = PathBuf::from(&result.output_dir);
    let before = output_dir.join(SCREENSHOT_BEFORE);
    let after = output_dir.join(SCREENSHOT_AFTER);
    for path in [&before, &after] {
        if !path.is_file() {
            return Err(Gate3Result::skipped(format!(
                "Screenshot missing: {}",
                path.display()
            )));
        }
    }

    Ok(Gate3Case {
        framework: result.framework.clone(),
        level: result.level,
        model_id: result.model_id.clone(),
        output_dir,
        screenshot_before_path: before,
        screenshot_after_path: after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_ports_are_consecutive() {
        let frameworks = vec![Framework::Streamlit, Framework::Dash];
        let planned = plan_jobs(&frameworks, &ChallengeLevel::ALL, 8501).unwrap();
        assert_eq!(planned.len(), 8);
        let ports: Vec<u16> = planned.iter().map(|p| p.port).collect();
        assert_eq!(ports, (8501..8509).collect::<Vec<u16>>());
        assert_eq!(planned[4].framework, Framework::Dash);
        assert_eq!(planned[4].level, ChallengeLevel::Beginner);
    }

    #[test]
    fn test_plan_rejects_port_overflow() {
        let levels = [ChallengeLevel::Beginner, ChallengeLevel::Expert];
        assert!(plan_jobs(&[Framework::Gradio], &levels, 65535).is_err());
        assert!(plan_jobs(&[Framework::Gradio], &levels[..1], 65535).is_ok());
    }

    #[test]
    fn test_plan_drops_repeats() {
        let plan = RunPlan {
            frameworks: vec![Framework::Gradio, Framework::Dash, Framework::from("Gradio")],
            levels: vec![ChallengeLevel::Expert, ChallengeLevel::Expert],
            models: vec!["m".to_string(), "n".to_string(), "m".to_string()],
            out_dir: PathBuf::from("runs"),
        }
        .deduplicated();

        assert_eq!(plan.frameworks, vec![Framework::Gradio, Framework::Dash]);
        assert_eq!(plan.levels, vec![ChallengeLevel::Expert]);
        assert_eq!(plan.models, vec!["m", "n"]);
        assert_eq!(plan.job_count(), 4);
    }

    #[test]
    fn test_safe_dir_name() {
        assert_eq!(
            safe_dir_name("us.anthropic.claude-sonnet-4-5-20250929-v1:0"),
            "us.anthropic.claude-sonnet-4-5-20250929-v10"
        );
        assert_eq!(safe_dir_name("..org/model name.."), "orgmodelname");
        assert_eq!(safe_dir_name("::"), "model");
    }

    #[test]
    fn test_write_artifact_normalizes_trailing_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app.py");
        write_artifact(&path, "print('x')\n\n   \n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "print('x')\n");

        write_artifact(&path, "").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "\n");
    }

    fn result_with_gate2(dir: &Path, ok: bool) -> EvalResult {
        EvalResult {
            framework: Framework::Shiny,
            level: ChallengeLevel::Advanced,
            model_id: "m".to_string(),
            output_dir: dir.to_string_lossy().to_string(),
            gate1: Gate1Result::passed(),
            gate2: Gate2Result {
                ok,
                ..Default::default()
            },
            gate3: None,
        }
    }

    #[test]
    fn test_gate3_case_skip_reasons() {
        let dir = tempfile::tempdir().unwrap();

        let skipped = gate3_case(&result_with_gate2(dir.path(), false)).unwrap_err();
        assert_eq!(
            skipped.skipped_reason.as_deref(),
            Some("Gate 2 did not produce screenshots")
        );
        assert!(!skipped.ok);

        std::fs::write(dir.path().join(SCREENSHOT_BEFORE), b"png").unwrap();
        let skipped = gate3_case(&result_with_gate2(dir.path(), true)).unwrap_err();
        let reason = skipped.skipped_reason.unwrap();
        assert!(reason.starts_with("Screenshot missing: "));
        assert!(reason.ends_with(SCREENSHOT_AFTER));

        std::fs::write(dir.path().join(SCREENSHOT_AFTER), b"png").unwrap();
        let case = gate3_case(&result_with_gate2(dir.path(), true)).unwrap();
        assert_eq!(case.framework, Framework::Shiny);
    }
}
