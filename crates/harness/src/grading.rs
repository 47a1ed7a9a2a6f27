//! Gate 3: model-graded verdicts over before/after screenshots
//!
//! A solver model looks at both screenshots and answers PASS or FAIL; a
//! separate grader model judges whether that answer is correct. Each batch is
//! recorded in one JSON log holding every prompt, completion and score.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use uibench_common::{ChallengeLevel, Framework, Gate3Result};

use crate::error::HarnessResult;
use crate::llm::{ChatMessage, ChatModel, ContentPart};
use crate::prompts::{grader_prompt, solver_question, GRADING_CRITERION};

/// Task name recorded in batch logs
pub const GRADING_TASK: &str = "gate3_dashboard_screenshot";

/// One job's screenshots, queued for grading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gate3Case {
    pub framework: Framework,
    pub level: ChallengeLevel,
    pub model_id: String,
    pub output_dir: PathBuf,
    pub screenshot_before_path: PathBuf,
    pub screenshot_after_path: PathBuf,
}

impl Gate3Case {
    fn id(&self) -> String {
        self.output_dir.to_string_lossy().to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GradingOptions {
    /// Directory batch logs are written to
    pub log_dir: PathBuf,
    /// Cases graded concurrently; all of them when `None`
    pub max_samples: Option<usize>,
}

fn answer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*ANSWER\s*:\s*(PASS|FAIL)\s*$").expect("valid regex"))
}

fn grade_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*GRADE\s*:\s*(C|I)\s*$").expect("valid regex"))
}

/// Solver verdict, upper-cased (`PASS` / `FAIL`)
pub fn extract_answer(completion: &str) -> Option<String> {
    answer_re()
        .captures(completion)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// Grader score, upper-cased (`C` / `I`)
pub fn extract_grade(completion: &str) -> Option<String> {
    grade_re()
        .captures(completion)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// The grader's reasoning: what follows the grade line, or everything
fn grader_explanation(completion: &str) -> Option<String> {
    let after_grade = grade_re()
        .find(completion)
        .map(|m| completion[m.end()..].trim())
        .filter(|rest| !rest.is_empty());
    let text = after_grade.unwrap_or_else(|| completion.trim());
    (!text.is_empty()).then(|| text.to_string())
}

/// A verdict counts only when the grader accepts a well-formed answer
fn resolve_passed(grade: Option<&str>, answer: Option<&str>) -> Option<bool> {
    match (grade, answer) {
        (Some("C"), Some("PASS")) => Some(true),
        (Some("C"), Some("FAIL")) => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
struct SampleMetadata {
    framework: String,
    level: String,
    model_id: String,
    output_dir: String,
    screenshot_before: String,
    screenshot_after: String,
}

/// One graded sample as written to the batch log
#[derive(Debug, Clone, Serialize)]
struct SampleRecord {
    id: String,
    metadata: SampleMetadata,
    question: String,
    criterion: String,
    solver_completion: Option<String>,
    grader_completion: Option<String>,
    solver_answer: Option<String>,
    grade: Option<String>,
    passed: Option<bool>,
    error: Option<String>,
}

impl SampleRecord {
    fn new(case: &Gate3Case, question: String) -> Self {
        Self {
            id: case.id(),
            metadata: SampleMetadata {
                framework: case.framework.to_string(),
                level: case.level.to_string(),
                model_id: case.model_id.clone(),
                output_dir: case.id(),
                screenshot_before: case.screenshot_before_path.to_string_lossy().to_string(),
                screenshot_after: case.screenshot_after_path.to_string_lossy().to_string(),
            },
            question,
            criterion: GRADING_CRITERION.to_string(),
            solver_completion: None,
            grader_completion: None,
            solver_answer: None,
            grade: None,
            passed: None,
            error: None,
        }
    }

    fn to_result(&self, inspect_log: Option<String>) -> Gate3Result {
        if let Some(error) = &self.error {
            return Gate3Result {
                ok: false,
                solver_answer: self.solver_answer.clone(),
                inspect_log,
                error: Some(error.clone()),
                grader_explanation: self.grader_completion.as_deref().and_then(grader_explanation),
                ..Default::default()
            };
        }
        Gate3Result {
            ok: true,
            passed: self.passed,
            solver_answer: self.solver_answer.clone(),
            grader_score: self.grade.clone(),
            grader_explanation: self.grader_completion.as_deref().and_then(grader_explanation),
            inspect_log,
            error: None,
            skipped_reason: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct BatchLog<'a> {
    task: &'static str,
    created: String,
    solver_model: &'a str,
    grader_model: &'a str,
    max_samples: usize,
    samples: &'a [SampleRecord],
}

async fn screenshot_parts(case: &Gate3Case) -> HarnessResult<Vec<ContentPart>> {
    Ok(vec![
        ContentPart::text("Screenshot 1 (before interaction)"),
        ContentPart::png_file(&case.screenshot_before_path).await?,
        ContentPart::text("Screenshot 2 (after interaction)"),
        ContentPart::png_file(&case.screenshot_after_path).await?,
    ])
}

async fn grade_case(
    chat: &dyn ChatModel,
    case: &Gate3Case,
    solver_model: &str,
    grader_model: &str,
) -> SampleRecord {
    let question = solver_question(&case.framework, case.level);
    let mut record = SampleRecord::new(case, question.clone());

    let images = match screenshot_parts(case).await {
        Ok(images) => images,
        Err(e) => {
            record.error = Some(e.describe());
            return record;
        }
    };

    let mut solver_parts = images.clone();
    solver_parts.push(ContentPart::text(question.clone()));
    let solver_completion = match chat
        .complete(solver_model, vec![ChatMessage::user_parts(solver_parts)])
        .await
    {
        Ok(text) => text,
        Err(e) => {
            warn!("Solver call failed for {}: {}", record.id, e);
            record.error = Some(format!("Solver call failed: {}", e.describe()));
            return record;
        }
    };
    record.solver_answer = extract_answer(&solver_completion);
    record.solver_completion = Some(solver_completion.clone());

    let mut grader_parts = vec![ContentPart::text(grader_prompt(
        &question,
        &solver_completion,
        GRADING_CRITERION,
    ))];
    grader_parts.extend(images);
    let grader_completion = match chat
        .complete(grader_model, vec![ChatMessage::user_parts(grader_parts)])
        .await
    {
        Ok(text) => text,
        Err(e) => {
            warn!("Grader call failed for {}: {}", record.id, e);
            record.error = Some(format!("Grader call failed: {}", e.describe()));
            return record;
        }
    };
    record.grade = extract_grade(&grader_completion);
    record.grader_completion = Some(grader_completion);

    if record.grade.is_none() {
        record.error = Some("No grade found in grader output.".to_string());
        return record;
    }

    record.passed = resolve_passed(record.grade.as_deref(), record.solver_answer.as_deref());
    debug!(
        "Graded {}: answer={:?} grade={:?} passed={:?}",
        record.id, record.solver_answer, record.grade, record.passed
    );
    record
}

/// Grade a batch of cases. Returns results keyed by output directory.
///
/// Cases whose screenshots no longer exist are left out of the batch.
/// Per-case model failures become `ok=false` results; only log-directory
/// failures fail the whole batch.
pub async fn grade_screenshots(
    chat: &dyn ChatModel,
    cases: &[Gate3Case],
    solver_model: &str,
    grader_model: &str,
    options: &GradingOptions,
) -> HarnessResult<HashMap<String, Gate3Result>> {
    let cases: Vec<&Gate3Case> = cases
        .iter()
        .filter(|case| {
            let present =
                case.screenshot_before_path.is_file() && case.screenshot_after_path.is_file();
            if !present {
                warn!("Screenshots vanished for {}, not grading", case.id());
            }
            present
        })
        .collect();

    if cases.is_empty() {
        return Ok(HashMap::new());
    }

    tokio::fs::create_dir_all(&options.log_dir).await?;

    let limit = options.max_samples.unwrap_or(cases.len()).max(1);
    info!(
        "Grading {} case(s) with solver {} and grader {} ({} at a time)",
        cases.len(),
        solver_model,
        grader_model,
        limit
    );

    let mut records: Vec<SampleRecord> = stream::iter(cases)
        .map(|case| grade_case(chat, case, solver_model, grader_model))
        .buffer_unordered(limit)
        .collect()
        .await;
    records.sort_by(|a, b| a.id.cmp(&b.id));

    let log_path = write_batch_log(&options.log_dir, solver_model, grader_model, limit, &records).await?;
    let inspect_log = log_path.to_string_lossy().to_string();
    info!("Wrote Gate 3 log: {}", inspect_log);

    Ok(records
        .iter()
        .map(|record| (record.id.clone(), record.to_result(Some(inspect_log.clone()))))
        .collect())
}

async fn write_batch_log(
    log_dir: &Path,
    solver_model: &str,
    grader_model: &str,
    max_samples: usize,
    samples: &[SampleRecord],
) -> HarnessResult<PathBuf> {
    let now = Utc::now();
    let path = log_dir.join(format!("gate3_{}.json", now.format("%Y%m%d_%H%M%S_%3f")));
    let log = BatchLog {
        task: GRADING_TASK,
        created: now.to_rfc3339(),
        solver_model,
        grader_model,
        max_samples,
        samples,
    };
    tokio::fs::write(&path, serde_json::to_string_pretty(&log)?).await?;
    Ok(path)
}
