//! End-to-end runs of the evaluation pipeline with scripted models
//!
//! Models, environments and the browser are replaced with in-process fakes;
//! processes, readiness polling, artifacts and summaries are real.

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use uibench_common::{ChallengeLevel, EvalConfig, EvalResult, Framework};
use uibench_harness::runner::RunEvent;
use uibench_harness::{
    CaptureReport, CaptureRequest, ChatMessage, ChatModel, EvalRunner, GateRunner,
    HarnessError, HarnessResult, Provisioner, RunPlan, ScreenshotCapturer,
};

const GOOD_APP: &str = r#"{"code": "import gradio as gr\n\ndemo = gr.Interface(lambda n: f'Hello, {n}!', 'text', 'text')\ndemo.launch()\n\n\n", "run_command": "python app.py  ", "requirements_txt": "gradio", "instructions": "Run it."}"#;
const BROKEN_APP: &str = r#"{"code": "def main(:\n    pass", "run_command": "python app.py", "requirements_txt": "", "instructions": ""}"#;

/// Generation, solver and grader replies keyed on the prompt
struct ScriptedModels {
    generation_calls: Mutex<Vec<String>>,
}

impl ScriptedModels {
    fn new() -> Self {
        Self {
            generation_calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModels {
    async fn complete(&self, model: &str, messages: Vec<ChatMessage>) -> HarnessResult<String> {
        let prompt = messages[0].text();

        if prompt.starts_with("You are an expert Python UI engineer.") {
            self.generation_calls.lock().push(model.to_string());
            return match model {
                "broken-model" => Ok(BROKEN_APP.to_string()),
                "offline-model" => Err(HarnessError::Model("connection refused".to_string())),
                _ if prompt.contains("Create a shiny app") => Ok("I can't do that.".to_string()),
                _ => Ok(GOOD_APP.to_string()),
            };
        }
        if model == "grader" {
            return Ok("GRADE: C\nThe greeting is visible.".to_string());
        }
        Ok("ANSWER: PASS\nREASON: the greeting appears after clicking.".to_string())
    }
}

/// Provisioner that fakes a venv whose interpreter just idles
struct IdleInterpreter;

#[async_trait]
impl Provisioner for IdleInterpreter {
    async fn ensure_environment(&self, app_dir: &Path, _extra: &[String]) -> HarnessResult<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let venv = app_dir.join(".venv");
        let bin = venv.join("bin");
        std::fs::create_dir_all(&bin)?;
        let python = bin.join("python");
        std::fs::write(&python, "#!/bin/sh\necho \"serving $1\"\nexec sleep 30\n")?;
        std::fs::set_permissions(&python, std::fs::Permissions::from_mode(0o755))?;
        Ok(venv)
    }
}

struct PaintingCapturer;

#[async_trait]
impl ScreenshotCapturer for PaintingCapturer {
    async fn capture(&self, request: &CaptureRequest) -> HarnessResult<CaptureReport> {
        RgbaImage::from_pixel(8, 8, Rgba([250, 250, 250, 255])).save(&request.before_path)?;
        RgbaImage::from_pixel(8, 8, Rgba([10, 10, 10, 255])).save(&request.after_path)?;
        Ok(CaptureReport::default())
    }
}

fn offline_gates(config: &EvalConfig) -> GateRunner {
    GateRunner::new(config, Arc::new(IdleInterpreter), Arc::new(PaintingCapturer))
}

fn plan(out_dir: &Path, frameworks: Vec<Framework>, models: &[&str]) -> RunPlan {
    RunPlan {
        frameworks,
        levels: ChallengeLevel::ALL.to_vec(),
        models: models.iter().map(|m| m.to_string()).collect(),
        out_dir: out_dir.to_path_buf(),
    }
}

/// A 200-only HTTP responder on a free port
async fn ready_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                    .await;
            });
        }
    });
    port
}

fn find<'a>(results: &'a [EvalResult], framework: &Framework, level: ChallengeLevel, model: &str) -> &'a EvalResult {
    results
        .iter()
        .find(|r| &r.framework == framework && r.level == level && r.model_id == model)
        .unwrap()
}

#[tokio::test]
async fn test_every_combination_produces_one_record() {
    let out = tempfile::tempdir().unwrap();
    let mut config = EvalConfig::default();
    config.enable_gate2 = false;
    config.base_port = 9100;

    let models = Arc::new(ScriptedModels::new());
    let runner = EvalRunner::new(config.clone(), offline_gates(&config), Some(models.clone() as Arc<dyn ChatModel>));
    let frameworks = vec![Framework::Gradio, Framework::Shiny, Framework::Dash];

    let outcome = runner
        .run_evaluation(&plan(out.path(), frameworks.clone(), &["model-a", "us.vendor.model-v1:0"]))
        .await
        .unwrap();

    // F × L × M
    assert_eq!(outcome.results.len(), 3 * 4 * 2);
    assert_eq!(models.generation_calls.lock().len(), 24);

    for result in &outcome.results {
        assert_eq!(result.gate2.skipped_reason.as_deref(), Some("Gate 2 disabled"));
        assert!(result.gate3.is_none());
    }

    let gradio = find(&outcome.results, &Framework::Gradio, ChallengeLevel::Beginner, "model-a");
    assert!(gradio.gate1.ok, "{:?}", gradio.gate1.error);
    let job_dir = out.path().join("gradio").join("beginner").join("model-a");
    assert_eq!(gradio.output_dir, job_dir.to_string_lossy());
    assert_eq!(
        std::fs::read_to_string(job_dir.join("RUN_COMMAND.txt")).unwrap(),
        "python app.py\n"
    );
    assert!(std::fs::read_to_string(job_dir.join("app.py"))
        .unwrap()
        .ends_with("demo.launch()\n"));
    assert_eq!(
        std::fs::read_to_string(job_dir.join("requirements.txt")).unwrap(),
        "gradio\n"
    );
    assert!(job_dir.join("INSTRUCTIONS.md").is_file());
    assert!(out
        .path()
        .join("dash")
        .join("expert")
        .join("us.vendor.model-v10")
        .join("app.py")
        .is_file());

    // Unparseable output becomes the placeholder app, which still parses
    let shiny = find(&outcome.results, &Framework::Shiny, ChallengeLevel::Beginner, "model-a");
    assert!(shiny.gate1.ok);
    let placeholder = out.path().join("shiny").join("beginner").join("model-a").join("app.py");
    assert_eq!(
        std::fs::read_to_string(placeholder).unwrap(),
        "# Failed to parse response\n"
    );

    // Summary holds every record
    let name = outcome.summary_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("summary_") && name.ends_with(".json"));
    let summary: Vec<EvalResult> =
        serde_json::from_str(&std::fs::read_to_string(&outcome.summary_path).unwrap()).unwrap();
    assert_eq!(summary, outcome.results);
}

#[tokio::test]
async fn test_generation_failures_become_records() {
    let out = tempfile::tempdir().unwrap();
    let mut config = EvalConfig::default();
    config.enable_gate2 = false;

    let runner = EvalRunner::new(
        config.clone(),
        offline_gates(&config),
        Some(Arc::new(ScriptedModels::new())),
    );
    let outcome = runner
        .run_evaluation(&plan(out.path(), vec![Framework::Panel], &["offline-model", "broken-model"]))
        .await
        .unwrap();
    assert_eq!(outcome.results.len(), 8);

    let offline = find(&outcome.results, &Framework::Panel, ChallengeLevel::Advanced, "offline-model");
    assert!(!offline.gate1.ok);
    assert!(offline
        .gate1
        .error
        .as_deref()
        .unwrap()
        .starts_with("generation failed: "));
    assert_eq!(offline.gate2.error.as_deref(), Some("generation failed"));

    let broken = find(&outcome.results, &Framework::Panel, ChallengeLevel::Advanced, "broken-model");
    assert!(!broken.gate1.ok);
    assert!(broken.gate1.error.as_deref().unwrap().contains("SyntaxError"));
}

#[tokio::test]
async fn test_gate3_without_grader_aborts_before_any_job() {
    let out = tempfile::tempdir().unwrap();
    let mut config = EvalConfig::default();
    config.enable_gate3 = true;
    config.gate3_grader_model = None;

    let models = Arc::new(ScriptedModels::new());
    let runner = EvalRunner::new(config.clone(), offline_gates(&config), Some(models.clone() as Arc<dyn ChatModel>));
    let err = runner
        .run_evaluation(&plan(out.path(), vec![Framework::Streamlit], &["model-a"]))
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::Config(_)));
    assert!(models.generation_calls.lock().is_empty());
    assert!(!out.path().join("streamlit").exists());
}

#[tokio::test]
async fn test_gate3_skips_jobs_without_screenshots() {
    let out = tempfile::tempdir().unwrap();
    let mut config = EvalConfig::default();
    config.enable_gate2 = false;
    config.enable_gate3 = true;
    config.gate3_grader_model = Some("grader".to_string());
    config.gate3_log_dir = Some(out.path().join("logs"));

    let runner = EvalRunner::new(
        config.clone(),
        offline_gates(&config),
        Some(Arc::new(ScriptedModels::new())),
    );
    let outcome = runner
        .run_evaluation(&plan(out.path(), vec![Framework::Gradio], &["model-a"]))
        .await
        .unwrap();

    for result in &outcome.results {
        let gate3 = result.gate3.as_ref().unwrap();
        assert!(!gate3.ok);
        assert_eq!(
            gate3.skipped_reason.as_deref(),
            Some("Gate 2 did not produce screenshots")
        );
    }
    assert!(!out.path().join("logs").exists());
}

#[tokio::test]
async fn test_missing_endpoint_degrades_gate3() {
    let out = tempfile::tempdir().unwrap();
    let mut config = EvalConfig::default();
    config.enable_gate3 = true;
    config.gate3_grader_model = Some("grader".to_string());

    // No model endpoint at all: every job fails generation, nothing is graded
    let runner = EvalRunner::new(config.clone(), offline_gates(&config), None);
    let outcome = runner
        .run_evaluation(&plan(out.path(), vec![Framework::Dash], &["model-a"]))
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 4);
    for result in &outcome.results {
        assert!(result.gate1.error.as_deref().unwrap().contains("No model endpoint configured"));
        assert!(result.gate3.as_ref().unwrap().skipped_reason.is_some());
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_full_pipeline_through_gate3() {
    let out = tempfile::tempdir().unwrap();
    let mut config = EvalConfig::default();
    config.base_port = ready_port().await;
    config.teardown_grace_secs = 2;
    config.enable_gate3 = true;
    config.gate3_grader_model = Some("grader".to_string());
    config.gate3_log_dir = Some(out.path().join("logs"));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let runner = EvalRunner::new(
        config.clone(),
        offline_gates(&config),
        Some(Arc::new(ScriptedModels::new())),
    )
    .with_events(tx);

    let mut run_plan = plan(out.path(), vec![Framework::Gradio], &["model-a"]);
    run_plan.levels = vec![ChallengeLevel::Beginner];
    let outcome = runner.run_evaluation(&run_plan).await.unwrap();

    assert_eq!(outcome.results.len(), 1);
    let result = &outcome.results[0];

    assert!(result.gate1.ok);
    assert!(result.gate2.ok, "{:?}", result.gate2.error);
    assert_eq!(
        result.gate2.url.as_deref(),
        Some(format!("http://127.0.0.1:{}", config.base_port).as_str())
    );
    assert!(Path::new(result.gate2.screenshot_before_path.as_deref().unwrap()).is_file());
    assert!(Path::new(result.gate2.screenshot_after_path.as_deref().unwrap()).is_file());
    assert!(result.gate2.visual_change_percent.unwrap() > 99.0);

    let gate3 = result.gate3.as_ref().unwrap();
    assert!(gate3.ok, "{:?}", gate3.error);
    assert_eq!(gate3.passed, Some(true));
    assert_eq!(gate3.solver_answer.as_deref(), Some("PASS"));
    assert_eq!(gate3.grader_score.as_deref(), Some("C"));
    assert!(Path::new(gate3.inspect_log.as_deref().unwrap()).is_file());

    let mut saw_grading = false;
    let mut saw_summary = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            RunEvent::GradingStarted { cases, .. } => {
                assert_eq!(cases, 1);
                saw_grading = true;
            }
            RunEvent::SummaryWritten { path } => {
                assert_eq!(path, outcome.summary_path);
                saw_summary = true;
            }
            _ => {}
        }
    }
    assert!(saw_grading && saw_summary);
}

#[tokio::test]
async fn test_unwritable_job_directory_fails_only_that_job() {
    let out = tempfile::tempdir().unwrap();
    // A file where the dash tree should go
    std::fs::write(out.path().join("dash"), "not a directory").unwrap();
    let mut config = EvalConfig::default();
    config.enable_gate2 = false;

    let runner = EvalRunner::new(
        config.clone(),
        offline_gates(&config),
        Some(Arc::new(ScriptedModels::new())),
    );
    let outcome = runner
        .run_evaluation(&plan(out.path(), vec![Framework::Gradio, Framework::Dash], &["model-a"]))
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 8);
    assert!(outcome.summary_path.is_file());
    for result in &outcome.results {
        if result.framework == Framework::Dash {
            assert!(!result.gate1.ok);
            assert!(result
                .gate1
                .error
                .as_deref()
                .unwrap()
                .starts_with("artifact write failed: OSError: "));
            assert!(!result.gate2.ok);
            assert_eq!(result.gate2.error.as_deref(), Some("artifact write failed"));
        } else {
            assert!(result.gate1.ok, "{:?}", result.gate1.error);
        }
    }
}

#[tokio::test]
async fn test_failed_artifact_write_skips_the_gates() {
    let out = tempfile::tempdir().unwrap();
    let blocked = out.path().join("gradio").join("beginner").join("model-a");
    std::fs::create_dir_all(blocked.join("app.py")).unwrap();
    let mut config = EvalConfig::default();
    config.enable_gate2 = false;

    let runner = EvalRunner::new(
        config.clone(),
        offline_gates(&config),
        Some(Arc::new(ScriptedModels::new())),
    );
    let outcome = runner
        .run_evaluation(&plan(out.path(), vec![Framework::Gradio], &["model-a"]))
        .await
        .unwrap();

    let result = find(&outcome.results, &Framework::Gradio, ChallengeLevel::Beginner, "model-a");
    assert!(result.gate1.error.as_deref().unwrap().contains("artifact write failed"));
    assert_eq!(result.gate2.error.as_deref(), Some("artifact write failed"));
    assert!(result.gate2.skipped_reason.is_none());

    let other = find(&outcome.results, &Framework::Gradio, ChallengeLevel::Expert, "model-a");
    assert!(other.gate1.ok);
}
