//! uibench gate pipeline
//!
//! Generates GUI apps with a model and validates each one through three
//! gates:
//! - Gate 1 compiles the generated `app.py`
//! - Gate 2 installs its dependencies, launches it, waits for HTTP 200 and
//!   captures before/after screenshots around a generic interaction pass
//! - Gate 3 asks a solver model for a PASS/FAIL verdict on the screenshots
//!   and a grader model to judge that verdict
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  EvalRunner (run aggregator)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  for model in models:                                       │
//! │    generate_app()       -> app.py, requirements.txt, ...    │
//! │    GateRunner::run_gate1() -> Gate1Result                   │
//! │    GateRunner::run_gate2()                                  │
//! │      ├── Provisioner::ensure_environment()   (uv)           │
//! │      ├── AppProcess::spawn() / shutdown()                   │
//! │      ├── wait_until_ready()                                 │
//! │      ├── ScreenshotCapturer::capture()       (Playwright)   │
//! │      └── compare_captures()                                 │
//! │    grade_screenshots()  -> Gate3Result per job              │
//! │  write summary_<timestamp>.json                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod environment;
pub mod error;
pub mod gates;
pub mod generation;
pub mod grading;
pub mod launcher;
pub mod llm;
pub mod probe;
pub mod prompts;
pub mod readiness;
pub mod runner;
pub mod visual;

pub use capture::{CaptureReport, CaptureRequest, PlaywrightCapturer, ScreenshotCapturer};
pub use environment::{Provisioner, UvProvisioner};
pub use error::{HarnessError, HarnessResult};
pub use gates::{compile_check, compile_check_file, GateRunner, PythonCompiler};
pub use grading::{grade_screenshots, Gate3Case, GradingOptions};
pub use llm::{ChatClient, ChatMessage, ChatModel, ContentPart};
pub use probe::{InteractionPolicy, ProbeStep, TipScenario};
pub use runner::{EvalRunner, RunEvent, RunOutcome, RunPlan};
