//! Gate 1 (static syntax check) and Gate 2 (launch + capture)

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use tree_sitter::{Node, Parser};

use uibench_common::{EvalConfig, Framework, Gate1Result, Gate2Result};

use crate::capture::{CaptureReport, CaptureRequest, PlaywrightCapturer, ScreenshotCapturer};
use crate::environment::{Provisioner, UvProvisioner, VENV_DIR};
use crate::error::{HarnessError, HarnessResult};
use crate::launcher::{framework_runtime, AppProcess, FrameworkRuntime};
use crate::probe::InteractionPolicy;
use crate::readiness::{wait_until_ready, DEFAULT_POLL_INTERVAL};
use crate::visual::{compare_captures, CaptureComparison};

/// Screenshot taken before any interaction
pub const SCREENSHOT_BEFORE: &str = "dashboard_before.png";
/// Screenshot taken after the probe sequence
pub const SCREENSHOT_AFTER: &str = "dashboard_after.png";

/// Compiles `argv[1]` with CPython and prints `<Kind>: <message>` on failure
const PY_COMPILE_SCRIPT: &str = r#"import sys
path = sys.argv[1]
try:
    with open(path, "rb") as f:
        source = f.read()
    compile(source, path, "exec", dont_inherit=True)
except (SyntaxError, ValueError, OSError) as e:
    print(type(e).__name__ + ": " + str(e))
    sys.exit(1)
"#;

/// Upper bound on one interpreter compile
const COMPILE_TIMEOUT: Duration = Duration::from_secs(30);

/// Gate 1 through a real CPython compile
#[derive(Debug, Clone)]
pub struct PythonCompiler {
    interpreter: PathBuf,
    timeout: Duration,
}

impl PythonCompiler {
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout: COMPILE_TIMEOUT,
        }
    }

    /// Compile `path`. `None` means the interpreter could not give a verdict
    /// (missing, crashed, timed out).
    pub async fn check_file(&self, path: &Path) -> Option<Gate1Result> {
        let mut command = Command::new(&self.interpreter);
        command
            .arg("-c")
            .arg(PY_COMPILE_SCRIPT)
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Python interpreter {} unusable: {}", self.interpreter.display(), e);
                return None;
            }
            Err(_) => {
                warn!("Compiling {} timed out after {:?}", path.display(), self.timeout);
                return None;
            }
        };

        if output.status.success() {
            return Some(Gate1Result::passed());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let verdict = stdout.lines().map(str::trim).find(|line| !line.is_empty());
        match (output.status.code(), verdict) {
            (Some(1), Some(line)) if line.contains(": ") => {
                debug!("Gate 1 failed: {}", line);
                Some(Gate1Result::failed(line))
            }
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    "Python interpreter {} exited with {} without a verdict: {}",
                    self.interpreter.display(),
                    output.status,
                    stderr.trim()
                );
                None
            }
        }
    }
}

/// Gate 1 without an interpreter: parse `source` with tree-sitter, then
/// reject what CPython refuses at compile time.
pub fn compile_check(source: &str) -> Gate1Result {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&tree_sitter_python::language()) {
        return Gate1Result::failed(format!("LanguageError: {}", e));
    }

    let Some(tree) = parser.parse(source, None) else {
        return Gate1Result::failed("SyntaxError: source could not be parsed");
    };

    let root = tree.root_node();
    let message = if root.has_error() {
        Some(match first_syntax_error(root) {
            Some(node) => {
                let pos = node.start_position();
                if node.is_missing() {
                    format!(
                        "SyntaxError: expected '{}' at line {}, column {}",
                        node.kind(),
                        pos.row + 1,
                        pos.column + 1
                    )
                } else {
                    format!(
                        "SyntaxError: invalid syntax at line {}, column {}",
                        pos.row + 1,
                        pos.column + 1
                    )
                }
            }
            None => "SyntaxError: invalid syntax".to_string(),
        })
    } else {
        first_compile_error(root)
    };

    match message {
        Some(message) => {
            debug!("Gate 1 failed: {}", message);
            Gate1Result::failed(message)
        }
        None => Gate1Result::passed(),
    }
}

/// Gate 1 on a file; unreadable files fail the gate
pub fn compile_check_file(path: &Path) -> Gate1Result {
    match std::fs::read_to_string(path) {
        Ok(source) => compile_check(&source),
        Err(e) => Gate1Result::failed(format!("OSError: {}: {}", path.display(), e)),
    }
}

/// Earliest error or missing node, in source order
fn first_syntax_error<'t>(node: Node<'t>) -> Option<Node<'t>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_syntax_error)
}

/// Earliest construct that parses but does not compile, in source order
fn first_compile_error(node: Node<'_>) -> Option<String> {
    if let Some(message) = compile_error_at(node) {
        return Some(message);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_compile_error)
}

fn compile_error_at(node: Node<'_>) -> Option<String> {
    if !node.is_named() {
        return None;
    }
    let pos = node.start_position();
    let at = |message: &str| {
        format!(
            "SyntaxError: {} at line {}, column {}",
            message,
            pos.row + 1,
            pos.column + 1
        )
    };

    match node.kind() {
        // A header followed by an unindented line parses as an empty block
        "block" if is_empty_block(node) => {
            let header = node.parent()?;
            Some(format!(
                "IndentationError: expected an indented block after {} on line {}",
                describe_header(header.kind()),
                header.start_position().row + 1
            ))
        }
        "return_statement" => match enclosing_scope(node) {
            Some(scope) if scope.kind() == "function_definition" => None,
            _ => Some(at("'return' outside function")),
        },
        "yield" => match enclosing_scope(node) {
            Some(scope) if matches!(scope.kind(), "function_definition" | "lambda") => None,
            _ => Some(at("'yield' outside function")),
        },
        "await" => match enclosing_scope(node) {
            Some(scope) if is_async_function(scope) => None,
            Some(scope) if matches!(scope.kind(), "function_definition" | "lambda") => {
                Some(at("'await' outside async function"))
            }
            _ => Some(at("'await' outside function")),
        },
        "break_statement" if !inside_loop(node) => Some(at("'break' outside loop")),
        "continue_statement" if !inside_loop(node) => {
            Some(at("'continue' not properly in loop"))
        }
        "print_statement" => Some(at(
            "Missing parentheses in call to 'print'. Did you mean print(...)?",
        )),
        "exec_statement" => Some(at(
            "Missing parentheses in call to 'exec'. Did you mean exec(...)?",
        )),
        _ => None,
    }
}

fn is_empty_block(block: Node<'_>) -> bool {
    let mut cursor = block.walk();
    let empty = block
        .named_children(&mut cursor)
        .all(|child| child.kind() == "comment");
    empty
}

fn describe_header(kind: &str) -> String {
    match kind {
        "function_definition" => "function definition".to_string(),
        "class_definition" => "class definition".to_string(),
        other => {
            let keyword = other
                .strip_suffix("_statement")
                .or_else(|| other.strip_suffix("_clause"))
                .unwrap_or(other);
            let keyword = keyword.strip_suffix("_group").unwrap_or(keyword);
            format!("'{}' statement", keyword)
        }
    }
}

/// Nearest function, lambda or class around `node`
fn enclosing_scope<'t>(node: Node<'t>) -> Option<Node<'t>> {
    let mut current = node.parent();
    while let Some(candidate) = current {
        if matches!(
            candidate.kind(),
            "function_definition" | "lambda" | "class_definition"
        ) {
            return Some(candidate);
        }
        current = candidate.parent();
    }
    None
}

fn is_async_function(node: Node<'_>) -> bool {
    node.kind() == "function_definition"
        && node.child(0).map(|first| first.kind() == "async").unwrap_or(false)
}

/// Whether a `break`/`continue` sits in a loop body of its own scope. The
/// `else` clause of a loop does not count as that loop's body.
fn inside_loop(node: Node<'_>) -> bool {
    let mut previous = node;
    let mut current = node.parent();
    while let Some(candidate) = current {
        match candidate.kind() {
            "for_statement" | "while_statement" if previous.kind() != "else_clause" => {
                return true
            }
            "function_definition" | "class_definition" | "lambda" => return false,
            _ => {}
        }
        previous = candidate;
        current = candidate.parent();
    }
    false
}

/// Runs Gates 1 and 2 for one job directory
pub struct GateRunner {
    compiler: Option<PythonCompiler>,
    host: String,
    startup_timeout_override: Option<Duration>,
    teardown_grace: Duration,
    poll_interval: Duration,
    action_timeout_ms: u64,
    provisioner: Arc<dyn Provisioner>,
    capturer: Arc<dyn ScreenshotCapturer>,
}

impl GateRunner {
    pub fn new(
        config: &EvalConfig,
        provisioner: Arc<dyn Provisioner>,
        capturer: Arc<dyn ScreenshotCapturer>,
    ) -> Self {
        Self {
            compiler: config.tools.python_binary.clone().map(PythonCompiler::new),
            host: config.host.clone(),
            startup_timeout_override: config.startup_timeout_secs.map(Duration::from_secs),
            teardown_grace: Duration::from_secs(config.teardown_grace_secs),
            poll_interval: DEFAULT_POLL_INTERVAL,
            action_timeout_ms: config.capture.action_timeout_ms,
            provisioner,
            capturer,
        }
    }

    /// Production wiring: `uv` environments and Playwright capture
    pub fn from_config(config: &EvalConfig) -> Self {
        Self::new(
            config,
            Arc::new(UvProvisioner::new(config.tools.uv_binary.clone())),
            Arc::new(PlaywrightCapturer::new(
                config.tools.node_binary.clone(),
                &config.capture,
            )),
        )
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Gate 1: compile `app_path` with CPython, or with the built-in parser
    /// when no interpreter gives a verdict
    pub async fn run_gate1(&self, app_path: &Path) -> Gate1Result {
        if let Some(compiler) = &self.compiler {
            if let Some(result) = compiler.check_file(app_path).await {
                return result;
            }
            debug!("Falling back to the built-in parser for {}", app_path.display());
        }
        compile_check_file(app_path)
    }

    /// Gate 2: install, launch, wait for readiness, capture, compare.
    ///
    /// Never fails; every error is recorded on the result.
    pub async fn run_gate2(&self, framework: &Framework, app_dir: &Path, port: u16) -> Gate2Result {
        let app_dir = app_dir
            .canonicalize()
            .unwrap_or_else(|_| app_dir.to_path_buf());
        let venv_dir = app_dir.join(VENV_DIR);
        let runtime = framework_runtime(framework, &self.host, port, &app_dir, &venv_dir);

        if !runtime.supports_gate2 {
            let reason = runtime
                .skip_reason
                .unwrap_or_else(|| format!("Framework {} not supported for Gate 2.", framework));
            info!("Skipping Gate 2: {}", reason);
            return Gate2Result::skipped(reason);
        }

        info!(
            "Running Gate 2 for {} at {} (timeout: {:?})",
            framework,
            runtime.url,
            self.startup_timeout_override.unwrap_or(runtime.startup_timeout)
        );
        let result = self.run_runtime(&runtime, &app_dir).await;
        if result.ok {
            info!("Gate 2 passed for {}", framework);
        }
        result
    }

    /// Gate 2 against an already-resolved runtime
    pub async fn run_runtime(&self, runtime: &FrameworkRuntime, app_dir: &Path) -> Gate2Result {
        let before = app_dir.join(SCREENSHOT_BEFORE);
        let after = app_dir.join(SCREENSHOT_AFTER);
        let timeout = self.startup_timeout_override.unwrap_or(runtime.startup_timeout);

        let mut result = Gate2Result {
            url: Some(runtime.url.clone()),
            screenshot_path: Some(path_string(&after)),
            screenshot_before_path: Some(path_string(&before)),
            screenshot_after_path: Some(path_string(&after)),
            ..Default::default()
        };

        let mut process: Option<AppProcess> = None;
        let outcome = self
            .run_live(runtime, app_dir, timeout, &before, &after, &mut process)
            .await;

        let output_tail = match process.as_mut() {
            Some(process) => {
                process.shutdown(self.teardown_grace).await;
                Some(process.output_tail())
            }
            None => None,
        };

        match outcome {
            Ok((report, comparison)) => {
                result.ok = true;
                result.interactions = report.interactions;
                result.visual_change_percent = Some(comparison.change_percent);
                result.screenshot_before_sha256 = Some(comparison.before_sha256);
                result.screenshot_after_sha256 = Some(comparison.after_sha256);
            }
            Err(e) => {
                error!("Gate 2 failed for {}: {}", runtime.url, e);
                result.error = Some(e.describe());
                result.app_output_tail = output_tail.filter(|tail| !tail.is_empty());
            }
        }

        result
    }

    /// Everything between provisioning and comparison. The spawned process is
    /// left in `slot` so the caller tears it down on every path.
    async fn run_live(
        &self,
        runtime: &FrameworkRuntime,
        app_dir: &Path,
        timeout: Duration,
        before: &Path,
        after: &Path,
        slot: &mut Option<AppProcess>,
    ) -> HarnessResult<(CaptureReport, CaptureComparison)> {
        self.provisioner
            .ensure_environment(app_dir, &runtime.extra_requirements)
            .await?;

        *slot = Some(AppProcess::spawn(&runtime.command, app_dir)?);

        wait_until_ready(&runtime.url, timeout, self.poll_interval).await?;

        // Stale captures from an earlier run must not count as evidence.
        for path in [before, after] {
            if path.exists() {
                tokio::fs::remove_file(path).await?;
            }
        }

        let request = CaptureRequest {
            url: runtime.url.clone(),
            settle_delay: runtime.screenshot_delay,
            click_delay: runtime.click_delay,
            policy: InteractionPolicy::default().with_action_timeout_ms(self.action_timeout_ms),
            app_dir: app_dir.to_path_buf(),
            before_path: before.to_path_buf(),
            after_path: after.to_path_buf(),
        };
        let report = self.capturer.capture(&request).await?;

        // Full-page decodes are CPU-bound
        let (before, after) = (before.to_path_buf(), after.to_path_buf());
        let comparison = tokio::task::spawn_blocking(move || compare_captures(&before, &after))
            .await
            .map_err(|e| HarnessError::Capture(format!("screenshot comparison aborted: {}", e)))??;

        Ok((report, comparison))
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
