//! Headless-browser screenshot capture
//!
//! Each capture runs one fresh Node/Playwright process from a generated
//! script. The script reports every probe step as a `UIBENCH_STEP {json}`
//! line on stdout; a failing probe never aborts the session, while a failed
//! navigation or screenshot makes the whole script exit non-zero.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use uibench_common::{CaptureConfig, ProbeOutcome};

use crate::error::{HarnessError, HarnessResult};
use crate::probe::{InteractionPolicy, ProbeStep};

/// Marker prefix for probe outcome lines
pub const STEP_MARKER: &str = "UIBENCH_STEP ";

/// Everything one capture needs
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub url: String,
    /// Fixed wait after network idle, before the first screenshot
    pub settle_delay: Duration,
    /// Wait after the probes, before the second screenshot
    pub click_delay: Duration,
    pub policy: InteractionPolicy,
    /// Job directory; `playwright` is resolved from here first
    pub app_dir: PathBuf,
    pub before_path: PathBuf,
    pub after_path: PathBuf,
}

/// What happened during a successful capture
#[derive(Debug, Clone, Default)]
pub struct CaptureReport {
    pub interactions: Vec<ProbeOutcome>,
}

impl CaptureReport {
    /// Number of probe steps that acted on at least one element
    pub fn effective_steps(&self) -> usize {
        self.interactions
            .iter()
            .filter(|o| o.ok && o.acted > 0)
            .count()
    }
}

/// Produces before/after screenshots of a running app
#[async_trait]
pub trait ScreenshotCapturer: Send + Sync {
    async fn capture(&self, request: &CaptureRequest) -> HarnessResult<CaptureReport>;
}

/// Playwright-backed capturer driving Chromium through `node`
#[derive(Debug, Clone)]
pub struct PlaywrightCapturer {
    node_binary: PathBuf,
    viewport_width: u32,
    viewport_height: u32,
    navigation_timeout_ms: u64,
    session_timeout: Duration,
}

impl PlaywrightCapturer {
    pub fn new(node_binary: impl Into<PathBuf>, capture: &CaptureConfig) -> Self {
        Self {
            node_binary: node_binary.into(),
            viewport_width: capture.viewport_width,
            viewport_height: capture.viewport_height,
            navigation_timeout_ms: capture.navigation_timeout_ms,
            session_timeout: Duration::from_secs(capture.session_timeout_secs),
        }
    }

    /// Build the Node script for one capture
    pub fn build_script(&self, request: &CaptureRequest) -> String {
        let mut script = String::new();

        script.push_str(&format!(
            r#"const {{ createRequire }} = require('module');

function loadPlaywright() {{
  for (const root of [{app_dir}, process.cwd()]) {{
    try {{
      return createRequire(root + '/')('playwright');
    }} catch (e) {{}}
  }}
  return require('playwright');
}}

const {{ chromium }} = loadPlaywright();

function report(step, ok, acted, error) {{
  const message = error ? String(error.message || error) : null;
  console.log('{marker}' + JSON.stringify({{ step, ok, acted, error: message }}));
}}

(async () => {{
  const browser = await chromium.launch({{ headless: true }});
  try {{
    const context = await browser.newContext({{
      viewport: {{ width: {width}, height: {height} }}
    }});
    const page = await context.newPage();
    page.setDefaultTimeout({action_timeout});

    await page.goto({url}, {{ waitUntil: 'networkidle', timeout: {nav_timeout} }});
    await page.waitForTimeout({settle});
    await page.screenshot({{ path: {before}, fullPage: true, timeout: {shot_timeout} }});
"#,
            app_dir = js_string(&request.app_dir.to_string_lossy()),
            marker = STEP_MARKER,
            width = self.viewport_width,
            height = self.viewport_height,
            action_timeout = request.policy.action_timeout_ms,
            url = js_string(&request.url),
            nav_timeout = self.navigation_timeout_ms,
            settle = request.settle_delay.as_millis(),
            before = js_string(&request.before_path.to_string_lossy()),
            shot_timeout = self.navigation_timeout_ms,
        ));

        for (i, step) in request.policy.steps.iter().enumerate() {
            script.push_str(&format!("\n    // Probe {}: {}\n", i + 1, step.name()));
            script.push_str(&format!(
                "    {{\n      let acted = 0;\n      try {{\n{}\n        report('{}', true, acted, null);\n      }} catch (error) {{\n        report('{}', false, acted, error);\n      }}\n",
                step_to_js(step, request.policy.action_timeout_ms),
                step.name(),
                step.name(),
            ));
            if request.policy.step_settle_ms > 0 {
                script.push_str(&format!(
                    "      await page.waitForTimeout({});\n",
                    request.policy.step_settle_ms
                ));
            }
            script.push_str("    }\n");
        }

        script.push_str(&format!(
            r#"
    await page.waitForTimeout({click});
    await page.screenshot({{ path: {after}, fullPage: true, timeout: {shot_timeout} }});
  }} catch (error) {{
    console.error(JSON.stringify({{ success: false, error: error.message, stack: error.stack }}));
    process.exitCode = 1;
  }} finally {{
    await browser.close();
  }}
}})();
"#,
            click = request.click_delay.as_millis(),
            after = js_string(&request.after_path.to_string_lossy()),
            shot_timeout = self.navigation_timeout_ms,
        ));

        script
    }

    async fn run_script(&self, script: &str) -> HarnessResult<std::process::Output> {
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("capture.js");
        tokio::fs::write(&script_path, script).await?;

        debug!("Running capture script: {}", script_path.display());

        let mut command = Command::new(&self.node_binary);
        command
            .arg(&script_path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.session_timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(HarnessError::Capture(format!(
                "failed to run {}: {}",
                self.node_binary.display(),
                e
            ))),
            Err(_) => Err(HarnessError::Timeout(format!(
                "browser session ({}s)",
                self.session_timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl ScreenshotCapturer for PlaywrightCapturer {
    async fn capture(&self, request: &CaptureRequest) -> HarnessResult<CaptureReport> {
        for path in [&request.before_path, &request.after_path] {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        info!("Capturing {}", request.url);
        let script = self.build_script(request);
        let output = self.run_script(&script).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let interactions = parse_outcomes(&stdout);
        for outcome in &interactions {
            match &outcome.error {
                Some(err) if !outcome.ok => {
                    warn!("Probe {} failed on {}: {}", outcome.step, request.url, err)
                }
                _ => debug!("Probe {} acted on {} element(s)", outcome.step, outcome.acted),
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Cannot find module 'playwright'") {
                return Err(HarnessError::PlaywrightNotFound);
            }
            return Err(HarnessError::Capture(format!(
                "browser script exited with {}: {}",
                output.status,
                tail_lines(&stderr, 20)
            )));
        }

        for path in [&request.before_path, &request.after_path] {
            ensure_written(path)?;
        }

        Ok(CaptureReport { interactions })
    }
}

fn ensure_written(path: &Path) -> HarnessResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(HarnessError::Capture(format!(
            "screenshot not written: {}",
            path.display()
        )))
    }
}

/// Encode a value as a JavaScript literal
fn js_string<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Extract probe outcomes from the script's stdout
pub fn parse_outcomes(stdout: &str) -> Vec<ProbeOutcome> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix(STEP_MARKER))
        .filter_map(|json| match serde_json::from_str::<ProbeOutcome>(json) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Ignoring malformed probe line: {}", e);
                None
            }
        })
        .collect()
}

/// JavaScript body for one probe step. Runs inside the step's try block
/// with `acted` in scope.
fn step_to_js(step: &ProbeStep, action_timeout_ms: u64) -> String {
    match step {
        ProbeStep::FillInputs { limit, values } => format!(
            r#"        const values = {values};
        const fields = page.locator('input[type="number"]:visible, input[type="text"]:visible, input:not([type]):visible, textarea:visible');
        const count = Math.min(await fields.count(), {limit}, values.length);
        for (let i = 0; i < count; i++) {{
          await fields.nth(i).fill(values[i], {{ timeout: {timeout} }});
          acted++;
        }}"#,
            values = js_string(values),
            limit = limit,
            timeout = action_timeout_ms,
        ),
        ProbeStep::DragSliders { limit, position } => format!(
            r#"        const sliders = page.locator('input[type="range"]:visible, [role="slider"]:visible');
        const count = Math.min(await sliders.count(), {limit});
        for (let i = 0; i < count; i++) {{
          const slider = sliders.nth(i);
          const tag = await slider.evaluate((el) => el.tagName.toLowerCase());
          if (tag === 'input') {{
            const box = await slider.boundingBox();
            if (!box) continue;
            const y = box.y + box.height / 2;
            await page.mouse.move(box.x + box.width / 2, y);
            await page.mouse.down();
            await page.mouse.move(box.x + box.width * {position}, y, {{ steps: 10 }});
            await page.mouse.up();
          }} else {{
            await slider.focus();
            for (let k = 0; k < 5; k++) {{
              await page.keyboard.press('ArrowRight');
            }}
          }}
          acted++;
        }}"#,
            limit = limit,
            position = position,
        ),
        ProbeStep::SelectDropdowns { limit } => format!(
            r#"        const selects = page.locator('select:visible');
        const native = Math.min(await selects.count(), {limit});
        for (let i = 0; i < native; i++) {{
          if (await selects.nth(i).locator('option').count() < 2) continue;
          await selects.nth(i).selectOption({{ index: 1 }}, {{ timeout: {timeout} }});
          acted++;
        }}
        const combos = page.locator('[role="combobox"]:visible');
        const custom = Math.min(await combos.count(), {limit} - acted);
        for (let i = 0; i < custom; i++) {{
          await combos.nth(i).click({{ timeout: {timeout} }});
          const options = page.locator('[role="option"]:visible');
          if (await options.count() < 2) {{
            await page.keyboard.press('Escape');
            continue;
          }}
          await options.nth(1).click({{ timeout: {timeout} }});
          acted++;
        }}"#,
            limit = limit,
            timeout = action_timeout_ms,
        ),
        ProbeStep::ClickButton => format!(
            r#"        const buttons = page.locator('button:visible:not([disabled]), input[type="submit"]:visible, input[type="button"]:visible, [role="button"]:visible');
        if (await buttons.count() > 0) {{
          await buttons.first().click({{ timeout: {timeout} }});
          acted++;
        }}"#,
            timeout = action_timeout_ms,
        ),
        ProbeStep::ToggleChecks { limit } => format!(
            r#"        const toggles = page.locator('input[type="checkbox"]:visible, input[type="radio"]:visible, [role="checkbox"]:visible, [role="radio"]:visible, [role="switch"]:visible');
        const count = Math.min(await toggles.count(), {limit});
        for (let i = 0; i < count; i++) {{
          await toggles.nth(i).click({{ timeout: {timeout} }});
          acted++;
        }}"#,
            limit = limit,
            timeout = action_timeout_ms,
        ),
        ProbeStep::Scroll { pixels } => format!(
            r#"        await page.mouse.wheel(0, {pixels});
        acted++;"#,
            pixels = pixels,
        ),
    }
}
