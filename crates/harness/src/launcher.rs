//! App process management - building start commands and owning the child

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use uibench_common::{framework_config, Framework};

use crate::environment::venv_bin;
use crate::error::{HarnessError, HarnessResult};

/// Command used for frameworks that cannot be run live
pub const NOOP_COMMAND: &str = "true";

/// Lines of app output kept for diagnostics
const OUTPUT_TAIL_LINES: usize = 200;

/// Everything needed to start and probe one framework app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkRuntime {
    pub url: String,
    pub command: Vec<String>,
    pub supports_gate2: bool,
    pub skip_reason: Option<String>,
    pub startup_timeout: Duration,
    pub screenshot_delay: Duration,
    pub click_delay: Duration,
    pub extra_requirements: Vec<String>,
}

/// Build the argv that starts `app.py` bound to `host:port`
pub fn build_framework_command(
    framework: &Framework,
    host: &str,
    port: u16,
    app_dir: &Path,
    venv_dir: &Path,
) -> Vec<String> {
    let python = venv_bin(venv_dir, "python").to_string_lossy().to_string();
    let app_file = app_dir.join("app.py").to_string_lossy().to_string();
    let port = port.to_string();

    let argv: Vec<String> = match framework {
        Framework::Streamlit => vec![
            python,
            "-m".into(),
            "streamlit".into(),
            "run".into(),
            app_file,
            "--server.headless".into(),
            "true".into(),
            "--server.address".into(),
            host.into(),
            "--server.port".into(),
            port,
            "--browser.gatherUsageStats".into(),
            "false".into(),
        ],
        Framework::Shiny => vec![
            venv_bin(venv_dir, "shiny").to_string_lossy().to_string(),
            "run".into(),
            "--host".into(),
            host.into(),
            "--port".into(),
            port,
            app_file,
        ],
        Framework::Panel => {
            let origin = format!("{}:{}", host, port);
            vec![
                venv_bin(venv_dir, "panel").to_string_lossy().to_string(),
                "serve".into(),
                app_file,
                "--address".into(),
                host.into(),
                "--port".into(),
                port,
                "--allow-websocket-origin".into(),
                origin,
                "--show".into(),
                "false".into(),
            ]
        }
        // Both bind through their own `run`/`launch` call inside app.py
        Framework::Gradio | Framework::Dash => vec![python, app_file],
        Framework::Unsupported(_) => vec![NOOP_COMMAND.into()],
    };
    argv
}

/// Resolve the runtime description for a framework app
pub fn framework_runtime(
    framework: &Framework,
    host: &str,
    port: u16,
    app_dir: &Path,
    venv_dir: &Path,
) -> FrameworkRuntime {
    let config = framework_config(framework);
    let url = format!("http://{}:{}{}", host, port, config.url_suffix);
    let command = build_framework_command(framework, host, port, app_dir, venv_dir);

    if command == [NOOP_COMMAND] {
        return FrameworkRuntime {
            url,
            command,
            supports_gate2: false,
            skip_reason: Some(format!(
                "Framework {} not supported for Gate 2.",
                framework
            )),
            startup_timeout: config.startup_timeout,
            screenshot_delay: config.screenshot_delay,
            click_delay: config.click_delay,
            extra_requirements: Vec::new(),
        };
    }

    FrameworkRuntime {
        url,
        command,
        supports_gate2: true,
        skip_reason: None,
        startup_timeout: config.startup_timeout,
        screenshot_delay: config.screenshot_delay,
        click_delay: config.click_delay,
        extra_requirements: config.extra_requirements,
    }
}

/// Bounded, shared buffer of the child's merged stdout/stderr
#[derive(Debug, Default)]
struct OutputTail {
    lines: VecDeque<String>,
}

impl OutputTail {
    fn push(&mut self, line: String) {
        if self.lines.len() == OUTPUT_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}

/// Handle to a running app process.
///
/// Call [`AppProcess::shutdown`] on every path. Dropping a handle that was
/// never shut down force-kills the child.
pub struct AppProcess {
    child: Child,
    pid: Option<u32>,
    output: Arc<Mutex<OutputTail>>,
    stopped: bool,
}

impl AppProcess {
    /// Start `argv` in `cwd` with stdout and stderr captured
    pub fn spawn(argv: &[String], cwd: &Path) -> HarnessResult<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| HarnessError::Launch("empty command".to_string()))?;

        debug!("Starting app: {}", argv.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::Launch(format!("Failed to spawn {}: {}", program, e)))?;

        let output = Arc::new(Mutex::new(OutputTail::default()));
        if let Some(stdout) = child.stdout.take() {
            drain_into(stdout, output.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            drain_into(stderr, output.clone());
        }

        let pid = child.id();
        info!("Started app process (pid: {:?})", pid);

        Ok(Self {
            child,
            pid,
            output,
            stopped: false,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the child has not exited yet
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Last captured output lines, oldest first
    pub fn output_tail(&self) -> String {
        let tail = self.output.lock();
        tail.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// Terminate the app: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// Idempotent; only the first call signals the child.
    pub async fn shutdown(&mut self, grace: Duration) -> Option<ExitStatus> {
        if self.stopped {
            return None;
        }
        self.stopped = true;

        info!("Stopping app process (pid: {:?})", self.pid);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    debug!("SIGTERM to {} failed: {}", pid, e);
                }
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("App exited with {}", status);
                Some(status)
            }
            Ok(Err(e)) => {
                warn!("Waiting for app failed: {}", e);
                self.force_kill().await
            }
            Err(_) => {
                warn!(
                    "App did not exit within {:?} of SIGTERM, killing",
                    grace
                );
                self.force_kill().await
            }
        }
    }

    async fn force_kill(&mut self) -> Option<ExitStatus> {
        if let Err(e) = self.child.kill().await {
            warn!("Force kill failed: {}", e);
        }
        self.child.try_wait().ok().flatten()
    }
}

impl Drop for AppProcess {
    fn drop(&mut self) {
        if !self.stopped {
            let _ = self.child.start_kill();
        }
    }
}

fn drain_into<R>(reader: R, output: Arc<Mutex<OutputTail>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        // Byte lines, decoded lossily: the pipe must stay open whatever the app prints
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    output
                        .lock()
                        .push(line.trim_end_matches(|c| c == '\n' || c == '\r').to_string());
                }
                Err(e) => {
                    debug!("App output stream closed: {}", e);
                    break;
                }
            }
        }
    });
}
