//! Per-job Python environments, created and filled with `uv`

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};

/// Name of the environment directory inside a job directory
pub const VENV_DIR: &str = ".venv";

/// Path to an executable inside an environment
pub fn venv_bin(venv_dir: &Path, name: &str) -> PathBuf {
    venv_dir.join("bin").join(name)
}

/// Something that can prepare a job directory's dependency environment
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Make sure `<app_dir>/.venv` exists and has the app's requirements
    /// plus `extra_requirements` installed. Returns the environment path.
    async fn ensure_environment(
        &self,
        app_dir: &Path,
        extra_requirements: &[String],
    ) -> HarnessResult<PathBuf>;
}

/// `uv`-backed environment manager
#[derive(Debug, Clone)]
pub struct UvProvisioner {
    uv_binary: PathBuf,
}

impl UvProvisioner {
    pub fn new(uv_binary: impl Into<PathBuf>) -> Self {
        Self {
            uv_binary: uv_binary.into(),
        }
    }

    /// Install invocations for an environment, in order: the requirements
    /// file, then the framework extras when there are any.
    pub fn install_commands(
        &self,
        venv_dir: &Path,
        requirements_path: &Path,
        extra_requirements: &[String],
    ) -> Vec<Vec<String>> {
        let python = venv_bin(venv_dir, "python").to_string_lossy().to_string();
        let uv = self.uv_binary.to_string_lossy().to_string();

        let mut commands = vec![vec![
            uv.clone(),
            "pip".to_string(),
            "install".to_string(),
            "--python".to_string(),
            python.clone(),
            "-r".to_string(),
            requirements_path.to_string_lossy().to_string(),
        ]];

        if !extra_requirements.is_empty() {
            let mut extras = vec![
                uv,
                "pip".to_string(),
                "install".to_string(),
                "--python".to_string(),
                python,
            ];
            extras.extend(extra_requirements.iter().cloned());
            commands.push(extras);
        }

        commands
    }

    async fn create_venv(&self, venv_dir: &Path) -> HarnessResult<()> {
        if let Some(parent) = venv_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if venv_dir.exists() {
            debug!("Using existing venv at {}", venv_dir.display());
            return Ok(());
        }

        info!("Creating venv at {}", venv_dir.display());
        let argv = vec![
            self.uv_binary.to_string_lossy().to_string(),
            "venv".to_string(),
            venv_dir.to_string_lossy().to_string(),
        ];
        run_checked(&argv).await
    }
}

#[async_trait]
impl Provisioner for UvProvisioner {
    async fn ensure_environment(
        &self,
        app_dir: &Path,
        extra_requirements: &[String],
    ) -> HarnessResult<PathBuf> {
        let venv_dir = app_dir.join(VENV_DIR);
        self.create_venv(&venv_dir).await?;

        let requirements = app_dir.join("requirements.txt");
        for argv in self.install_commands(&venv_dir, &requirements, extra_requirements) {
            debug!("Installing: {}", argv.join(" "));
            run_checked(&argv).await?;
        }

        Ok(venv_dir)
    }
}

/// Run a command to completion; spawn failures and non-zero exits are install errors
async fn run_checked(argv: &[String]) -> HarnessResult<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| HarnessError::Install("empty command".to_string()))?;

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| HarnessError::Install(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HarnessError::Install(format!(
            "`{}` exited with {}: {}",
            argv.join(" "),
            output.status,
            stderr.trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_commands_without_extras() {
        let provisioner = UvProvisioner::new("uv");
        let commands = provisioner.install_commands(
            Path::new("/jobs/a/.venv"),
            Path::new("/jobs/a/requirements.txt"),
            &[],
        );
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0],
            vec![
                "uv",
                "pip",
                "install",
                "--python",
                "/jobs/a/.venv/bin/python",
                "-r",
                "/jobs/a/requirements.txt"
            ]
        );
    }

    #[test]
    fn test_install_commands_with_extras() {
        let provisioner = UvProvisioner::new("/opt/uv");
        let extras = vec!["panel".to_string(), "bokeh".to_string()];
        let commands = provisioner.install_commands(
            Path::new("/jobs/p/.venv"),
            Path::new("/jobs/p/requirements.txt"),
            &extras,
        );
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1][0], "/opt/uv");
        assert_eq!(&commands[1][5..], &["panel", "bokeh"]);
    }

    #[tokio::test]
    async fn test_existing_venv_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let venv = dir.path().join(VENV_DIR);
        std::fs::create_dir_all(&venv).unwrap();

        // Would fail if it tried to spawn anything.
        let provisioner = UvProvisioner::new(dir.path().join("no-such-uv"));
        provisioner.create_venv(&venv).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_installer_is_install_error() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = UvProvisioner::new(dir.path().join("no-such-uv"));
        let err = provisioner
            .ensure_environment(dir.path(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Install(_)));
        assert!(err.describe().starts_with("InstallError:"));
    }
}
