//! Subprocess steps driven through the toolchain binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{BootstrapError, Result};
use crate::platform::PlatformProfile;

/// Runs toolchain subcommands (`uv sync`, `uv run <script>`).
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run to completion, discarding output. Non-zero exit is an error.
    async fn run(&self, args: &[&str]) -> Result<()>;

    /// Run to completion and return stdout. Non-zero exit is an error.
    async fn capture(&self, args: &[&str]) -> Result<String>;
}

/// Invokes the toolchain binary installed in the working directory.
#[derive(Debug, Clone)]
pub struct ToolchainRunner {
    program: PathBuf,
    working_dir: PathBuf,
}

impl ToolchainRunner {
    pub fn new(working_dir: &Path, profile: &PlatformProfile) -> Self {
        // The child starts inside `working_dir`, so a relative program path
        // would be resolved against it a second time.
        let working_dir = std::path::absolute(working_dir).unwrap_or_else(|_| working_dir.to_path_buf());
        Self {
            program: working_dir.join(profile.binary_file_name()),
            working_dir,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stderr(Stdio::null());
        command
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(args.iter().map(|a| a.to_string()));
        parts.join(" ")
    }
}

#[async_trait]
impl StepRunner for ToolchainRunner {
    async fn run(&self, args: &[&str]) -> Result<()> {
        log::debug!("Running {}", self.describe(args));

        let status = self
            .command(args)
            .stdout(Stdio::null())
            .status()
            .await
            .map_err(|e| BootstrapError::io(&self.program, e))?;

        if !status.success() {
            return Err(BootstrapError::Subprocess {
                command: self.describe(args),
                code: status.code(),
            });
        }
        Ok(())
    }

    async fn capture(&self, args: &[&str]) -> Result<String> {
        log::debug!("Running {} (capturing stdout)", self.describe(args));

        let output = self
            .command(args)
            .stdout(Stdio::piped())
            .output()
            .await
            .map_err(|e| BootstrapError::io(&self.program, e))?;

        if !output.status.success() {
            return Err(BootstrapError::Subprocess {
                command: self.describe(args),
                code: output.status.code(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;

    #[test]
    fn test_program_is_resolved_in_working_dir() {
        let runner = ToolchainRunner::new(Path::new("/work"), &Platform::Linux.profile());
        assert_eq!(runner.program(), Path::new("/work/uv"));

        let runner = ToolchainRunner::new(Path::new("/work"), &Platform::Windows.profile());
        assert_eq!(runner.program(), Path::new("/work").join("uv.exe"));
    }

    #[test]
    fn test_relative_working_dir_is_made_absolute() {
        let runner = ToolchainRunner::new(Path::new("work"), &Platform::Linux.profile());
        let cwd = std::env::current_dir().unwrap();

        assert!(runner.program().is_absolute());
        assert_eq!(runner.program(), cwd.join("work").join("uv"));
        assert_eq!(runner.working_dir, cwd.join("work"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relative_working_dir_runs_binary() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new_in(".").unwrap();
        let script = temp.path().join("uv");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let relative = Path::new(temp.path().file_name().unwrap());

        let runner = ToolchainRunner::new(relative, &Platform::Linux.profile());
        runner.run(&["sync"]).await.unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_describe() {
        let runner = ToolchainRunner::new(Path::new("/work"), &Platform::Linux.profile());
        assert_eq!(runner.describe(&["run", "setup.py"]), "/work/uv run setup.py");
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let runner = ToolchainRunner::new(temp.path(), &Platform::Linux.profile());

        let err = runner.run(&["sync"]).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Io { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_and_capture() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let script = temp.path().join("uv");
        std::fs::write(
            &script,
            "#!/bin/sh\nif [ \"$1\" = fail ]; then exit 3; fi\necho '{\"type\":\"ner\"}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let runner = ToolchainRunner::new(temp.path(), &Platform::Linux.profile());

        let stdout = runner.capture(&["run", "setup.py"]).await.unwrap();
        assert_eq!(stdout.trim(), "{\"type\":\"ner\"}");

        runner.run(&["sync"]).await.unwrap();

        let err = runner.run(&["fail"]).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Subprocess { code: Some(3), .. }));
    }
}
