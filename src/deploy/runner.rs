// External process seam for deploy execution

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Which external tool an invocation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Git,
    Gh,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Gh => "gh",
        }
    }
}

/// Captured output of an external command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stderr/stdout surfaced verbatim as the failure message
    pub fn failure_message(&self) -> String {
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        match self.exit_code {
            Some(code) => format!("exit status {}: {}", code, detail),
            None => format!("terminated by signal: {}", detail),
        }
    }
}

/// Seam over external process invocation so batch execution can be tested
/// without a git repository or network access.
pub trait DeployRunner: Send + Sync {
    fn run(&self, tool: Tool, args: &[String], cwd: &Path) -> Result<CommandOutput>;
}

/// Production runner shelling out to git and gh
pub struct ShellRunner {
    git_path: PathBuf,
    /// Resolved lazily-tolerant: gh is only needed for workflow/deploy
    /// actions, so a missing binary fails those actions, not construction.
    gh_path: Option<PathBuf>,
}

impl ShellRunner {
    pub fn new() -> Result<Self> {
        let git_path =
            which::which("git").map_err(|e| anyhow!("git executable not found: {}", e))?;
        let gh_path = which::which("gh").ok();
        if gh_path.is_none() {
            log::warn!("[ShellRunner] gh executable not found; workflow triggers will fail");
        }
        Ok(Self { git_path, gh_path })
    }

    fn resolve(&self, tool: Tool) -> Result<&Path> {
        match tool {
            Tool::Git => Ok(&self.git_path),
            Tool::Gh => self
                .gh_path
                .as_deref()
                .ok_or_else(|| anyhow!("gh executable not found")),
        }
    }
}

impl DeployRunner for ShellRunner {
    fn run(&self, tool: Tool, args: &[String], cwd: &Path) -> Result<CommandOutput> {
        let program = self.resolve(tool)?;
        log::debug!(
            "[ShellRunner] {} {} (cwd {})",
            tool.as_str(),
            args.join(" "),
            cwd.display()
        );

        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|e| anyhow!("Failed to spawn {}: {}", tool.as_str(), e))?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
