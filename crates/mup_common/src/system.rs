//! Subprocess seam
//!
//! Every external program the engine touches (pacman, AUR helpers, flatpak,
//! systemctl, pgrep, `AdGuardHome --version`) goes through [`SystemRunner`].
//! [`HostSystem`] runs real commands; `testing::FakeSystem` answers from a
//! table.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Who a command runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Same user as this process
    Inherit,
    /// Needs root; prefixed with `sudo` when not already root
    Root,
    /// Must not run as root (AUR helpers refuse to); dropped to `$SUDO_USER`
    /// when this process runs under sudo
    User,
}

/// What happens to the command's output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Capture,
    /// Inherit the terminal so the user sees progress and prompts
    Stream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub privilege: Privilege,
    pub output: OutputMode,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            privilege: Privilege::Inherit,
            output: OutputMode::Capture,
        }
    }

    pub fn as_root(mut self) -> Self {
        self.privilege = Privilege::Root;
        self
    }

    pub fn as_user(mut self) -> Self {
        self.privilege = Privilege::User;
        self
    }

    pub fn streamed(mut self) -> Self {
        self.output = OutputMode::Stream;
        self
    }

    /// `program arg1 arg2`, without any privilege prefix
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Non-empty trimmed stdout lines
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Short reason for a failed command
    pub fn failure_reason(&self) -> String {
        let detail = self.stderr.lines().rev().find(|l| !l.trim().is_empty());
        match (self.status, detail) {
            (Some(code), Some(line)) => format!("exit status {}: {}", code, line.trim()),
            (Some(code), None) => format!("exit status {}", code),
            (None, _) => "terminated by signal".to_string(),
        }
    }
}

pub trait SystemRunner {
    /// Run to completion
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;

    /// Resolve a program on `PATH`
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Real subprocesses
#[derive(Debug, Default)]
pub struct HostSystem;

impl HostSystem {
    pub fn new() -> Self {
        Self
    }

    fn command_for(invocation: &Invocation) -> Command {
        let is_root = nix::unistd::geteuid().is_root();
        let mut cmd = match invocation.privilege {
            Privilege::Root if !is_root => {
                let mut c = Command::new("sudo");
                c.arg(&invocation.program);
                c
            }
            Privilege::User if is_root => match env::var("SUDO_USER") {
                Ok(user) if !user.is_empty() && user != "root" => {
                    let mut c = Command::new("sudo");
                    c.args(["-u", &user, "--"]).arg(&invocation.program);
                    c
                }
                _ => Command::new(&invocation.program),
            },
            _ => Command::new(&invocation.program),
        };
        cmd.args(&invocation.args);
        cmd
    }
}

impl SystemRunner for HostSystem {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        debug!(command = %invocation.command_line(), privilege = ?invocation.privilege, "running");
        let mut cmd = Self::command_for(invocation);

        match invocation.output {
            OutputMode::Capture => {
                let output = cmd.stdin(Stdio::null()).output()?;
                Ok(CommandOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            OutputMode::Stream => {
                let status = cmd
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit())
                    .status()?;
                Ok(CommandOutput {
                    status: status.code(),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
        }
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        if program.contains('/') {
            let path = Path::new(program);
            return is_executable(path).then(|| path.to_path_buf());
        }
        let search = env::var_os("PATH")?;
        env::split_paths(&search)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
    }
}

/// Regular file with any execute bit set
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let inv = Invocation::new("pacman", &["-Syu", "--noconfirm"]).as_root();
        assert_eq!(inv.command_line(), "pacman -Syu --noconfirm");
        assert_eq!(inv.privilege, Privilege::Root);
        assert_eq!(inv.output, OutputMode::Capture);
    }

    #[test]
    fn test_output_lines() {
        let out = CommandOutput::ok("linux 6.1-1 -> 6.2-1\n\n  mesa 1 -> 2\n");
        assert_eq!(out.lines().len(), 2);
        assert!(out.success());
    }

    #[test]
    fn test_failure_reason() {
        let out = CommandOutput::failed(1, "error: failed to synchronize\n");
        assert_eq!(
            out.failure_reason(),
            "exit status 1: error: failed to synchronize"
        );
    }

    #[test]
    fn test_host_runs_true() {
        let host = HostSystem::new();
        if host.locate("true").is_none() {
            return;
        }
        let out = host.run(&Invocation::new("true", &[])).unwrap();
        assert!(out.success());
    }
}
