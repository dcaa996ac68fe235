use std::{
    ffi::{OsStr, OsString},
    io,
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::{Command as StdCommand, ExitStatus, Output},
};

use log::trace;
use strum_macros::IntoStaticStr;

use blockmeta_api::status::HandlerFailure;

#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Failed to find dependency '{dependency}': {source}")]
    NotFound {
        dependency: Dependency,
        #[source]
        source: which::Error,
    },

    #[error("Failed to execute dependency '{dependency}': {inner}")]
    CouldNotExecute {
        dependency: Dependency,
        #[source]
        inner: io::Error,
    },

    #[error("Dependency '{dependency}' finished unsuccessfully: {explanation}\nCmdline: {rendered_command}\n{output}")]
    ExecutionFailed {
        dependency: Dependency,
        rendered_command: String,
        code: Option<i32>,
        signal: Option<i32>,
        stdout: String,
        stderr: String,
        explanation: String,
        output: String,
    },
}

impl From<&DependencyError> for HandlerFailure {
    fn from(value: &DependencyError) -> Self {
        match value {
            DependencyError::NotFound { dependency, source } => HandlerFailure::ToolUnavailable {
                tool: dependency.name().into(),
                reason: source.to_string(),
            },
            DependencyError::CouldNotExecute { dependency, inner } => {
                HandlerFailure::ToolUnavailable {
                    tool: dependency.name().into(),
                    reason: inner.to_string(),
                }
            }
            DependencyError::ExecutionFailed {
                dependency,
                rendered_command,
                explanation,
                output,
                ..
            } => HandlerFailure::ToolInvocation {
                tool: dependency.name().into(),
                command: rendered_command.clone(),
                explanation: explanation.clone(),
                output: output.clone(),
            },
        }
    }
}

impl From<Box<DependencyError>> for HandlerFailure {
    fn from(value: Box<DependencyError>) -> Self {
        HandlerFailure::from(&*value)
    }
}

/// Converts an error returned by one of the wrappers in this crate into a
/// handler failure. Tool failures keep their command line and output.
pub fn handler_failure(error: anyhow::Error) -> HandlerFailure {
    if let Some(dependency_error) = error.downcast_ref::<Box<DependencyError>>() {
        return HandlerFailure::from(&**dependency_error);
    }

    if let Some(dependency_error) = error.downcast_ref::<DependencyError>() {
        return HandlerFailure::from(dependency_error);
    }

    HandlerFailure::InspectionFailed {
        reason: format!("{error:#}"),
    }
}

/// Enum of runtime and test dependencies used in the code base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Dependency {
    Blkid,
    Cryptsetup,
    Dd,
    Findmnt,
    Lsblk,
    Lvcreate,
    Lvs,
    #[strum(serialize = "make-bcache")]
    MakeBcache,
    Mdadm,
    Mkfs,
    Mkswap,
    Modprobe,
    Mount,
    Parted,
    Partprobe,
    Pvremove,
    Pvs,
    Sgdisk,
    Udevadm,
    Vgchange,
    Vgcreate,
    Vgs,
    Wipefs,
    Zfs,
    Zpool,
    // Test dependencies
    #[cfg(test)]
    DoesNotExist,
    #[cfg(test)]
    Echo,
    #[cfg(test)]
    False,
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

impl Dependency {
    /// Gets the name of the dependency
    ///
    /// For example, Dependency::Mdadm => "mdadm"
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Checks if the dependency is present in the system
    pub fn exists(&self) -> bool {
        self.path().is_ok()
    }

    /// Gets the path of the dependency
    pub fn path(&self) -> Result<PathBuf, Box<DependencyError>> {
        which::which(self.name()).map_err(|source| {
            Box::new(DependencyError::NotFound {
                dependency: *self,
                source,
            })
        })
    }

    /// Converts the dependency to a new Command instance
    /// (Note this does not create a std::process::Command instance)
    pub fn cmd(&self) -> Command {
        Command {
            dependency: *self,
            args: vec![],
            envs: vec![],
        }
    }
}

/// Executes commands. The engine runs everything through a runner so that
/// tests can script the behavior of the system.
pub trait CommandRunner {
    fn execute(&self, command: &Command) -> Result<CommandOutput, Box<DependencyError>>;
}

/// Runs commands on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn execute(&self, command: &Command) -> Result<CommandOutput, Box<DependencyError>> {
        let mut cmd = StdCommand::new(command.dependency.path()?);
        cmd.args(&command.args);
        cmd.envs(command.envs.clone());
        let output = cmd
            .output()
            .map_err(|inner| DependencyError::CouldNotExecute {
                dependency: command.dependency,
                inner,
            })?;

        Ok(CommandOutput {
            rendered_command: command.render_command(),
            dependency: command.dependency,
            inner: output,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Command {
    dependency: Dependency,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl Command {
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn with_arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg.as_ref());
        }
        self
    }

    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Command
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.envs
            .push((key.as_ref().to_os_string(), val.as_ref().to_os_string()));
        self
    }

    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    pub fn run_and_check(&self, runner: &dyn CommandRunner) -> Result<(), Box<DependencyError>> {
        self.output(runner)?.check()
    }

    pub fn output_and_check(
        &self,
        runner: &dyn CommandRunner,
    ) -> Result<String, Box<DependencyError>> {
        self.output(runner)?.check_output()
    }

    /// Runs the command, accepting the given non-zero exit codes as success.
    pub fn run_allowing(
        &self,
        runner: &dyn CommandRunner,
        codes: &[i32],
    ) -> Result<CommandOutput, Box<DependencyError>> {
        let output = self.output(runner)?;
        if output.code().is_some_and(|code| codes.contains(&code)) {
            return Ok(output);
        }
        output.check()?;
        Ok(output)
    }

    pub fn render_command(&self) -> String {
        if self.args.is_empty() {
            self.dependency.to_string()
        } else {
            format!(
                "{} {}",
                self.dependency,
                self.args
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .map(|arg| if arg.contains(' ') {
                        format!("'{arg}'")
                    } else {
                        arg.into()
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        }
    }

    pub fn output(&self, runner: &dyn CommandRunner) -> Result<CommandOutput, Box<DependencyError>> {
        let rendered_command = self.render_command();
        trace!("Executing '{rendered_command}'");
        let output = runner.execute(self)?;
        trace!(
            "Executed '{rendered_command}': {}. Report:\n{}",
            output.explain_exit(),
            output.output_report(),
        );
        Ok(output)
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    rendered_command: String,
    dependency: Dependency,
    inner: Output,
}

impl CommandOutput {
    /// Builds the output of a command that was not run on the host.
    pub fn from_parts(
        command: &Command,
        code: i32,
        stdout: impl Into<Vec<u8>>,
        stderr: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            rendered_command: command.render_command(),
            dependency: command.dependency,
            inner: Output {
                status: ExitStatus::from_raw(code << 8),
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
        }
    }

    /// Checks if the process exited successfully
    pub fn success(&self) -> bool {
        self.inner.status.success()
    }

    /// Gets the exit code of the process, if it exited normally
    pub fn code(&self) -> Option<i32> {
        self.inner.status.code()
    }

    /// Gets the signal that terminated the process, if it was terminated by a signal
    fn signal(&self) -> Option<i32> {
        self.inner.status.signal()
    }

    /// Gets stderr
    pub fn error_output(&self) -> String {
        String::from_utf8_lossy(&self.inner.stderr).into()
    }

    /// Gets stdout
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.inner.stdout).into()
    }

    /// Gets all available output, useful for reporting or debugging
    pub fn output_report(&self) -> String {
        let stdout = self.output();
        let stderr = self.error_output();

        let mut res = String::with_capacity(stdout.len() + stderr.len() + 20);

        if !stdout.is_empty() {
            res += &format!("stdout:\n{stdout}\n");
        }

        if !stderr.is_empty() {
            if !res.is_empty() {
                res += "\n";
            }
            res += &format!("stderr:\n{stderr}\n");
        }

        res
    }

    /// Checks if the process exited successfully, otherwise produces an error
    pub fn check(&self) -> Result<(), Box<DependencyError>> {
        if self.success() {
            return Ok(());
        }

        Err(Box::new(DependencyError::ExecutionFailed {
            dependency: self.dependency,
            rendered_command: self.rendered_command.clone(),
            code: self.code(),
            signal: self.signal(),
            stdout: self.output(),
            stderr: self.error_output(),
            explanation: self.explain_exit(),
            output: match self.output_report() {
                s if !s.is_empty() => s,
                _ => "(no output collected)".into(),
            },
        }))
    }

    /// Checks if the process exited successfully and returns the output,
    /// otherwise produces an error with the output
    pub fn check_output(&self) -> Result<String, Box<DependencyError>> {
        self.check()?;
        Ok(self.output())
    }

    /// Produces a string explaining the exit status of the process
    fn explain_exit(&self) -> String {
        if let Some(code) = self.code() {
            format!("exited with status: {code}")
        } else if let Some(signal) = self.signal() {
            format!("terminated by signal: {signal}")
        } else {
            "exited with unknown status".into()
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn test_command() {
        Dependency::Echo
            .cmd()
            .arg("Hello, world")
            .run_and_check(&HostRunner)
            .unwrap();
        let output_and_check_res = Dependency::Echo
            .cmd()
            .arg("Hello, world")
            .output_and_check(&HostRunner);
        assert_eq!(output_and_check_res.unwrap(), "Hello, world\n");

        let render_command_res = Dependency::Echo.cmd().arg("Hello, world").render_command();
        assert_eq!(render_command_res, "echo 'Hello, world'");

        let output_res = Dependency::Echo.cmd().arg("Hello, world").output(&HostRunner);
        assert_eq!(output_res.unwrap().output(), "Hello, world\n");
    }

    #[test]
    fn test_arg_and_args() {
        let arg = Dependency::Echo.cmd().arg("Hello, world").output(&HostRunner);
        let args = Dependency::Echo
            .cmd()
            .args(["Hello,", "world"])
            .output(&HostRunner);

        let arg_output = arg.unwrap().output();
        let args_output = args.unwrap().output();
        assert_eq!(arg_output, args_output);
        assert_eq!(arg_output, "Hello, world\n");
    }

    #[test]
    fn test_nonexistent_dep() {
        let output = Dependency::DoesNotExist
            .cmd()
            .output(&HostRunner)
            .unwrap_err();
        assert!(matches!(*output, DependencyError::NotFound { .. }));
        assert_eq!(
            output.to_string(),
            "Failed to find dependency 'doesnotexist': cannot find binary path"
        );
        assert!(matches!(
            HandlerFailure::from(output),
            HandlerFailure::ToolUnavailable { ref tool, .. } if tool == "doesnotexist"
        ));
    }

    #[test]
    fn test_commandoutput() {
        // This command should succeed
        let output = Dependency::Echo
            .cmd()
            .arg("Hello, world")
            .output(&HostRunner)
            .unwrap();
        assert!(output.success());
        assert_eq!(output.code(), Some(0));
        assert_eq!(output.signal(), None);
        assert_eq!(output.error_output(), "");
        assert_eq!(output.output(), "Hello, world\n");
        assert_eq!(output.output_report(), "stdout:\nHello, world\n\n");
        assert!(matches!(output.check(), Ok(())));
        assert!(matches!(output.check_output(), Ok(s) if s == "Hello, world\n"));
        assert_eq!(output.explain_exit(), "exited with status: 0");

        // This command should fail
        let output = Dependency::False.cmd().output(&HostRunner).unwrap();
        assert!(!output.success());
        assert_eq!(output.code(), Some(1));
        assert_eq!(output.signal(), None);
        assert_eq!(output.output_report(), "");
        assert!(matches!(
            *output.check().unwrap_err(),
            DependencyError::ExecutionFailed { .. }
        ));
        assert_eq!(output.explain_exit(), "exited with status: 1");

        // Unless the exit code is accepted
        let output = Dependency::False
            .cmd()
            .run_allowing(&HostRunner, &[1])
            .unwrap();
        assert_eq!(output.code(), Some(1));
        Dependency::False
            .cmd()
            .run_allowing(&HostRunner, &[5])
            .unwrap_err();
    }

    #[test]
    fn test_output_from_parts() {
        let command = Dependency::Sgdisk.cmd().with_arg("--zap-all").with_arg("/dev/sda");
        let output = CommandOutput::from_parts(&command, 2, "", "Problem opening /dev/sda");
        assert_eq!(output.code(), Some(2));
        assert!(!output.success());

        let failure = HandlerFailure::from(output.check().unwrap_err());
        assert_eq!(
            failure,
            HandlerFailure::ToolInvocation {
                tool: "sgdisk".into(),
                command: "sgdisk --zap-all /dev/sda".into(),
                explanation: "exited with status: 2".into(),
                output: "stderr:\nProblem opening /dev/sda\n".into(),
            }
        );
    }

    #[test]
    fn test_handler_failure_through_context() {
        let command = Dependency::Mdadm.cmd().with_arg("--stop").with_arg("/dev/md0");
        let error = CommandOutput::from_parts(&command, 1, "", "")
            .check()
            .context("Failed to stop RAID array")
            .context("Failed to release device")
            .unwrap_err();

        assert!(matches!(
            handler_failure(error),
            HandlerFailure::ToolInvocation { ref command, ref output, .. }
                if command == "mdadm --stop /dev/md0" && output == "(no output collected)"
        ));

        let failure = handler_failure(anyhow::anyhow!("unexpected output"));
        assert_eq!(
            failure,
            HandlerFailure::InspectionFailed {
                reason: "unexpected output".into()
            }
        );
    }
}
