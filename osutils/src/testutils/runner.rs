use std::sync::{Arc, Mutex, MutexGuard};

use crate::dependencies::{Command, CommandOutput, CommandRunner, DependencyError};

/// Commands that only inspect the system.
const READ_ONLY_PREFIXES: &[&str] = &[
    "blkid",
    "findmnt",
    "lsblk",
    "lvs",
    "mdadm --detail",
    "pvs",
    "udevadm settle",
    "udevadm wait",
    "vgs",
    "zfs list",
    "zpool list",
];

#[derive(Debug, Clone)]
struct Response {
    prefix: String,
    code: i32,
    stdout: String,
    stderr: String,
}

#[derive(Debug, Default)]
struct State {
    responses: Vec<Response>,
    calls: Vec<String>,
}

/// A command runner that records every command and answers with scripted
/// output. Commands are matched by prefix of their rendered command line; the
/// most recently scripted response wins. Unscripted commands succeed with no
/// output.
///
/// Clones share their script and call log.
#[derive(Debug, Clone, Default)]
pub struct MockRunner {
    state: Arc<Mutex<State>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn script(&self, prefix: &str, code: i32, stdout: &str, stderr: &str) -> &Self {
        self.state().responses.push(Response {
            prefix: prefix.into(),
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
        self
    }

    /// Commands starting with `prefix` succeed and print `stdout`.
    pub fn respond(&self, prefix: &str, stdout: &str) -> &Self {
        self.script(prefix, 0, stdout, "")
    }

    /// Commands starting with `prefix` exit with `code` and print `stderr`.
    pub fn fail(&self, prefix: &str, code: i32, stderr: &str) -> &Self {
        self.script(prefix, code, "", stderr)
    }

    /// Every command executed so far, rendered.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Executed commands that may have changed the system.
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| !READ_ONLY_PREFIXES.iter().any(|p| call.starts_with(p)))
            .collect()
    }

    /// Executed commands starting with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

impl CommandRunner for MockRunner {
    fn execute(&self, command: &Command) -> Result<CommandOutput, Box<DependencyError>> {
        let rendered = command.render_command();
        let mut state = self.state();
        state.calls.push(rendered.clone());

        let output = match state
            .responses
            .iter()
            .rev()
            .find(|response| rendered.starts_with(&response.prefix))
        {
            Some(response) => CommandOutput::from_parts(
                command,
                response.code,
                response.stdout.as_str(),
                response.stderr.as_str(),
            ),
            None => CommandOutput::from_parts(command, 0, "", ""),
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use crate::dependencies::Dependency;

    use super::*;

    #[test]
    fn test_mock_runner() {
        let runner = MockRunner::new();
        runner
            .respond("lsblk", "{}")
            .fail("wipefs --all /dev/sdb", 1, "wipefs: error: /dev/sdb: probing initialization failed");

        let output = Dependency::Lsblk
            .cmd()
            .with_arg("--json")
            .output_and_check(&runner)
            .unwrap();
        assert_eq!(output, "{}");

        Dependency::Wipefs
            .cmd()
            .with_arg("--all")
            .with_arg("/dev/sda")
            .run_and_check(&runner)
            .unwrap();
        Dependency::Wipefs
            .cmd()
            .with_arg("--all")
            .with_arg("/dev/sdb")
            .run_and_check(&runner)
            .unwrap_err();

        // Later responses win.
        runner.respond("wipefs", "");
        Dependency::Wipefs
            .cmd()
            .with_arg("--all")
            .with_arg("/dev/sdb")
            .run_and_check(&runner)
            .unwrap();

        let clone = runner.clone();
        assert_eq!(clone.calls().len(), 4);
        assert_eq!(
            runner.mutating_calls(),
            [
                "wipefs --all /dev/sda",
                "wipefs --all /dev/sdb",
                "wipefs --all /dev/sdb"
            ]
        );
        assert_eq!(runner.calls_to("lsblk"), ["lsblk --json"]);

        runner.clear_calls();
        assert!(clone.calls().is_empty());
    }
}
