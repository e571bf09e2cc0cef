//! External process execution.
//!
//! Every subprocess the library starts (`patch`, `git`) goes through a
//! [`ProcessRunner`] so tests can substitute a recording double.

use std::path::Path;
use std::process::Command;

use tracing::debug;

/// Result of running a process to completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `-1` if the process was killed by a signal.
    pub exit_code: i32,
    /// Stdout followed by stderr, lossily decoded.
    pub output: String,
    /// Raw stdout bytes.
    pub stdout: Vec<u8>,
}

impl ProcessOutput {
    /// Whether the process exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external programs synchronously.
pub trait ProcessRunner {
    /// Run `program` with `args`, optionally inside `cwd`, and wait for it.
    ///
    /// # Errors
    /// Returns the spawn error if the program could not be started.
    fn run(&self, program: &str, args: &[String], cwd: Option<&Path>)
    -> std::io::Result<ProcessOutput>;
}

/// [`ProcessRunner`] backed by [`std::process::Command`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> std::io::Result<ProcessOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        debug!(command = %command_line(program, args), "running");
        let out = cmd.output()?;
        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));
        Ok(ProcessOutput {
            exit_code: out.status.code().unwrap_or(-1),
            output,
            stdout: out.stdout,
        })
    }
}

/// Render a command for logs and error messages.
#[must_use]
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
