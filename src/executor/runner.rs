//! Command runner abstraction for the export and import tools.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;

use super::TransferError;

/// Stream a line of output arrived on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One line of tool output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputLine {
    /// Originating stream.
    pub stream: OutputStream,
    /// Line text without the trailing newline.
    pub text: String,
}

/// Result of running an external command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Abstraction over command execution to support fakes in tests.
///
/// Implementations block until the command exits and hand every output line
/// to `on_line` as soon as it is read.
pub trait TransferRunner: Send + Sync {
    /// Runs `program` with `args`, streaming lines and capturing both
    /// streams.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Spawn`] if the command cannot be started.
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        on_line: &mut dyn FnMut(&OutputLine),
    ) -> Result<CommandOutput, TransferError>;
}

/// Real runner that spawns the tool and forwards its output line by line.
#[derive(Clone, Debug, Default)]
pub struct ProcessTransferRunner;

impl TransferRunner for ProcessTransferRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        on_line: &mut dyn FnMut(&OutputLine),
    ) -> Result<CommandOutput, TransferError> {
        let spawn_error = |message: String| TransferError::Spawn {
            program: program.to_owned(),
            message,
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(err.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(String::from("stdout was not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error(String::from("stderr was not captured")))?;

        let (sender, receiver) = mpsc::channel();
        let stdout_reader = forward_lines(stdout, OutputStream::Stdout, sender.clone());
        let stderr_reader = forward_lines(stderr, OutputStream::Stderr, sender);

        let mut output = CommandOutput::default();
        for line in receiver {
            on_line(&line);
            let buffer = match line.stream {
                OutputStream::Stdout => &mut output.stdout,
                OutputStream::Stderr => &mut output.stderr,
            };
            buffer.push_str(&line.text);
            buffer.push('\n');
        }

        for reader in [stdout_reader, stderr_reader] {
            if reader.join().is_err() {
                return Err(spawn_error(String::from("output reader thread panicked")));
            }
        }
        let status = child
            .wait()
            .map_err(|err| spawn_error(err.to_string()))?;
        output.code = status.code();
        Ok(output)
    }
}

fn forward_lines(
    source: impl Read + Send + 'static,
    stream: OutputStream,
    sender: mpsc::Sender<OutputLine>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = buffer.strip_suffix(b"\n").unwrap_or(&buffer);
            let trimmed = line.strip_suffix(b"\r").unwrap_or(line);
            let text = String::from_utf8_lossy(trimmed).into_owned();
            if sender.send(OutputLine { stream, text }).is_err() {
                break;
            }
        }
    })
}
