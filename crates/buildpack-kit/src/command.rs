//! Running external programs with forwarded, indented output.
//!
//! Buildpack output is read by humans in a deploy log, so everything a
//! subprocess prints is pushed through an [`IndentWriter`] that lines it up
//! under the step headers.

use log::debug;
use std::ffi::OsStr;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Prefix applied to every line of forwarded subprocess output.
pub const INDENT: &str = "       ";

/// Error type for command execution.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to launch {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to forward output: {0}")]
    Forward(#[from] io::Error),

    #[error("failed to wait for {}: {source}", .program.display())]
    Wait {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} exited with {}", .program.display(), describe_exit(.code))]
    Failed { program: PathBuf, code: Option<i32> },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Runs external programs.
///
/// Implementations must block until the program exits and forward its
/// stdout/stderr into the given writers without altering the bytes.
pub trait Command {
    fn execute(
        &self,
        dir: &Path,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
        program: &Path,
        args: &[&OsStr],
    ) -> Result<(), CommandError>;
}

/// [`Command`] backed by `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommand;

impl Command for SystemCommand {
    fn execute(
        &self,
        dir: &Path,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
        program: &Path,
        args: &[&OsStr],
    ) -> Result<(), CommandError> {
        debug!("Running {:?} {:?} in {:?}", program, args, dir);

        let mut child = std::process::Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        // Both pipes are drained concurrently so a chatty stderr can't stall
        // the child while we block on stdout.
        let forwarded = std::thread::scope(|scope| {
            let out = scope.spawn(move || forward(child_stdout, stdout));
            let err = forward(child_stderr, stderr);
            let out = out
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdout forwarding panicked")));
            out.and(err)
        });

        let status = child.wait().map_err(|source| CommandError::Wait {
            program: program.to_path_buf(),
            source,
        })?;
        forwarded?;

        if status.success() {
            Ok(())
        } else {
            Err(CommandError::Failed {
                program: program.to_path_buf(),
                code: status.code(),
            })
        }
    }
}

/// Copy a child pipe into `sink`. On a write failure the pipe is still
/// drained so the child never blocks on a full buffer.
fn forward<R: Read>(source: Option<R>, sink: &mut (dyn Write + Send)) -> io::Result<()> {
    let Some(mut source) = source else {
        return Ok(());
    };

    let copied = io::copy(&mut source, sink).map(|_| ());
    if copied.is_err() {
        io::copy(&mut source, &mut io::sink()).ok();
    }
    copied.and(sink.flush())
}

/// Writer that inserts a prefix at the start of every line.
///
/// Line starts are tracked across calls, so output split over arbitrary
/// write boundaries is indented exactly once per line. Empty lines get the
/// prefix too.
pub struct IndentWriter<W> {
    inner: W,
    prefix: Vec<u8>,
    at_line_start: bool,
}

impl<W: Write> IndentWriter<W> {
    pub fn new(inner: W, prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
            at_line_start: true,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for IndentWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = Vec::with_capacity(buf.len() + self.prefix.len());
        for &byte in buf {
            if self.at_line_start {
                out.extend_from_slice(&self.prefix);
            }
            out.push(byte);
            self.at_line_start = byte == b'\n';
        }
        self.inner.write_all(&out)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Wrap `writer` so every line is indented by [`INDENT`].
pub fn indent_writer<W: Write>(writer: W) -> IndentWriter<W> {
    IndentWriter::new(writer, INDENT)
}
