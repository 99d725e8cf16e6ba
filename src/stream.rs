//! Standard-stream plumbing and the spawned-process table.
//!
//! The interpreter never reassigns the process-wide descriptors; instead the
//! evaluator carries a `Streams` value naming where stdin/stdout/stderr
//! currently point — the real streams, an opened redirect file, or one end
//! of an anonymous pipe. Builtins write through it, and external commands
//! receive `Stdio` handles cloned from it, so redirection, pipelines, and
//! command substitution all compose.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, PipeReader, PipeWriter, Read, Write};
use std::process::{Child, Stdio};
use std::sync::Mutex;

use crate::error::{BoxError, BoxResult};

#[derive(Debug)]
pub enum InputTarget {
    Inherit,
    Pipe(PipeReader),
}

#[derive(Debug)]
pub enum OutputTarget {
    Inherit,
    File(File),
    Pipe(PipeWriter),
}

#[derive(Debug)]
pub struct Streams {
    pub stdin: InputTarget,
    pub stdout: OutputTarget,
    pub stderr: OutputTarget,
}

impl Streams {
    pub fn inherited() -> Self {
        Self {
            stdin: InputTarget::Inherit,
            stdout: OutputTarget::Inherit,
            stderr: OutputTarget::Inherit,
        }
    }

    pub fn write_stdout(&mut self, bytes: &[u8]) -> io::Result<()> {
        match &mut self.stdout {
            OutputTarget::Inherit => {
                let mut out = io::stdout().lock();
                out.write_all(bytes)?;
                out.flush()
            }
            OutputTarget::File(f) => f.write_all(bytes),
            OutputTarget::Pipe(w) => w.write_all(bytes),
        }
    }

    pub fn write_stderr(&mut self, bytes: &[u8]) -> io::Result<()> {
        match &mut self.stderr {
            OutputTarget::Inherit => {
                let mut err = io::stderr().lock();
                err.write_all(bytes)?;
                err.flush()
            }
            OutputTarget::File(f) => f.write_all(bytes),
            OutputTarget::Pipe(w) => w.write_all(bytes),
        }
    }

    /// Read one line from the current stdin. `None` at end of input. The
    /// trailing newline (and `\r`) is stripped.
    pub fn read_stdin_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let n = match &mut self.stdin {
            InputTarget::Inherit => io::stdin().lock().read_line(&mut line)?,
            InputTarget::Pipe(r) => {
                // Unbuffered byte reads: a BufReader would swallow input
                // that later reads of the same pipe still need.
                let mut bytes = Vec::new();
                let mut byte = [0u8; 1];
                loop {
                    match r.read(&mut byte)? {
                        0 => break,
                        _ => {
                            bytes.push(byte[0]);
                            if byte[0] == b'\n' {
                                break;
                            }
                        }
                    }
                }
                line.push_str(&String::from_utf8_lossy(&bytes));
                bytes.len()
            }
        };
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Drain the current stdin to a string (used by `cat`).
    pub fn read_stdin_to_string(&mut self) -> io::Result<String> {
        let mut buf = String::new();
        match &mut self.stdin {
            InputTarget::Inherit => {
                io::stdin().lock().read_to_string(&mut buf)?;
            }
            InputTarget::Pipe(r) => {
                r.read_to_string(&mut buf)?;
            }
        }
        Ok(buf)
    }

    // ── handles for child processes ─────────────────────────────────

    pub fn stdin_stdio(&self) -> io::Result<Stdio> {
        Ok(match &self.stdin {
            InputTarget::Inherit => Stdio::inherit(),
            InputTarget::Pipe(r) => Stdio::from(r.try_clone()?),
        })
    }

    pub fn stdout_stdio(&self) -> io::Result<Stdio> {
        Ok(match &self.stdout {
            OutputTarget::Inherit => Stdio::inherit(),
            OutputTarget::File(f) => Stdio::from(f.try_clone()?),
            OutputTarget::Pipe(w) => Stdio::from(w.try_clone()?),
        })
    }

    pub fn stderr_stdio(&self) -> io::Result<Stdio> {
        Ok(match &self.stderr {
            OutputTarget::Inherit => Stdio::inherit(),
            OutputTarget::File(f) => Stdio::from(f.try_clone()?),
            OutputTarget::Pipe(w) => Stdio::from(w.try_clone()?),
        })
    }
}

/// Children started by `spawn`, keyed by PID until `wait` reaps them.
/// Mutex-guarded: waits can happen from code paths that have temporarily
/// rewired the streams.
#[derive(Debug, Default)]
pub struct ProcessTable {
    procs: Mutex<HashMap<u32, Child>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, child: Child) -> u32 {
        let pid = child.id();
        self.procs
            .lock()
            .expect("process table lock poisoned")
            .insert(pid, child);
        pid
    }

    /// Remove the child for `pid`. The caller owns the wait.
    pub fn take(&self, pid: u32) -> BoxResult<Child> {
        self.procs
            .lock()
            .expect("process table lock poisoned")
            .remove(&pid)
            .ok_or_else(|| {
                BoxError::new(format!("wait: unknown pid {pid}"))
                    .with_help("wait only reaps processes started by spawn in this run")
            })
    }
}
