//! External tool invocation.
//!
//! Every source adapter shells out to an existing command-line tool. This
//! wraps `std::process::Command` with the things all of them need: secret
//! arguments that display masked, redaction of everything streamed or
//! raised, and an optional wall-clock timeout after which the tool is killed.
//!
//! Output is read on detached threads that hand lines over a channel, so a
//! helper process that inherits the pipes (ssh, credential helpers) can keep
//! them open without holding up a killed or finished tool.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::console::ConsoleSink;
use crate::error::{Error, Result};
use crate::redact::{Redactor, MASK};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long output is still drained after the tool itself has exited.
const EXIT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

enum PipeEvent {
    Line(Stream, String),
    Closed,
}

#[derive(Debug, Clone)]
enum Arg {
    Plain(String),
    Secret(String),
}

impl Arg {
    fn value(&self) -> &str {
        match self {
            Arg::Plain(v) | Arg::Secret(v) => v,
        }
    }

    fn display(&self) -> &str {
        match self {
            Arg::Plain(v) => v,
            Arg::Secret(_) => MASK,
        }
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default)]
pub struct ConsoleResult {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ConsoleResult {
    /// Raw standard output joined with newlines, for parsing.
    pub fn output(&self) -> String {
        self.stdout.join("\n")
    }
}

/// Builder for one invocation of an external tool.
#[derive(Debug, Clone)]
pub struct CommandLine {
    program: String,
    args: Vec<Arg>,
    env: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
    stdin: Option<String>,
    timeout: Option<Duration>,
    redactor: Redactor,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            stdin: None,
            timeout: None,
            redactor: Redactor::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::Plain(arg.into()));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args
            .extend(args.into_iter().map(|a| Arg::Plain(a.into())));
        self
    }

    /// Add an argument that is shown as the mask in any display form.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        let arg = arg.into();
        self.redactor.add_secret(arg.clone());
        self.args.push(Arg::Secret(arg));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Add an environment variable whose value is a secret.
    pub fn secret_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        self.redactor.add_secret(value.clone());
        self.env.push((key.into(), value));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add every secret known to `redactor` to this command's masking.
    pub fn redacting(mut self, redactor: &Redactor) -> Self {
        self.redactor.extend(redactor);
        self
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// The command as it may be shown to a user.
    pub fn for_display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().map(|a| a.display().to_string()));
        self.redactor.redact(&parts.join(" "))
    }

    /// Run, streaming redacted output to `console`. Returns the exit code.
    pub fn run(&self, console: &dyn ConsoleSink) -> Result<i32> {
        let redactor = &self.redactor;
        let result = self.execute(&|line: &str| console.write(&redactor.redact(line)))?;
        Ok(result.exit_code)
    }

    /// Like [`CommandLine::run`], but a non-zero exit is an error.
    pub fn run_or_fail(&self, console: &dyn ConsoleSink) -> Result<()> {
        match self.run(console)? {
            0 => Ok(()),
            code => Err(Error::Command {
                command: self.for_display(),
                stderr: format!("exited with code {}", code),
            }),
        }
    }

    /// Run and capture output; a non-zero exit becomes [`Error::Command`].
    pub fn run_or_bomb(&self) -> Result<ConsoleResult> {
        let result = self.execute(&|_line: &str| {})?;
        if result.exit_code != 0 {
            let detail = if result.stderr.is_empty() {
                result.stdout.join("\n")
            } else {
                result.stderr.join("\n")
            };
            return Err(Error::Command {
                command: self.for_display(),
                stderr: self.redactor.redact(detail.trim()),
            });
        }
        Ok(result)
    }

    fn execute(&self, on_line: &(dyn Fn(&str) + Sync)) -> Result<ConsoleResult> {
        debug!("Running {}", self.for_display());

        let mut command = Command::new(&self.program);
        command
            .args(self.args.iter().map(Arg::value))
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| Error::Command {
            command: self.for_display(),
            stderr: self.redactor.redact(&e.to_string()),
        })?;

        let (lines, events) = mpsc::channel();
        let mut open = 0;
        if let Some(pipe) = child.stdout.take() {
            spawn_reader(pipe, Stream::Stdout, lines.clone());
            open += 1;
        }
        if let Some(pipe) = child.stderr.take() {
            spawn_reader(pipe, Stream::Stderr, lines.clone());
            open += 1;
        }
        drop(lines);
        if let (Some(input), Some(mut pipe)) = (self.stdin.clone(), child.stdin.take()) {
            // A tool that stops reading stdin must not block us.
            thread::spawn(move || {
                let _ = pipe.write_all(input.as_bytes());
            });
        }

        let started = Instant::now();
        let mut result = ConsoleResult::default();
        let mut exited: Option<(i32, Instant)> = None;
        loop {
            if exited.is_none() {
                if let Some(status) = child.try_wait()? {
                    exited = Some((status.code().unwrap_or(-1), Instant::now()));
                }
            }
            match exited {
                Some((_, at)) if open == 0 || at.elapsed() >= EXIT_DRAIN_GRACE => break,
                Some(_) => {}
                None => {
                    if let Some(limit) = self.timeout {
                        if started.elapsed() >= limit {
                            let _ = child.kill();
                            let _ = child.wait();
                            return Err(Error::CommandTimeout {
                                command: self.for_display(),
                                seconds: limit.as_secs(),
                            });
                        }
                    }
                }
            }
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(PipeEvent::Line(stream, line)) => {
                    on_line(&line);
                    match stream {
                        Stream::Stdout => result.stdout.push(line),
                        Stream::Stderr => result.stderr.push(line),
                    }
                }
                Ok(PipeEvent::Closed) => open -= 1,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => open = 0,
            }
        }
        if let Some((code, _)) = exited {
            result.exit_code = code;
        }
        Ok(result)
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: R, stream: Stream, events: Sender<PipeEvent>) {
    thread::spawn(move || {
        for line in read_lines(pipe) {
            if events.send(PipeEvent::Line(stream, line)).is_err() {
                return;
            }
        }
        let _ = events.send(PipeEvent::Closed);
    });
}

fn read_lines<R: Read>(pipe: R) -> impl Iterator<Item = String> {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    std::iter::from_fn(move || {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(
                String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string(),
            ),
        }
    })
}
