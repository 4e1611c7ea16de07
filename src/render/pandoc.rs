//! Pandoc as the [`MarkdownEngine`].

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::MarkdownEngine;
use crate::error::RenderError;

/// Locations checked when pandoc is not on `PATH`.
const COMMON_LOCATIONS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"];

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs `pandoc -f html -t markdown --wrap=none`, feeding HTML on stdin.
///
/// Pandoc's own Markdown keeps header identifiers (`{#id}`) and spans
/// (`[]{#id}`), which is what the anchor index relies on.
#[derive(Debug, Clone)]
pub struct PandocEngine {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl PandocEngine {
    /// Find pandoc: the configured path, then `PATH`, then common install
    /// locations.
    pub fn locate(configured: Option<&Path>, timeout: Duration) -> Result<Self, RenderError> {
        let program = match configured {
            Some(path) if path.is_file() => path.to_path_buf(),
            Some(path) => {
                warn!(path = %path.display(), "Configured pandoc path does not exist");
                return Err(RenderError::NotFound);
            }
            None => find_in_path("pandoc")
                .or_else(|| {
                    COMMON_LOCATIONS
                        .iter()
                        .map(|dir| Path::new(dir).join("pandoc"))
                        .find(|p| p.is_file())
                })
                .ok_or(RenderError::NotFound)?,
        };
        info!(program = %program.display(), "Using pandoc");
        Ok(Self::with_program(program, timeout))
    }

    /// Use a specific executable with the default pandoc arguments.
    pub fn with_program(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: ["-f", "html", "-t", "markdown", "--wrap=none"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout,
        }
    }

    /// Replace the argument list.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl MarkdownEngine for PandocEngine {
    fn convert(&self, html: &str) -> Result<String, RenderError> {
        debug!(program = %self.program.display(), args = ?self.args, "Spawning engine");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RenderError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        // Pipes are pumped on helper threads so a full pipe can't stall the
        // bounded wait below.
        let mut stdin = child.stdin.take().ok_or_else(|| closed_pipe("stdin"))?;
        let mut stdout = child.stdout.take().ok_or_else(|| closed_pipe("stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| closed_pipe("stderr"))?;

        let input = html.to_owned();
        let writer = thread::spawn(move || stdin.write_all(input.as_bytes()));
        let out_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });
        let err_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).map(|_| buf)
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                warn!(timeout = ?self.timeout, "Engine timed out, killed");
                return Err(RenderError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let written = join(writer);
        let stdout = join(out_reader)?;
        let stderr = String::from_utf8_lossy(&join(err_reader)?).trim().to_string();

        if !status.success() {
            return Err(RenderError::Failed { status, stderr });
        }
        // A child that exits successfully without reading all input is fine
        if let Err(err) = written
            && err.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(err.into());
        }
        if !stderr.is_empty() {
            warn!("Engine warnings:\n{stderr}");
        }

        Ok(String::from_utf8(stdout)?)
    }
}

fn join<T>(handle: thread::JoinHandle<std::io::Result<T>>) -> std::io::Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(std::io::Error::other("pipe thread panicked")))
}

fn closed_pipe(name: &str) -> RenderError {
    RenderError::Io(std::io::Error::other(format!("child {name} not captured")))
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
