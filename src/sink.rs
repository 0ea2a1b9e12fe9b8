//! Output sinks.
//!
//! A sink receives each output stream of an invocation exactly once and
//! returns the join handle of the task forwarding it. The executor joins
//! those handles before producing the command result.
//!
//!   NoOpStreamHandler     drain and discard
//!   TracingStreamHandler  one tracing event per line
//!   FileStreamHandler     <log dir>/<sanitized name>_<stream>.log (append)
//!   MemoryStreamHandler   in-memory collector

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::utils::sanitize_file_name;

pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait StreamHandler: Send + Sync {
    fn handle_stream(&self, stream: OutputStream, kind: StreamKind, command_name: &str)
    -> JoinHandle<()>;
}

/// Feed every line of `stream` (without the trailing newline) to `on_line`.
/// Invalid UTF-8 is replaced lossily; read errors end the stream.
pub async fn read_lines<F>(stream: OutputStream, mut on_line: F)
where
    F: FnMut(String),
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                on_line(String::from_utf8_lossy(&buf).into_owned());
            }
            Err(e) => {
                warn!("output stream read failed: {e}");
                break;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpStreamHandler;

impl StreamHandler for NoOpStreamHandler {
    fn handle_stream(&self, mut stream: OutputStream, _kind: StreamKind, _name: &str) -> JoinHandle<()> {
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await;
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStreamHandler;

impl StreamHandler for TracingStreamHandler {
    fn handle_stream(&self, stream: OutputStream, kind: StreamKind, name: &str) -> JoinHandle<()> {
        let name = name.to_string();
        tokio::spawn(async move {
            read_lines(stream, |line| match kind {
                StreamKind::Stdout => info!(command = %name, "{line}"),
                StreamKind::Stderr => warn!(command = %name, "{line}"),
            })
            .await;
        })
    }
}

/// Appends each stream to its own file under `log_dir`.
#[derive(Debug, Clone)]
pub struct FileStreamHandler {
    log_dir: PathBuf,
}

impl FileStreamHandler {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub fn log_path(&self, command_name: &str, kind: StreamKind) -> PathBuf {
        self.log_dir
            .join(format!("{}_{}.log", sanitize_file_name(command_name), kind))
    }
}

impl StreamHandler for FileStreamHandler {
    fn handle_stream(&self, mut stream: OutputStream, kind: StreamKind, name: &str) -> JoinHandle<()> {
        let dir = self.log_dir.clone();
        let path = self.log_path(name, kind);
        tokio::spawn(async move {
            let opened = async {
                tokio::fs::create_dir_all(&dir).await?;
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
            }
            .await;
            match opened {
                Ok(mut file) => {
                    if let Err(e) = tokio::io::copy(&mut stream, &mut file).await {
                        warn!("writing {} failed: {e}", path.display());
                    }
                    let _ = file.flush().await;
                }
                Err(e) => {
                    warn!("cannot open {}: {e}; discarding {kind}", path.display());
                    let _ = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await;
                }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLine {
    pub command: String,
    pub kind: StreamKind,
    pub line: String,
}

/// Collects every line in memory; cloning shares the buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryStreamHandler {
    lines: Arc<Mutex<Vec<CapturedLine>>>,
}

impl MemoryStreamHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self, kind: StreamKind) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| l.line.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<CapturedLine> {
        self.lines.lock().clone()
    }
}

impl StreamHandler for MemoryStreamHandler {
    fn handle_stream(&self, stream: OutputStream, kind: StreamKind, name: &str) -> JoinHandle<()> {
        let lines = Arc::clone(&self.lines);
        let command = name.to_string();
        tokio::spawn(async move {
            read_lines(stream, |line| {
                lines.lock().push(CapturedLine {
                    command: command.clone(),
                    kind,
                    line,
                })
            })
            .await;
        })
    }
}
