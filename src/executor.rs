/*!
Process executor.

Runs one shell line per invocation and reports its exit status once every
output forwarding task has finished.

Launch
  /bin/sh -c <line>  (cmd.exe /c <line> on Windows)
  environment overlay from the metadata, PATH replaced when an override is set,
  working directory when non-empty. On Unix the child leads its own process
  group so a stop reaches the whole pipeline.

Streams
  stdout -> tee -> sink            (the tee also keeps a bounded copy used for
  stderr -> sink                    the single-line "extractable" value)

Handle
  `ProcessHandle` is published into an optional `ProcessSlot` right after the
  spawn and cleared after the exit. Stoppers use it for graceful / forced
  termination and to wait for the exit.
*/

use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, watch};
use tracing::{debug, warn};

use crate::command::TerminalSpec;
use crate::command::result::STATUS_FAILURE;
use crate::sink::{StreamHandler, StreamKind};

/// Default grace period between graceful and forced termination.
pub const STOP_GRACE: Duration = Duration::from_secs(3);

/// Upper bound of stdout kept for the extractable line.
const CAPTURE_LIMIT: usize = 64 * 1024;
const TEE_BUFFER: usize = 16 * 1024;

/* ---------------------------------------------------------------------------
 * Request / outcome
 * ------------------------------------------------------------------------- */

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessRequest {
    pub command_line: String,
    pub env: BTreeMap<String, String>,
    pub path_override: Option<String>,
    pub working_dir: Option<String>,
}

impl ProcessRequest {
    pub fn shell(line: impl Into<String>) -> Self {
        Self {
            command_line: line.into(),
            ..Self::default()
        }
    }

    /// Same environment / directory as `spec`, running `line` instead.
    pub fn for_terminal(spec: &TerminalSpec, line: &str) -> Self {
        Self {
            command_line: line.to_string(),
            env: spec.arguments.clone(),
            path_override: spec
                .environment_path_variable
                .clone()
                .filter(|p| !p.is_empty()),
            working_dir: spec.path.clone().filter(|p| !p.is_empty()),
        }
    }

    fn build(&self) -> Command {
        let mut cmd = shell_command(&self.command_line);
        cmd.envs(&self.env);
        if let Some(path) = &self.path_override {
            cmd.env("PATH", path);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/c").arg(line);
    cmd
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code; 128+signal when killed by a signal, -1 when unknown.
    pub status: i32,
    /// Trimmed stdout when it consists of exactly one non-empty line.
    pub extractable: Option<String>,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/* ---------------------------------------------------------------------------
 * Live handle
 * ------------------------------------------------------------------------- */

#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    exited: watch::Sender<bool>,
    kill: Notify,
}

impl ProcessHandle {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            exited: watch::Sender::new(false),
            kill: Notify::new(),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        !*self.exited.borrow()
    }

    fn mark_exited(&self) {
        self.exited.send_replace(true);
    }

    /// SIGTERM to the process group on Unix; a forced kill elsewhere.
    pub fn terminate(&self) {
        #[cfg(unix)]
        {
            if self.signal_group(nix::sys::signal::Signal::SIGTERM) {
                return;
            }
        }
        self.force_kill();
    }

    pub fn force_kill(&self) {
        #[cfg(unix)]
        {
            self.signal_group(nix::sys::signal::Signal::SIGKILL);
        }
        self.kill.notify_one();
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> bool {
        let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) else {
            return false;
        };
        match nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pid), signal) {
            Ok(()) => true,
            Err(e) => {
                debug!("killpg({pid}, {signal:?}) failed: {e}");
                false
            }
        }
    }

    /// True when the process exited within `timeout`.
    pub async fn wait_exit(&self, timeout: Duration) -> bool {
        let mut rx = self.exited.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|exited| *exited))
            .await
            .is_ok()
    }

    /// Graceful termination, `grace` wait, forced termination.
    pub async fn stop(&self, grace: Duration) {
        if !self.is_alive() {
            return;
        }
        self.terminate();
        if self.wait_exit(grace).await {
            return;
        }
        warn!(pid = ?self.pid, "process ignored termination, killing");
        self.force_kill();
        let _ = self.wait_exit(grace).await;
    }
}

/// Holder for the handle of the process currently running under one guard.
#[derive(Debug, Default)]
pub struct ProcessSlot {
    current: Mutex<Option<Arc<ProcessHandle>>>,
}

impl ProcessSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<ProcessHandle>> {
        self.current.lock().clone()
    }

    fn publish(&self, handle: Arc<ProcessHandle>) {
        *self.current.lock() = Some(handle);
    }

    fn clear(&self, handle: &Arc<ProcessHandle>) {
        let mut cur = self.current.lock();
        if cur.as_ref().is_some_and(|h| Arc::ptr_eq(h, handle)) {
            *cur = None;
        }
    }

    pub fn is_alive(&self) -> bool {
        self.get().is_some_and(|h| h.is_alive())
    }
}

/* ---------------------------------------------------------------------------
 * Run
 * ------------------------------------------------------------------------- */

/// Spawn `request`, stream its output into `sink` under `name`, wait for exit.
///
/// `Err` only for launch failures; a non-zero exit is a normal outcome.
pub async fn run_process(
    request: &ProcessRequest,
    name: &str,
    sink: &Arc<dyn StreamHandler>,
    slot: Option<&ProcessSlot>,
) -> std::io::Result<ProcessOutcome> {
    let mut child = request.build().spawn()?;
    let handle = Arc::new(ProcessHandle::new(child.id()));
    if let Some(slot) = slot {
        slot.publish(Arc::clone(&handle));
    }
    debug!(command = name, pid = ?handle.pid(), "process started");

    let mut forwarders = Vec::with_capacity(3);
    let mut tee = None;
    if let Some(stdout) = child.stdout.take() {
        let (writer, reader) = tokio::io::duplex(TEE_BUFFER);
        forwarders.push(sink.handle_stream(Box::new(reader), StreamKind::Stdout, name));
        tee = Some(tokio::spawn(tee_stdout(stdout, writer)));
    }
    if let Some(stderr) = child.stderr.take() {
        forwarders.push(sink.handle_stream(Box::new(stderr), StreamKind::Stderr, name));
    }

    let status = wait_child(&mut child, &handle).await;
    handle.mark_exited();

    let captured = match tee {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };
    for f in forwarders {
        if let Err(e) = f.await {
            warn!(command = name, "output forwarding task failed: {e}");
        }
    }
    if let Some(slot) = slot {
        slot.clear(&handle);
    }

    let status = status.map(exit_code).unwrap_or_else(|e| {
        warn!(command = name, "waiting for process failed: {e}");
        STATUS_FAILURE
    });
    debug!(command = name, status, "process finished");
    Ok(ProcessOutcome {
        status,
        extractable: single_line(&captured),
    })
}

async fn wait_child(child: &mut Child, handle: &ProcessHandle) -> std::io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => status,
        _ = handle.kill.notified() => {
            if let Err(e) = child.start_kill() {
                debug!("start_kill failed: {e}");
            }
            child.wait().await
        }
    }
}

/// Copy stdout into the sink pipe, keeping at most `CAPTURE_LIMIT` bytes.
/// A sink that stopped reading does not stop the capture.
async fn tee_stdout(
    mut stdout: tokio::process::ChildStdout,
    mut writer: tokio::io::DuplexStream,
) -> Vec<u8> {
    let mut captured = Vec::new();
    let mut buf = vec![0u8; 8192];
    let mut sink_open = true;
    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("stdout read failed: {e}");
                break;
            }
        };
        let room = CAPTURE_LIMIT.saturating_sub(captured.len());
        captured.extend_from_slice(&buf[..n.min(room)]);
        if sink_open && writer.write_all(&buf[..n]).await.is_err() {
            sink_open = false;
        }
    }
    let _ = writer.shutdown().await;
    captured
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    STATUS_FAILURE
}

fn single_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let first = lines.next()?;
    if lines.next().is_some() {
        return None;
    }
    Some(first.to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sink::MemoryStreamHandler;

    fn memory() -> (MemoryStreamHandler, Arc<dyn StreamHandler>) {
        let m = MemoryStreamHandler::new();
        let sink: Arc<dyn StreamHandler> = Arc::new(m.clone());
        (m, sink)
    }

    #[tokio::test]
    async fn echo_streams_and_extracts() {
        let (mem, sink) = memory();
        let out = run_process(&ProcessRequest::shell("echo 'Hello, world!'"), "hello", &sink, None)
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.extractable.as_deref(), Some("Hello, world!"));
        assert_eq!(mem.lines(StreamKind::Stdout), vec!["Hello, world!"]);
    }

    #[tokio::test]
    async fn multi_line_output_is_not_extractable() {
        let (mem, sink) = memory();
        let out = run_process(&ProcessRequest::shell("printf 'a\\nb\\n'; echo err >&2; exit 3"), "m", &sink, None)
            .await
            .unwrap();
        assert_eq!(out.status, 3);
        assert_eq!(out.extractable, None);
        assert_eq!(mem.lines(StreamKind::Stderr), vec!["err"]);
    }

    #[tokio::test]
    async fn env_overlay_path_override_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let spec = TerminalSpec {
            command_text: String::new(),
            arguments: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
            path: Some(dir.path().display().to_string()),
            environment_path_variable: Some("/nonexistent-bin".into()),
            copy_output: false,
        };
        let (_, sink) = memory();
        let req = ProcessRequest::for_terminal(&spec, "echo \"$GREETING:$PATH:$(pwd -P)\"");
        let out = run_process(&req, "env", &sink, None).await.unwrap();
        let expected_dir = dir.path().canonicalize().unwrap();
        assert_eq!(
            out.extractable.unwrap(),
            format!("hi:/nonexistent-bin:{}", expected_dir.display())
        );
    }

    #[tokio::test]
    async fn missing_working_dir_is_a_launch_error() {
        let (_, sink) = memory();
        let mut req = ProcessRequest::shell("true");
        req.working_dir = Some("/definitely/not/here".into());
        assert!(run_process(&req, "bad", &sink, None).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_terminates_process_group() {
        let (_, sink) = memory();
        let slot = Arc::new(ProcessSlot::new());
        let runner = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                run_process(&ProcessRequest::shell("sleep 30 | cat"), "sleeper", &sink, Some(slot.as_ref())).await
            })
        };
        let handle = loop {
            if let Some(h) = slot.get() {
                break h;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert!(handle.is_alive());
        handle.stop(STOP_GRACE).await;
        let out = runner.await.unwrap().unwrap();
        assert!(!handle.is_alive());
        assert!(!out.success());
        assert!(slot.get().is_none());
    }

    #[test]
    fn single_line_rules() {
        assert_eq!(single_line(b"  x  \n"), Some("x".into()));
        assert_eq!(single_line(b"\nx\n\n"), Some("x".into()));
        assert_eq!(single_line(b""), None);
        assert_eq!(single_line(b"a\nb"), None);
    }
}
