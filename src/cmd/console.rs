//! Terminal sink for `exec`: stdout lines go to stdout as-is, stderr lines
//! to stderr with a dimmed stream tag. In JSON mode everything goes to
//! stderr so stdout stays machine-readable.

use cmdvault::sink::{OutputStream, StreamHandler, StreamKind, read_lines};
use tokio::task::JoinHandle;

use crate::cmd::format::{Role, StyleOptions, color};

#[derive(Debug, Clone)]
pub struct ConsoleStreamHandler {
    style: StyleOptions,
    stdout_to_stderr: bool,
}

impl ConsoleStreamHandler {
    pub fn new(style: StyleOptions, stdout_to_stderr: bool) -> Self {
        Self {
            style,
            stdout_to_stderr,
        }
    }
}

impl StreamHandler for ConsoleStreamHandler {
    fn handle_stream(&self, stream: OutputStream, kind: StreamKind, _command_name: &str) -> JoinHandle<()> {
        let style = self.style.clone();
        let stdout_to_stderr = self.stdout_to_stderr;
        tokio::spawn(async move {
            read_lines(stream, |line| match kind {
                StreamKind::Stdout if !stdout_to_stderr => println!("{line}"),
                StreamKind::Stdout => eprintln!("{line}"),
                StreamKind::Stderr => {
                    eprintln!("{} {line}", color(Role::Dim, "[stderr]", &style));
                }
            })
            .await;
        })
    }
}
