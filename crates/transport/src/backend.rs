//! Backend processes speaking frames on stdin/stdout

use crate::TransportError;
use crate::frame_io::{FrameReader, FrameWriter};
use std::process::Stdio;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};
use wsgate_protocol::{ControlMessage, Frame};

/// Program and arguments of a backend process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl BackendCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// A running backend process.
///
/// The child is killed when this value (or the `Child` taken from it) is
/// dropped, so an abandoned negotiation or channel never leaves an
/// orphaned process behind.
pub struct BackendProcess {
    child: Child,
    reader: FrameReader<ChildStdout>,
    writer: FrameWriter<ChildStdin>,
}

impl BackendProcess {
    /// Spawn with piped stdin/stdout; stderr is inherited for diagnostics
    pub fn spawn(command: &BackendCommand) -> Result<Self, TransportError> {
        let spawn_error = |reason: String| TransportError::Spawn {
            program: command.program.clone(),
            reason,
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout not captured".into()))?;

        debug!(
            "Spawned backend {} (pid {:?})",
            command.program,
            child.id()
        );

        Ok(Self {
            child,
            reader: FrameReader::new(stdout),
            writer: FrameWriter::new(stdin),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        self.reader.read_frame().await
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.writer.write_frame(frame).await
    }

    pub async fn write_control(&mut self, message: &ControlMessage) -> Result<(), TransportError> {
        self.writer.write_control(message).await
    }

    /// Kill the process and reap it
    pub async fn terminate(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill backend {:?}: {}", self.child.id(), e);
        }
    }

    /// Split into the process handle and its framed streams
    pub fn into_parts(self) -> (Child, FrameReader<ChildStdout>, FrameWriter<ChildStdin>) {
        (self.child, self.reader, self.writer)
    }
}
