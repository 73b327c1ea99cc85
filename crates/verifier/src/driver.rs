//! Runs a negotiation over the verifier's standard streams

use crate::NegotiationError;
use crate::engine::{Action, Negotiation};
use std::collections::VecDeque;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use wsgate_protocol::{AUTH_REJECTED_EXIT, AuthOutcome, decode_control_frame};
use wsgate_transport::{BackendCommand, FrameWriter, read_frame};

/// Verifier invocation
#[derive(Debug, Clone)]
pub struct VerifierOptions {
    /// Host the login targets
    pub scope: String,
    /// Agent that takes over the streams on a handoff verdict
    pub bridge: BackendCommand,
}

/// Drive `negotiation` until it reaches a verdict.
///
/// Returns `None` when the negotiation ended without a verdict of its own.
/// The verdict itself is not written; the caller decides how to report it.
pub async fn negotiate<R, W>(
    reader: &mut R,
    writer: &mut FrameWriter<W>,
    negotiation: &mut Negotiation,
) -> Result<Option<AuthOutcome>, NegotiationError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut pending: VecDeque<Action> = negotiation.start().into();

    loop {
        while let Some(action) = pending.pop_front() {
            match action {
                Action::Send(message) => writer.write_control(&message).await?,
                Action::Delay(duration) => tokio::time::sleep(duration).await,
                Action::Finish(outcome) => return Ok(Some(outcome)),
                Action::Abort => return Ok(None),
            }
        }

        // No frame may be unread in a buffer when the streams are handed over,
        // so frames are read straight off the stream
        let frame = read_frame(reader).await?.ok_or(NegotiationError::Closed)?;
        let actions = match decode_control_frame(&frame) {
            Ok(message) => negotiation.on_message(message),
            Err(e) => negotiation.on_invalid(&e.to_string()),
        };
        pending.extend(actions);
    }
}

/// Run the verifier on stdin/stdout and return the process exit status
pub async fn run(options: VerifierOptions) -> i32 {
    match serve(&options).await {
        Ok(code) => code,
        Err(e) => {
            error!("Negotiation for {} failed: {}", options.scope, e);
            AUTH_REJECTED_EXIT
        }
    }
}

async fn serve(options: &VerifierOptions) -> Result<i32, NegotiationError> {
    let mut input = unbuffered_stdin()?;
    let mut writer = FrameWriter::new(tokio::io::stdout());
    let mut negotiation = Negotiation::new(&options.scope);

    let Some(outcome) = negotiate(&mut input, &mut writer, &mut negotiation).await? else {
        debug!("Negotiation aborted without a verdict");
        return Ok(AUTH_REJECTED_EXIT);
    };

    match &outcome {
        AuthOutcome::Success {
            user,
            handoff: true,
            ..
        } => {
            info!("Handing {} over to {}", user, options.bridge.program);
            writer.write_control(&outcome.to_init().into()).await?;
            drop(input);
            drop(writer);
            handoff(&options.bridge).await
        }
        AuthOutcome::Success { user, .. } => {
            info!("Authenticated {} for {}", user, options.scope);
            writer.write_control(&outcome.to_init().into()).await?;
            // Relay frames until the gateway closes our input
            let mut relayed = 0usize;
            while let Some(frame) = read_frame(&mut input).await? {
                writer.write_frame(&frame).await?;
                relayed += 1;
            }
            debug!("Pass-through finished after {} frames", relayed);
            Ok(AUTH_REJECTED_EXIT)
        }
        AuthOutcome::Failure { problem, .. } => {
            warn!("Rejected login for {}: {}", options.scope, problem);
            writer.write_control(&outcome.to_init().into()).await?;
            Ok(AUTH_REJECTED_EXIT)
        }
    }
}

/// Start the bridge on our own stdin/stdout and wait for it
async fn handoff(bridge: &BackendCommand) -> Result<i32, NegotiationError> {
    let status = Command::new(&bridge.program)
        .args(&bridge.args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| NegotiationError::Bridge {
            program: bridge.program.clone(),
            reason: e.to_string(),
        })?;

    debug!("Bridge exited with {}", status);
    Ok(status.code().unwrap_or(AUTH_REJECTED_EXIT))
}

type Input = Box<dyn AsyncRead + Unpin + Send>;

/// A stdin reader that never reads past what it is asked for
#[cfg(unix)]
fn unbuffered_stdin() -> std::io::Result<Input> {
    use std::os::fd::AsFd;

    let fd = std::io::stdin().as_fd().try_clone_to_owned()?;
    Ok(Box::new(tokio::fs::File::from_std(std::fs::File::from(fd))))
}

#[cfg(not(unix))]
fn unbuffered_stdin() -> std::io::Result<Input> {
    Ok(Box::new(tokio::io::stdin()))
}
