//! Waiting for a child to exit and turning the result into the terminal error
//!
//! The coordinator runs exactly once per output: it is consumed by
//! [`Completion::run`], and an output that has already handed it out reports
//! [`RunError::AlreadyConsumed`] instead of waiting again.

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

use crate::error::RunError;
use crate::relay::PipeWriter;
use crate::subprocess::spawn::{Limits, PumpHandle, StderrCapture};

/// How long to keep draining output after killing a child. Grandchildren
/// that inherited the output pipes can keep them open indefinitely.
const KILLED_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// How long to wait for stdin feeding to settle once the child has exited
const INPUT_GRACE: Duration = Duration::from_millis(200);

pub(crate) struct Completion {
    child: Child,
    program: String,
    pumps: Vec<PumpHandle>,
    input: Option<PumpHandle>,
    capture: StderrCapture,
    writer: PipeWriter,
    limits: Limits,
}

impl Completion {
    pub(crate) fn new(
        child: Child,
        program: String,
        pumps: Vec<PumpHandle>,
        input: Option<PumpHandle>,
        capture: StderrCapture,
        writer: PipeWriter,
        limits: Limits,
    ) -> Self {
        Self {
            child,
            program,
            pumps,
            input,
            capture,
            writer,
            limits,
        }
    }

    /// Wait for the child, drain its output into the relay pipe and close the
    /// pipe with the terminal error, which is also returned.
    ///
    /// Output bytes are always enqueued before the pipe is closed, so readers
    /// see every byte the child wrote before they see the error.
    pub(crate) async fn run(self) -> Option<RunError> {
        let Completion {
            mut child,
            program,
            pumps,
            input,
            capture,
            writer,
            limits,
        } = self;

        let (status, killed) = wait_for_exit(&mut child, &program, limits).await;
        let relay_error = join_pumps(pumps, killed).await;
        let input_error = join_input(input).await;

        let error = match status {
            Ok(status) => {
                debug!("{} exited with {}", program, status);
                let process_error = if status.success() {
                    None
                } else {
                    let stderr = capture.read_all().await;
                    RunError::from_exit_status(status, &stderr)
                };
                process_error
                    .or_else(|| relay_error.map(RunError::from_io))
                    .or(input_error)
            }
            Err(e) => {
                warn!("Failed to wait for {}: {}", program, e);
                Some(RunError::Io(Arc::new(e)))
            }
        };

        writer.close_with_error(error.clone());
        error
    }
}

async fn wait_for_exit(
    child: &mut Child,
    program: &str,
    limits: Limits,
) -> (io::Result<ExitStatus>, bool) {
    let Limits { timeout, cancel } = limits;

    let deadline = async move {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    let cancelled = async move {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        status = child.wait() => return (status, false),
        () = deadline => warn!("{} did not exit within {:?}, killing it", program, timeout),
        () = cancelled => debug!("{} was cancelled, killing it", program),
    }

    if let Err(e) = child.start_kill() {
        debug!("Failed to kill {}: {}", program, e);
    }
    (child.wait().await, true)
}

/// Wait for every pump to finish, returning the first relay failure
async fn join_pumps(pumps: Vec<PumpHandle>, killed: bool) -> Option<io::Error> {
    let mut first_error = None;

    for mut pump in pumps {
        let joined = if killed {
            match tokio::time::timeout(KILLED_DRAIN_GRACE, &mut pump).await {
                Ok(joined) => joined,
                Err(_) => {
                    debug!("Output still open after kill, abandoning it");
                    pump.abort();
                    continue;
                }
            }
        } else {
            pump.await
        };

        if let Err(e) = joined.unwrap_or_else(|e| Err(io::Error::other(e))) {
            first_error.get_or_insert(e);
        }
    }

    first_error
}

async fn join_input(input: Option<PumpHandle>) -> Option<RunError> {
    let mut input = input?;

    match tokio::time::timeout(INPUT_GRACE, &mut input).await {
        Ok(Ok(Ok(()))) => None,
        Ok(Ok(Err(e))) => Some(RunError::from_io(e)),
        Ok(Err(e)) => Some(RunError::from_io(io::Error::other(e))),
        Err(_) => {
            debug!("Child exited before its input was fully written");
            input.abort();
            None
        }
    }
}
