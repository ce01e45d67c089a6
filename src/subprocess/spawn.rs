use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::builder::{Attach, BoxedInput};
use crate::config::OutputConfig;
use crate::error::RunError;
use crate::observe::ExecutedCommand;
use crate::output::completion::Completion;
use crate::output::Process;
use crate::relay::{self, PipeReader, PipeWriter};

const PUMP_CHUNK_SIZE: usize = 8 * 1024;

pub(crate) type PumpHandle = JoinHandle<io::Result<()>>;

/// Kill conditions applied while waiting for the child
#[derive(Debug, Default)]
pub(crate) struct Limits {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

/// Everything the child wrote to stderr, kept for the terminal error.
///
/// Held in a relay pipe of its own, so a child that floods stderr fills a
/// temp file rather than memory. It is only read back if the child fails.
pub(crate) struct StderrCapture {
    writer: PipeWriter,
    reader: PipeReader,
}

impl StderrCapture {
    pub(crate) fn new(max_buffer_size: usize) -> Self {
        let (writer, reader) = relay::pipe(max_buffer_size);
        Self { writer, reader }
    }

    fn writer(&self) -> PipeWriter {
        self.writer.clone()
    }

    /// Close the capture and read back everything in it
    pub(crate) async fn read_all(self) -> Vec<u8> {
        let Self { writer, mut reader } = self;
        writer.close();

        let mut captured = Vec::new();
        if let Err(e) = reader.read_to_end(&mut captured).await {
            debug!("Stderr capture ended early: {}", e);
        }
        captured
    }
}

/// Spawn the child and start draining it into a fresh relay pipe
pub(crate) fn spawn(
    command: &ExecutedCommand,
    env: &[(String, String)],
    inputs: Vec<BoxedInput>,
    attach: Attach,
    config: &OutputConfig,
    limits: Limits,
) -> Result<Process, RunError> {
    log_command_start(command, env, inputs.len());

    let mut cmd = tokio::process::Command::new(&command.program);
    cmd.args(&command.args);
    for (key, value) in env {
        cmd.env(key, value);
    }
    if let Some(dir) = &command.dir {
        cmd.current_dir(dir);
    }
    configure_stdio(&mut cmd, attach, !inputs.is_empty());

    let mut child = cmd.spawn().map_err(|e| map_spawn_error(command, e))?;
    debug!("Spawned {} with pid {:?}", command.program, child.id());

    let (writer, reader) = relay::pipe(config.max_buffer_size);
    let capture = StderrCapture::new(config.max_buffer_size);
    let mut pumps = Vec::with_capacity(2);

    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, Some(writer.clone()), None)));
    }
    if let Some(stderr) = child.stderr.take() {
        let relay = (attach != Attach::StdoutOnly).then(|| writer.clone());
        pumps.push(tokio::spawn(pump(stderr, relay, Some(capture.writer()))));
    }
    let input = child
        .stdin
        .take()
        .map(|stdin| tokio::spawn(feed_input(stdin, inputs)));

    let completion = Completion::new(
        child,
        command.program.clone(),
        pumps,
        input,
        capture,
        writer,
        limits,
    );
    Ok(Process { completion, reader })
}

fn log_command_start(command: &ExecutedCommand, env: &[(String, String)], inputs: usize) {
    debug!("Executing subprocess: {}", command);

    if !env.is_empty() {
        debug!(
            "Environment variables count: {}, total size: {} bytes",
            env.len(),
            env.iter().map(|(k, v)| k.len() + v.len() + 2).sum::<usize>()
        );
        trace!("Environment variables: {:?}", command.env);
    }

    // Very large argument lists are the usual cause of E2BIG
    let args_size: usize = command.args.iter().map(String::len).sum();
    if args_size > 10_000 {
        warn!(
            "Large arguments detected: {} args, {} total bytes",
            command.args.len(),
            args_size
        );
    }

    if let Some(dir) = &command.dir {
        trace!("Working directory: {:?}", dir);
    }
    if inputs > 0 {
        trace!("Stdin fed from {} input(s)", inputs);
    }
}

fn configure_stdio(cmd: &mut tokio::process::Command, attach: Attach, has_input: bool) {
    cmd.stdin(if has_input {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    if attach == Attach::StderrOnly {
        cmd.stdout(Stdio::null());
    } else {
        cmd.stdout(Stdio::piped());
    }

    cmd.stderr(Stdio::piped());
}

fn map_spawn_error(command: &ExecutedCommand, err: io::Error) -> RunError {
    if err.kind() == io::ErrorKind::NotFound {
        debug!("Command not found: {}", command.program);
        return RunError::CommandNotFound(command.program.clone());
    }

    warn!("Failed to start {}: {}", command.program, err);
    RunError::Start {
        command: command.to_string(),
        source: Arc::new(err),
    }
}

/// Copy one child stream into the relay pipe (and the stderr capture).
///
/// Keeps reading after a relay failure so the child never blocks on a full
/// OS pipe; the first relay failure is returned once the stream ends.
async fn pump<R>(
    mut source: R,
    relay: Option<PipeWriter>,
    capture: Option<PipeWriter>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; PUMP_CHUNK_SIZE];
    let mut relay_error = None;

    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];

        if let Some(capture) = &capture {
            if let Err(e) = capture.write(chunk) {
                trace!("Stderr capture write failed: {}", e);
            }
        }
        if let (Some(relay), None) = (&relay, &relay_error) {
            if let Err(e) = relay.write(chunk) {
                debug!("Relay write failed, discarding further output: {}", e);
                relay_error = Some(e);
            }
        }
    }

    relay_error.map_or(Ok(()), Err)
}

/// Write every input to the child's stdin in order, then close it.
///
/// A child that exits without reading all of its input is not an error.
async fn feed_input(mut stdin: ChildStdin, inputs: Vec<BoxedInput>) -> io::Result<()> {
    for mut input in inputs {
        match tokio::io::copy(&mut input, &mut stdin).await {
            Ok(bytes) => trace!("Fed {} bytes to stdin", bytes),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!("Child closed stdin before reading all input");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }

    match stdin.shutdown().await {
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
        _ => Ok(()),
    }
}
