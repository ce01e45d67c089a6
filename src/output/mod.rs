//! Consuming the output of a running command
//!
//! An [`Output`] is returned by [`Command::run`](crate::Command::run). Line
//! transforms are registered with [`Output::map`] and friends, then the output
//! is consumed exactly once, in one of several shapes:
//!
//! - [`stream`](Output::stream) / [`write_to`](Output::write_to) copy it into
//!   an `AsyncWrite`
//! - [`stream_lines`](Output::stream_lines) calls a closure per line
//! - [`lines`](Output::lines) and [`text`](Output::text) materialize it
//! - [`jq`](Output::jq) runs a JSON query over all of it
//! - reading the `Output` itself through [`AsyncRead`], which is how one
//!   command's output becomes another command's input
//! - [`wait`](Output::wait) ignores it
//!
//! Every shape ends with the same terminal error: the [`RunError`] built from
//! the process exit if the process failed, otherwise whatever went wrong on the
//! consuming side. A second consumption returns [`RunError::AlreadyConsumed`].

pub(crate) mod aggregate;
pub(crate) mod completion;

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use self::completion::Completion;
use crate::config::OutputConfig;
use crate::error::RunError;
use crate::observe::{ExecutedCommand, Observers};
use crate::query::Program;
use crate::relay::{self, PipeReader};
use crate::transform::{LineBuffer, LineMap, MapJq, TransformChain};

/// A spawned child: its completion coordinator and the read half of the
/// relay pipe its output is drained into
pub(crate) struct Process {
    pub(crate) completion: Completion,
    pub(crate) reader: PipeReader,
}

enum State {
    Pending(Box<Process>),
    Reading(PipeReader),
    Consumed,
    Failed(RunError),
}

/// Output of a command, consumable once
pub struct Output {
    state: State,
    transforms: TransformChain,
    config: OutputConfig,
    command: Arc<ExecutedCommand>,
    observers: Observers,
}

impl Output {
    pub(crate) fn attached(
        process: Process,
        command: Arc<ExecutedCommand>,
        observers: Observers,
        config: OutputConfig,
    ) -> Self {
        Self {
            state: State::Pending(Box::new(process)),
            transforms: TransformChain::default(),
            config,
            command,
            observers,
        }
    }

    pub(crate) fn failed_for(
        err: RunError,
        command: Arc<ExecutedCommand>,
        observers: Observers,
        config: OutputConfig,
    ) -> Self {
        Self {
            state: State::Failed(err),
            transforms: TransformChain::default(),
            config,
            command,
            observers,
        }
    }

    /// An output that fails every method with `err`
    pub fn failed(err: RunError) -> Self {
        Self::failed_for(
            err,
            Arc::new(ExecutedCommand::default()),
            Observers::default(),
            OutputConfig::default(),
        )
    }

    /// The command this output belongs to
    pub fn command(&self) -> &ExecutedCommand {
        &self.command
    }

    /// Add a transform stage run over every line at consumption time.
    ///
    /// The closure receives the line without its terminator and writes the
    /// replacement into `dst`. Not calling write at all drops the line; see
    /// [`LineMap`] for the full contract.
    pub fn map<F>(self, map: F) -> Self
    where
        F: Fn(&[u8], &mut LineBuffer) -> io::Result<usize> + Send + Sync + 'static,
    {
        self.map_with(map)
    }

    /// Add a transform stage implemented as a [`LineMap`]
    pub fn map_with<M>(mut self, stage: M) -> Self
    where
        M: LineMap + 'static,
    {
        self.transforms.push(Arc::new(stage));
        self
    }

    /// Replace every line with the results of a jq query over it.
    ///
    /// A query that does not compile fails the whole output.
    pub fn map_jq(self, query: &str) -> Self {
        match MapJq::new(query) {
            Ok(stage) => self.map_with(stage),
            Err(e) => self.fail(RunError::Query(e)),
        }
    }

    fn fail(mut self, err: RunError) -> Self {
        if matches!(self.state, State::Pending(_)) {
            self.state = State::Failed(err);
        }
        self
    }

    /// Copy the output into `dst` until the process exits
    pub async fn stream<W>(&mut self, dst: &mut W) -> Result<(), RunError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.write_to(dst).await.map(|_| ())
    }

    /// Like [`stream`](Self::stream), returning the number of bytes written
    pub async fn write_to<W>(&mut self, dst: &mut W) -> Result<u64, RunError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.copy_as("stream", dst).await
    }

    async fn copy_as<W>(&mut self, event: &str, dst: &mut W) -> Result<u64, RunError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let result = match self.begin(event) {
            Ok(process) => {
                aggregate::copy_output(
                    process,
                    &self.transforms,
                    self.config.line_channel_capacity,
                    dst,
                )
                .await
            }
            Err(e) => Err(e),
        };
        self.finish(result)
    }

    /// Call `callback` with every line, in order, as it arrives
    pub async fn stream_lines<F>(&mut self, callback: F) -> Result<(), RunError>
    where
        F: FnMut(&[u8]),
    {
        self.lines_as("stream_lines", callback).await
    }

    async fn lines_as<F>(&mut self, event: &str, callback: F) -> Result<(), RunError>
    where
        F: FnMut(&[u8]),
    {
        let result = match self.begin(event) {
            Ok(process) => {
                aggregate::for_each_line(
                    process,
                    &self.transforms,
                    self.config.line_channel_capacity,
                    callback,
                )
                .await
            }
            Err(e) => Err(e),
        };
        self.finish(result)
    }

    /// All lines of the output, terminators stripped
    pub async fn lines(&mut self) -> Result<Vec<String>, RunError> {
        let (lines, result) = self.collect_lines().await;
        result.map(|()| lines)
    }

    /// All lines of the output along with the terminal error, so the lines
    /// produced before a failure are still available
    pub async fn collect_lines(&mut self) -> (Vec<String>, Result<(), RunError>) {
        let mut lines = Vec::new();
        let result = self
            .lines_as("lines", |line| {
                lines.push(String::from_utf8_lossy(line).into_owned());
            })
            .await;
        (lines, result)
    }

    /// The whole output as text, with one trailing newline removed
    pub async fn text(&mut self) -> Result<String, RunError> {
        let mut buf = Vec::new();
        self.copy_as("text", &mut buf).await?;

        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        Ok(String::from_utf8(buf)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
    }

    /// Run a jq query over the whole output, parsed as one JSON document.
    ///
    /// Results are encoded as compact JSON, one per line. A query that does
    /// not compile is reported without consuming the output.
    pub async fn jq(&mut self, query: &str) -> Result<Vec<u8>, RunError> {
        let program = Program::compile(query)?;

        let result = match self.begin("jq") {
            Ok(process) => {
                let mut buf = Vec::new();
                aggregate::copy_output(
                    process,
                    &self.transforms,
                    self.config.line_channel_capacity,
                    &mut buf,
                )
                .await
                .and_then(|_| Ok(program.run_bytes(&buf)?))
            }
            Err(e) => Err(e),
        };
        self.finish(result)
    }

    /// Wait for the process to exit, discarding its output
    pub async fn wait(&mut self) -> Result<(), RunError> {
        let result = match self.begin("wait") {
            Ok(process) => aggregate::discard(process).await,
            Err(e) => Err(e),
        };
        self.finish(result)
    }

    /// Take the process out for consumption, leaving the output consumed
    fn begin(&mut self, event: &str) -> Result<Process, RunError> {
        self.observers.event(&self.command, event);

        match std::mem::replace(&mut self.state, State::Consumed) {
            State::Pending(process) => Ok(*process),
            State::Failed(err) => {
                self.state = State::Failed(err.clone());
                Err(err)
            }
            State::Reading(reader) => {
                self.state = State::Reading(reader);
                Err(RunError::AlreadyConsumed)
            }
            State::Consumed => Err(RunError::AlreadyConsumed),
        }
    }

    fn finish<T>(&self, result: Result<T, RunError>) -> Result<T, RunError> {
        report(&self.observers, &self.command, result.as_ref().err());
        result
    }

    /// Start the tasks behind reads. Without transforms the relay pipe is
    /// read directly; otherwise the transformed stream is relayed once more
    /// through a second pipe.
    fn start_reading(&mut self) {
        let process = match std::mem::replace(&mut self.state, State::Consumed) {
            State::Pending(process) => *process,
            other => {
                self.state = other;
                return;
            }
        };
        self.observers.event(&self.command, "read");

        let observers = self.observers.clone();
        let command = Arc::clone(&self.command);

        if self.transforms.is_empty() {
            let Process { completion, reader } = process;
            tokio::spawn(async move {
                let err = completion.run().await;
                report(&observers, &command, err.as_ref());
            });
            self.state = State::Reading(reader);
            return;
        }

        let (mut writer, reader) = relay::pipe(self.config.max_buffer_size);
        let transforms = self.transforms.clone();
        let capacity = self.config.line_channel_capacity;
        tokio::spawn(async move {
            let result = aggregate::copy_output(process, &transforms, capacity, &mut writer).await;
            let err = result.err();
            writer.close_with_error(err.clone());
            report(&observers, &command, err.as_ref());
        });
        self.state = State::Reading(reader);
    }
}

fn report(observers: &Observers, command: &ExecutedCommand, err: Option<&RunError>) {
    if let Some(err) = err {
        observers.error(command, err);
    }
    observers.event(command, "done");
}

impl AsyncRead for Output {
    /// The first read spawns the process tasks. Reads then drain the
    /// (transformed) output and end with the terminal error, carried as the
    /// payload of an `io::Error`.
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if matches!(this.state, State::Pending(_)) {
            this.start_reading();
        }

        match &mut this.state {
            State::Reading(reader) => Pin::new(reader).poll_read(cx, buf),
            State::Failed(err) => Poll::Ready(Err(err.clone().into_io())),
            State::Pending(_) | State::Consumed => {
                Poll::Ready(Err(RunError::AlreadyConsumed.into_io()))
            }
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Pending(_) => "pending",
            State::Reading(_) => "reading",
            State::Consumed => "consumed",
            State::Failed(_) => "failed",
        };
        f.debug_struct("Output")
            .field("command", &self.command.program)
            .field("state", &state)
            .field("transforms", &self.transforms.len())
            .finish()
    }
}
