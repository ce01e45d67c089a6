//! Best-effort instrumentation hooks for command execution
//!
//! Observers are told when a command starts, which consumption mode was used
//! on its output, and which terminal error (if any) came out of it. They run
//! inline on the calling task, so implementations should return quickly.
//! Whatever an observer returns, the output it observes behaves the same:
//! errors are logged at debug level and dropped.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::error::RunError;

/// Description of a command that is about to be spawned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    /// Names of variables set on top of the inherited environment
    pub env: Vec<String>,
}

impl ExecutedCommand {
    /// Arguments joined for display, quoted where needed
    pub fn command_line(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }
}

impl fmt::Display for ExecutedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Hook notified over the lifetime of one command
pub trait CommandObserver: Send + Sync {
    fn on_start(&self, command: &ExecutedCommand) -> Result<()>;

    /// A named step in the life of the output: the consumption mode chosen
    /// (`stream`, `stream_lines`, `lines`, `text`, `jq`, `read`, `wait`) and
    /// finally `done`.
    fn on_event(&self, _command: &ExecutedCommand, _name: &str) -> Result<()> {
        Ok(())
    }

    fn on_error(&self, _command: &ExecutedCommand, _error: &RunError) -> Result<()> {
        Ok(())
    }
}

/// Emits every hook as a `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CommandObserver for TracingObserver {
    fn on_start(&self, command: &ExecutedCommand) -> Result<()> {
        info!(
            program = %command.program,
            args = ?command.args,
            dir = ?command.dir,
            "Running command"
        );
        Ok(())
    }

    fn on_event(&self, command: &ExecutedCommand, name: &str) -> Result<()> {
        debug!(program = %command.program, event = name, "Command output event");
        Ok(())
    }

    fn on_error(&self, command: &ExecutedCommand, error: &RunError) -> Result<()> {
        debug!(program = %command.program, error = %error, "Command failed");
        Ok(())
    }
}

/// Calls a closure with every command that starts
pub struct FnObserver<F> {
    callback: F,
}

impl<F> FnObserver<F>
where
    F: Fn(&ExecutedCommand) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> CommandObserver for FnObserver<F>
where
    F: Fn(&ExecutedCommand) + Send + Sync,
{
    fn on_start(&self, command: &ExecutedCommand) -> Result<()> {
        (self.callback)(command);
        Ok(())
    }
}

/// Set of observers attached to one command, with failures contained
#[derive(Clone, Default)]
pub(crate) struct Observers {
    observers: Vec<Arc<dyn CommandObserver>>,
}

impl Observers {
    pub(crate) fn push(&mut self, observer: Arc<dyn CommandObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn start(&self, command: &ExecutedCommand) {
        for observer in &self.observers {
            if let Err(e) = observer.on_start(command) {
                debug!("Command observer failed on start: {:#}", e);
            }
        }
    }

    pub(crate) fn event(&self, command: &ExecutedCommand, name: &str) {
        for observer in &self.observers {
            if let Err(e) = observer.on_event(command, name) {
                debug!("Command observer failed on event {}: {:#}", name, e);
            }
        }
    }

    pub(crate) fn error(&self, command: &ExecutedCommand, error: &RunError) {
        for observer in &self.observers {
            if let Err(e) = observer.on_error(command, error) {
                debug!("Command observer failed on error: {:#}", e);
            }
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.observers.len())
            .finish()
    }
}
