use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use super::spawn::{self, Limits};
use crate::config::OutputConfig;
use crate::error::RunError;
use crate::observe::{CommandObserver, ExecutedCommand, Observers};
use crate::output::Output;

/// Which of the child's output streams an [`Output`] exposes.
///
/// Stderr is always captured for error reporting, whatever is attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Attach {
    /// Stdout and stderr, interleaved as they arrive
    #[default]
    Combined,
    StdoutOnly,
    StderrOnly,
}

pub(crate) type BoxedInput = Box<dyn AsyncRead + Send + Unpin>;

/// Builder for a command whose output is consumed through [`Output`].
///
/// Invalid construction (an unparsable command line, a malformed environment
/// entry) is not reported here; it is carried into the [`Output`] returned by
/// [`run`](Self::run), which then fails every method with the same error.
pub struct Command {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    dir: Option<PathBuf>,
    inputs: Vec<BoxedInput>,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
    config: OutputConfig,
    observers: Observers,
    attach: Attach,
    build_error: Option<RunError>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            dir: None,
            inputs: Vec::new(),
            timeout: None,
            cancel: None,
            config: OutputConfig::default(),
            observers: Observers::default(),
            attach: Attach::default(),
            build_error: None,
        }
    }

    /// Split a command line into program and arguments using shell quoting
    /// rules. No shell is involved in running it.
    pub fn parse(line: &str) -> Self {
        match shell_words::split(line) {
            Ok(words) => {
                let mut words = words.into_iter();
                match words.next() {
                    Some(program) => Self::new(program).args(words),
                    None => Self::invalid("empty command line".to_string()),
                }
            }
            Err(e) => Self::invalid(format!("failed to parse {line:?}: {e}")),
        }
    }

    /// Run `script` with `bash -c`
    pub fn bash(script: impl Into<String>) -> Self {
        Self::new("bash").arg("-c").arg(script)
    }

    fn invalid(message: String) -> Self {
        let mut command = Self::new(String::new());
        command.build_error = Some(RunError::Build(message));
        command
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.env.push((key.into(), value.into()));
        }
        self
    }

    /// Add environment entries in `KEY=VALUE` form
    pub fn environ<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for entry in entries {
            let entry = entry.as_ref();
            match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    self.env.push((key.to_string(), value.to_string()));
                }
                _ => {
                    self.build_error.get_or_insert_with(|| {
                        RunError::Build(format!("invalid environment entry {entry:?}"))
                    });
                }
            }
        }
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Feed `input` to the child's stdin. Repeated calls are concatenated in
    /// order. Another command's [`Output`] can be passed here to chain
    /// commands; its failure is reported by this command if this one exits
    /// cleanly.
    pub fn input<R>(mut self, input: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.inputs.push(Box::new(input));
        self
    }

    /// Drop every input added so far
    pub fn reset_input(mut self) -> Self {
        self.inputs.clear();
        self
    }

    /// Kill the child if it has not exited after `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Kill the child when `token` is cancelled
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(mut self, config: OutputConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn CommandObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn attach(mut self, attach: Attach) -> Self {
        self.attach = attach;
        self
    }

    pub fn stdout_only(self) -> Self {
        self.attach(Attach::StdoutOnly)
    }

    pub fn stderr_only(self) -> Self {
        self.attach(Attach::StderrOnly)
    }

    /// Spawn the command and attach to its output.
    ///
    /// Must be called from within a Tokio runtime. Failing to start the
    /// process does not panic or return early; the error is held by the
    /// returned [`Output`].
    pub fn run(self) -> Output {
        let Command {
            program,
            args,
            env,
            dir,
            inputs,
            timeout,
            cancel,
            config,
            observers,
            attach,
            build_error,
        } = self;

        let executed = Arc::new(ExecutedCommand {
            program,
            args,
            dir,
            env: env.iter().map(|(key, _)| key.clone()).collect(),
        });

        let invalid = build_error
            .or_else(|| {
                executed
                    .program
                    .is_empty()
                    .then(|| RunError::Build("empty program name".to_string()))
            })
            .or_else(|| config.validate().err());
        if let Some(err) = invalid {
            observers.error(&executed, &err);
            return Output::failed_for(err, executed, observers, config);
        }

        observers.start(&executed);
        let limits = Limits { timeout, cancel };
        match spawn::spawn(&executed, &env, inputs, attach, &config, limits) {
            Ok(process) => Output::attached(process, executed, observers, config),
            Err(err) => {
                observers.error(&executed, &err);
                Output::failed_for(err, executed, observers, config)
            }
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("dir", &self.dir)
            .field("inputs", &self.inputs.len())
            .field("timeout", &self.timeout)
            .field("attach", &self.attach)
            .finish_non_exhaustive()
    }
}
