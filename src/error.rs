use std::error::Error;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::query::QueryError;

/// The single authoritative error returned by every consumption method of an
/// [`Output`](crate::Output).
///
/// The type is `Clone` so that an error-only output can hand it out from
/// every method and the relay pipe can replay it on every read after closure.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error("invalid command: {0}")]
    Build(String),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("failed to start {command}: {source}")]
    Start {
        command: String,
        source: Arc<io::Error>,
    },

    #[error("output has already been consumed")]
    AlreadyConsumed,

    #[error("exit status {}{}", .code, stderr_suffix(.stderr))]
    Exit { code: i32, stderr: String },

    #[error("terminated by signal {}{}", .signal, stderr_suffix(.stderr))]
    Signal { signal: i32, stderr: String },

    #[error("output relay failed: {0}")]
    Io(#[source] Arc<io::Error>),

    #[error("line transform failed: {0}")]
    Transform(#[source] Arc<io::Error>),

    #[error(transparent)]
    Query(#[from] QueryError),
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

impl RunError {
    /// Build the terminal error for a finished process, or `None` if it exited
    /// cleanly. Captured stderr is trimmed of surrounding whitespace.
    pub fn from_exit_status(status: std::process::ExitStatus, stderr: &[u8]) -> Option<Self> {
        if status.success() {
            return None;
        }

        let stderr = String::from_utf8_lossy(stderr).trim().to_string();
        if let Some(code) = status.code() {
            return Some(Self::Exit { code, stderr });
        }
        Some(Self::from_abnormal_status(status, stderr))
    }

    #[cfg(unix)]
    fn from_abnormal_status(status: std::process::ExitStatus, stderr: String) -> Self {
        use std::os::unix::process::ExitStatusExt;
        match status.signal() {
            Some(signal) => Self::Signal { signal, stderr },
            None => Self::Exit { code: 1, stderr },
        }
    }

    #[cfg(not(unix))]
    fn from_abnormal_status(_status: std::process::ExitStatus, stderr: String) -> Self {
        Self::Exit { code: 1, stderr }
    }

    /// Recover a `RunError` that travelled through an `io::Error` (as it does
    /// when read back out of a relay pipe), or wrap the io error otherwise.
    pub fn from_io(err: io::Error) -> Self {
        if let Some(run_err) = err.get_ref().and_then(|e| e.downcast_ref::<RunError>()) {
            return run_err.clone();
        }
        Self::Io(Arc::new(err))
    }

    /// Wrap an error raised by a line transform.
    pub fn transform(err: io::Error) -> Self {
        if let Some(run_err) = err.get_ref().and_then(|e| e.downcast_ref::<RunError>()) {
            return run_err.clone();
        }
        Self::Transform(Arc::new(err))
    }

    /// Convert into an `io::Error` carrying this error as its payload.
    pub fn into_io(self) -> io::Error {
        io::Error::other(self)
    }

    /// Captured stderr for errors that originate from the process exit.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Exit { stderr, .. } | Self::Signal { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    /// True if the error comes from the process itself rather than from the
    /// consumer side of the output.
    pub fn is_process_error(&self) -> bool {
        matches!(
            self,
            Self::Build(_)
                | Self::CommandNotFound(_)
                | Self::Start { .. }
                | Self::Exit { .. }
                | Self::Signal { .. }
        )
    }
}

impl From<io::Error> for RunError {
    fn from(err: io::Error) -> Self {
        Self::from_io(err)
    }
}

/// An error that also denotes the code a process exited with.
pub trait ExitCoder: Error {
    fn exit_code(&self) -> Option<i32>;
}

impl ExitCoder for RunError {
    /// Exit code for process errors. Signals map to `128 + signal` the way
    /// shells report them.
    fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code, .. } => Some(*code),
            Self::Signal { signal, .. } => Some(128 + signal),
            _ => None,
        }
    }
}

/// Returns the exit code carried by `err` or anything in its source chain,
/// 1 if nothing in the chain carries one, and 0 if there is no error.
pub fn exit_code(err: Option<&(dyn Error + 'static)>) -> i32 {
    let mut current = match err {
        Some(err) => Some(err),
        None => return 0,
    };

    while let Some(err) = current {
        if let Some(code) = carried_exit_code(err) {
            return code;
        }
        current = err.source();
    }
    1
}

/// [`exit_code`] for a `Result`.
pub fn exit_code_of<T, E>(result: &Result<T, E>) -> i32
where
    E: Error + 'static,
{
    exit_code(result.as_ref().err().map(|e| e as &(dyn Error + 'static)))
}

fn carried_exit_code(err: &(dyn Error + 'static)) -> Option<i32> {
    if let Some(run_err) = err.downcast_ref::<RunError>() {
        return run_err.exit_code();
    }
    // io::Error::source skips its payload, so look inside explicitly
    if let Some(inner) = err.downcast_ref::<io::Error>().and_then(|e| e.get_ref()) {
        return carried_exit_code(inner);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_none_is_zero() {
        assert_eq!(exit_code(None), 0);
    }

    #[test]
    fn test_exit_code_from_exit_error() {
        let err = RunError::Exit {
            code: 123,
            stderr: "boom".to_string(),
        };
        assert_eq!(exit_code(Some(&err)), 123);
        assert_eq!(err.to_string(), "exit status 123: boom");
    }

    #[test]
    fn test_exit_code_signal() {
        let err = RunError::Signal {
            signal: 9,
            stderr: String::new(),
        };
        assert_eq!(exit_code(Some(&err)), 137);
        assert_eq!(err.to_string(), "terminated by signal 9");
    }

    #[test]
    fn test_exit_code_unrecognized_error_defaults_to_one() {
        let err = io::Error::other("something else");
        assert_eq!(exit_code(Some(&err)), 1);
        assert_eq!(exit_code(Some(&RunError::AlreadyConsumed)), 1);
    }

    #[test]
    fn test_exit_code_through_io_payload() {
        let err = RunError::Exit {
            code: 7,
            stderr: String::new(),
        }
        .into_io();
        assert_eq!(exit_code(Some(&err)), 7);
    }

    #[test]
    fn test_exit_code_through_anyhow_context() {
        let err = anyhow::Error::new(RunError::Exit {
            code: 42,
            stderr: String::new(),
        })
        .context("running build");
        let err: &(dyn Error + 'static) = err.as_ref();
        assert_eq!(exit_code(Some(err)), 42);
    }

    #[test]
    fn test_exit_code_of_result() {
        let ok: Result<(), RunError> = Ok(());
        assert_eq!(exit_code_of(&ok), 0);

        let failed: Result<(), RunError> = Err(RunError::Exit {
            code: 3,
            stderr: String::new(),
        });
        assert_eq!(exit_code_of(&failed), 3);
    }

    #[test]
    fn test_from_io_recovers_run_error() {
        let original = RunError::Exit {
            code: 2,
            stderr: "bad".to_string(),
        };
        match RunError::from_io(original.into_io()) {
            RunError::Exit { code, stderr } => {
                assert_eq!(code, 2);
                assert_eq!(stderr, "bad");
            }
            other => panic!("Expected Exit, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_from_exit_status_trims_stderr() {
        use std::os::unix::process::ExitStatusExt;

        let status = std::process::ExitStatus::from_raw(0);
        assert!(RunError::from_exit_status(status, b"ignored").is_none());

        let status = std::process::ExitStatus::from_raw(256);
        let err = RunError::from_exit_status(status, b"\n  oops \n").unwrap();
        assert_eq!(err.stderr(), Some("oops"));
        assert_eq!(err.exit_code(), Some(1));

        let status = std::process::ExitStatus::from_raw(9);
        let err = RunError::from_exit_status(status, b"").unwrap();
        assert!(matches!(err, RunError::Signal { signal: 9, .. }));
    }
}
