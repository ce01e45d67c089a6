//! # procstream
//!
//! Run external commands and consume their output the way the caller needs
//! it: streamed into a writer, line by line, materialized as lines or text,
//! queried as JSON, or read incrementally to feed another command.
//!
//! ```no_run
//! # async fn demo() -> Result<(), procstream::RunError> {
//! use std::io::Write;
//! use procstream::Command;
//!
//! let lines = Command::parse("git log --oneline -n 5")
//!     .run()
//!     .map(|line, dst| dst.write(&line[..line.len().min(7)]))
//!     .lines()
//!     .await?;
//! println!("{lines:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - `subprocess` - Building and spawning commands
//! - `output` - Consumption modes and the terminal error contract
//! - `relay` - Buffered pipe between a child process and its consumer
//! - `lines` - Line splitting
//! - `transform` - Per-line transform stages
//! - `query` - jq queries
//! - `observe` - Instrumentation hooks
//! - `error` - `RunError` and exit code extraction
pub mod config;
pub mod error;
pub mod lines;
pub mod observe;
pub mod output;
pub mod query;
pub mod relay;
pub mod subprocess;
pub mod transform;

pub use config::OutputConfig;
pub use error::{exit_code, exit_code_of, ExitCoder, RunError};
pub use observe::{CommandObserver, ExecutedCommand, FnObserver, TracingObserver};
pub use output::Output;
pub use subprocess::{Attach, Command};
pub use transform::{LineBuffer, LineMap, MapJq};
