//! Buffered relay between a child process and its consumer
//!
//! The write half is fed by the tasks draining the child's stdout and stderr;
//! the read half is consumed at whatever pace the caller reads output. Memory
//! use is capped by [`OutputConfig::max_buffer_size`](crate::OutputConfig),
//! with any excess parked in a temp file until the reader catches up.

pub mod pipe;
mod spill;

pub use pipe::{pipe, PipeReader, PipeWriter};
