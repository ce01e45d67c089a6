//! Building and spawning the child process behind an [`Output`](crate::Output)

pub mod builder;
pub(crate) mod spawn;

pub use builder::{Attach, Command};
