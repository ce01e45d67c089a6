//! Per-line transforms applied at aggregation time
//!
//! A [`LineMap`] receives one line (terminator stripped) and writes its
//! replacement into a [`LineBuffer`]. Stages run in registration order, each
//! one receiving the complete output of the stage before it.
//!
//! Whether a stage *called* write matters separately from how many bytes it
//! wrote: a stage that never writes drops the line, while a stage that
//! writes an empty slice keeps it as an empty line.

pub mod jq;

use std::io::{self, Write};
use std::sync::Arc;

pub use jq::MapJq;

/// A transform stage. Closures of the matching shape implement it.
///
/// The return value mirrors [`Write::write`] and reports what was written.
/// Errors stop processing of the line and become part of the terminal
/// error, unless the process itself failed.
pub trait LineMap: Send + Sync {
    fn map_line(&self, line: &[u8], dst: &mut LineBuffer) -> io::Result<usize>;
}

impl<F> LineMap for F
where
    F: Fn(&[u8], &mut LineBuffer) -> io::Result<usize> + Send + Sync,
{
    fn map_line(&self, line: &[u8], dst: &mut LineBuffer) -> io::Result<usize> {
        self(line, dst)
    }
}

/// Scratch sink handed to each stage, tracking whether write was invoked at all
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    write_called: bool,
}

impl LineBuffer {
    /// True if write was invoked, even with an empty slice
    pub fn write_called(&self) -> bool {
        self.write_called
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.write_called = false;
    }
}

impl Write for LineBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_called = true;
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    // The default write_all never calls write for an empty slice
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write(buf).map(|_| ())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Ordered list of transform stages, fixed once aggregation starts
#[derive(Clone, Default)]
pub struct TransformChain {
    stages: Vec<Arc<dyn LineMap>>,
}

impl TransformChain {
    pub fn push(&mut self, stage: Arc<dyn LineMap>) {
        self.stages.push(stage);
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Run every stage over one line.
    ///
    /// Returns `None` if a stage dropped the line, otherwise the final content
    /// with a `\n` appended unless it already ends with one. The result may
    /// hold several lines if a stage wrote embedded newlines.
    pub fn apply(&self, line: &[u8]) -> io::Result<Option<Vec<u8>>> {
        let mut current = line.to_vec();
        let mut scratch = LineBuffer::default();

        for stage in &self.stages {
            scratch.reset();
            stage.map_line(&current, &mut scratch)?;
            if !scratch.write_called {
                return Ok(None);
            }
            std::mem::swap(&mut current, &mut scratch.buf);
        }

        if current.last() != Some(&b'\n') {
            current.push(b'\n');
        }
        Ok(Some(current))
    }
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformChain")
            .field("stages", &self.stages.len())
            .finish()
    }
}
