//! Overflow storage for relay pipes

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::debug;

/// FIFO byte store backed by an anonymous temp file.
///
/// Reads and writes keep independent cursors. Once every written byte has
/// been read back the file can be [compacted](Self::compact) so a
/// long-running process that occasionally outpaces its reader does not grow
/// the file forever.
pub(crate) struct SpillFile {
    file: File,
    read_pos: u64,
    write_pos: u64,
}

impl SpillFile {
    pub(crate) fn create() -> io::Result<Self> {
        Ok(Self {
            file: tempfile::tempfile()?,
            read_pos: 0,
            write_pos: 0,
        })
    }

    /// Bytes written but not yet read
    pub(crate) fn pending(&self) -> u64 {
        self.write_pos - self.read_pos
    }

    pub(crate) fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(self.write_pos))?;
        self.file.write_all(buf)?;
        self.write_pos += buf.len() as u64;
        Ok(())
    }

    /// Fill `buf` completely; callers never ask for more than [`pending`](Self::pending)
    pub(crate) fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        debug_assert!(buf.len() as u64 <= self.pending());

        self.file.seek(SeekFrom::Start(self.read_pos))?;
        self.file.read_exact(buf)?;
        self.read_pos += buf.len() as u64;
        Ok(())
    }

    /// Truncate the file once everything in it has been read. A failed
    /// truncate leaves the cursors where they are and is retried on the next
    /// drain.
    pub(crate) fn compact(&mut self) {
        if self.read_pos != self.write_pos || self.write_pos == 0 {
            return;
        }
        match self.file.set_len(0) {
            Ok(()) => {
                self.read_pos = 0;
                self.write_pos = 0;
            }
            Err(e) => debug!("Failed to truncate spill file: {}", e),
        }
    }
}
