//! In-process byte pipe with unbounded storage

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, trace};

use super::spill::SpillFile;
use crate::error::RunError;

/// Create a relay pipe that keeps up to `max_buffer_size` bytes in memory
/// and spills the rest to a temp file.
///
/// Writes never wait for the reader, which is what keeps a fast child
/// process from blocking on a full OS pipe while its consumer is busy.
pub fn pipe(max_buffer_size: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            memory: VecDeque::new(),
            spill: None,
            max_buffer_size: max_buffer_size.max(1),
            closed: None,
            reader_dropped: false,
            read_waker: None,
        }),
    });

    let writer = PipeWriter {
        handle: Arc::new(WriterHandle {
            shared: Arc::clone(&shared),
        }),
    };
    (writer, PipeReader { shared })
}

struct Shared {
    state: Mutex<State>,
}

struct State {
    memory: VecDeque<u8>,
    spill: Option<SpillFile>,
    max_buffer_size: usize,
    /// `Some(None)` once closed cleanly, `Some(Some(err))` once closed with an error
    closed: Option<Option<RunError>>,
    reader_dropped: bool,
    read_waker: Option<Waker>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the buffers consistent, so
        // keep going with the inner state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl State {
    fn spill_pending(&self) -> u64 {
        self.spill.as_ref().map_or(0, SpillFile::pending)
    }

    fn enqueue(&mut self, buf: &[u8]) -> io::Result<()> {
        // Once bytes sit in the spill file everything after them has to go
        // there too, otherwise the reader would see them out of order.
        let room = if self.spill_pending() > 0 {
            0
        } else {
            self.max_buffer_size.saturating_sub(self.memory.len())
        };

        let in_memory = room.min(buf.len());
        self.memory.extend(&buf[..in_memory]);

        let overflow = &buf[in_memory..];
        if overflow.is_empty() {
            return Ok(());
        }

        if self.spill.is_none() {
            debug!(
                "Relay pipe exceeded {} bytes in memory, spilling to temp file",
                self.max_buffer_size
            );
            self.spill = Some(SpillFile::create()?);
        }
        if let Some(spill) = self.spill.as_mut() {
            spill.write_all(overflow)?;
            trace!(
                "Spilled {} bytes, {} pending on disk",
                overflow.len(),
                spill.pending()
            );
        }
        Ok(())
    }

    fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }
}

/// Write half of a relay pipe.
///
/// Cloning shares the same write half, so stdout and stderr pumps can both
/// feed one pipe. The pipe is closed by [`close_with_error`](Self::close_with_error);
/// if every clone is dropped first, the reader sees a broken-pipe error
/// instead of waiting forever.
#[derive(Clone)]
pub struct PipeWriter {
    handle: Arc<WriterHandle>,
}

struct WriterHandle {
    shared: Arc<Shared>,
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if state.closed.is_none() {
            let err = io::Error::new(
                io::ErrorKind::BrokenPipe,
                "relay pipe writer dropped without closing",
            );
            state.closed = Some(Some(RunError::from_io(err)));
            state.wake_reader();
        }
    }
}

impl PipeWriter {
    /// Enqueue `buf`, returning its full length. Bytes written after the
    /// reader went away are discarded so the producer can keep draining.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.handle.shared.lock();
        if state.closed.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write to closed relay pipe",
            ));
        }
        if state.reader_dropped || buf.is_empty() {
            return Ok(buf.len());
        }

        state.enqueue(buf)?;
        state.wake_reader();
        Ok(buf.len())
    }

    /// Close the write half. Reads drain everything already enqueued and then
    /// return `err`, or end-of-stream if it is `None`. Only the first call has
    /// an effect; returns whether this call closed the pipe.
    pub fn close_with_error(&self, err: Option<RunError>) -> bool {
        let mut state = self.handle.shared.lock();
        if state.closed.is_some() {
            return false;
        }
        state.closed = Some(err);
        state.wake_reader();
        true
    }

    pub fn close(&self) -> bool {
        self.close_with_error(None)
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(self.write(buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.close();
        Poll::Ready(Ok(()))
    }
}

/// Read half of a relay pipe. Only one reader exists per pipe.
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Bytes enqueued and not yet read, in memory and on disk
    pub fn buffered(&self) -> u64 {
        let state = self.shared.lock();
        state.memory.len() as u64 + state.spill_pending()
    }

    /// Whether any bytes have ever overflowed to disk
    pub fn has_spilled(&self) -> bool {
        self.shared.lock().spill.is_some()
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let mut state = self.shared.lock();

        if !state.memory.is_empty() {
            let n = buf.remaining().min(state.memory.len());
            let (front, back) = state.memory.as_slices();
            let from_front = n.min(front.len());
            buf.put_slice(&front[..from_front]);
            buf.put_slice(&back[..n - from_front]);
            state.memory.drain(..n);
            return Poll::Ready(Ok(()));
        }

        let pending = state.spill_pending();
        if pending > 0 {
            let want = buf.remaining().min(usize::try_from(pending).unwrap_or(usize::MAX));
            if let Some(spill) = state.spill.as_mut() {
                spill.read_exact(buf.initialize_unfilled_to(want))?;
                buf.advance(want);
                spill.compact();
            }
            return Poll::Ready(Ok(()));
        }

        match &state.closed {
            Some(None) => Poll::Ready(Ok(())),
            Some(Some(err)) => Poll::Ready(Err(err.clone().into_io())),
            None => {
                state.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.reader_dropped = true;
        state.memory = VecDeque::new();
        state.spill = None;
    }
}
