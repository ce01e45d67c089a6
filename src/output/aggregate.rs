//! Task compositions behind the consumption modes
//!
//! Each mode runs the completion coordinator in its own task alongside the
//! loop that drains the relay pipe. Waiting for exit first and reading after
//! would only work for children whose whole output fits in the OS pipe.

use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::trace;

use super::Process;
use crate::error::RunError;
use crate::lines::{split_lines, LineScanner};
use crate::relay::PipeReader;
use crate::transform::TransformChain;

type ScanHandle = JoinHandle<Result<(), RunError>>;

/// Split `reader` into lines and send each through `transforms`, in order,
/// over a channel bounded at `capacity`. Every item is the transformed
/// content of one source line, terminated by `\n`.
fn spawn_transform(
    reader: PipeReader,
    transforms: TransformChain,
    capacity: usize,
) -> (mpsc::Receiver<Vec<u8>>, ScanHandle) {
    let (tx, rx) = mpsc::channel(capacity);

    let handle = tokio::spawn(async move {
        let mut scanner = LineScanner::new(BufReader::new(reader));
        while let Some(line) = scanner.next_line().await.map_err(RunError::from_io)? {
            let Some(out) = transforms.apply(&line).map_err(RunError::transform)? else {
                continue;
            };
            if tx.send(out).await.is_err() {
                trace!("Line consumer went away, stopping scan");
                break;
            }
        }
        Ok::<_, RunError>(())
    });

    (rx, handle)
}

fn spawn_completion(process: Process) -> (PipeReader, JoinHandle<Option<RunError>>) {
    let Process { completion, reader } = process;
    (reader, tokio::spawn(completion.run()))
}

async fn join_scan(handle: ScanHandle) -> Result<(), RunError> {
    handle.await.unwrap_or_else(|e| Err(task_failed(e)))
}

async fn join_completion(handle: JoinHandle<Option<RunError>>) -> Option<RunError> {
    handle.await.unwrap_or_else(|e| Some(task_failed(e)))
}

fn task_failed(err: JoinError) -> RunError {
    match err.try_into_panic() {
        // A panicking line transform panics the consumer too
        Ok(payload) => std::panic::resume_unwind(payload),
        Err(err) => RunError::from_io(std::io::Error::other(err)),
    }
}

/// The terminal error: the process outcome wins over anything the consumer
/// side ran into.
fn terminal<T>(process: Option<RunError>, consumer: Result<T, RunError>) -> Result<T, RunError> {
    match process {
        Some(err) => Err(err),
        None => consumer,
    }
}

/// Copy all output into `dst`, through the transforms if there are any.
/// Returns the number of bytes written to `dst`.
pub(crate) async fn copy_output<W>(
    process: Process,
    transforms: &TransformChain,
    capacity: usize,
    dst: &mut W,
) -> Result<u64, RunError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let (mut reader, completion) = spawn_completion(process);

    let copied = if transforms.is_empty() {
        let copied = tokio::io::copy(&mut reader, dst).await;
        // Anything the child writes from here on is discarded
        drop(reader);
        copied.map_err(RunError::from_io)
    } else {
        let (mut rx, scan) = spawn_transform(reader, transforms.clone(), capacity);
        let mut written = 0u64;
        let mut consumer = Ok(());
        while let Some(chunk) = rx.recv().await {
            if let Err(e) = dst.write_all(&chunk).await {
                consumer = Err(RunError::from_io(e));
                break;
            }
            written += chunk.len() as u64;
        }
        drop(rx);
        consumer.and(join_scan(scan).await).map(|()| written)
    };

    let copied = match copied {
        Ok(written) => dst.flush().await.map(|()| written).map_err(RunError::from_io),
        Err(e) => Err(e),
    };

    terminal(join_completion(completion).await, copied)
}

/// Hand every output line to `callback` as it arrives
pub(crate) async fn for_each_line<F>(
    process: Process,
    transforms: &TransformChain,
    capacity: usize,
    mut callback: F,
) -> Result<(), RunError>
where
    F: FnMut(&[u8]),
{
    let (reader, completion) = spawn_completion(process);
    let (mut rx, scan) = spawn_transform(reader, transforms.clone(), capacity);
    let scanned_only = transforms.is_empty();

    while let Some(chunk) = rx.recv().await {
        if scanned_only {
            // Already a single line; only the appended terminator goes
            callback(chunk.strip_suffix(b"\n").unwrap_or(&chunk));
            continue;
        }
        // A transform may have turned one line into several
        for line in split_lines(&chunk) {
            callback(line);
        }
    }

    let scanned = join_scan(scan).await;
    terminal(join_completion(completion).await, scanned)
}

/// Wait for exit without looking at the output
pub(crate) async fn discard(process: Process) -> Result<(), RunError> {
    let Process { completion, reader } = process;
    drop(reader);
    terminal(completion.run().await, Ok(()))
}
