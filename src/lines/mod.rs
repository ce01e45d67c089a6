//! Splitting byte streams into lines

use std::io;

use futures::stream::Stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Lazily splits a byte stream into lines with terminators (`\n` or `\r\n`)
/// stripped.
///
/// Empty lines are yielded as empty elements. A final line without a
/// terminator is still yielded; a trailing terminator does not produce an
/// extra empty line. Lines have no length limit. Once the underlying reader
/// is exhausted or fails, the scanner stays finished.
pub struct LineScanner<R> {
    reader: R,
    pending_error: Option<io::Error>,
    finished: bool,
}

impl<R> LineScanner<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending_error: None,
            finished: false,
        }
    }

    /// Next line, `Ok(None)` at end of stream
    pub async fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        if let Some(err) = self.pending_error.take() {
            self.finished = true;
            return Err(err);
        }
        if self.finished {
            return Ok(None);
        }

        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                self.finished = true;
                Ok(None)
            }
            Ok(_) => Ok(Some(strip_terminator(line))),
            // Hand out what was read before the failure, then the failure
            Err(err) if !line.is_empty() => {
                self.pending_error = Some(err);
                Ok(Some(strip_terminator(line)))
            }
            Err(err) => {
                self.finished = true;
                Err(err)
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = io::Result<Vec<u8>>> {
        futures::stream::unfold(self, |mut scanner| async move {
            match scanner.next_line().await {
                Ok(Some(line)) => Some((Ok(line), scanner)),
                Ok(None) => None,
                Err(e) => Some((Err(e), scanner)),
            }
        })
    }
}

/// Remove one trailing `\n` and a `\r` before it
pub fn strip_terminator(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    line
}

/// Split an in-memory buffer the same way [`LineScanner`] splits a stream
pub fn split_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let mut parts = if bytes.is_empty() {
        None
    } else {
        Some(body.split(|b| *b == b'\n'))
    };
    std::iter::from_fn(move || parts.as_mut()?.next())
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::BufReader;

    async fn scan(input: &[u8]) -> Vec<Vec<u8>> {
        let mut scanner = LineScanner::new(BufReader::new(input));
        let mut lines = Vec::new();
        while let Some(line) = scanner.next_line().await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_preserves_empty_lines() {
        let lines = scan(b"a\n\nb").await;
        assert_eq!(lines, vec![b"a".to_vec(), Vec::new(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn test_trailing_terminator_does_not_add_line() {
        assert_eq!(scan(b"one\ntwo\n").await.len(), 2);
        assert!(scan(b"").await.is_empty());
        assert_eq!(scan(b"\n").await, vec![Vec::<u8>::new()]);
    }

    #[tokio::test]
    async fn test_strips_crlf() {
        let lines = scan(b"dos\r\nunix\n").await;
        assert_eq!(lines, vec![b"dos".to_vec(), b"unix".to_vec()]);
    }

    #[tokio::test]
    async fn test_long_lines_not_truncated() {
        let long = vec![b'x'; 1024 * 1024];
        let mut input = long.clone();
        input.push(b'\n');
        input.extend_from_slice(b"short");

        let lines = scan(&input).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], long);
        assert_eq!(lines[1], b"short");
    }

    #[tokio::test]
    async fn test_scanner_is_not_restartable() {
        let mut scanner = LineScanner::new(BufReader::new(&b"only\n"[..]));
        assert!(scanner.next_line().await.unwrap().is_some());
        assert!(scanner.next_line().await.unwrap().is_none());
        assert!(scanner.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let scanner = LineScanner::new(BufReader::new(&b"1\n2\n3"[..]));
        let lines: Vec<_> = scanner
            .into_stream()
            .map(|line| String::from_utf8(line.unwrap()).unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_partial_line_delivered_before_error() {
        let (writer, reader) = crate::relay::pipe(64);
        writer.write(b"done\npartial").unwrap();
        writer.close_with_error(Some(crate::RunError::AlreadyConsumed));

        let mut scanner = LineScanner::new(BufReader::new(reader));
        assert_eq!(scanner.next_line().await.unwrap().unwrap(), b"done");
        assert_eq!(scanner.next_line().await.unwrap().unwrap(), b"partial");
        assert!(scanner.next_line().await.is_err());
        assert!(scanner.next_line().await.unwrap().is_none());
    }

    #[test]
    fn test_split_lines() {
        let lines: Vec<&[u8]> = split_lines(b"a\n\nb\n").collect();
        assert_eq!(lines, vec![&b"a"[..], &b""[..], &b"b"[..]]);

        let lines: Vec<&[u8]> = split_lines(b"\n").collect();
        assert_eq!(lines, vec![&b""[..]]);

        assert_eq!(split_lines(b"").count(), 0);
        assert_eq!(split_lines(b"x\r\n").collect::<Vec<_>>(), vec![&b"x"[..]]);
    }
}
