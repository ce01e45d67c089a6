//! Shared helpers for integration tests
#![allow(dead_code)]

use std::io::{self, Write};

use procstream::LineBuffer;

/// Transform replacing every occurrence of `from` with `to`
pub fn replace(
    from: &'static str,
    to: &'static str,
) -> impl Fn(&[u8], &mut LineBuffer) -> io::Result<usize> + Send + Sync + 'static {
    move |line, dst| {
        let text = String::from_utf8_lossy(line).replace(from, to);
        dst.write(text.as_bytes())
    }
}

/// Transform writing the line back unchanged
pub fn passthrough(line: &[u8], dst: &mut LineBuffer) -> io::Result<usize> {
    dst.write(line)
}

/// Numbered lines, `line 00000000` through `line {count - 1}`, each newline
/// terminated
pub fn numbered_lines(count: usize) -> Vec<u8> {
    let mut content = Vec::with_capacity(count * 14);
    for i in 0..count {
        writeln!(content, "line {i:08}").unwrap();
    }
    content
}
