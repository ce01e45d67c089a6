//! Every consumption mode against the same small commands, with and without
//! line transforms

mod common;

use common::{passthrough, replace};
use procstream::{Command, Output};
use tokio::io::AsyncReadExt;

fn hello() -> Output {
    Command::new("echo").arg("hello world").run()
}

fn hello_mapped() -> Output {
    hello().map(replace("hello", "goodbye"))
}

fn hello_multi_mapped() -> Output {
    hello()
        .map(replace("hello", "goodbye"))
        .map(replace("goodbye world", "jh"))
}

#[tokio::test]
async fn test_lines() {
    assert_eq!(hello().lines().await.unwrap(), vec!["hello world"]);
    assert_eq!(hello_mapped().lines().await.unwrap(), vec!["goodbye world"]);
    assert_eq!(hello_multi_mapped().lines().await.unwrap(), vec!["jh"]);
}

#[tokio::test]
async fn test_text() {
    assert_eq!(hello().text().await.unwrap(), "hello world");
    assert_eq!(hello_mapped().text().await.unwrap(), "goodbye world");
    assert_eq!(hello_multi_mapped().text().await.unwrap(), "jh");
}

#[tokio::test]
async fn test_stream() {
    let mut sink = Vec::new();
    hello().stream(&mut sink).await.unwrap();
    assert_eq!(sink, b"hello world\n");

    let mut sink = Vec::new();
    hello_mapped().stream(&mut sink).await.unwrap();
    assert_eq!(sink, b"goodbye world\n");

    let mut sink = Vec::new();
    hello_multi_mapped().stream(&mut sink).await.unwrap();
    assert_eq!(sink, b"jh\n");
}

#[tokio::test]
async fn test_write_to_counts_bytes() {
    let mut sink = Vec::new();
    let written = hello_mapped().write_to(&mut sink).await.unwrap();
    assert_eq!(written, "goodbye world\n".len() as u64);
}

#[tokio::test]
async fn test_stream_lines() {
    let mut seen = Vec::new();
    hello_multi_mapped()
        .stream_lines(|line| seen.push(String::from_utf8_lossy(line).into_owned()))
        .await
        .unwrap();
    assert_eq!(seen, vec!["jh"]);
}

#[tokio::test]
async fn test_read() {
    let mut out = Vec::new();
    hello().read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"hello world\n");

    let mut out = Vec::new();
    hello_mapped().read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"goodbye world\n");

    let mut out = Vec::new();
    hello_multi_mapped().read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"jh\n");
}

#[tokio::test]
async fn test_wait() {
    hello().wait().await.unwrap();
    hello_mapped().wait().await.unwrap();
}

#[tokio::test]
async fn test_jq_over_whole_output() {
    let result = Command::new("echo")
        .arg(r#"{"hello": "world", "items": [1, 2]}"#)
        .run()
        .jq(".hello")
        .await
        .unwrap();
    assert_eq!(result, br#""world""#);

    let result = Command::new("echo")
        .arg(r#"{"hello": "world", "items": [1, 2]}"#)
        .run()
        .jq(".items[]")
        .await
        .unwrap();
    assert_eq!(result, b"1\n2");
}

#[tokio::test]
async fn test_jq_filters_and_construction() {
    let records = r#"[{"a": 1, "n": "x"}, {"a": 2, "n": "y"}, {"a": 1, "n": "z"}]"#;

    let result = Command::new("echo")
        .arg(records)
        .run()
        .jq(".[] | select(.a == 1) | .n")
        .await
        .unwrap();
    assert_eq!(result, br#""x"
"z""#);

    let result = Command::new("echo")
        .arg(r#"{"a": 1, "b": [true]}"#)
        .run()
        .jq(".a, .b")
        .await
        .unwrap();
    assert_eq!(result, b"1\n[true]");

    let result = Command::new("echo")
        .arg(records)
        .run()
        .jq("{count: length, names: map(.n)}")
        .await
        .unwrap();
    assert_eq!(result, br#"{"count":3,"names":["x","y","z"]}"#);
}

#[tokio::test]
async fn test_map_jq_per_line() {
    let lines = Command::bash(r#"echo '{"a": 1}'; echo '{"a": "two"}'"#)
        .run()
        .map_jq(".a")
        .lines()
        .await
        .unwrap();
    assert_eq!(lines, vec!["1", r#""two""#]);
}

#[tokio::test]
async fn test_empty_lines_preserved() {
    let lines = Command::bash(r"printf 'a\n\nb'").run().lines().await.unwrap();
    assert_eq!(lines, vec!["a", "", "b"]);

    let lines = Command::bash(r"printf 'a\n\nb'")
        .run()
        .map(passthrough)
        .lines()
        .await
        .unwrap();
    assert_eq!(lines, vec!["a", "", "b"]);
}

#[tokio::test]
async fn test_trailing_carriage_return_kept() {
    // Only the terminator's own \r is stripped
    let script = r"printf 'x\r\r\ny\n'";

    let lines = Command::bash(script).run().lines().await.unwrap();
    assert_eq!(lines, vec!["x\r", "y"]);

    let mut seen = Vec::new();
    Command::bash(script)
        .run()
        .stream_lines(|line| seen.push(line.to_vec()))
        .await
        .unwrap();
    assert_eq!(seen, vec![b"x\r".to_vec(), b"y".to_vec()]);
}

#[tokio::test]
async fn test_map_without_write_drops_lines() {
    let script = "echo keep; echo skip; echo keep again";

    let lines = Command::bash(script)
        .run()
        .map(|line, dst| {
            if line == b"skip" {
                return Ok(0);
            }
            passthrough(line, dst)
        })
        .lines()
        .await
        .unwrap();
    assert_eq!(lines, vec!["keep", "keep again"]);

    // Nothing is split or dropped when no transform is registered
    let mut raw = Vec::new();
    Command::bash(script).run().stream(&mut raw).await.unwrap();
    assert_eq!(raw, b"keep\nskip\nkeep again\n");
}

#[tokio::test]
async fn test_map_with_empty_write_keeps_line() {
    let lines = Command::new("echo")
        .arg("content")
        .run()
        .map(|_line, dst| std::io::Write::write(dst, b""))
        .lines()
        .await
        .unwrap();
    assert_eq!(lines, vec![""]);
}

#[tokio::test]
async fn test_map_output_with_embedded_newlines() {
    let lines = Command::new("echo")
        .arg("a,b,c")
        .run()
        .map(|line, dst| {
            let split = String::from_utf8_lossy(line).replace(',', "\n");
            std::io::Write::write(dst, split.as_bytes())
        })
        .lines()
        .await
        .unwrap();
    assert_eq!(lines, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_attach_modes() {
    // Combined ordering is best effort; the sleep keeps the two writes apart
    let script = "echo stdout; sleep 0.1; echo stderr 1>&2";

    let lines = Command::bash(script).stdout_only().run().lines().await.unwrap();
    assert_eq!(lines, vec!["stdout"]);

    let lines = Command::bash(script).stderr_only().run().lines().await.unwrap();
    assert_eq!(lines, vec!["stderr"]);

    let lines = Command::bash(script).run().lines().await.unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines.contains(&"stdout".to_string()));
    assert!(lines.contains(&"stderr".to_string()));
}

#[tokio::test]
async fn test_environment_and_dir() {
    let text = Command::bash("echo $PROCSTREAM_A-$PROCSTREAM_B")
        .env("PROCSTREAM_A", "one")
        .environ(["PROCSTREAM_B=two"])
        .run()
        .text()
        .await
        .unwrap();
    assert_eq!(text, "one-two");

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
    let lines = Command::new("ls").current_dir(dir.path()).run().lines().await.unwrap();
    assert_eq!(lines, vec!["marker.txt"]);
}

#[tokio::test]
async fn test_parse_splits_command_line() {
    let text = Command::parse(r#"echo "hello   world""#)
        .run()
        .text()
        .await
        .unwrap();
    assert_eq!(text, "hello   world");
}
