use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, trace};

use procstream::{exit_code, Command, Output, OutputConfig, TracingObserver};

/// Run a command and print its output
#[derive(Parser, Debug)]
#[command(name = "procstream", version)]
#[command(about = "Run a command and consume its output as a stream, lines, text or JSON", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only attach the command's stdout
    #[arg(long, conflicts_with = "stderr_only")]
    stdout_only: bool,

    /// Only attach the command's stderr
    #[arg(long)]
    stderr_only: bool,

    /// Run the command line with `bash -c` instead of splitting it into words
    #[arg(long)]
    bash: bool,

    /// jq query applied to every line of output
    #[arg(long = "map-jq", value_name = "QUERY")]
    map_jq: Vec<String>,

    /// jq query applied to the whole output
    #[arg(long, value_name = "QUERY", conflicts_with = "lines")]
    jq: Option<String>,

    /// Print the output lines as a JSON array
    #[arg(long)]
    lines: bool,

    /// Kill the command after this many seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Bytes of output kept in memory before spilling to a temp file
    #[arg(long, value_name = "BYTES")]
    max_buffer_size: Option<usize>,

    /// The command to run. A single argument is split using shell quoting rules.
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .init();

    debug!("procstream started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {e:#}");
            let err: &(dyn std::error::Error + 'static) = e.as_ref();
            exit_code(Some(err))
        }
    };
    std::process::exit(code);
}

fn build_command(cli: &Cli) -> Command {
    let mut command = match cli.command.as_slice() {
        [line] if cli.bash => Command::bash(line),
        [line] => Command::parse(line),
        words if cli.bash => Command::bash(shell_words::join(words)),
        [program, args @ ..] => Command::new(program).args(args.iter().cloned()),
        [] => Command::parse(""),
    };

    if cli.stdout_only {
        command = command.stdout_only();
    } else if cli.stderr_only {
        command = command.stderr_only();
    }
    if let Some(seconds) = cli.timeout {
        command = command.timeout(Duration::from_secs(seconds));
    }
    if let Some(bytes) = cli.max_buffer_size {
        command = command.config(OutputConfig::default().with_max_buffer_size(bytes));
    }
    if cli.verbose > 0 {
        command = command.observer(Arc::new(TracingObserver));
    }
    command
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut output: Output = build_command(&cli).run();
    for query in &cli.map_jq {
        output = output.map_jq(query);
    }

    let mut stdout = tokio::io::stdout();

    if let Some(query) = &cli.jq {
        let mut result = output.jq(query).await?;
        if !result.is_empty() {
            result.push(b'\n');
        }
        stdout.write_all(&result).await?;
    } else if cli.lines {
        let lines = output.lines().await?;
        let rendered =
            serde_json::to_string_pretty(&lines).context("Failed to encode lines as JSON")?;
        stdout.write_all(rendered.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    } else {
        output.stream(&mut stdout).await?;
    }

    stdout.flush().await?;
    Ok(())
}
