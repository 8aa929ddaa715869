//! Claude Code SDK - command-line front end.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_code_sdk::cli::ProtocolUnit;
use claude_code_sdk::config::{ConfigLoader, ConfigOverrides, OutputFormat};
use claude_code_sdk::{ClaudeCode, Error, Response};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
    StreamJson,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::StreamJson => OutputFormat::StreamJson,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "claude-code-sdk",
    about = "Drive the Claude Code agent from the command line",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SharedArgs {
    /// Config file to use instead of the default search paths.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output format requested from the agent.
    #[arg(short, long, value_enum)]
    output_format: Option<FormatArg>,
    /// Per-invocation timeout in seconds.
    #[arg(short, long)]
    timeout: Option<u64>,
    /// Model to use.
    #[arg(short, long)]
    model: Option<String>,
    /// Tools the agent may use (comma-separated).
    #[arg(long, value_delimiter = ',')]
    allowed_tools: Option<Vec<String>>,
    /// Tools the agent may not use (comma-separated).
    #[arg(long, value_delimiter = ',')]
    disallowed_tools: Option<Vec<String>>,
    /// MCP server configuration file.
    #[arg(long)]
    mcp_config: Option<PathBuf>,
}

impl SharedArgs {
    fn client(&self, max_turns: Option<u32>) -> Result<ClaudeCode, Error> {
        let loader = match &self.config {
            Some(path) => ConfigLoader::with_path(path.clone()),
            None => ConfigLoader::new(),
        };
        let overrides = ConfigOverrides {
            allowed_tools: self.allowed_tools.clone(),
            disallowed_tools: self.disallowed_tools.clone(),
            max_turns,
            mcp_config: self.mcp_config.clone(),
            model: self.model.clone(),
            timeout: self.timeout.map(Duration::from_secs),
            output_format: self.output_format.map(Into::into),
            working_dir: None,
        };
        ClaudeCode::from_loader(&loader)?.with_overrides(&overrides)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single prompt.
    Run {
        /// The prompt to send.
        prompt: String,
        /// Print output as it arrives.
        #[arg(long)]
        stream: bool,
        #[command(flatten)]
        shared: SharedArgs,
    },
    /// Read prompts from stdin, one per line, as turns of one conversation.
    Chat {
        /// Maximum number of turns.
        #[arg(long)]
        max_turns: Option<u32>,
        /// Conversation id, a UUID (generated if omitted).
        #[arg(long)]
        id: Option<String>,
        #[command(flatten)]
        shared: SharedArgs,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_unit(unit: &ProtocolUnit) {
    let mut stdout = std::io::stdout().lock();
    let written = match unit {
        ProtocolUnit::Text(text) => write!(stdout, "{text}"),
        ProtocolUnit::Record(record) => writeln!(stdout, "{record}"),
    };
    if let Err(e) = written.and_then(|()| stdout.flush()) {
        tracing::debug!(error = %e, "Failed to write output");
    }
}

fn print_response(response: &Response) {
    match response {
        Response::Text(text) => println!("{text}"),
        Response::Json(value) => match serde_json::to_string_pretty(value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{value}"),
        },
        Response::Records(records) => {
            for record in records {
                println!("{record}");
            }
        }
    }
}

async fn run(prompt: &str, stream: bool, shared: &SharedArgs) -> Result<(), Error> {
    let client = shared.client(None)?;
    tracing::info!(
        output_format = %client.config().output_format,
        stream,
        "Running prompt"
    );

    if stream {
        let mut output = client.stream_prompt(prompt)?;
        while let Some(unit) = output.next().await {
            print_unit(&unit?);
        }
        println!();
    } else {
        print_response(&client.run_prompt(prompt).await?);
    }
    Ok(())
}

async fn chat(
    max_turns: Option<u32>,
    id: Option<String>,
    shared: &SharedArgs,
) -> Result<(), Error> {
    let client = shared.client(max_turns)?;
    let mut conversation = client.start_conversation(id, &ConfigOverrides::default())?;
    tracing::info!(conversation_id = %conversation.id(), "Starting conversation");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let mut turn = conversation.stream(&line)?;
        while let Some(unit) = turn.next().await {
            match unit {
                Ok(unit) => print_unit(&unit),
                Err(e) => eprintln!("{e}"),
            }
        }
        drop(turn);
        println!();

        if conversation.is_closed() {
            tracing::info!(turns = conversation.turn_count(), "Conversation closed");
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Run {
            prompt,
            stream,
            shared,
        } => run(prompt, *stream, shared).await,
        Commands::Chat {
            max_turns,
            id,
            shared,
        } => chat(*max_turns, id.clone(), shared).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
