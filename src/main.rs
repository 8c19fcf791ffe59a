//! Purpose: `quarry` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, loads the config, runs the server.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: The engine cell outlives rebinds, so memory mounts survive
//! Invariants: a port change.

use std::io::{self, IsTerminal};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::json;

use quarry::api::{
    EngineCell, Error, FileConfigSink, StandardFactory, default_config_path, load_config,
    to_exit_code,
};

mod serve;

const DEFAULT_MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(&err)
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print()
                    .map_err(|io_err| Error::env_unexpected(format!("failed to write help: {io_err}")))?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::env_invalid_config(clap_error_summary(&err)));
            }
        },
    };

    match cli.command {
        Command::Serve {
            config,
            bind,
            max_body_bytes,
        } => run_serve(config, bind, max_body_bytes),
        Command::Version => {
            emit_version();
            Ok(RunOutcome::ok())
        }
        Command::Completion { shell } => {
            clap_complete::aot::generate(shell, &mut Cli::command(), "quarry", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
    }
}

/// First line of a clap error, without the "error: " prefix clap renders.
fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or("invalid arguments");
    first.strip_prefix("error: ").unwrap_or(first).to_string()
}

#[derive(Parser)]
#[command(
    name = "quarry",
    version,
    about = "HTTP gateway for streaming queries over mounted datasets",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Mount storage roots under virtual paths, then read, write, and query
them over HTTP. Responses stream in the format the Accept header asks for.
"#,
    after_help = r#"EXAMPLES
  $ quarry serve
  $ curl -X PUT localhost:20223/mount/fs/demo/ -d '{"type": "memory"}'
  $ curl -X PUT localhost:20223/data/fs/demo/rows -d '{"n": 1}'
  $ curl 'localhost:20223/data/fs/demo/rows'

LEARN MORE
  $ quarry <command> --help
  https://github.com/sandover/quarry"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
#[derive(Debug)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(
        about = "Serve the gateway over HTTP",
        long_about = r#"Start the HTTP gateway.

The listen port and the mount table come from the config file; both are
rewritten in place when changed over the API."#,
        after_help = r#"EXAMPLES
  $ quarry serve
  $ quarry serve --config ./quarry.json
  $ quarry serve --bind 0.0.0.0

NOTES
  - Default config location: ~/.quarry/config.json
  - A missing config file means an empty mount table and the default port
  - PUT /server/port rebinds the server without losing memory mounts"#
    )]
    Serve {
        #[arg(
            long,
            help = "Config file path (default: ~/.quarry/config.json)",
            value_hint = ValueHint::FilePath
        )]
        config: Option<PathBuf>,
        #[arg(
            long,
            default_value = "127.0.0.1",
            help = "Bind address (the port comes from the config file)"
        )]
        bind: String,
        #[arg(
            long,
            default_value_t = DEFAULT_MAX_BODY_BYTES,
            help = "Max request body size in bytes"
        )]
        max_body_bytes: u64,
    },
    #[command(
        about = "Print version info as JSON",
        long_about = r#"Emit version info as JSON (stable, machine-readable)."#,
        after_help = r#"EXAMPLES
  $ quarry version"#
    )]
    Version,
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        long_about = r#"Generate shell completion scripts.

Prints a completion script for the given shell to stdout.
Install the generated file in your shell's completion directory (or source it)
to enable tab completion."#,
        after_help = r#"EXAMPLES
  $ quarry completion bash > ~/.local/share/bash-completion/completions/quarry
  $ quarry completion zsh > ~/.zfunc/_quarry
  $ quarry completion fish > ~/.config/fish/completions/quarry.fish"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn run_serve(
    config: Option<PathBuf>,
    bind: String,
    max_body_bytes: u64,
) -> Result<RunOutcome, Error> {
    let config_path = config.unwrap_or_else(default_config_path);
    let loaded = load_config(&config_path)?;
    let initial_port = loaded.port;
    let host: IpAddr = bind
        .parse()
        .map_err(|_| Error::env_invalid_config(format!("invalid bind address {bind}")))?;
    let sink = Arc::new(FileConfigSink::new(&config_path, initial_port));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| Error::env_unexpected(format!("failed to start runtime: {err}")))?;

    runtime.block_on(async move {
        let engine = Arc::new(
            EngineCell::bootstrap(
                loaded.table,
                Arc::new(StandardFactory::new()),
                sink.clone(),
            )
            .await?,
        );
        let mut port = initial_port;
        loop {
            let serve_config = serve::ServeConfig {
                host,
                port,
                max_body_bytes,
            };
            match serve::serve(serve_config, engine.clone(), sink.clone()).await? {
                serve::ServeOutcome::Shutdown => return Ok(()),
                serve::ServeOutcome::Rebind(next) => port = next,
            }
        }
    })?;

    Ok(RunOutcome::ok())
}

fn emit_version() {
    if io::stdout().is_terminal() {
        println!("quarry {}", env!("CARGO_PKG_VERSION"));
    } else {
        println!(
            "{}",
            json!({
                "name": "quarry",
                "version": env!("CARGO_PKG_VERSION"),
            })
        );
    }
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {err}");
    } else {
        eprintln!("{}", json!({ "error": err.body_value() }));
    }
}
