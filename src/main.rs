//! kv - Namespaced, TTL-Aware Key-Value Store
//!
//! One process, one operation: parse flags, run the operation against the
//! shared SQLite file, print one JSON envelope on stdout, exit with its code.
//! Diagnostics go to stderr (filter with `KV_LOG`, e.g. `KV_LOG=debug`).

use clap::error::ErrorKind;
use clap::Parser;
use kvstash::config::{DEFAULT_BUSY_TIMEOUT_MS, MAX_BUSY_TIMEOUT_MS};
use kvstash::{CommandHandler, ErrorCode, Request, Response, StoreConfig, DEFAULT_NAMESPACE};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
const LOG_ENV: &str = "KV_LOG";

const AFTER_HELP: &str = "\
EXAMPLES:
    kv --op set --key a --value x --ttl 60
    kv --op get --key a
    kv --op keys --ns sessions --compact
    kv --op purge-expired

EXIT CODES:
    0  success
    1  unknown operation
    2  missing or invalid argument
    5  storage fault";

#[derive(Parser, Debug)]
#[command(name = "kv")]
#[command(about = "Namespaced, TTL-aware key-value store backed by a shared SQLite file")]
#[command(disable_version_flag = true)]
#[command(after_help = AFTER_HELP)]
struct Cli {
    /// Operation: set|get|del|keys|purge-expired|ping|version
    #[arg(long)]
    op: Option<String>,

    /// Namespace
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    ns: String,

    /// Key
    #[arg(long, allow_hyphen_values = true)]
    key: Option<String>,

    /// Value
    #[arg(long, allow_hyphen_values = true)]
    value: Option<String>,

    /// Time-to-live in seconds (0 or negative = never expires)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    ttl: i64,

    /// Minimal output
    #[arg(long)]
    compact: bool,

    /// Database file (default: ./.data/kv.sqlite or <exe>/../../.data/kv.sqlite)
    #[arg(long, env = "KV_DB_PATH")]
    db: Option<PathBuf>,

    /// How long a writer waits for a competing writer, in milliseconds
    #[arg(
        long,
        env = "KV_BUSY_TIMEOUT_MS",
        default_value_t = DEFAULT_BUSY_TIMEOUT_MS,
        value_parser = clap::value_parser!(u64).range(..=MAX_BUSY_TIMEOUT_MS)
    )]
    busy_timeout_ms: u64,
}

impl Cli {
    fn request(&self) -> Request {
        Request {
            op: self.op.clone(),
            namespace: self.ns.clone(),
            key: self.key.clone(),
            value: self.value.clone(),
            ttl: self.ttl,
            compact: self.compact,
        }
    }
}

fn main() -> ExitCode {
    init_tracing();

    let response = match Cli::try_parse() {
        Ok(cli) => run(&cli),
        // --help is the only path that prints plain text instead of an envelope
        Err(err) if err.kind() == ErrorKind::DisplayHelp => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => invalid_arguments(&err),
    };

    if let Err(err) = response.write_to(std::io::stdout().lock()) {
        error!(error = %err, "Failed to write response");
    }

    ExitCode::from(response.exit_code())
}

/// Runs one invocation and returns its envelope.
fn run(cli: &Cli) -> Response {
    let config = match StoreConfig::resolve(cli.db.clone()) {
        Ok(config) => config.with_busy_timeout(Duration::from_millis(cli.busy_timeout_ms)),
        Err(err) => {
            error!(error = %format!("{err:#}"), "Failed to resolve database path");
            return Response::error(ErrorCode::StorageFault, format!("{err:#}"));
        }
    };

    CommandHandler::new(config).execute(&cli.request())
}

/// Maps a flag parsing failure onto the envelope.
fn invalid_arguments(err: &clap::Error) -> Response {
    let rendered = err.to_string();
    let message = rendered
        .lines()
        .next()
        .unwrap_or("invalid arguments")
        .trim_start_matches("error: ")
        .to_string();

    Response::error(ErrorCode::ArgInvalid, message).with_suggestion("Run kv --help for usage")
}

/// Logs to stderr so stdout carries nothing but the envelope.
fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
