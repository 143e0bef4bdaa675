//! txcompose - operator CLI for the composition engine
//!
//! - `inspect`: decompile an envelope and print it as JSON
//! - `recompile`: recompile an envelope against its tables plus extra
//!   candidate tables, printing the unsigned transaction and budget report
//!
//! Envelopes are given as base64 text or `@path` (file holding base64 or
//! raw bytes). Lookup tables come from a JSON snapshot file or over RPC.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use txcompose::composer::{
    decompile, declared_compute_units, ComposeRequest, Composer, Envelope, LookupTable, Message,
    RawMessage, TableSet,
};
use txcompose::config::{Config, LoggingConfig};
use txcompose::lookup_tables::{
    fetch_for_envelope, LookupTableSource, RpcTableSource, StaticTableSource,
};
use txcompose::metrics::metrics;
use txcompose::Pubkey;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "txcompose.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decompile an envelope and print accounts, instructions and budget usage
    Inspect(EnvelopeArgs),

    /// Recompile an envelope, optionally with extra candidate tables
    Recompile {
        #[command(flatten)]
        envelope: EnvelopeArgs,

        /// Additional lookup tables to offer, in priority order
        #[arg(long = "candidate", value_name = "PUBKEY")]
        candidates: Vec<String>,

        /// Pay fees from this address instead
        #[arg(long)]
        fee_payer: Option<String>,

        /// Declared compute units, overriding the message's own
        #[arg(long)]
        compute_units: Option<u64>,
    },
}

#[derive(ClapArgs, Debug)]
struct EnvelopeArgs {
    /// Base64 envelope, or @path to a file
    envelope: String,

    /// JSON lookup table snapshots instead of RPC
    #[arg(long, value_name = "PATH")]
    tables_file: Option<PathBuf>,
}

/// One entry of a `--tables-file` snapshot
#[derive(Debug, Deserialize)]
struct TableSnapshot {
    address: String,
    entries: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    init_logging(&config.logging, args.verbose)?;
    info!(version = env!("CARGO_PKG_VERSION"), "txcompose starting");

    let output = match &args.command {
        Command::Inspect(envelope) => inspect(&config, envelope).await?,
        Command::Recompile {
            envelope,
            candidates,
            fee_payer,
            compute_units,
        } => {
            recompile(
                &config,
                envelope,
                candidates,
                fee_payer.as_deref(),
                *compute_units,
            )
            .await?
        }
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if args.metrics {
        eprintln!("{}", metrics().encode_text()?);
    }
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        "txcompose=debug,info".to_string()
    } else {
        logging.level.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&default_filter))
        .context("Invalid log filter")?;

    let json_layer = logging.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!logging.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Load configuration from file with fallback to environment defaults
fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        Config::from_env().context("Failed to load config from environment")
    }
}

async fn inspect(config: &Config, args: &EnvelopeArgs) -> Result<serde_json::Value> {
    let envelope = read_envelope(&args.envelope)?;
    let bytes = envelope.message_bytes()?;
    let raw = RawMessage::parse(&bytes)?;
    let tables = fetch_tables(config, args, &bytes, &[]).await?;
    let message = decompile(&bytes, &tables)?;

    let limits = config.budget.limits();
    let budget = limits.report(&bytes, declared_compute_units(&message))?;
    for violation in budget.violations() {
        warn!(
            kind = %violation.kind,
            limit = violation.limit,
            actual = violation.actual,
            "Envelope over budget"
        );
    }

    Ok(json!({
        "version": format!("{:?}", raw.version),
        "recent_blockhash": message.recent_blockhash.to_string(),
        "header": {
            "num_required_signatures": message.header.num_required_signatures,
            "num_readonly_signed_accounts": message.header.num_readonly_signed_accounts,
            "num_readonly_unsigned_accounts": message.header.num_readonly_unsigned_accounts,
        },
        "static_keys": raw.static_keys.len(),
        "accounts": accounts_json(&message),
        "instructions": instructions_json(&message),
        "lookups": raw.address_table_lookups.iter().map(|l| json!({
            "table": l.account_key.to_string(),
            "writable_indexes": l.writable_indexes,
            "readonly_indexes": l.readonly_indexes,
        })).collect::<Vec<_>>(),
        "budget": budget,
    }))
}

async fn recompile(
    config: &Config,
    args: &EnvelopeArgs,
    candidates: &[String],
    fee_payer: Option<&str>,
    compute_units: Option<u64>,
) -> Result<serde_json::Value> {
    let envelope = read_envelope(&args.envelope)?;
    let candidates = candidates
        .iter()
        .map(|c| parse_pubkey(c))
        .collect::<Result<Vec<_>>>()?;
    let bytes = envelope.message_bytes()?;
    let tables = fetch_tables(config, args, &bytes, &candidates).await?;
    let original_len = bytes.len();

    let mut request = ComposeRequest::new(envelope.clone(), tables);
    if let Some(payer) = fee_payer {
        request = request.with_fee_payer(parse_pubkey(payer)?);
    }
    if let Some(units) = compute_units {
        request = request.with_compute_units(units);
    }

    let composer = Composer::new(config.budget.limits());
    let composed = composer.compose(&request)?;
    info!(
        original_bytes = original_len,
        composed_bytes = composed.message.len(),
        "Recompiled envelope"
    );

    Ok(json!({
        "transaction": composed.to_base64()?,
        "required_signers": composed
            .required_signers
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>(),
        "original_message_bytes": original_len,
        "message_bytes": composed.message.len(),
        "budget": composed.budget,
    }))
}

async fn fetch_tables(
    config: &Config,
    args: &EnvelopeArgs,
    message: &[u8],
    candidates: &[Pubkey],
) -> Result<TableSet> {
    let source: Box<dyn LookupTableSource> = match &args.tables_file {
        Some(path) => Box::new(load_table_file(path)?),
        None => Box::new(RpcTableSource::from_config(&config.rpc)?),
    };
    fetch_for_envelope(source.as_ref(), message, candidates)
        .await
        .context("Failed to fetch lookup tables")
}

fn load_table_file(path: &Path) -> Result<StaticTableSource> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tables file {}", path.display()))?;
    let snapshots: Vec<TableSnapshot> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse tables file {}", path.display()))?;
    let tables = snapshots
        .iter()
        .map(|s| {
            let entries = s
                .entries
                .iter()
                .map(|e| parse_pubkey(e))
                .collect::<Result<Vec<_>>>()?;
            Ok(LookupTable::new(parse_pubkey(&s.address)?, entries))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(StaticTableSource::new(tables))
}

fn read_envelope(arg: &str) -> Result<Envelope> {
    let bytes = match arg.strip_prefix('@') {
        Some(path) => {
            let content =
                std::fs::read(path).with_context(|| format!("Failed to read envelope {path}"))?;
            match std::str::from_utf8(&content)
                .ok()
                .and_then(|text| STANDARD.decode(text.trim()).ok())
            {
                Some(decoded) => decoded,
                None => content,
            }
        }
        None => STANDARD
            .decode(arg.trim())
            .context("Envelope is not valid base64")?,
    };
    Ok(Envelope::detect(bytes))
}

fn parse_pubkey(text: &str) -> Result<Pubkey> {
    Pubkey::from_str(text.trim()).with_context(|| format!("Invalid address: {text}"))
}

fn accounts_json(message: &Message) -> Vec<serde_json::Value> {
    message
        .account_list
        .iter()
        .map(|entry| {
            json!({
                "address": entry.address.to_string(),
                "writable": entry.writable,
                "signer": entry.signer,
            })
        })
        .collect()
}

fn instructions_json(message: &Message) -> Vec<serde_json::Value> {
    message
        .resolved_instructions()
        .iter()
        .map(|ix| {
            json!({
                "program_id": ix.program_id.to_string(),
                "accounts": ix.accounts.iter().map(|a| a.address.to_string()).collect::<Vec<_>>(),
                "data": STANDARD.encode(&ix.data),
            })
        })
        .collect()
}
