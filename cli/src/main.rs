//! medchain: operator and auditor CLI for the medication administration
//! hash chain.
//!
//! Works against a JSON Lines record file.  Exit status is 0 on success,
//! 1 on an operational error, and 2 when verification finds corruption.
//!
//! Usage:
//!   medchain administer --request dose.json
//!   medchain verify [--from N] [--to N]
//!   medchain tail
//!   medchain export --out chain.json
//!   medchain verify-export chain.json
//!   medchain demo

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use medchain_contracts::{
    error::{ChainError, ChainResult},
    record::RecordPayload,
    verify::{ChainExport, VerificationResult, VerifyRange},
};
use medchain_core::{chain, HashChainLedger, LedgerConfig};
use medchain_intake::{AdministrationResponse, RequestValidator, VerifyQuery, VerifyResponse};
use medchain_store::JsonlRecordStore;

const DEFAULT_STORE: &str = "medchain.jsonl";

// ── CLI definition ────────────────────────────────────────────────────────────

/// Append to and audit the tamper-evident medication administration log.
#[derive(Parser)]
#[command(
    name = "medchain",
    about = "Medication administration hash chain",
    long_about = "Appends medication administration records to a SHA-256 hash chain\n\
                  and verifies that no record was altered, removed, or reordered."
)]
struct Cli {
    /// Record file (JSON Lines).  Overrides `store_path` from the config.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate an administration request and append it to the chain.
    Administer {
        /// JSON request file, or "-" for stdin.
        #[arg(long)]
        request: String,
    },
    /// Verify the chain, or a sequence range of it.
    Verify {
        #[arg(long)]
        from: Option<u64>,
        #[arg(long)]
        to: Option<u64>,
    },
    /// Print the most recent record.
    Tail,
    /// Write a sealed snapshot of the chain for off-box audit.
    Export {
        #[arg(long)]
        from: Option<u64>,
        #[arg(long)]
        to: Option<u64>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Verify a snapshot written by `export` without touching the store.
    VerifyExport { file: PathBuf },
    /// Walk through append, verify, tamper, and re-verify on a scratch file.
    Demo,
}

// ── Config file ───────────────────────────────────────────────────────────────

/// Layout of the `--config` file:
///
/// ```toml
/// store_path = "/var/lib/medchain/administrations.jsonl"
///
/// [ledger]
/// max_append_retries = 3
/// verify_timeout_ms = 30000
/// ```
#[derive(Debug, Default, Deserialize)]
struct CliConfig {
    store_path: Option<PathBuf>,
    #[serde(default)]
    ledger: LedgerConfig,
}

impl CliConfig {
    fn load(path: Option<&Path>) -> ChainResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|e| ChainError::ConfigError {
            reason: format!("failed to read config '{}': {}", path.display(), e),
        })?;
        let config: CliConfig = toml::from_str(&contents).map_err(|e| ChainError::ConfigError {
            reason: format!("failed to parse config '{}': {}", path.display(), e),
        })?;
        config.ledger.validate()?;
        Ok(config)
    }
}

/// Outcome that maps to the process exit status.
enum Outcome {
    Ok,
    Corrupt,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=info (or debug) for ledger activity.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(Outcome::Ok) => {}
        Ok(Outcome::Corrupt) => std::process::exit(2),
        Err(e) => {
            eprintln!("medchain error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> ChainResult<Outcome> {
    let config = CliConfig::load(cli.config.as_deref())?;
    let store_path = cli
        .store
        .or(config.store_path)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE));

    match cli.command {
        Command::Administer { request } => {
            administer(&open_ledger(&store_path, &config.ledger)?, &request)
        }
        Command::Verify { from, to } => {
            verify(&open_ledger(&store_path, &config.ledger)?, VerifyQuery { from, to })
        }
        Command::Tail => tail(&open_ledger(&store_path, &config.ledger)?),
        Command::Export { from, to, out } => export(
            &open_ledger(&store_path, &config.ledger)?,
            VerifyQuery { from, to },
            &out,
        ),
        Command::VerifyExport { file } => verify_export(&file),
        Command::Demo => demo(&config.ledger),
    }
}

fn open_ledger(path: &Path, config: &LedgerConfig) -> ChainResult<HashChainLedger> {
    let store = JsonlRecordStore::open(path)?;
    Ok(HashChainLedger::new(Arc::new(store), config.clone()))
}

fn print_json<T: serde::Serialize>(value: &T) -> ChainResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| ChainError::InvalidPayload {
        reason: format!("cannot render output: {}", e),
    })?;
    println!("{}", text);
    Ok(())
}

fn report(result: &VerificationResult, range: Option<VerifyRange>) -> ChainResult<Outcome> {
    let body = VerifyResponse::for_range(result, range);
    print_json(&body)?;
    match body.message {
        Some(message) => {
            eprintln!();
            eprintln!("!! CHAIN INTEGRITY FAILURE: {}", message);
            eprintln!("!! Escalate to an auditor; do not rely on records from this point on.");
            Ok(Outcome::Corrupt)
        }
        None => Ok(Outcome::Ok),
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn administer(ledger: &HashChainLedger, request: &str) -> ChainResult<Outcome> {
    let raw = if request == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| ChainError::InvalidPayload {
                reason: format!("cannot read request from stdin: {}", e),
            })?;
        buf
    } else {
        std::fs::read_to_string(request).map_err(|e| ChainError::InvalidPayload {
            reason: format!("cannot read request '{}': {}", request, e),
        })?
    };
    let body: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| ChainError::InvalidPayload {
            reason: format!("request is not JSON: {}", e),
        })?;

    let payload = RequestValidator::new()?.payload_from(&body, Utc::now())?;
    let record = ledger.append(payload)?;
    print_json(&AdministrationResponse::from(&record))?;
    Ok(Outcome::Ok)
}

fn verify(ledger: &HashChainLedger, query: VerifyQuery) -> ChainResult<Outcome> {
    let range = query.resolve(ledger.tail_sequence()?);
    report(&ledger.verify(range)?, range)
}

fn tail(ledger: &HashChainLedger) -> ChainResult<Outcome> {
    match ledger.tail()? {
        Some(record) => print_json(&AdministrationResponse::from(&record))?,
        None => println!("chain is empty"),
    }
    Ok(Outcome::Ok)
}

fn export(ledger: &HashChainLedger, query: VerifyQuery, out: &Path) -> ChainResult<Outcome> {
    let range = query.resolve(ledger.tail_sequence()?);
    let snapshot = ledger.export(range)?;
    let text = serde_json::to_string_pretty(&snapshot).map_err(|e| ChainError::InvalidPayload {
        reason: format!("cannot encode export: {}", e),
    })?;
    std::fs::write(out, text).map_err(|e| ChainError::StorageUnavailable {
        reason: format!("failed to write '{}': {}", out.display(), e),
    })?;
    println!(
        "exported {} record(s) to {} (terminal hash {})",
        snapshot.records.len(),
        out.display(),
        if snapshot.terminal_hash.is_empty() { "-" } else { snapshot.terminal_hash.as_str() }
    );
    Ok(Outcome::Ok)
}

fn verify_export(file: &Path) -> ChainResult<Outcome> {
    let text = std::fs::read_to_string(file).map_err(|e| ChainError::StorageUnavailable {
        reason: format!("failed to read '{}': {}", file.display(), e),
    })?;
    let snapshot: ChainExport =
        serde_json::from_str(&text).map_err(|e| ChainError::InvalidPayload {
            reason: format!("'{}' is not a chain export: {}", file.display(), e),
        })?;

    report(&chain::verify_export(&snapshot), None)
}

// ── Demo ──────────────────────────────────────────────────────────────────────

fn demo(config: &LedgerConfig) -> ChainResult<Outcome> {
    let path = std::env::temp_dir().join(format!("medchain-demo-{}.jsonl", uuid::Uuid::new_v4()));
    let ledger = open_ledger(&path, config)?;
    info!(path = %path.display(), "demo store created");

    println!();
    println!("Medication administration hash chain demo");
    println!("=========================================");
    println!("store: {}", path.display());
    println!();

    let t1 = Utc::now() - Duration::hours(8);
    for (i, at) in [t1, t1 + Duration::hours(4), t1 + Duration::hours(8)].into_iter().enumerate() {
        let record = ledger.append(RecordPayload {
            record_id: uuid::Uuid::new_v4(),
            patient_id: "P1".to_string(),
            order_id: format!("ORD-{}", 100 + i),
            administered_by: "nurse-demo".to_string(),
            patient_barcode_scanned: true,
            medication_barcode_scanned: true,
            administered_at: at,
        })?;
        println!(
            "[{}] appended #{}  prev={}…  hash={}…",
            i + 1,
            record.sequence_number,
            &record.previous_hash[..12],
            &record.record_hash[..12]
        );
    }

    println!();
    println!("[4] verify before tampering:");
    report(&ledger.verify(None)?, None)?;

    println!();
    println!("[5] rewriting record #2 administered_at directly in the file …");
    tamper_timestamp(&path, 2)?;

    println!();
    println!("[6] verify after tampering:");
    let outcome = report(&ledger.verify(None)?, None)?;

    if let Err(e) = std::fs::remove_file(&path) {
        eprintln!("could not remove demo store {}: {}", path.display(), e);
    }

    match outcome {
        Outcome::Corrupt => {
            println!();
            println!("Tampering detected as expected.");
            Ok(Outcome::Ok)
        }
        Outcome::Ok => Err(ChainError::StorageUnavailable {
            reason: "demo tamper was not detected".to_string(),
        }),
    }
}

/// Shift one record's timestamp by a minute, bypassing the ledger.
fn tamper_timestamp(path: &Path, sequence: u64) -> ChainResult<()> {
    let io = |e: std::io::Error| ChainError::StorageUnavailable {
        reason: format!("demo tamper failed on '{}': {}", path.display(), e),
    };
    let contents = std::fs::read_to_string(path).map_err(io)?;

    let mut lines = Vec::new();
    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        let mut value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| ChainError::StorageUnavailable {
                reason: format!("demo tamper could not parse a line: {}", e),
            })?;
        if value["sequence_number"].as_u64() == Some(sequence) {
            let shifted = value["administered_at"]
                .as_str()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|t| (t + Duration::minutes(1)).to_rfc3339());
            if let Some(shifted) = shifted {
                value["administered_at"] = serde_json::Value::String(shifted);
            }
        }
        lines.push(value.to_string());
    }

    std::fs::write(path, lines.join("\n") + "\n").map_err(io)
}
