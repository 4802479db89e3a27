//! storekeeper-dump - offline inspector for snapshot and append-only log
//! files, run against a stopped (or a copied-aside, still-running) data
//! directory.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use store_core::value::{Value, ValueType};

#[derive(Parser)]
#[command(name = "storekeeper-dump", about = "Inspect snapshot and append-only log files", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Loads a snapshot file and prints a per-database key summary.
    Snapshot {
        path: PathBuf,
        /// Number of logical databases the file was written with.
        #[arg(long, default_value_t = 16)]
        databases: usize,
        /// Hash-to-packed-map pre-sizing threshold, mirrors the server's config.
        #[arg(long, default_value_t = store_core::value::DEFAULT_HASH_MAX_ENTRIES)]
        hash_max_entries: usize,
        /// Print one line of JSON per key instead of the human summary.
        #[arg(long)]
        json: bool,
    },
    /// Replays an append-only log file and prints every framed command.
    Aol {
        path: PathBuf,
        /// Print one line of JSON per command instead of the human summary.
        #[arg(long)]
        json: bool,
    },
}

fn describe_value(v: &Value) -> (ValueType, usize) {
    let len = match v {
        Value::Str(_) => 1,
        Value::List(l) => l.len(),
        Value::Set(s) => s.len(),
        Value::ZSet(z) => z.len(),
        Value::Hash(h) => h.len(),
    };
    (v.value_type(), len)
}

fn run_snapshot(path: PathBuf, databases: usize, hash_max_entries: usize, json: bool) -> std::io::Result<()> {
    let bytes = std::fs::read(&path)?;
    let store = match store_core::persistence::snapshot::load(&bytes, databases, hash_max_entries) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("failed to load {}: {e}", path.display());
            std::process::exit(1);
        }
    };

    let mut total_keys = 0usize;
    for (index, db) in store.databases.iter().enumerate() {
        if db.dict.is_empty() {
            continue;
        }
        if !json {
            println!("db{index}: {} keys", db.dict.len());
        }
        for (key, value) in db.dict.iter() {
            total_keys += 1;
            let (ty, len) = describe_value(value);
            let ttl = db.expires.get(key).copied();
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "db": index,
                        "key": String::from_utf8_lossy(key),
                        "type": ty.name(),
                        "len": len,
                        "expires_at": ttl,
                    })
                );
            } else {
                let ttl_str = ttl
                    .map(|at| chrono::DateTime::from_timestamp(at, 0).map(|d| d.to_rfc3339()).unwrap_or_default())
                    .unwrap_or_else(|| "(none)".to_string());
                println!("  {} [{}] len={len} expires={ttl_str}", String::from_utf8_lossy(key), ty.name());
            }
        }
    }
    if !json {
        println!("{total_keys} keys across {} databases, dirty={}", store.databases.len(), store.dirty);
    }
    Ok(())
}

fn run_aol(path: PathBuf, json: bool) -> std::io::Result<()> {
    let bytes = std::fs::read(&path)?;
    let mut count = 0usize;
    store_core::persistence::replay(&bytes, |argv| {
        count += 1;
        let name = String::from_utf8_lossy(&argv[0]).to_string();
        if json {
            let args: Vec<String> = argv[1..].iter().map(|a| String::from_utf8_lossy(a).to_string()).collect();
            println!("{}", serde_json::json!({ "seq": count, "command": name, "args": args }));
        } else {
            let rendered: Vec<String> = argv.iter().map(|a| String::from_utf8_lossy(a).to_string()).collect();
            println!("{count}: {}", rendered.join(" "));
        }
    });
    if !json {
        println!("{count} commands replayed from {}", path.display());
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Snapshot { path, databases, hash_max_entries, json } => {
            run_snapshot(path, databases, hash_max_entries, json)
        }
        Command::Aol { path, json } => run_aol(path, json),
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
