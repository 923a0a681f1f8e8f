//! # KiokuDB CLI
//!
//! Inspect, query and build store files from the shell.
//!
//! Run with: `kioku search store.kvs --query 0.1,0.2,0.3 --limit 5`

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, Level};

use kioku_core::config::{Config, LogFormat, LogLevel};
use kioku_core::crypto;
use kioku_storage::EmbeddingStore;

#[derive(Parser)]
#[command(name = "kioku")]
#[command(version, about = "KiokuDB - embedding store with exact cosine search")]
struct Cli {
    /// JSON config file; missing fields take defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show mode, dimension and record count of a store file
    Info {
        file: PathBuf,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Rank stored vectors against a query
    Search {
        file: PathBuf,
        /// Comma-separated components, e.g. 0.1,0.2,0.3
        #[arg(long, allow_hyphen_values = true)]
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Add vectors from a JSON-lines file, creating the store if needed
    Import {
        input: PathBuf,
        file: PathBuf,
        /// Quantize a newly created store
        #[arg(long)]
        quantize: bool,
        #[arg(long)]
        key: Option<String>,
    },
    /// Write a memory-mappable flat snapshot of a store
    ExportFlat {
        file: PathBuf,
        output: PathBuf,
        #[arg(long)]
        key: Option<String>,
    },
    /// Print a random passphrase for encrypted stores
    Keygen {
        #[arg(long, default_value_t = 32)]
        length: usize,
    },
}

/// One line of an import file
#[derive(Debug, Deserialize)]
struct ImportRecord {
    id: String,
    vector: Vec<f32>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(&config);

    match cli.command {
        Commands::Info { file, key, json } => {
            let store = EmbeddingStore::open(&file, key.as_deref(), &config)?;
            if json {
                let summary = serde_json::json!({
                    "file": file,
                    "quantized": store.is_quantized(),
                    "dimension": store.dimension(),
                    "count": store.len(),
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("file:      {}", file.display());
                println!("quantized: {}", store.is_quantized());
                println!("dimension: {}", store.dimension());
                println!("count:     {}", store.len());
            }
        }
        Commands::Search { file, query, limit, key, json } => {
            let query = parse_query(&query)?;
            let store = EmbeddingStore::open(&file, key.as_deref(), &config)?;
            let hits = store.try_search(&query, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                for hit in &hits {
                    println!("{}", hit);
                }
            }
        }
        Commands::Import { input, file, quantize, key } => {
            let store = if file.exists() {
                let store = EmbeddingStore::open(&file, key.as_deref(), &config)?;
                if quantize && !store.is_quantized() {
                    bail!("{} is a full-precision store; --quantize only applies to new stores", file.display());
                }
                store
            } else {
                config.store.quantization |= quantize;
                EmbeddingStore::with_config(&config)
            };

            let added = import_jsonl(&store, &input)?;
            store.save(&file, key.as_deref())?;
            info!("Imported {} vectors into {:?}", added, file);
            println!("imported {} vectors ({} total)", added, store.len());
        }
        Commands::ExportFlat { file, output, key } => {
            let store = EmbeddingStore::open(&file, key.as_deref(), &config)?;
            store.save_flat(&output)?;
            println!("wrote {} vectors to {}", store.len(), output.display());
        }
        Commands::Keygen { length } => {
            if length == 0 {
                bail!("--length must be at least 1");
            }
            println!("{}", crypto::generate_key(length));
        }
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let level = match config.logging.level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    };

    // Logs go to stderr so command output stays pipeable
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn parse_query(raw: &str) -> Result<Vec<f32>> {
    let query = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f32>().with_context(|| format!("invalid query component {:?}", s)))
        .collect::<Result<Vec<_>>>()?;
    if query.is_empty() {
        bail!("query must have at least one component");
    }
    Ok(query)
}

fn import_jsonl(store: &EmbeddingStore, input: &Path) -> Result<usize> {
    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let mut added = 0;
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ImportRecord = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid record", input.display(), lineno + 1))?;
        store
            .add_vector(&record.id, &record.vector)
            .with_context(|| format!("{}:{}: rejected {:?}", input.display(), lineno + 1, record.id))?;
        added += 1;
    }
    Ok(added)
}
