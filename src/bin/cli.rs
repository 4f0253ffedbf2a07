//! SmartStash CLI
//!
//! Opens a database directory in-process and runs one command against it.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use smartstash::config::MB;
use smartstash::{BatchOptions, Config, Db, StashError, WriteOptions};
use tracing_subscriber::{fmt, EnvFilter};

/// SmartStash CLI
#[derive(Parser, Debug)]
#[command(name = "smartstash-cli")]
#[command(about = "Embedded key-value store with an atomic batch WAL")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./smartstash_data")]
    data_dir: String,

    /// MemTable size limit in MB before a new generation starts
    #[arg(short = 'm', long, default_value = "64")]
    memtable_mb: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// Write several key=value pairs as one atomic batch
    Batch {
        /// Pairs in key=value form
        #[arg(required = true)]
        pairs: Vec<String>,
    },

    /// Show generation and key counts
    Stats,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,smartstash=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("SmartStash CLI v{}", smartstash::VERSION);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .memtable_size_limit(args.memtable_mb * MB)
        .build();

    let db = match Db::open(config) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to open database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&db, args.command);
    let closed = db.close();

    match result.and(closed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(StashError::KeyNotFound) => {
            println!("(not found)");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(db: &Db, command: Commands) -> smartstash::Result<()> {
    match command {
        Commands::Get { key } => {
            let value = db.get(key.as_bytes())?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Commands::Put { key, value } => {
            db.put(key, value)?;
            println!("OK");
        }
        Commands::Delete { key } => {
            db.delete(key)?;
            println!("OK");
        }
        Commands::Batch { pairs } => {
            let mut batch = db.batch(BatchOptions::default());
            let staged = pairs.iter().try_for_each(|pair| {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    StashError::Config(format!("expected key=value, got {:?}", pair))
                })?;
                batch.put(key.to_owned(), value.to_owned())
            });
            let result = staged.and_then(|_| batch.commit(&WriteOptions::default()));
            db.release(batch);
            result?;
            println!("OK ({} pairs)", pairs.len());
        }
        Commands::Stats => {
            let stats = db.stats();
            println!("generations:       {}", stats.generations);
            println!("active generation: {}", stats.active_generation);
            println!("keys:              {}", stats.keys);
            println!("index footprint:   {} bytes", stats.footprint);
        }
    }
    Ok(())
}
