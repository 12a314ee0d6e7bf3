use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::error;
use tracing_subscriber::EnvFilter;

use visitstore::chain::engine::ChainEngine;
use visitstore::core::types::{Record, TABLE_SIZE};
use visitstore::parallel::loader::BulkLoader;
use visitstore::storage::compactor::Compactor;
use visitstore::storage::rebuild::reindex;
use visitstore::Config;

#[derive(Parser, Debug)]
#[command(name = "visitstore", version, about = "Clinical visit store with a chained hash index")]
struct Cli {
    /// Directory holding the store and index files
    #[arg(global = true, long, default_value = ".")]
    data_dir: PathBuf,

    /// Bucket count; must match the one the index was built with
    #[arg(global = true, long, default_value_t = TABLE_SIZE)]
    table_size: u32,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(global = true, long, default_value = "info")]
    log_level: String,

    /// Print results as JSON
    #[arg(global = true, long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every visit for an identifier, most recent first
    Search {
        id: i32,
        /// Store file to read instead of the configured one
        store: Option<PathBuf>,
    },

    /// Validate and insert one visit
    Insert(InsertArgs),

    /// Delete every visit for an identifier, or one occurrence of it
    Delete {
        id: i32,
        /// 0-based occurrence as listed by `search`
        #[arg(long)]
        occurrence: Option<usize>,
    },

    /// Rewrite store and index without unreachable records
    Compact,

    /// Bulk load delimited files from a directory
    Load {
        input_dir: PathBuf,
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Relink the whole store and rebuild the index
    Reindex,

    /// Space and chain statistics
    Stats,
}

#[derive(Debug, Args)]
struct InsertArgs {
    #[arg(long)]
    date: String,
    #[arg(long)]
    id: i32,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    age: i32,
    #[arg(long)]
    practitioner: String,
    #[arg(long)]
    reason: String,
    #[arg(long)]
    tests: String,
    #[arg(long)]
    results: String,
    #[arg(long)]
    prescription: String,
}

impl From<InsertArgs> for Record {
    fn from(args: InsertArgs) -> Self {
        Record {
            date: args.date,
            id: args.id,
            first_name: args.first_name,
            last_name: args.last_name,
            age: args.age,
            practitioner: args.practitioner,
            reason: args.reason,
            tests: args.tests,
            results: args.results,
            prescription: args.prescription,
            next: None,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::default()
        .with_data_dir(&cli.data_dir)
        .with_table_size(cli.table_size);
    let json = cli.json;

    match cli.command {
        Command::Search { id, store } => {
            let mut config = config;
            if let Some(store) = store {
                config.store_file = store.to_string_lossy().into_owned();
            }
            let mut engine = ChainEngine::open_read_only(&config)
                .with_context(|| format!("cannot open store in {:?}", config.data_dir))?;
            let results = engine.search(id)?;

            if json {
                emit(&results.hits)?;
            } else if results.is_empty() {
                println!("no visits for identifier {}", id);
            } else {
                for hit in &results.hits {
                    let r = &hit.record;
                    println!(
                        "[{}] {} | {} {} | age {} | {} | {} | {} | {} | {}",
                        hit.occurrence,
                        r.date,
                        r.first_name,
                        r.last_name,
                        r.age,
                        r.practitioner,
                        r.reason,
                        r.tests,
                        r.results,
                        r.prescription
                    );
                }
            }
            if let Some(err) = &results.truncated {
                eprintln!("warning: chain truncated: {}", err);
            }
        }

        Command::Insert(args) => {
            let record = Record::from(args);
            record.validate()?;
            let mut engine = ChainEngine::open(&config)?;
            let at = engine.insert(record)?;
            engine.sync()?;
            println!("inserted at offset {}", at);
        }

        Command::Delete { id, occurrence } => {
            let mut engine = ChainEngine::open_existing(&config)?;
            match occurrence {
                Some(n) => {
                    engine.delete_one(id, n)?;
                    println!("deleted occurrence {} of identifier {}", n, id);
                }
                None => {
                    let removed = engine.delete_all(id)?;
                    println!("deleted {} visit(s) for identifier {}", removed, id);
                }
            }
            engine.sync()?;
        }

        Command::Compact => {
            let report = Compactor::new(&config)?.run().context("compaction failed")?;
            if json {
                emit(&report)?;
            } else {
                println!(
                    "kept {} record(s), reclaimed {}, {} -> {} bytes",
                    report.records_kept,
                    report.records_reclaimed,
                    report.bytes_before,
                    report.bytes_after
                );
            }
        }

        Command::Load { input_dir, workers } => {
            let config = match workers {
                Some(n) => config.with_workers(n),
                None => config,
            };
            let report = BulkLoader::new(&config)?
                .run(&input_dir)
                .with_context(|| format!("bulk load of {:?} failed", input_dir))?;
            if json {
                emit(&report)?;
            } else {
                println!(
                    "loaded {} record(s) from {} file(s) with {} worker(s); {} malformed line(s), {} file(s) skipped",
                    report.records,
                    report.files,
                    report.workers,
                    report.malformed_lines,
                    report.files_skipped
                );
            }
        }

        Command::Reindex => {
            let linked = reindex(&config)
                .with_context(|| format!("cannot reindex store in {:?}", config.data_dir))?;
            println!("relinked {} record(s)", linked);
        }

        Command::Stats => {
            let mut engine = ChainEngine::open_read_only(&config)?;
            let stats = engine.stats()?;
            if json {
                emit(&stats)?;
            } else {
                println!("store bytes      {}", stats.store_bytes);
                println!("records          {}", stats.total_records);
                println!("live             {}", stats.live_records);
                println!("garbage          {} ({:.1}%)", stats.garbage_records, stats.garbage_ratio() * 100.0);
                println!("non-empty buckets {}", stats.non_empty_buckets);
                println!("longest chain    {}", stats.longest_chain);
                println!("broken chains    {}", stats.broken_chains);
            }
        }
    }

    Ok(())
}

fn emit<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
