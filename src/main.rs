//! Hyperchunk CLI
//!
//! Command-line interface for managing partitioned tables:
//! - Register and unregister tables
//! - Insert and import rows
//! - Inspect, compress and drop chunks
//! - Manage retention policies and run the retention worker

use clap::{Parser, Subcommand};
use hyperchunk::catalog::Catalog;
use hyperchunk::chunk::{describe_interval, now_micros, ColumnDef, QualifiedName};
use hyperchunk::config::{generate_default_config, parse_interval, Config};
use hyperchunk::import::{row_from_json_str, CsvImporter};
use hyperchunk::{InsertRouter, PartitionedTable, RetentionWorker, UnitOfWork};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hyperchunk")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Automatic time partitioning for SQLite tables")]
#[command(long_about = "Hyperchunk splits a table into time-bucketed chunks.\nRows are routed into the chunk covering their timestamp, created on demand.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the usual locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Catalog database, overrides the config
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(flatten)]
    Catalog(CatalogCommand),

    /// Run the retention worker until Ctrl-C
    Worker,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Commands that run in one catalog unit of work
#[derive(Subcommand)]
pub enum CatalogCommand {
    /// Partition a table by time
    CreateTable {
        /// Table name, optionally schema-qualified
        table: String,
        /// Time column
        #[arg(short, long, default_value = "ts")]
        time_column: String,
        /// Chunk width (e.g. 1h, 7d); default from config
        #[arg(short, long)]
        interval: Option<String>,
        /// Column definitions to create the table with, e.g. "ts INTEGER NOT NULL, value REAL"
        #[arg(long)]
        columns: Option<String>,
    },

    /// Drop all chunks of a table and stop partitioning it
    DropTable {
        table: String,
    },

    /// Insert one row given as a JSON object
    Insert {
        table: String,
        /// e.g. '{"ts": 1700000000000000, "value": 1.5}'
        row: String,
    },

    /// Import rows from a CSV file with a header row
    Import {
        table: String,
        path: PathBuf,
        /// Field delimiter
        #[arg(long, default_value = ",")]
        delimiter: char,
        /// Skip malformed lines instead of aborting
        #[arg(long)]
        lenient: bool,
        /// Parse only, write nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// List the chunks of a table
    Chunks {
        table: String,
    },

    /// Drop chunks that end at or before a cutoff
    DropChunks {
        table: String,
        /// Age (e.g. 30d), RFC 3339 time or microseconds since the epoch
        #[arg(long)]
        older_than: String,
    },

    /// Compress one chunk
    Compress {
        chunk_id: i64,
    },

    /// Compress every chunk ending before a cutoff
    CompressOlderThan {
        table: String,
        /// Age (e.g. 7d), RFC 3339 time or microseconds since the epoch
        older_than: String,
    },

    /// Decompress one chunk
    Decompress {
        chunk_id: i64,
    },

    /// Show partitioning and compression state
    Stats {
        /// Limit to one table
        table: Option<String>,
    },

    /// Keep only data newer than a window (e.g. 90d)
    SetRetention {
        table: String,
        window: String,
    },

    /// Remove the retention policy of a table
    RemoveRetention {
        table: String,
    },

    /// Apply all retention policies now
    ApplyRetention,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(path) = &cli.catalog {
        config.catalog.path = path.clone();
    }

    init_tracing(&config);

    let json = cli.format == "json";
    let schema = config.catalog.default_schema.clone();
    let name = |table: &str| QualifiedName::parse(table, &schema);

    match cli.command {
        Commands::Config { output } => {
            let content = generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &content)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", content);
                }
            }
        }

        Commands::Worker => {
            if !config.retention.enabled {
                return Err("Retention is disabled in the config ([retention] enabled = false)".into());
            }

            let handle = RetentionWorker::from_config(&config).start();
            println!("Retention worker running on {:?}. Press Ctrl-C to stop.", config.catalog.path);

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down...");
            handle.shutdown().await;
        }

        Commands::Catalog(command) => run_in_unit_of_work(&config, command, json, &name)?,
    }

    Ok(())
}

/// Run one catalog command in its own unit of work, committed on success
fn run_in_unit_of_work(
    config: &Config,
    command: CatalogCommand,
    json: bool,
    name: &dyn Fn(&str) -> QualifiedName,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = Catalog::from_config(&config.catalog)?;
    let router = InsertRouter::new();
    let manager = router.manager();
    let mut uow = catalog.begin()?;

    match command {
        CatalogCommand::CreateTable {
            table,
            time_column,
            interval,
            columns,
        } => {
            let width = match interval {
                Some(interval) => parse_interval(&interval)?,
                None => config.partitioning.default_chunk_interval_us()?,
            };
            let table = name(&table);

            if let Some(columns) = columns {
                let columns = ColumnDef::parse_list(&columns)?;
                manager.host().create_table(uow.conn(), &table, &columns)?;
            }

            let created = manager.create_partitioned_table(&mut uow, &table, &time_column, width)?;
            print_item(json, &created, || {
                format!(
                    "Partitioned {} by {} into {} chunks (id {})",
                    created.name,
                    time_column,
                    describe_interval(width),
                    created.id
                )
            })?;
        }

        CatalogCommand::DropTable { table } => {
            let table = manager.require_table(&mut uow, &name(&table))?;
            let dropped = manager.drop_partitioned_table(&mut uow, table.id)?;
            println!("Dropped {} chunks; {} is a plain table again", dropped, table.name);
        }

        CatalogCommand::Insert { table, row } => {
            let row = row_from_json_str(&row)?;
            let target = router.insert(&mut uow, &name(&table), row)?;
            match target {
                hyperchunk::WriteTarget::Original => println!("Inserted into {}", table),
                hyperchunk::WriteTarget::Redirect(chunk) => {
                    println!("Inserted into {} (chunk {})", chunk.segment, chunk.id)
                }
            }
        }

        CatalogCommand::Import {
            table,
            path,
            delimiter,
            lenient,
            dry_run,
        } => {
            if !path.exists() {
                return Err(format!("File not found: {:?}", path).into());
            }
            let delimiter = u8::try_from(delimiter)
                .map_err(|_| format!("Delimiter must be a single byte: {:?}", delimiter))?;

            let result = CsvImporter::new()
                .with_delimiter(delimiter)
                .lenient(lenient)
                .import(&path)?;

            println!("Import results:");
            println!("  Rows read: {}", result.rows.len());
            println!("  Rows failed: {}", result.rows_failed);

            if !result.errors.is_empty() {
                println!();
                println!("Errors (first 10):");
                for error in result.errors.iter().take(10) {
                    println!("  {}", error);
                }
            }

            if dry_run {
                println!();
                println!("(Dry run - no data was imported)");
            } else {
                let summary = router.insert_batch(&mut uow, &name(&table), result.rows)?;
                println!("  Inserted: {}", summary);
            }
        }

        CatalogCommand::Chunks { table } => {
            let table = manager.require_table(&mut uow, &name(&table))?;
            let chunks = manager.chunks(&mut uow, table.id)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            } else if chunks.is_empty() {
                println!("{} has no chunks yet", table.name);
            } else {
                println!("{:<6} {:<28} {:<27} {:<27} {}", "ID", "Segment", "Start", "End", "Compressed");
                println!("{}", "-".repeat(100));
                for chunk in chunks {
                    println!(
                        "{:<6} {:<28} {:<27} {:<27} {}",
                        chunk.id,
                        chunk.segment.name,
                        format_micros(chunk.start_time),
                        format_micros(chunk.end_time),
                        if chunk.compressed { "yes" } else { "no" }
                    );
                }
            }
        }

        CatalogCommand::DropChunks { table, older_than } => {
            let cutoff = parse_cutoff(&older_than)?;
            let table = manager.require_table(&mut uow, &name(&table))?;
            let dropped = manager.drop_chunks_older_than(&mut uow, table.id, cutoff)?;
            print_item(json, &dropped, || {
                format!("Dropped {} chunks ending at or before {}", dropped.len(), format_micros(cutoff))
            })?;
        }

        CatalogCommand::Compress { chunk_id } => match manager.compress_chunk(&mut uow, chunk_id)? {
            Some(report) => print_item(json, &report, || report.to_string())?,
            None => println!("Chunk {} is already compressed or empty", chunk_id),
        },

        CatalogCommand::CompressOlderThan { table, older_than } => {
            let cutoff = parse_cutoff(&older_than)?;
            let table = manager.require_table(&mut uow, &name(&table))?;
            let reports = manager.compress_chunks_older_than(&mut uow, table.id, cutoff)?;
            print_item(json, &reports, || {
                let mut out = format!("Compressed {} chunks", reports.len());
                for report in &reports {
                    out.push('\n');
                    out.push_str(&report.to_string());
                }
                out
            })?;
        }

        CatalogCommand::Decompress { chunk_id } => {
            if manager.decompress_chunk(&mut uow, chunk_id)? {
                println!("Decompressed chunk {}", chunk_id);
            } else {
                println!("Chunk {} was not compressed", chunk_id);
            }
        }

        CatalogCommand::Stats { table } => {
            let tables: Vec<PartitionedTable> = match table {
                Some(table) => vec![manager.require_table(&mut uow, &name(&table))?],
                None => catalog_tables(&uow)?,
            };

            let mut summaries = Vec::with_capacity(tables.len());
            for table in &tables {
                summaries.push(manager.compression_summary(&mut uow, table.id)?);
            }
            if json {
                let policies = manager.retention_policies(&mut uow)?;
                let out = serde_json::json!({
                    "tables": summaries,
                    "retention_policies": policies,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if summaries.is_empty() {
                println!("No partitioned tables.");
                println!();
                println!("Partition a table with:");
                println!("  hyperchunk create-table metrics --interval 1d");
            } else {
                for (table, summary) in tables.iter().zip(&summaries) {
                    println!("{}", summary);
                    if let Some(policy) = manager.retention_policy(&mut uow, table.id)? {
                        println!("  retention: {}", describe_interval(policy.retain_us));
                    }
                }
            }
        }

        CatalogCommand::SetRetention { table, window } => {
            let retain_us = parse_interval(&window)?;
            let table = manager.require_table(&mut uow, &name(&table))?;
            let policy = manager.set_retention_policy(&mut uow, table.id, retain_us)?;
            print_item(json, &policy, || {
                format!("{} keeps the last {}", table.name, describe_interval(policy.retain_us))
            })?;
        }

        CatalogCommand::RemoveRetention { table } => {
            let table = manager.require_table(&mut uow, &name(&table))?;
            if manager.remove_retention_policy(&mut uow, table.id)? {
                println!("Removed retention policy of {}", table.name);
            } else {
                println!("{} had no retention policy", table.name);
            }
        }

        CatalogCommand::ApplyRetention => {
            let dropped = manager.apply_retention_policies(&mut uow, now_micros())?;
            println!("Dropped {} chunks", dropped);
        }

    }

    uow.commit()?;
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("hyperchunk={}", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn catalog_tables(uow: &UnitOfWork<'_>) -> Result<Vec<PartitionedTable>, Box<dyn std::error::Error>> {
    Ok(hyperchunk::catalog::tables::list_tables(uow.conn())?)
}

fn print_item<T: Serialize>(
    json: bool,
    item: &T,
    text: impl FnOnce() -> String,
) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(item)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

/// Accepts an age (`30d`, counted back from now), RFC 3339 or raw microseconds
fn parse_cutoff(s: &str) -> Result<i64, Box<dyn std::error::Error>> {
    let s = s.trim();

    if let Ok(micros) = s.parse::<i64>() {
        return Ok(micros);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_micros());
    }
    let age = parse_interval(s)?;
    Ok(now_micros().saturating_sub(age))
}

fn format_micros(micros: i64) -> String {
    chrono::DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string())
        .unwrap_or_else(|| micros.to_string())
}
