//! Herb Ledger CLI
//!
//! Drives the custody ledger from the command line: seed the permit
//! registry, record stage events, and reconstruct provenance. This is a
//! local driver for operating and inspecting a ledger instance, not a
//! network API.
//!
//! ## Usage
//!
//! ```bash
//! # Seed the default zones and permits
//! herb-ledger seed
//!
//! # Record a collection event
//! herb-ledger collect --species Ashwagandha --lat 27.0 --lng 75.9 \
//!     --weight-kg 25.5 --month January
//!
//! # Attest quality against the permit's standards
//! herb-ledger quality --collection EVT_... \
//!     --measure moisture=8.5 --measure pesticides=0.005 --measure heavyMetals=2.1
//!
//! # Processing and batch stages
//! herb-ledger process --predecessor TEST_... --process-type drying
//! herb-ledger batch --predecessor PROC_... --product "Ashwagandha Powder"
//!
//! # Verify and display the full journey behind a record
//! herb-ledger provenance BATCH_...
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use herb_ledger::{CollectionCandidate, Config, HerbLedger, Month};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "herb-ledger")]
#[command(about = "Chain-of-custody ledger for Ayurvedic herb provenance")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "HERB_LEDGER_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seed the default demo zones and permits
    Seed,

    /// List active collection zones
    Zones,

    /// List active herb permits
    Permits,

    /// Record a collection event (chain root)
    Collect {
        #[arg(long)]
        species: String,
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lng: f64,
        #[arg(long)]
        weight_kg: f64,
        /// Month name or 1-12
        #[arg(long)]
        month: Month,
    },

    /// Record a quality attestation for a collection record
    Quality {
        /// Collection record id
        #[arg(long)]
        collection: String,
        /// Measurement as metric=value, repeatable
        #[arg(long = "measure", value_parser = parse_measurement)]
        measurements: Vec<(String, f64)>,
    },

    /// Record a processing step over one or more prior records
    Process {
        /// Predecessor record id, repeatable
        #[arg(long = "predecessor", required = true)]
        predecessors: Vec<String>,
        #[arg(long)]
        process_type: String,
        /// Output yield in kg, if known
        #[arg(long)]
        yield_kg: Option<f64>,
    },

    /// Record a manufactured batch over one or more processing records
    Batch {
        /// Processing record id, repeatable
        #[arg(long = "predecessor", required = true)]
        predecessors: Vec<String>,
        #[arg(long)]
        product: String,
        #[arg(long)]
        batch_size: Option<String>,
    },

    /// Reconstruct and verify the journey behind a record
    Provenance { record_id: String },

    /// Show the derived status of a record
    Status { record_id: String },

    /// Emit the scannable token payload for a record
    Token { record_id: String },

    /// Rebuild the forward child index from a full record scan
    RebuildIndex,
}

fn parse_measurement(s: &str) -> Result<(String, f64), String> {
    let (metric, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected metric=value, got: {}", s))?;
    let value: f64 = value
        .parse()
        .map_err(|_| format!("invalid value for {}: {}", metric, value))?;
    Ok((metric.trim().to_string(), value))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("herb_ledger=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else {
        Config::default()
    };
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }

    let ledger = HerbLedger::open(&config).context("failed to open ledger")?;

    match args.command {
        Command::Seed => {
            // HerbLedger::open already seeds when configured; report the state
            let zones = ledger.registry().list_active_zones()?;
            let permits = ledger.registry().list_active_permits()?;
            println!(
                "Registry ready: {} active zones, {} active permits",
                zones.len(),
                permits.len()
            );
        }

        Command::Zones => {
            for zone in ledger.registry().list_active_zones()? {
                println!(
                    "{}  {}  lat {}..{}  lng {}..{}  ceiling {} kg",
                    zone.id,
                    zone.name,
                    zone.bounds.min_lat,
                    zone.bounds.max_lat,
                    zone.bounds.min_lng,
                    zone.bounds.max_lng,
                    zone.max_yield_kg
                );
            }
        }

        Command::Permits => {
            for permit in ledger.registry().list_active_permits()? {
                println!(
                    "{}  {} ({})  {}-{}  max {} kg/collection",
                    permit.id,
                    permit.name,
                    permit.scientific_name,
                    permit.season_start,
                    permit.season_end,
                    permit.max_yield_per_collection_kg
                );
                for (metric, threshold) in &permit.quality_standards {
                    println!("    {} <= {} {}", metric, threshold.max, threshold.unit);
                }
            }
        }

        Command::Collect {
            species,
            lat,
            lng,
            weight_kg,
            month,
        } => {
            let candidate = CollectionCandidate::new(&species, lat, lng, weight_kg, month);
            let record = ledger.record_collection(&candidate)?;
            print_record(&record)?;
        }

        Command::Quality {
            collection,
            measurements,
        } => {
            let measurements: BTreeMap<String, f64> = measurements.into_iter().collect();
            let record = ledger.record_quality(&collection, &measurements)?;
            print_record(&record)?;
        }

        Command::Process {
            predecessors,
            process_type,
            yield_kg,
        } => {
            let mut payload = Map::new();
            payload.insert("process_type".into(), process_type.into());
            if let Some(yield_kg) = yield_kg {
                payload.insert("yield_kg".into(), yield_kg.into());
            }
            let record = ledger.record_processing(payload, &predecessors)?;
            print_record(&record)?;
        }

        Command::Batch {
            predecessors,
            product,
            batch_size,
        } => {
            let mut payload = Map::new();
            payload.insert("product".into(), product.into());
            if let Some(batch_size) = batch_size {
                payload.insert("batch_size".into(), batch_size.into());
            }
            let record = ledger.record_batch(payload, &predecessors)?;
            print_record(&record)?;
        }

        Command::Provenance { record_id } => {
            let provenance = ledger.get_provenance(&record_id)?;
            println!(
                "Verified journey for {} ({} stages):",
                provenance.terminal_id,
                provenance.journey.len()
            );
            for stage in &provenance.journey {
                println!(
                    "  [{}] {}  {}  {}",
                    stage.stage,
                    stage.id,
                    stage.created_at.to_rfc3339(),
                    Value::Object(stage.payload.clone())
                );
            }
        }

        Command::Status { record_id } => {
            let status = ledger.record_status(&record_id)?;
            if status.linked {
                println!("{}: linked", record_id);
            } else {
                match status.verification {
                    Some(outcome) => println!("{}: terminal, {:?}", record_id, outcome),
                    None => println!("{}: pending", record_id),
                }
            }
        }

        Command::Token { record_id } => {
            let token = ledger.token_for(&record_id)?;
            println!("{}", token.to_json()?);
        }

        Command::RebuildIndex => {
            let scanned = ledger.store().rebuild_child_index()?;
            println!("Rebuilt child index from {} records", scanned);
        }
    }

    Ok(())
}

fn print_record(record: &herb_ledger::ChainRecord) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}
