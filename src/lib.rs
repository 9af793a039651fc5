pub mod cli;
pub mod data;
pub mod ingest;
pub mod io_utils;
pub mod matcher;
pub mod registry;
pub mod source;
pub mod store;
pub mod table;
pub mod transform;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use itertools::Itertools;
use log::{LevelFilter, info};

use crate::{
    cli::{BackupArgs, Cli, Commands, CreateArgs, TablesArgs},
    registry::HeaderCandidate,
    store::StoreConfig,
    table::TextTable,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sightings_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => ingest::execute(&args).map(|_| ()),
        Commands::Check(args) => ingest::check(&args),
        Commands::Tables(args) => handle_tables(&args),
        Commands::Create(args) => handle_create(&args),
        Commands::Backup(args) => handle_backup(&args),
    }
}

fn handle_tables(args: &TablesArgs) -> Result<()> {
    let registry = ingest::read_registry(args.registry.as_deref())?;
    if args.yaml {
        print!("{}", registry.to_yaml_string()?);
        return Ok(());
    }
    let mut listing = TextTable::new(["#", "table", "column", "type", "headers"]);
    for (idx, table) in registry.tables.iter().enumerate() {
        for column in &table.columns {
            let headers = column
                .accepted_headers
                .iter()
                .map(HeaderCandidate::to_string)
                .join(", ");
            listing.push_row([
                (idx + 1).to_string(),
                table.name.clone(),
                column.name.clone(),
                column.semantic_type.to_string(),
                headers,
            ]);
        }
    }
    listing.print();
    Ok(())
}

fn handle_create(args: &CreateArgs) -> Result<()> {
    info!("Creating store {:?} from {:?}", args.db, args.script);
    store::create_from_script(&StoreConfig::new(&args.db), &args.script)
        .with_context(|| format!("Creating store {:?}", args.db))?;
    info!("Store {:?} created", args.db);
    Ok(())
}

fn handle_backup(args: &BackupArgs) -> Result<()> {
    let target = store::backup(&args.db, Local::now().date_naive())
        .with_context(|| format!("Backing up {:?}", args.db))?;
    info!("Backed up {:?} to {:?}", args.db, target);
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
