use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub use crate::registry::DuplicateTablePolicy;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load field-collection spreadsheets into the sightings database",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Match every spreadsheet in a directory against the target tables and write the rows
    Ingest(IngestArgs),
    /// Report which spreadsheets match which target tables without writing anything
    Check(CheckArgs),
    /// List the target tables, column types and accepted headers
    Tables(TablesArgs),
    /// Create the database from a SQL script, replacing any existing file
    Create(CreateArgs),
    /// Copy the database to a dated backup next to it
    Backup(BackupArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Directory holding the source spreadsheets (.csv, .tsv, .xlsx, .xls, .ods)
    #[arg(long = "csv-dir", value_name = "DIR")]
    pub csv_dir: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|'); defaults by extension
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of delimited inputs (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Abort on the first unreadable spreadsheet instead of skipping it
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Clone, Args)]
pub struct RegistryArgs {
    /// YAML registry file to use instead of the built-in target tables
    #[arg(long = "registry", value_name = "FILE")]
    pub path: Option<PathBuf>,
    /// How to treat target tables defined more than once
    #[arg(long = "duplicate-tables", value_enum, default_value = "reject")]
    pub duplicate_tables: DuplicateTablePolicy,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// SQLite database to write to
    #[arg(long, value_name = "PATH")]
    pub db: PathBuf,
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub registry: RegistryArgs,
    /// Drop and recreate each target table instead of appending to it
    #[arg(long)]
    pub replace: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub registry: RegistryArgs,
}

#[derive(Debug, Args)]
pub struct TablesArgs {
    /// YAML registry file to list instead of the built-in target tables
    #[arg(long, value_name = "FILE")]
    pub registry: Option<PathBuf>,
    /// Print the registry as YAML instead of a table
    #[arg(long)]
    pub yaml: bool,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// SQLite database to create
    #[arg(long, value_name = "PATH")]
    pub db: PathBuf,
    /// SQL script with the table and index definitions
    #[arg(long, value_name = "FILE")]
    pub script: PathBuf,
}

#[derive(Debug, Args)]
pub struct BackupArgs {
    /// SQLite database to back up
    #[arg(long, value_name = "PATH")]
    pub db: PathBuf,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
