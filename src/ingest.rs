//! The `ingest` and `check` commands: load the registry and spreadsheets,
//! extract every target table, and either write the rows or report the
//! matches.

use std::path::Path;

use anyhow::{Context, Result};
use itertools::Itertools;
use log::{info, warn};

use crate::{
    cli::{CheckArgs, IngestArgs, RegistryArgs, SourceArgs},
    io_utils,
    matcher::{self, EventSink, MatchEvent},
    printable_delimiter,
    registry::Registry,
    source::{self, LoadOptions, LoadReport, SkippedSource, SourceTables},
    store::{Store, StoreConfig, StoreError, WriteMode},
    table::TextTable,
};

/// Renders match events through the logger.
#[derive(Debug, Default)]
pub struct LogEvents {
    pub hits: usize,
    pub misses: usize,
}

impl EventSink for LogEvents {
    fn record(&mut self, event: MatchEvent) {
        match event {
            MatchEvent::Hit { table, source, .. } => {
                self.hits += 1;
                info!("Hit  {table} & {source}");
            }
            MatchEvent::Miss {
                table,
                source,
                best_missing,
            } => {
                self.misses += 1;
                info!(
                    "Miss {table} & {source} Best = {{{}}}",
                    best_missing.iter().join(", ")
                );
            }
            MatchEvent::Unsourced { table } => {
                warn!("Table '{table}' lists no source headers; skipping it");
            }
            MatchEvent::CoercionFailures {
                table,
                source,
                column,
                count,
            } => {
                warn!(
                    "{count} value(s) in {table}.{column} from '{source}' could not be converted and were kept as text"
                );
            }
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub tables_written: usize,
    pub rows_written: usize,
    /// (table, spreadsheet) pairs that matched.
    pub hits: usize,
    /// (table, spreadsheet) pairs with no covering header set.
    pub misses: usize,
    /// Target tables no spreadsheet matched.
    pub unmatched_tables: Vec<String>,
    pub skipped_sources: Vec<SkippedSource>,
}

/// The registry from `path`, or the built-in one.
pub fn read_registry(path: Option<&Path>) -> Result<Registry> {
    let registry = match path {
        Some(path) => {
            Registry::load(path).with_context(|| format!("Loading registry from {path:?}"))?
        }
        None => Registry::builtin().context("Loading built-in registry")?,
    };
    Ok(registry)
}

/// Reads the registry and applies the duplicate-table policy.
pub fn load_registry(args: &RegistryArgs) -> Result<Registry> {
    let registry = read_registry(args.path.as_deref())?;
    for collision in registry.check_duplicates(args.duplicate_tables)? {
        let layouts = collision
            .positions
            .iter()
            .map(|pos| registry.tables[pos - 1].column_names())
            .unique()
            .count();
        if layouts > 1 {
            warn!(
                "Table '{}' is defined at positions {} with different columns; each definition runs as its own pass, \
                 so when more than one matches, appending fails at the first pass whose columns the table lacks \
                 and --replace keeps only the last matching pass",
                collision.name,
                collision.positions.iter().join(", ")
            );
        } else {
            warn!(
                "Table '{}' is defined at positions {}; each definition runs as its own pass",
                collision.name,
                collision.positions.iter().join(", ")
            );
        }
    }
    Ok(registry)
}

pub fn load_source_tables(args: &SourceArgs) -> Result<LoadReport> {
    let options = LoadOptions {
        delimiter: args.delimiter,
        encoding: io_utils::resolve_encoding(args.input_encoding.as_deref())?,
        strict: args.strict,
    };
    match options.delimiter {
        Some(delimiter) => info!(
            "Loading spreadsheets from {:?} with delimiter '{}'",
            args.csv_dir,
            printable_delimiter(delimiter)
        ),
        None => info!("Loading spreadsheets from {:?}", args.csv_dir),
    }
    let report = source::load_sources(&args.csv_dir, &options)?;
    info!(
        "Loaded {} spreadsheet(s), skipped {}",
        report.tables.len(),
        report.skipped.len()
    );
    Ok(report)
}

/// Extracts every registry table from `sources` and writes it to `store`.
/// Tables are written one at a time; a failure leaves earlier tables in
/// place.
pub fn run(
    registry: &Registry,
    sources: &SourceTables,
    store: &mut Store,
    mode: WriteMode,
    events: &mut dyn EventSink,
) -> Result<IngestSummary, StoreError> {
    let mut summary = IngestSummary::default();
    for table in &registry.tables {
        let extracted = matcher::extract(sources, table, events);
        if extracted.is_empty() {
            summary.unmatched_tables.push(table.name.clone());
            continue;
        }
        let written = store.write(&extracted, mode)?;
        info!("Wrote {written} row(s) to '{}'", table.name);
        summary.tables_written += 1;
        summary.rows_written += written;
    }
    Ok(summary)
}

pub fn execute(args: &IngestArgs) -> Result<IngestSummary> {
    let registry = load_registry(&args.registry)?;
    let report = load_source_tables(&args.source)?;
    let config = StoreConfig::new(&args.db);
    let mut store =
        Store::open(&config).with_context(|| format!("Opening store {:?}", args.db))?;
    let mode = WriteMode::from_replace_flag(args.replace);

    let mut events = LogEvents::default();
    let mut summary = run(&registry, &report.tables, &mut store, mode, &mut events)
        .with_context(|| format!("Writing to {:?}", args.db))?;
    summary.skipped_sources = report.skipped;
    summary.hits = events.hits;
    summary.misses = events.misses;

    info!(
        "Wrote {} row(s) across {} table(s) from {} hit(s) and {} miss(es); {} table(s) had no match, {} spreadsheet(s) skipped",
        summary.rows_written,
        summary.tables_written,
        summary.hits,
        summary.misses,
        summary.unmatched_tables.len(),
        summary.skipped_sources.len()
    );
    Ok(summary)
}

/// One line per (table, spreadsheet) pair, without touching any store.
pub fn check_report(registry: &Registry, sources: &SourceTables) -> TextTable {
    let mut report = TextTable::new(["table", "source", "outcome", "detail"]);
    for table in &registry.tables {
        let mut events: Vec<MatchEvent> = Vec::new();
        let extracted = matcher::extract(sources, table, &mut events);
        for event in events {
            match event {
                MatchEvent::Hit {
                    table,
                    source,
                    headers,
                } => {
                    let detail = headers
                        .iter()
                        .map(|h| h.as_deref().unwrap_or("(absent)"))
                        .join(", ");
                    report.push_row([table, source, "hit".to_string(), detail]);
                }
                MatchEvent::Miss {
                    table,
                    source,
                    best_missing,
                } => {
                    let detail = format!("missing {}", best_missing.iter().join(", "));
                    report.push_row([table, source, "miss".to_string(), detail]);
                }
                MatchEvent::Unsourced { table } => {
                    report.push_row([
                        table,
                        String::new(),
                        "unsourced".to_string(),
                        "no source headers".to_string(),
                    ]);
                }
                MatchEvent::CoercionFailures {
                    table,
                    source,
                    column,
                    count,
                } => {
                    report.push_row([
                        table,
                        source,
                        "coercion".to_string(),
                        format!("{count} value(s) in '{column}' kept as text"),
                    ]);
                }
            }
        }
        if !table.is_unsourced() && !extracted.is_empty() {
            report.push_row([
                table.name.clone(),
                "(all)".to_string(),
                "rows".to_string(),
                extracted.row_count().to_string(),
            ]);
        }
    }
    report
}

pub fn check(args: &CheckArgs) -> Result<()> {
    let registry = load_registry(&args.registry)?;
    let report = load_source_tables(&args.source)?;
    check_report(&registry, &report.tables).print();
    for skipped in &report.skipped {
        println!("skipped {:?}: {}", skipped.path, skipped.reason);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn log_events_counts_hits_and_misses() {
        let mut events = LogEvents::default();
        events.record(MatchEvent::Hit {
            table: "taxonomy".to_string(),
            source: "banding_2020".to_string(),
            headers: vec![Some("id".to_string()), None],
        });
        events.record(MatchEvent::Miss {
            table: "taxonomy".to_string(),
            source: "gps".to_string(),
            best_missing: BTreeSet::from(["band".to_string()]),
        });
        events.record(MatchEvent::Unsourced {
            table: "dataset".to_string(),
        });
        assert_eq!(events.hits, 1);
        assert_eq!(events.misses, 1);
    }
}
