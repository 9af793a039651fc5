//! Column reconciliation between source spreadsheets and target tables.
//!
//! Every target column lists the header spellings it accepts. The matcher
//! enumerates the Cartesian product of those lists, one header (or
//! [`HeaderCandidate::Absent`]) per column, and tests each combination
//! against a spreadsheet's headers. Combinations that would populate more
//! columns are tried first, so when a spreadsheet carries several synonyms
//! the widest covering set wins. The first combination fully present in the
//! spreadsheet is accepted; its columns are projected, renamed to the target
//! names, and coerced. When nothing matches, the closest miss is reported.
//!
//! The matcher never logs. It reports through an [`EventSink`] so the caller
//! decides how hits and misses are rendered.

use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashSet},
};

use itertools::Itertools;

use crate::{
    data::{Cell, coerce},
    registry::{HeaderCandidate, TargetColumn, TargetTable},
    source::{SourceTable, SourceTables},
};

/// Diagnostics produced while extracting one target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    /// `headers` holds the accepted header per target column, `None` where
    /// the column was left absent.
    Hit {
        table: String,
        source: String,
        headers: Vec<Option<String>>,
    },
    Miss {
        table: String,
        source: String,
        best_missing: BTreeSet<String>,
    },
    Unsourced {
        table: String,
    },
    CoercionFailures {
        table: String,
        source: String,
        column: String,
        count: usize,
    },
}

pub trait EventSink {
    fn record(&mut self, event: MatchEvent);
}

impl EventSink for Vec<MatchEvent> {
    fn record(&mut self, event: MatchEvent) {
        self.push(event);
    }
}

/// One combination of chosen headers, positionally aligned with the target
/// table's columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet<'a> {
    headers: Vec<Option<&'a str>>,
}

impl<'a> CandidateSet<'a> {
    pub fn new(headers: Vec<Option<&'a str>>) -> Self {
        Self { headers }
    }

    pub fn headers(&self) -> &[Option<&'a str>] {
        &self.headers
    }

    /// Number of target columns this combination would fill.
    pub fn populated(&self) -> usize {
        self.headers.iter().filter(|h| h.is_some()).count()
    }

    pub fn header_set(&self) -> BTreeSet<&'a str> {
        self.headers.iter().flatten().copied().collect()
    }

    pub fn missing_from(&self, available: &HashSet<&str>) -> BTreeSet<&'a str> {
        self.headers
            .iter()
            .flatten()
            .filter(|h| !available.contains(*h))
            .copied()
            .collect()
    }

    pub fn is_covered_by(&self, available: &HashSet<&str>) -> bool {
        self.headers.iter().flatten().all(|h| available.contains(h))
    }

    /// Orders combinations that fill more columns first.
    pub fn by_coverage_desc(a: &Self, b: &Self) -> Ordering {
        b.populated().cmp(&a.populated())
    }
}

/// Every header combination for `table`, widest first. Ties keep product
/// order (first column varying slowest). Combinations that fill no column
/// are dropped: an empty header set never counts as a match.
pub fn candidate_sets(table: &TargetTable) -> Vec<CandidateSet<'_>> {
    let mut sets = table
        .columns
        .iter()
        .map(|column| column.accepted_headers.iter().map(HeaderCandidate::header))
        .multi_cartesian_product()
        .map(CandidateSet::new)
        .filter(|set| set.populated() > 0)
        .collect::<Vec<_>>();
    // `sort_by` is stable, which keeps the tie order deterministic.
    sets.sort_by(CandidateSet::by_coverage_desc);
    sets
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMatch<'c, 'a> {
    Covered(&'c CandidateSet<'a>),
    /// Smallest set of headers any combination was missing.
    Missing(BTreeSet<String>),
}

pub fn match_source<'c, 'a>(
    source: &SourceTable,
    candidates: &'c [CandidateSet<'a>],
) -> SourceMatch<'c, 'a> {
    let available = source.header_set();
    // Starts as "matched nothing yet": every header the source has.
    let mut best_missing: BTreeSet<&str> = available.iter().copied().collect();
    for candidate in candidates {
        let missing = candidate.missing_from(&available);
        if missing.is_empty() {
            return SourceMatch::Covered(candidate);
        }
        if missing.len() < best_missing.len() {
            best_missing = missing;
        }
    }
    SourceMatch::Missing(best_missing.into_iter().map(str::to_string).collect())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTable {
    pub name: String,
    pub columns: Vec<TargetColumn>,
    pub rows: Vec<Vec<Cell>>,
}

impl ExtractedTable {
    pub fn empty(table: &TargetTable) -> Self {
        Self {
            name: table.name.clone(),
            columns: table.columns.clone(),
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// `(row, column name, original text)` for every cell left unconverted.
    pub fn uncoerced_cells(&self) -> Vec<(usize, &str, &str)> {
        let mut cells = Vec::new();
        for (row_idx, row) in self.rows.iter().enumerate() {
            for (column, cell) in self.columns.iter().zip(row) {
                if let Cell::Uncoerced(raw) = cell {
                    cells.push((row_idx, column.name.as_str(), raw.as_str()));
                }
            }
        }
        cells
    }
}

/// Extracts `table` from every source and unions the results, dropping
/// exact duplicate rows. Sources are visited in key order.
pub fn extract(
    sources: &SourceTables,
    table: &TargetTable,
    events: &mut dyn EventSink,
) -> ExtractedTable {
    let mut extracted = ExtractedTable::empty(table);
    if table.is_unsourced() {
        events.record(MatchEvent::Unsourced {
            table: table.name.clone(),
        });
        return extracted;
    }

    let candidates = candidate_sets(table);
    let mut blocks = Vec::new();
    for source in sources.values() {
        match match_source(source, &candidates) {
            SourceMatch::Covered(candidate) => {
                blocks.push(project(source, table, candidate, events));
                events.record(MatchEvent::Hit {
                    table: table.name.clone(),
                    source: source.name.clone(),
                    headers: candidate
                        .headers()
                        .iter()
                        .map(|h| h.map(str::to_string))
                        .collect(),
                });
            }
            SourceMatch::Missing(best_missing) => {
                events.record(MatchEvent::Miss {
                    table: table.name.clone(),
                    source: source.name.clone(),
                    best_missing,
                });
            }
        }
    }

    extracted.rows = blocks.into_iter().flatten().unique().collect();
    extracted
}

/// Projects the candidate's headers out of `source`, renamed positionally to
/// the target columns. Absent positions come out as nulls.
fn project(
    source: &SourceTable,
    table: &TargetTable,
    candidate: &CandidateSet<'_>,
    events: &mut dyn EventSink,
) -> Vec<Vec<Cell>> {
    let indices = candidate
        .headers()
        .iter()
        .map(|header| header.and_then(|h| source.column_index(h)))
        .collect::<Vec<_>>();
    let mut failures = vec![0usize; table.columns.len()];
    let mut rows = Vec::with_capacity(source.row_count());

    for raw_row in &source.rows {
        let mut row = Vec::with_capacity(table.columns.len());
        for (pos, (column, index)) in table.columns.iter().zip(&indices).enumerate() {
            let raw = index
                .and_then(|idx| raw_row.get(idx))
                .and_then(|cell| cell.as_deref());
            let cell = coerce(raw, column.semantic_type);
            if cell.is_uncoerced() {
                failures[pos] += 1;
            }
            row.push(cell);
        }
        rows.push(row);
    }

    for (column, count) in table.columns.iter().zip(failures) {
        if count > 0 {
            events.record(MatchEvent::CoercionFailures {
                table: table.name.clone(),
                source: source.name.clone(),
                column: column.name.clone(),
                count,
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SemanticType;

    fn point_table() -> TargetTable {
        TargetTable::new(
            "point",
            vec![
                TargetColumn::new("point_id", SemanticType::Text, [Some("point_id")]),
                TargetColumn::new("point_name", SemanticType::Text, [Some("point"), None]),
                TargetColumn::new(
                    "latitude",
                    SemanticType::Numeric,
                    [Some("decimallatitude"), Some("lat")],
                ),
            ],
        )
    }

    #[test]
    fn candidate_sets_are_widest_first_and_stable() {
        let table = point_table();
        let sets = candidate_sets(&table);
        let rendered = sets
            .iter()
            .map(|s| s.headers().to_vec())
            .collect::<Vec<_>>();
        assert_eq!(
            rendered,
            vec![
                vec![Some("point_id"), Some("point"), Some("decimallatitude")],
                vec![Some("point_id"), Some("point"), Some("lat")],
                vec![Some("point_id"), None, Some("decimallatitude")],
                vec![Some("point_id"), None, Some("lat")],
            ]
        );
    }

    #[test]
    fn candidate_sets_drop_empty_combinations() {
        let table = TargetTable::new(
            "collections",
            vec![
                TargetColumn::new("pollen", SemanticType::YesNo, [Some("pollen"), None]),
                TargetColumn::new("smear", SemanticType::YesNo, [Some("smear"), None]),
            ],
        );
        let sets = candidate_sets(&table);
        assert_eq!(sets.len(), 3);
        assert!(sets.iter().all(|s| s.populated() > 0));
        assert_eq!(sets[0].populated(), 2);
    }

    #[test]
    fn by_coverage_desc_prefers_more_populated_sets() {
        let wide = CandidateSet::new(vec![Some("a"), Some("b")]);
        let narrow = CandidateSet::new(vec![Some("a"), None]);
        assert_eq!(
            CandidateSet::by_coverage_desc(&wide, &narrow),
            Ordering::Less
        );
        assert_eq!(
            CandidateSet::by_coverage_desc(&narrow, &wide),
            Ordering::Greater
        );
    }

    #[test]
    fn match_source_reports_smallest_missing_set() {
        let table = point_table();
        let candidates = candidate_sets(&table);
        let source = SourceTable::from_strs("nets", &["point_id", "net", "elevation"], &[]);
        match match_source(&source, &candidates) {
            SourceMatch::Missing(missing) => {
                // Both one-header misses tie; the first one found is kept.
                assert_eq!(missing, BTreeSet::from(["decimallatitude".to_string()]));
            }
            other => panic!("Expected a miss, got {other:?}"),
        }
    }

    #[test]
    fn absent_columns_are_filled_with_nulls() {
        let table = point_table();
        let mut sources = SourceTables::new();
        sources.insert(
            "points".to_string(),
            SourceTable::from_strs("points", &["Point_ID", "LAT"], &[&["p1", "4.5"]]),
        );
        let mut events: Vec<MatchEvent> = Vec::new();
        let extracted = extract(&sources, &table, &mut events);
        assert_eq!(
            extracted.rows,
            vec![vec![
                Cell::Typed(crate::data::Value::Text("p1".to_string())),
                Cell::null(),
                Cell::Typed(crate::data::Value::Float(4.5)),
            ]]
        );
        assert!(matches!(events[0], MatchEvent::Hit { .. }));
    }
}
