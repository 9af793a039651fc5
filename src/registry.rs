//! Target schema registry.
//!
//! The registry is plain configuration: an ordered list of [`TargetTable`]s,
//! each column carrying a [`SemanticType`] and every header spelling that has
//! been seen for it across the field spreadsheets. A `null` header entry
//! ([`HeaderCandidate::Absent`]) marks a column a spreadsheet may lack.
//!
//! The built-in registry ships as YAML inside the binary; `--registry` swaps
//! in another file with the same shape:
//!
//! ```yaml
//! tables:
//!   - name: taxonomy
//!     columns:
//!       - { name: capture_id, type: categorical, headers: [id] }
//!       - { name: species, type: text, headers: [species, bird_specie, null] }
//! ```

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::anyhow;
use clap::ValueEnum;
use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

const BUILTIN_REGISTRY: &str = include_str!("../assets/sightings_registry.yaml");

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Opening registry file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Parsing registry YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Registry does not define any tables")]
    Empty,
    #[error("Table #{position} has an empty name")]
    UnnamedTable { position: usize },
    #[error("Table '{table}' does not define any columns")]
    NoColumns { table: String },
    #[error("Table '{table}' has a column with an empty name")]
    UnnamedColumn { table: String },
    #[error("Table '{table}' defines column '{column}' more than once")]
    DuplicateColumn { table: String, column: String },
    #[error("Column '{table}.{column}' does not list any accepted headers")]
    NoHeaders { table: String, column: String },
    #[error("Column '{table}.{column}' lists an empty header")]
    EmptyHeader { table: String, column: String },
    #[error(
        "Duplicate table names in registry: {}. Pass --duplicate-tables separate to run each definition as its own pass, or rename them",
        describe_collisions(.0)
    )]
    DuplicateTables(Vec<TableCollision>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Categorical,
    Int,
    Numeric,
    Text,
    Date,
    Time,
    YesNo,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Categorical => "categorical",
            SemanticType::Int => "int",
            SemanticType::Numeric => "numeric",
            SemanticType::Text => "text",
            SemanticType::Date => "date",
            SemanticType::Time => "time",
            SemanticType::YesNo => "y/n",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "categorical",
            "int",
            "numeric",
            "numerical",
            "text",
            "date",
            "time",
            "y/n",
        ]
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SemanticType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "categorical" => Ok(SemanticType::Categorical),
            "int" | "integer" => Ok(SemanticType::Int),
            "numeric" | "numerical" => Ok(SemanticType::Numeric),
            "text" => Ok(SemanticType::Text),
            "date" => Ok(SemanticType::Date),
            "time" => Ok(SemanticType::Time),
            "y/n" | "boolean" | "bool" => Ok(SemanticType::YesNo),
            _ => Err(anyhow!(
                "Unknown column type '{value}'. Supported types: {}",
                SemanticType::variants().join(", ")
            )),
        }
    }
}

impl Serialize for SemanticType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SemanticType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        SemanticType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

/// One accepted spelling for a target column, or the marker that the column
/// may be missing from a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum HeaderCandidate {
    Header(String),
    Absent,
}

impl HeaderCandidate {
    pub fn header(&self) -> Option<&str> {
        match self {
            HeaderCandidate::Header(name) => Some(name.as_str()),
            HeaderCandidate::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, HeaderCandidate::Absent)
    }
}

impl From<Option<String>> for HeaderCandidate {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(name) => HeaderCandidate::Header(name),
            None => HeaderCandidate::Absent,
        }
    }
}

impl From<HeaderCandidate> for Option<String> {
    fn from(value: HeaderCandidate) -> Self {
        match value {
            HeaderCandidate::Header(name) => Some(name),
            HeaderCandidate::Absent => None,
        }
    }
}

impl fmt::Display for HeaderCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderCandidate::Header(name) => f.write_str(name),
            HeaderCandidate::Absent => f.write_str("(absent)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
    #[serde(rename = "headers")]
    pub accepted_headers: Vec<HeaderCandidate>,
}

impl TargetColumn {
    /// `None` entries in `headers` become [`HeaderCandidate::Absent`].
    pub fn new<'a>(
        name: &str,
        semantic_type: SemanticType,
        headers: impl IntoIterator<Item = Option<&'a str>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            semantic_type,
            accepted_headers: headers
                .into_iter()
                .map(|header| HeaderCandidate::from(header.map(str::to_lowercase)))
                .collect(),
        }
    }

    pub fn is_optional(&self) -> bool {
        self.accepted_headers.iter().any(HeaderCandidate::is_absent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetTable {
    pub name: String,
    pub columns: Vec<TargetColumn>,
}

impl TargetTable {
    pub fn new(name: &str, columns: Vec<TargetColumn>) -> Self {
        Self {
            name: name.to_string(),
            columns,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// True when no column names a single source header, so no spreadsheet
    /// can ever feed the table.
    pub fn is_unsourced(&self) -> bool {
        self.columns
            .iter()
            .flat_map(|c| c.accepted_headers.iter())
            .all(HeaderCandidate::is_absent)
    }
}

/// What to do when two target tables share a name.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
#[value(rename_all = "kebab-case")]
pub enum DuplicateTablePolicy {
    /// Fail when two target tables share a name
    #[default]
    Reject,
    /// Run each definition as its own extraction pass against the same table
    Separate,
}

/// A table name defined more than once; positions are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCollision {
    pub name: String,
    pub positions: Vec<usize>,
}

fn describe_collisions(collisions: &[TableCollision]) -> String {
    collisions
        .iter()
        .map(|c| {
            let positions = c.positions.iter().map(|p| format!("#{p}")).join(", ");
            format!("'{}' at {}", c.name, positions)
        })
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub tables: Vec<TargetTable>,
}

impl Registry {
    pub fn new(tables: Vec<TargetTable>) -> Result<Self, RegistryError> {
        let mut registry = Self { tables };
        registry.normalize();
        registry.validate()?;
        Ok(registry)
    }

    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_yaml_str(BUILTIN_REGISTRY)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, RegistryError> {
        let parsed: Registry = serde_yaml::from_str(input)?;
        Self::new(parsed.tables)
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let file = File::open(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: Registry = serde_yaml::from_reader(BufReader::new(file))?;
        Self::new(parsed.tables)
    }

    pub fn to_yaml_string(&self) -> Result<String, RegistryError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn table(&self, name: &str) -> Option<&TargetTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    // Source headers are lowercased on load, so accepted spellings must be too.
    fn normalize(&mut self) {
        for column in self.tables.iter_mut().flat_map(|t| t.columns.iter_mut()) {
            for candidate in &mut column.accepted_headers {
                if let HeaderCandidate::Header(name) = candidate {
                    *name = name.to_lowercase();
                }
            }
        }
    }

    /// Structural checks. Duplicate table names are left to
    /// [`Registry::check_duplicates`] since they are a policy decision.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.tables.is_empty() {
            return Err(RegistryError::Empty);
        }
        for (idx, table) in self.tables.iter().enumerate() {
            if table.name.trim().is_empty() {
                return Err(RegistryError::UnnamedTable { position: idx + 1 });
            }
            if table.columns.is_empty() {
                return Err(RegistryError::NoColumns {
                    table: table.name.clone(),
                });
            }
            let mut seen = HashSet::new();
            for column in &table.columns {
                if column.name.trim().is_empty() {
                    return Err(RegistryError::UnnamedColumn {
                        table: table.name.clone(),
                    });
                }
                if !seen.insert(column.name.as_str()) {
                    return Err(RegistryError::DuplicateColumn {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
                if column.accepted_headers.is_empty() {
                    return Err(RegistryError::NoHeaders {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
                if column
                    .accepted_headers
                    .iter()
                    .any(|h| h.header().is_some_and(|name| name.is_empty()))
                {
                    return Err(RegistryError::EmptyHeader {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn collisions(&self) -> Vec<TableCollision> {
        let mut positions: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, table) in self.tables.iter().enumerate() {
            positions.entry(table.name.as_str()).or_default().push(idx + 1);
        }
        positions
            .into_iter()
            .filter(|(_, positions)| positions.len() > 1)
            .map(|(name, positions)| TableCollision {
                name: name.to_string(),
                positions,
            })
            .collect()
    }

    /// Applies the duplicate-name policy, returning the collisions that were
    /// accepted so the caller can report them.
    pub fn check_duplicates(
        &self,
        policy: DuplicateTablePolicy,
    ) -> Result<Vec<TableCollision>, RegistryError> {
        let collisions = self.collisions();
        match policy {
            DuplicateTablePolicy::Reject if !collisions.is_empty() => {
                Err(RegistryError::DuplicateTables(collisions))
            }
            _ => Ok(collisions),
        }
    }
}
