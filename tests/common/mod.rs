#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use sightings_ingest::registry::{Registry, SemanticType, TargetColumn, TargetTable};
use tempfile::{TempDir, tempdir};

/// Scratch directory holding a spreadsheet folder and a database, cleaned up
/// on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let workspace = Self {
            temp_dir: tempdir().expect("temp dir"),
        };
        fs::create_dir_all(workspace.sources()).expect("create sources dir");
        workspace
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory the spreadsheets are written to.
    pub fn sources(&self) -> PathBuf {
        self.temp_dir.path().join("raw")
    }

    pub fn db(&self) -> PathBuf {
        self.temp_dir.path().join("sightings.db")
    }

    /// Writes a spreadsheet into the sources directory.
    pub fn source(&self, name: &str, contents: &str) -> PathBuf {
        self.source_bytes(name, contents.as_bytes())
    }

    pub fn source_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.sources().join(name);
        fs::write(&path, contents).expect("write source file");
        path
    }

    /// Writes a file at the workspace root.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).expect("write temp file contents");
        path
    }
}

/// `taxonomy` as field teams spelled it across campaigns.
pub fn taxonomy_table() -> TargetTable {
    TargetTable::new(
        "taxonomy",
        vec![
            TargetColumn::new("capture_id", SemanticType::Categorical, [Some("id")]),
            TargetColumn::new("band", SemanticType::Categorical, [Some("band")]),
            TargetColumn::new(
                "species",
                SemanticType::Text,
                [
                    Some("species"),
                    Some("bird species"),
                    Some("specie"),
                    Some("bird_specie"),
                ],
            ),
        ],
    )
}

pub fn taxonomy_registry() -> Registry {
    Registry::new(vec![taxonomy_table()]).expect("valid registry")
}

pub const TAXONOMY_REGISTRY_YAML: &str = "\
tables:
  - name: taxonomy
    columns:
      - { name: capture_id, type: categorical, headers: [id] }
      - { name: band, type: categorical, headers: [band] }
      - { name: species, type: text, headers: [species, bird species, specie, bird_specie] }
  - name: measurements
    columns:
      - { name: capture_id, type: categorical, headers: [id] }
      - { name: weight, type: numeric, headers: [weight, mass, null] }
      - { name: fat, type: int, headers: [fat, null] }
";

/// The two banding campaigns of the classic example, with different species
/// spellings.
pub fn write_banding_campaigns(workspace: &TestWorkspace) {
    workspace.source(
        "banding_2020.csv",
        "id,band,species\n1,A100,Turdus fuscater\n2,A101,Zonotrichia capensis\n",
    );
    workspace.source(
        "banding_2021.csv",
        "id,band,bird_specie\n3,B200,Diglossa humeralis\n",
    );
}
