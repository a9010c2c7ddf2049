// Candidate catalog: the read-only pool of draftable entities.
//
// Loaded once at startup from a CSV file whose first row is a header. Columns
// are positional (display name, secondary name, image reference, role tag);
// the first header cell names the primary sort column for client display.

use std::io::Read;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub display_name: String,
    pub secondary_name: String,
    pub image_ref: String,
    pub role_tag: String,
}

impl Candidate {
    /// The name this candidate is picked under: both name columns joined.
    pub fn item_name(&self) -> String {
        if self.secondary_name.is_empty() {
            self.display_name.clone()
        } else {
            format!("{} {}", self.display_name, self.secondary_name)
        }
    }
}

/// One catalog row as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub name: String,
    pub secondary_name: String,
    pub image_ref: String,
    pub role_tag: String,
}

/// A shuffled copy of the catalog plus the primary column header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogListing {
    pub primary_column: String,
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    primary_column: String,
    candidates: Vec<Candidate>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("catalog {0} has no candidates")]
    Empty(String),
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Catalog {
    pub fn new(primary_column: impl Into<String>, candidates: Vec<Candidate>) -> Self {
        Catalog {
            primary_column: primary_column.into(),
            candidates,
        }
    }

    /// Load the catalog from a CSV file on disk.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let display = path.display().to_string();
        let file = std::fs::File::open(path).map_err(|e| CatalogError::Io {
            path: display.clone(),
            source: e,
        })?;
        let catalog = Self::from_reader(file).map_err(|e| CatalogError::Csv {
            path: display.clone(),
            source: e,
        })?;
        if catalog.candidates.is_empty() {
            return Err(CatalogError::Empty(display));
        }
        Ok(catalog)
    }

    pub fn from_reader<R: Read>(rdr: R) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(rdr);

        let primary_column = reader
            .headers()?
            .get(0)
            .unwrap_or_default()
            .to_string();

        let mut candidates = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or_default().to_string();
            let display_name = field(0);
            if display_name.is_empty() {
                // +2: one for the header row, one for 1-based line numbers.
                warn!("Skipping catalog row {} with empty display name", idx + 2);
                continue;
            }
            candidates.push(Candidate {
                display_name,
                secondary_name: field(1),
                image_ref: field(2),
                role_tag: field(3),
            });
        }

        Ok(Catalog {
            primary_column,
            candidates,
        })
    }

    pub fn primary_column(&self) -> &str {
        &self.primary_column
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Item names in catalog order.
    pub fn item_names(&self) -> impl Iterator<Item = String> + '_ {
        self.candidates.iter().map(Candidate::item_name)
    }

    /// Every entry in a freshly randomized order. Purely cosmetic.
    pub fn shuffled<R: Rng + ?Sized>(&self, rng: &mut R) -> CatalogListing {
        let mut entries: Vec<CatalogEntry> = self
            .candidates
            .iter()
            .map(|c| CatalogEntry {
                name: c.item_name(),
                secondary_name: c.secondary_name.clone(),
                image_ref: c.image_ref.clone(),
                role_tag: c.role_tag.clone(),
            })
            .collect();
        entries.shuffle(rng);
        CatalogListing {
            primary_column: self.primary_column.clone(),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const SAMPLE: &str = "\
voorname,achtername,img,positie
Kevin,De Bruyne,img/kdb.png,MF
Romelu,Lukaku,img/lukaku.png,FW
,Nobody,img/none.png,GK
Thibaut,Courtois,img/courtois.png,GK
";

    #[test]
    fn reads_header_and_rows() {
        let catalog = Catalog::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(catalog.primary_column(), "voorname");
        assert_eq!(catalog.len(), 3);
        let kdb = &catalog.candidates()[0];
        assert_eq!(kdb.display_name, "Kevin");
        assert_eq!(kdb.secondary_name, "De Bruyne");
        assert_eq!(kdb.image_ref, "img/kdb.png");
        assert_eq!(kdb.role_tag, "MF");
    }

    #[test]
    fn item_name_joins_both_names() {
        let catalog = Catalog::from_reader(SAMPLE.as_bytes()).unwrap();
        let names: Vec<String> = catalog.item_names().collect();
        assert_eq!(
            names,
            vec!["Kevin De Bruyne", "Romelu Lukaku", "Thibaut Courtois"]
        );
    }

    #[test]
    fn short_rows_fill_missing_columns_with_empty() {
        let csv = "naam,extra\nSolo\n";
        let catalog = Catalog::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.candidates()[0].item_name(), "Solo");
        assert_eq!(catalog.candidates()[0].role_tag, "");
    }

    #[test]
    fn shuffled_listing_is_a_permutation() {
        let catalog = Catalog::from_reader(SAMPLE.as_bytes()).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let listing = catalog.shuffled(&mut rng);

        assert_eq!(listing.primary_column, "voorname");
        let mut got: Vec<String> = listing.entries.iter().map(|e| e.name.clone()).collect();
        got.sort();
        let mut want: Vec<String> = catalog.item_names().collect();
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = Catalog::load(Path::new("does/not/exist.csv")).unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }

    #[test]
    fn load_header_only_file_is_empty_error() {
        let path = std::env::temp_dir().join("draft_room_catalog_header_only.csv");
        std::fs::write(&path, "voorname,achtername\n").unwrap();
        let err = Catalog::load(&path).unwrap_err();
        assert!(matches!(err, CatalogError::Empty(_)));
        let _ = std::fs::remove_file(&path);
    }
}
