// ABOUTME: Table-file discovery and per-source detection profiles
// ABOUTME: Maps file names to source kind, key-field candidates, counter tracking

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dbf_reader::Record;

/// What a table file holds, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Stock,
    Transaction,
}

// Ordered key-field candidates per source kind, resolved case-insensitively.
const STOCK_KEY_FIELDS: &[&str] = &["PART_NO", "PART_NUMBER", "SKU"];
const TRANSACTION_KEY_FIELDS: &[&str] = &["DOC_NO", "INVOICE_NO", "DOCKET_NUMBER"];

/// Detection profile for one source: how records are keyed and whether the
/// document counter is tracked as a running maximum.
#[derive(Debug, Clone, Copy)]
pub struct SourceProfile {
    pub kind: SourceKind,
    pub key_fields: &'static [&'static str],
    pub track_secondary: bool,
}

impl SourceProfile {
    /// Profile for a table file, by naming convention: STOCK/INVENTORY names
    /// are inventory snapshots keyed by part number; INVOICE/TRANS/SALE names
    /// are transaction logs keyed by document number.
    pub fn for_file_name(name: &str) -> Self {
        let upper = name.to_ascii_uppercase();
        if upper.contains("INVOICE") || upper.contains("TRANS") || upper.contains("SALE") {
            Self {
                kind: SourceKind::Transaction,
                key_fields: TRANSACTION_KEY_FIELDS,
                track_secondary: true,
            }
        } else {
            Self {
                kind: SourceKind::Stock,
                key_fields: STOCK_KEY_FIELDS,
                track_secondary: false,
            }
        }
    }

    /// First key-field candidate present on the sampled record, falling back
    /// to the primary candidate for empty snapshots.
    pub fn resolve_key_field(&self, sample: Option<&Record>) -> &'static str {
        if let Some(record) = sample {
            for candidate in self.key_fields {
                if record.contains(candidate) {
                    return candidate;
                }
            }
        }
        self.key_fields[0]
    }
}

/// One discovered table file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub name: String,
}

/// Table files in `dir`, in stable (name-sorted) order.
pub fn discover_sources(dir: &Path) -> Result<Vec<SourceFile>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list input directory {:?}", dir))?;
    let mut sources = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list input directory {:?}", dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_table = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("dbf"))
            .unwrap_or(false);
        if !is_table {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        sources.push(SourceFile { path, name });
    }
    sources.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbf_reader::Value;

    #[test]
    fn file_names_select_the_profile() {
        assert_eq!(SourceProfile::for_file_name("STOCK.DBF").kind, SourceKind::Stock);
        assert_eq!(
            SourceProfile::for_file_name("inventory_main.dbf").kind,
            SourceKind::Stock
        );
        let invoices = SourceProfile::for_file_name("INVOICES.DBF");
        assert_eq!(invoices.kind, SourceKind::Transaction);
        assert!(invoices.track_secondary);
        assert_eq!(
            SourceProfile::for_file_name("daily_sales.dbf").kind,
            SourceKind::Transaction
        );
        // unknown names default to stock
        assert_eq!(SourceProfile::for_file_name("misc.dbf").kind, SourceKind::Stock);
    }

    #[test]
    fn key_field_resolves_through_candidates() {
        let profile = SourceProfile::for_file_name("STOCK.DBF");

        let mut record = Record::new();
        record.push("part_number", Value::Text("A-1".into()));
        assert_eq!(profile.resolve_key_field(Some(&record)), "PART_NUMBER");

        let mut record = Record::new();
        record.push("OTHER", Value::Null);
        assert_eq!(profile.resolve_key_field(Some(&record)), "PART_NO");

        assert_eq!(profile.resolve_key_field(None), "PART_NO");
    }

    #[test]
    fn discovery_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b_stock.DBF"), b"x").unwrap();
        std::fs::write(dir.path().join("a_stock.dbf"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested.dbf")).unwrap();

        let sources = discover_sources(dir.path()).unwrap();
        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a_stock.dbf", "b_stock.DBF"]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_sources(&dir.path().join("nope")).is_err());
    }
}
