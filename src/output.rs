// ABOUTME: Transformation of changed records into the ESL CSV shape
// ABOUTME: Resolves aliased source fields and writes timestamped files atomically

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dbf_reader::{Record, Value};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::sources::SourceKind;

const CSV_HEADERS: &[&str] = &[
    "SKU",
    "CurrentPrice",
    "StockQuantity",
    "TransactionID",
    "TimeStampUTC",
];

/// Ordered candidate source fields per logical ESL attribute.
struct AttributeAliases {
    sku: &'static [&'static str],
    price: &'static [&'static str],
    quantity: &'static [&'static str],
    transaction_id: &'static [&'static str],
}

const STOCK_ALIASES: AttributeAliases = AttributeAliases {
    sku: &["PART_NO", "PART_NUMBER", "ITEM_CODE", "PRODUCT_CODE", "SKU"],
    price: &["PRICE", "SELL_PRICE", "RETAIL_PRICE"],
    quantity: &["STOCK", "STOCK_QTY", "STOCK_QUANTITY"],
    transaction_id: &["DOC_NO", "DOCKET_NUMBER"],
};

const TRANSACTION_ALIASES: AttributeAliases = AttributeAliases {
    sku: &["PART_NO", "ITEM_CODE", "PRODUCT_CODE", "SKU"],
    price: &["UNIT_PRICE", "PRICE"],
    quantity: &["QTY_SOLD", "QUANTITY"],
    transaction_id: &["DOC_NO", "INVOICE_NO"],
};

/// One row of the ESL synchronization file.
#[derive(Debug, Clone, PartialEq)]
pub struct EslRow {
    pub sku: String,
    pub current_price: Decimal,
    pub stock_quantity: i64,
    pub transaction_id: String,
    pub timestamp_utc: String,
}

impl EslRow {
    fn to_csv_line(&self) -> String {
        [
            csv_field(&self.sku),
            csv_field(&format!("{:.2}", self.current_price)),
            self.stock_quantity.to_string(),
            csv_field(&self.transaction_id),
            csv_field(&self.timestamp_utc),
        ]
        .join(",")
    }
}

/// Writes changed records for one source as a timestamped ESL CSV file.
pub struct EslWriter {
    output_dir: PathBuf,
}

impl EslWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    /// Transforms and writes `records`; returns the file path, or `None`
    /// when there is nothing to write.
    pub fn write_changes(
        &self,
        source_name: &str,
        kind: SourceKind,
        records: &[&Record],
        now: DateTime<Utc>,
    ) -> Result<Option<PathBuf>> {
        if records.is_empty() {
            return Ok(None);
        }
        let timestamp_utc = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let rows: Vec<EslRow> = records
            .iter()
            .map(|record| transform_record(record, kind, &timestamp_utc))
            .collect();
        let file_name = csv_file_name(source_name, now);
        let path = self.write_atomic(&rows, &file_name)?;
        Ok(Some(path))
    }

    /// Writes rows to a temp file in the output directory, then renames it
    /// into place, so consumers never observe a half-written file.
    fn write_atomic(&self, rows: &[EslRow], file_name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create output directory {:?}", self.output_dir))?;
        let final_path = self.output_dir.join(file_name);

        let mut temp = tempfile::Builder::new()
            .prefix("esl_")
            .suffix(".tmp")
            .tempfile_in(&self.output_dir)
            .context("Failed to create temporary CSV file")?;
        writeln!(temp, "{}", CSV_HEADERS.join(","))?;
        for row in rows {
            writeln!(temp, "{}", row.to_csv_line())?;
        }
        temp.flush()?;
        temp.persist(&final_path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to move CSV into place at {:?}", final_path))?;
        Ok(final_path)
    }
}

/// Maps one source record onto the ESL row shape, resolving each logical
/// attribute through its candidate field names in order.
fn transform_record(record: &Record, kind: SourceKind, timestamp_utc: &str) -> EslRow {
    let aliases = match kind {
        SourceKind::Stock => &STOCK_ALIASES,
        SourceKind::Transaction => &TRANSACTION_ALIASES,
    };
    EslRow {
        sku: resolve(record, aliases.sku).map(text_of).unwrap_or_default(),
        current_price: resolve(record, aliases.price)
            .map(coerce_decimal)
            .unwrap_or_default(),
        stock_quantity: resolve(record, aliases.quantity)
            .map(coerce_integer)
            .unwrap_or(0),
        transaction_id: resolve(record, aliases.transaction_id)
            .map(text_of)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| "0".to_string()),
        timestamp_utc: timestamp_utc.to_string(),
    }
}

/// First candidate field present on the record with a non-null value.
fn resolve<'r>(record: &'r Record, candidates: &[&str]) -> Option<&'r Value> {
    candidates
        .iter()
        .find_map(|name| record.get(name).filter(|value| !value.is_null()))
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Text(text) => text.trim().to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Decimal(d) => d.normalize().to_string(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Logical(b) => b.to_string(),
    }
}

/// Price-style parsing: tolerates currency symbols, thousands separators,
/// and accounting-style parenthesised negatives.
fn coerce_decimal(value: &Value) -> Decimal {
    match value {
        Value::Integer(n) => Decimal::from(*n),
        Value::Decimal(d) => *d,
        Value::Text(text) => clean_number(text).parse().unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

fn coerce_integer(value: &Value) -> i64 {
    match value {
        Value::Integer(n) => *n,
        Value::Decimal(d) => d.trunc().to_i64().unwrap_or(0),
        Value::Text(text) => {
            let cleaned = clean_number(text);
            cleaned
                .parse::<i64>()
                .ok()
                .or_else(|| cleaned.parse::<Decimal>().ok().and_then(|d| d.trunc().to_i64()))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

fn clean_number(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    if let Some(inner) = cleaned.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        format!("-{inner}")
    } else {
        cleaned
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// `<SOURCESTEM>_<YYYYMMDDHHMMSS>.csv`, upper-cased like the legacy exports.
fn csv_file_name(source_name: &str, now: DateTime<Utc>) -> String {
    let stem = Path::new(source_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(source_name)
        .to_ascii_uppercase();
    format!("{}_{}.csv", stem, now.format("%Y%m%d%H%M%S"))
}
