use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::memo::{find_memo_sidecar, MemoFile};
use crate::record::{Record, Value};
use crate::{DbfError, Result};

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const DESCRIPTOR_TERMINATOR: u8 = 0x0d;
const DELETED_FLAG: u8 = b'*';
const EOF_MARKER: u8 = 0x1a;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Character,
    Numeric,
    Float,
    Date,
    Logical,
    Integer,
    Memo,
    Other(u8),
}

impl FieldType {
    fn from_byte(byte: u8) -> Self {
        match byte {
            b'C' => FieldType::Character,
            b'N' => FieldType::Numeric,
            b'F' => FieldType::Float,
            b'D' => FieldType::Date,
            b'L' => FieldType::Logical,
            b'I' => FieldType::Integer,
            b'M' => FieldType::Memo,
            other => FieldType::Other(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub length: usize,
    pub decimal_count: u8,
}

#[derive(Debug, Clone)]
pub struct TableHeader {
    pub version: u8,
    pub last_updated: Option<NaiveDate>,
    pub record_count: u32,
    pub header_len: usize,
    pub record_len: usize,
    pub fields: Vec<FieldDescriptor>,
}

/// An opened table file, with its memo sidecar when one sits next to it.
pub struct TableFile {
    header: TableHeader,
    data: Vec<u8>,
    memo: Option<MemoFile>,
}

impl TableFile {
    /// Opens `path`, parsing the header and discovering any memo sidecar.
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|source| DbfError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let header = parse_header(&data)?;
        let memo = match find_memo_sidecar(path) {
            Some(memo_path) => Some(MemoFile::open(&memo_path)?),
            None => None,
        };
        Ok(Self { header, data, memo })
    }

    /// Builds a table from raw bytes, without memo support.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let header = parse_header(&data)?;
        Ok(Self {
            header,
            data,
            memo: None,
        })
    }

    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.header.fields.iter().map(|field| field.name.as_str())
    }

    /// Decodes every active record in the file.
    ///
    /// Records flagged deleted in the file are skipped. A trailing slot cut
    /// short by EOF ends the scan cleanly; the file is not rejected for it.
    pub fn read_records(&self) -> Result<Vec<Record>> {
        let record_len = self.header.record_len;
        let mut records = Vec::new();
        let mut offset = self.header.header_len;
        let mut slot = 0u32;
        while slot < self.header.record_count {
            if offset >= self.data.len() || self.data[offset] == EOF_MARKER {
                break;
            }
            if offset + record_len > self.data.len() {
                break;
            }
            let raw = &self.data[offset..offset + record_len];
            offset += record_len;
            slot += 1;
            if raw[0] == DELETED_FLAG {
                continue;
            }
            records.push(self.decode_record(&raw[1..])?);
        }
        Ok(records)
    }

    fn decode_record(&self, raw: &[u8]) -> Result<Record> {
        let mut record = Record::new();
        let mut pos = 0;
        for field in &self.header.fields {
            let end = (pos + field.length).min(raw.len());
            let bytes = &raw[pos..end];
            pos = end;
            record.push(field.name.clone(), self.decode_value(field, bytes)?);
        }
        Ok(record)
    }

    fn decode_value(&self, field: &FieldDescriptor, raw: &[u8]) -> Result<Value> {
        let value = match field.field_type {
            FieldType::Character => decode_character(raw),
            FieldType::Numeric | FieldType::Float => decode_numeric(raw, field.decimal_count),
            FieldType::Date => decode_date(raw),
            FieldType::Logical => decode_logical(raw),
            FieldType::Integer => {
                if raw.len() >= 4 {
                    Value::Integer(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64)
                } else {
                    Value::Null
                }
            }
            FieldType::Memo => self.decode_memo(raw)?,
            // Unknown types come through as raw text rather than being lost.
            FieldType::Other(_) => decode_character(raw),
        };
        Ok(value)
    }

    fn decode_memo(&self, raw: &[u8]) -> Result<Value> {
        // Visual FoxPro stores the block number as a 4-byte integer; older
        // formats use a right-justified textual block number.
        let block = if raw.len() == 4 {
            u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
        } else {
            decode_text(raw).trim().parse::<u32>().unwrap_or(0)
        };
        if block == 0 {
            return Ok(Value::Null);
        }
        let Some(memo) = &self.memo else {
            return Ok(Value::Null);
        };
        match memo.read_block(block)? {
            Some(text) if !text.trim().is_empty() => Ok(Value::Text(text.trim().to_string())),
            _ => Ok(Value::Null),
        }
    }
}

fn parse_header(data: &[u8]) -> Result<TableHeader> {
    if data.len() < HEADER_LEN {
        return Err(DbfError::Truncated { len: data.len() });
    }
    let version = data[0];
    let last_updated = NaiveDate::from_ymd_opt(
        data[1] as i32 + 1900,
        data[2] as u32,
        data[3] as u32,
    );
    let record_count = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let header_len = u16::from_le_bytes([data[8], data[9]]) as usize;
    let record_len = u16::from_le_bytes([data[10], data[11]]) as usize;
    if header_len > data.len() || record_len == 0 {
        return Err(DbfError::Truncated { len: data.len() });
    }

    let mut fields = Vec::new();
    let mut offset = HEADER_LEN;
    loop {
        if offset >= data.len() {
            return Err(DbfError::BadDescriptor { offset });
        }
        if data[offset] == DESCRIPTOR_TERMINATOR {
            break;
        }
        if offset + DESCRIPTOR_LEN > header_len {
            return Err(DbfError::BadDescriptor { offset });
        }
        let raw = &data[offset..offset + DESCRIPTOR_LEN];
        let name_end = raw[..11].iter().position(|&b| b == 0).unwrap_or(11);
        let name = decode_text(&raw[..name_end]).trim().to_string();
        if name.is_empty() {
            return Err(DbfError::BadDescriptor { offset });
        }
        fields.push(FieldDescriptor {
            name,
            field_type: FieldType::from_byte(raw[11]),
            length: raw[16] as usize,
            decimal_count: raw[17],
        });
        offset += DESCRIPTOR_LEN;
    }

    // The declared record length must cover the deletion flag plus all fields.
    let fields_len: usize = fields.iter().map(|field| field.length).sum();
    if fields_len + 1 > record_len {
        return Err(DbfError::BadDescriptor { offset });
    }

    Ok(TableHeader {
        version,
        last_updated,
        record_count,
        header_len,
        record_len,
        fields,
    })
}

fn decode_character(raw: &[u8]) -> Value {
    let text = decode_text(raw);
    let trimmed = text.trim_matches(|c| c == ' ' || c == '\0');
    if trimmed.is_empty() {
        Value::Null
    } else {
        Value::Text(trimmed.to_string())
    }
}

fn decode_numeric(raw: &[u8], decimal_count: u8) -> Value {
    let text = decode_text(raw);
    let trimmed = text.trim_matches(|c| c == ' ' || c == '\0');
    // Overflowed numeric cells are written as asterisks.
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '*') {
        return Value::Null;
    }
    if decimal_count == 0 && !trimmed.contains('.') {
        match trimmed.parse::<i64>() {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::Null,
        }
    } else {
        match trimmed.parse::<Decimal>() {
            Ok(d) => Value::Decimal(d),
            Err(_) => Value::Null,
        }
    }
}

fn decode_date(raw: &[u8]) -> Value {
    let text = decode_text(raw);
    let trimmed = text.trim();
    if trimmed.len() != 8 {
        return Value::Null;
    }
    match NaiveDate::parse_from_str(trimmed, "%Y%m%d") {
        Ok(date) => Value::Date(date),
        Err(_) => Value::Null,
    }
}

fn decode_logical(raw: &[u8]) -> Value {
    match raw.first() {
        Some(b'Y' | b'y' | b'T' | b't') => Value::Logical(true),
        Some(b'N' | b'n' | b'F' | b'f') => Value::Logical(false),
        _ => Value::Null,
    }
}

/// Decodes cell bytes as UTF-8, falling back to Latin-1 for legacy exports.
pub(crate) fn decode_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => text.to_string(),
        Err(_) => raw.iter().map(|&b| b as char).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_files() {
        let err = TableFile::from_bytes(vec![0x03, 0x00]).unwrap_err();
        assert!(matches!(err, DbfError::Truncated { len: 2 }));
    }

    #[test]
    fn numeric_cells_decode_by_decimal_count() {
        assert_eq!(decode_numeric(b"   42", 0), Value::Integer(42));
        assert_eq!(
            decode_numeric(b"10.50", 2),
            Value::Decimal("10.50".parse().unwrap())
        );
        assert_eq!(decode_numeric(b"     ", 0), Value::Null);
        assert_eq!(decode_numeric(b"*****", 0), Value::Null);
    }

    #[test]
    fn date_and_logical_cells_decode() {
        assert_eq!(
            decode_date(b"20240601"),
            Value::Date(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
        );
        assert_eq!(decode_date(b"        "), Value::Null);
        assert_eq!(decode_logical(b"T"), Value::Logical(true));
        assert_eq!(decode_logical(b"n"), Value::Logical(false));
        assert_eq!(decode_logical(b"?"), Value::Null);
    }

    #[test]
    fn latin1_bytes_survive_decoding() {
        let text = decode_text(&[0x43, 0x41, 0x46, 0xc9]);
        assert_eq!(text, "CAF\u{c9}");
    }
}
