use std::fs;
use std::path::{Path, PathBuf};

use crate::table::decode_text;
use crate::{DbfError, Result};

const FPT_HEADER_LEN: usize = 512;
const FPT_BLOCK_HEADER_LEN: usize = 8;
const FPT_TEXT_BLOCK: u32 = 1;
const DBT_BLOCK_LEN: usize = 512;
const DBT_TERMINATOR: u8 = 0x1a;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemoKind {
    FoxPro,
    Dbase,
}

/// A memo sidecar (`.FPT` or `.DBT`) holding the long-text blocks that table
/// records reference by block number.
pub struct MemoFile {
    path: PathBuf,
    kind: MemoKind,
    block_size: usize,
    data: Vec<u8>,
}

/// Looks for a memo sidecar next to `table_path`, matching by extension
/// case-insensitively.
pub fn find_memo_sidecar(table_path: &Path) -> Option<PathBuf> {
    for ext in ["fpt", "FPT", "dbt", "DBT"] {
        let candidate = table_path.with_extension(ext);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

impl MemoFile {
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|source| DbfError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let kind = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("fpt") => MemoKind::FoxPro,
            _ => MemoKind::Dbase,
        };
        let block_size = match kind {
            MemoKind::FoxPro => {
                if data.len() < FPT_HEADER_LEN {
                    return Err(DbfError::BadMemo {
                        path: path.to_path_buf(),
                    });
                }
                let size = u16::from_be_bytes([data[6], data[7]]) as usize;
                if size == 0 {
                    return Err(DbfError::BadMemo {
                        path: path.to_path_buf(),
                    });
                }
                size
            }
            MemoKind::Dbase => DBT_BLOCK_LEN,
        };
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            block_size,
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Text content of a memo block, or `None` for an empty/non-text block.
    pub fn read_block(&self, block: u32) -> Result<Option<String>> {
        let start = block as usize * self.block_size;
        if start >= self.data.len() {
            return Err(DbfError::BadMemoBlock { block });
        }
        match self.kind {
            MemoKind::FoxPro => self.read_foxpro_block(block, start),
            MemoKind::Dbase => Ok(self.read_dbase_block(start)),
        }
    }

    fn read_foxpro_block(&self, block: u32, start: usize) -> Result<Option<String>> {
        if start + FPT_BLOCK_HEADER_LEN > self.data.len() {
            return Err(DbfError::BadMemoBlock { block });
        }
        let d = &self.data;
        let kind = u32::from_be_bytes([d[start], d[start + 1], d[start + 2], d[start + 3]]);
        let len = u32::from_be_bytes([d[start + 4], d[start + 5], d[start + 6], d[start + 7]])
            as usize;
        let body_start = start + FPT_BLOCK_HEADER_LEN;
        let body_end = body_start
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(DbfError::BadMemoBlock { block })?;
        if kind != FPT_TEXT_BLOCK || len == 0 {
            return Ok(None);
        }
        Ok(Some(decode_text(&self.data[body_start..body_end])))
    }

    fn read_dbase_block(&self, start: usize) -> Option<String> {
        let tail = &self.data[start..];
        let end = tail
            .iter()
            .position(|&b| b == DBT_TERMINATOR)
            .unwrap_or(tail.len());
        if end == 0 {
            return None;
        }
        Some(decode_text(&tail[..end]))
    }
}
