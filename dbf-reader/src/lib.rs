pub mod memo;
pub mod record;
pub mod table;

pub use memo::{find_memo_sidecar, MemoFile};
pub use record::{Record, Value};
pub use table::{FieldDescriptor, FieldType, TableFile, TableHeader};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbfError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("table file is truncated ({len} bytes)")]
    Truncated { len: usize },
    #[error("field descriptor area is malformed at offset {offset}")]
    BadDescriptor { offset: usize },
    #[error("memo file {path} is malformed")]
    BadMemo { path: PathBuf },
    #[error("memo block {block} is out of range")]
    BadMemoBlock { block: u32 },
}

pub type Result<T> = std::result::Result<T, DbfError>;
