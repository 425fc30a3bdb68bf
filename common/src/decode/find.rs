use serde::Serialize;

use crate::decode::{BufferView, Record, filetime_100ns_to_unix_ms};
use crate::error::QueryError;
use crate::layout::{PointerWidth, ResolvedLayout, WIN32_FIND_DATAW};

pub const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;
pub const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;

/// One decoded `WIN32_FIND_DATAW`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FindData {
    pub attributes: u32,
    pub created_ms: i64,
    pub accessed_ms: i64,
    pub modified_ms: i64,
    pub size: u64,
    pub file_name: String,
    pub alternate_name: Option<String>,
}

impl FindData {
    pub fn is_directory(&self) -> bool {
        self.attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.attributes & FILE_ATTRIBUTE_HIDDEN != 0
    }

    pub fn is_reparse_point(&self) -> bool {
        self.attributes & FILE_ATTRIBUTE_REPARSE_POINT != 0
    }

    /// `.` and `..` pseudo-entries.
    pub fn is_dot_entry(&self) -> bool {
        self.file_name == "." || self.file_name == ".."
    }
}

/// Size of the caller-provided buffer `FindFirstFileExW`/`FindNextFileW` fill.
pub fn find_data_size() -> usize {
    WIN32_FIND_DATAW.size(PointerWidth::native())
}

fn decode_one(rec: &Record<'_, '_>) -> Result<FindData, QueryError> {
    let high = u64::from(rec.u32("nFileSizeHigh")?);
    let low = u64::from(rec.u32("nFileSizeLow")?);
    let alternate = rec.inline_wide("cAlternateFileName")?;
    Ok(FindData {
        attributes: rec.u32("dwFileAttributes")?,
        created_ms: filetime_100ns_to_unix_ms(rec.filetime("ftCreationTime")?),
        accessed_ms: filetime_100ns_to_unix_ms(rec.filetime("ftLastAccessTime")?),
        modified_ms: filetime_100ns_to_unix_ms(rec.filetime("ftLastWriteTime")?),
        size: (high << 32) | low,
        file_name: rec.inline_wide("cFileName")?,
        alternate_name: (!alternate.is_empty()).then_some(alternate),
    })
}

/// Decodes the single find-data record at the start of `bytes`.
#[allow(clippy::missing_errors_doc)]
pub fn decode_find_data(bytes: &[u8]) -> Result<FindData, QueryError> {
    // The record has no embedded pointers, so the base address is irrelevant.
    let view = BufferView::new(bytes, 0, PointerWidth::native());
    let layout: ResolvedLayout = WIN32_FIND_DATAW.resolve(PointerWidth::native());
    let rec = view.record(&layout, 0)?;
    let data = decode_one(&rec)?;
    if data.file_name.is_empty() {
        return Err(QueryError::malformed(WIN32_FIND_DATAW.name, "文件名为空"));
    }
    Ok(data)
}
