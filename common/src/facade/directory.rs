//! Long-path directory listing over `FindFirstFileExW`/`FindNextFileW`.

use serde::Serialize;

use crate::decode::find::{FindData, decode_find_data, find_data_size};
use crate::error::QueryError;
use crate::facade::ErrorReport;
use crate::native::{DirectoryNative, ScopedHandle};

const LONG_PREFIX: &str = "\\\\?\\";
const LONG_UNC_PREFIX: &str = "\\\\?\\UNC\\";

/// Rewrites `path` into the `\\?\` form that bypasses `MAX_PATH`.
pub fn long_path(path: &str) -> String {
    let path = path.replace('/', "\\");
    if path.starts_with(LONG_PREFIX) {
        return path;
    }
    match path.strip_prefix("\\\\") {
        Some(share) => format!("{LONG_UNC_PREFIX}{share}"),
        None => format!("{LONG_PREFIX}{path}"),
    }
}

/// Inverse of [`long_path`] for reporting.
pub fn display_path(path: &str) -> String {
    if let Some(share) = path.strip_prefix(LONG_UNC_PREFIX) {
        return format!("\\\\{share}");
    }
    path.strip_prefix(LONG_PREFIX).unwrap_or(path).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryOptions {
    /// Levels below the root to descend into; 0 lists the root only.
    pub max_depth: u32,
    pub large_fetch: bool,
    pub include_hidden: bool,
}

impl Default for DirectoryOptions {
    fn default() -> Self {
        Self {
            max_depth: 1,
            large_fetch: true,
            include_hidden: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub path: String,
    pub name: String,
    pub attributes: u32,
    pub is_directory: bool,
    pub is_hidden: bool,
    pub is_reparse_point: bool,
    pub size: u64,
    pub created_ms: i64,
    pub accessed_ms: i64,
    pub modified_ms: i64,
    pub depth: u32,
}

impl DirectoryEntry {
    fn new(path: String, data: FindData, depth: u32) -> Self {
        Self {
            path,
            attributes: data.attributes,
            is_directory: data.is_directory(),
            is_hidden: data.is_hidden(),
            is_reparse_point: data.is_reparse_point(),
            size: data.size,
            created_ms: data.created_ms,
            accessed_ms: data.accessed_ms,
            modified_ms: data.modified_ms,
            name: data.file_name,
            depth,
        }
    }
}

/// A subdirectory that could not be listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalkError {
    pub path: String,
    pub error: ErrorReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryListing {
    pub root: String,
    pub entries: Vec<DirectoryEntry>,
    pub errors: Vec<WalkError>,
}

/// Lists `path` and, up to `options.max_depth`, its subdirectories.
///
/// Failing to open the root is an error. A subdirectory that fails is
/// recorded in [`DirectoryListing::errors`] and the walk moves on. Reparse
/// points are listed but never entered.
#[allow(clippy::missing_errors_doc)]
pub fn list_directory<N>(
    native: &N,
    path: &str,
    options: &DirectoryOptions,
) -> Result<DirectoryListing, QueryError>
where
    N: DirectoryNative + ?Sized,
{
    let root = long_path(path);
    let mut listing = DirectoryListing {
        root: display_path(&root),
        entries: Vec::new(),
        errors: Vec::new(),
    };
    walk(native, &root, 0, options, &mut listing)?;
    tracing::debug!(
        root = %listing.root,
        entries = listing.entries.len(),
        errors = listing.errors.len(),
        "directory listed"
    );
    Ok(listing)
}

fn walk<N>(
    native: &N,
    dir: &str,
    depth: u32,
    options: &DirectoryOptions,
    listing: &mut DirectoryListing,
) -> Result<(), QueryError>
where
    N: DirectoryNative + ?Sized,
{
    for data in list_one(native, dir, options.large_fetch)? {
        if data.is_dot_entry() || (data.is_hidden() && !options.include_hidden) {
            continue;
        }
        let path = format!("{}\\{}", dir.trim_end_matches('\\'), data.file_name);
        let descend = data.is_directory() && !data.is_reparse_point() && depth < options.max_depth;
        listing
            .entries
            .push(DirectoryEntry::new(display_path(&path), data, depth));

        if descend && let Err(err) = walk(native, &path, depth + 1, options, listing) {
            let shown = display_path(&path);
            tracing::warn!(path = %shown, code = %err.code(), error = %err, "subdirectory skipped");
            listing.errors.push(WalkError {
                path: shown,
                error: ErrorReport::from(&err),
            });
        }
    }
    Ok(())
}

/// Every entry of one directory. The find handle is closed before returning.
fn list_one<N>(native: &N, dir: &str, large_fetch: bool) -> Result<Vec<FindData>, QueryError>
where
    N: DirectoryNative + ?Sized,
{
    let pattern = format!("{}\\*", dir.trim_end_matches('\\'));
    let mut data = vec![0u8; find_data_size()];
    let Some(handle) = native.find_first(&pattern, large_fetch, &mut data)? else {
        return Ok(Vec::new());
    };
    let search = ScopedHandle::new(handle, |h| native.find_close(h));

    let mut found = vec![decode_find_data(&data)?];
    while native.find_next(search.raw(), &mut data)? {
        found.push(decode_find_data(&data)?);
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::{DirectoryOptions, display_path, list_directory, long_path};
    use crate::decode::find::{
        FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_HIDDEN, FILE_ATTRIBUTE_REPARSE_POINT,
    };
    use crate::error::QueryError;
    use crate::native::fake::{FakeNative, find_record};

    const FILE: u32 = 0x20;
    const STAMP: u64 = 132_000_000_000_000_000;

    fn tree() -> Result<FakeNative, QueryError> {
        let mut fake = FakeNative::new();
        fake.add_directory(
            "C:\\data",
            vec![
                find_record(".", FILE_ATTRIBUTE_DIRECTORY, 0, STAMP)?,
                find_record("..", FILE_ATTRIBUTE_DIRECTORY, 0, STAMP)?,
                find_record("a.txt", FILE, 12, STAMP)?,
                find_record("sub", FILE_ATTRIBUTE_DIRECTORY, 0, STAMP)?,
                find_record("secret", FILE | FILE_ATTRIBUTE_HIDDEN, 1, STAMP)?,
                find_record(
                    "link",
                    FILE_ATTRIBUTE_DIRECTORY | FILE_ATTRIBUTE_REPARSE_POINT,
                    0,
                    STAMP,
                )?,
            ],
        )
        .add_directory(
            "C:\\data\\sub",
            vec![
                find_record(".", FILE_ATTRIBUTE_DIRECTORY, 0, STAMP)?,
                find_record("deep", FILE_ATTRIBUTE_DIRECTORY, 0, STAMP)?,
                find_record("b.bin", FILE, 5_000_000_000, STAMP)?,
            ],
        )
        .add_directory(
            "C:\\data\\sub\\deep",
            vec![find_record("c.txt", FILE, 3, STAMP)?],
        );
        Ok(fake)
    }

    #[test]
    fn long_path_forms() {
        assert_eq!(long_path("C:/data/x"), "\\\\?\\C:\\data\\x");
        assert_eq!(long_path("\\\\srv\\share"), "\\\\?\\UNC\\srv\\share");
        assert_eq!(long_path("\\\\?\\C:\\x"), "\\\\?\\C:\\x");
        assert_eq!(display_path("\\\\?\\UNC\\srv\\share"), "\\\\srv\\share");
        assert_eq!(display_path("\\\\?\\C:\\x"), "C:\\x");
    }

    #[test]
    fn walk_honours_depth_and_skips_dots() -> Result<(), Box<dyn std::error::Error>> {
        let fake = tree()?;
        let listing = list_directory(&fake, "C:\\data", &DirectoryOptions::default())?;
        let paths: Vec<&str> = listing.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            [
                "C:\\data\\a.txt",
                "C:\\data\\sub",
                "C:\\data\\sub\\deep",
                "C:\\data\\sub\\b.bin",
                "C:\\data\\link",
            ]
        );
        assert_eq!(listing.entries[3].size, 5_000_000_000);
        assert_eq!(listing.entries[3].depth, 1);
        assert!(listing.errors.is_empty());
        // Root and sub only: deep is past max_depth, link is a reparse point.
        assert_eq!(fake.call_count("FindFirstFileExW"), 2);
        assert_eq!(fake.open_handles(), 0);
        assert_eq!(fake.handles_closed(), fake.handles_opened());
        Ok(())
    }

    #[test]
    fn hidden_entries_on_request() -> Result<(), Box<dyn std::error::Error>> {
        let fake = tree()?;
        let options = DirectoryOptions {
            max_depth: 0,
            include_hidden: true,
            ..DirectoryOptions::default()
        };
        let listing = list_directory(&fake, "C:\\data", &options)?;
        assert_eq!(listing.entries.len(), 4);
        assert!(listing.entries.iter().any(|e| e.name == "secret" && e.is_hidden));
        assert_eq!(fake.call_count("FindFirstFileExW"), 1);
        Ok(())
    }

    #[test]
    fn failing_subdirectory_is_recorded() -> Result<(), Box<dyn std::error::Error>> {
        let mut fake = tree()?;
        fake.deny_directory("C:\\data\\sub");
        let listing = list_directory(&fake, "C:\\data", &DirectoryOptions::default())?;
        assert_eq!(listing.entries.len(), 3);
        assert_eq!(listing.errors.len(), 1);
        assert_eq!(listing.errors[0].path, "C:\\data\\sub");
        assert_eq!(listing.errors[0].error.native_code, Some(5));
        assert_eq!(fake.open_handles(), 0);
        Ok(())
    }

    #[test]
    fn missing_root_is_an_error() {
        let fake = FakeNative::new();
        let result = list_directory(&fake, "D:\\nowhere", &DirectoryOptions::default());
        assert!(matches!(
            result,
            Err(QueryError::HandleUnavailable { code: 3, .. })
        ));
    }

    #[test]
    fn empty_directory_lists_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let mut fake = FakeNative::new();
        fake.add_directory("\\\\srv\\share", Vec::new());
        let listing = list_directory(&fake, "\\\\srv\\share", &DirectoryOptions::default())?;
        assert_eq!(listing.root, "\\\\srv\\share");
        assert!(listing.entries.is_empty());
        assert_eq!(fake.handles_opened(), 0);
        Ok(())
    }
}
