//! Input root scanner
//!
//! Captures the listing order of item folders (and of the files inside them)
//! exactly once. Everything downstream consumes the returned sequence, so SKU
//! assignment never re-reads the directory.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::ListingOrder;
use crate::error::IntakeError;
use crate::state::SourceItem;

/// Immediate children of `dir` in the requested order.
///
/// Failing to read `dir` itself is an error. An unreadable child (a dangling
/// symlink, a permission problem) is logged and left out.
fn list_children(dir: &Path, order: ListingOrder) -> Result<Vec<DirEntry>, walkdir::Error> {
    let mut walker = WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true);
    if order == ListingOrder::ByName {
        walker = walker.sort_by_file_name();
    }

    let mut entries = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) => entries.push(entry),
            Err(e) if e.depth() == 0 => return Err(e),
            Err(e) => {
                tracing::warn!(
                    path = %e.path().unwrap_or(dir).display(),
                    "Skipping unreadable entry: {}",
                    e
                );
            }
        }
    }

    Ok(entries)
}

fn scan_error(dir: &Path, e: walkdir::Error) -> IntakeError {
    IntakeError::Scan {
        path: e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf()),
        source: e.into(),
    }
}

/// Scan `input_root` into an ordered list of source items.
///
/// Every immediate subdirectory becomes one item, ordinal 1 first. Every
/// regular file inside it is kept, whatever its type. Nested directories
/// inside an item are ignored.
pub fn scan_input(input_root: &Path, order: ListingOrder) -> Result<Vec<SourceItem>, IntakeError> {
    if !input_root.is_dir() {
        return Err(IntakeError::Scan {
            path: input_root.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        });
    }

    let folders: Vec<PathBuf> = list_children(input_root, order)
        .map_err(|e| scan_error(input_root, e))?
        .into_iter()
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect();

    let mut items = Vec::with_capacity(folders.len());
    for (index, folder) in folders.into_iter().enumerate() {
        let file_list: Vec<PathBuf> = match list_children(&folder, order) {
            Ok(entries) => entries
                .into_iter()
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .collect(),
            Err(e) => {
                tracing::warn!(folder = %folder.display(), "Cannot list item folder: {}", e);
                Vec::new()
            }
        };

        let relative_path = folder
            .strip_prefix(input_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| folder.clone());

        tracing::debug!(
            folder = %relative_path.display(),
            ordinal = index + 1,
            files = file_list.len(),
            "Discovered item folder"
        );

        items.push(SourceItem {
            relative_path,
            ordinal_index: index + 1,
            file_list,
        });
    }

    Ok(items)
}
