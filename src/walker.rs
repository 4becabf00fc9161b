use crate::constants::IMAGE_EXTENSIONS;
use crate::error::{Result, UploadError};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// One folder and the plain files directly inside it, sorted by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderFiles {
    pub dir: PathBuf,
    /// The folder's own name. Used as the record scope.
    pub name: String,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    pub recursive: bool,
    pub images_only: bool,
    /// Directories never descended into, e.g. the temp and output dirs.
    pub exclude: Vec<PathBuf>,
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext_lower = ext.to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

fn is_hidden_name(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn folder_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string())
}

fn list_files(dir: &Path, images_only: bool) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| !is_hidden_name(&entry.file_name()))
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| !images_only || is_image_file(path))
        .collect();
    files.sort();
    Ok(files)
}

/// Lazily walks `root` depth-first and yields every folder that has at least
/// one file. Without `recursive`, only `root` itself is looked at.
pub fn walk(
    root: &Path,
    options: &WalkOptions,
) -> Result<impl Iterator<Item = Result<FolderFiles>>> {
    if !root.is_dir() {
        return Err(UploadError::SourceNotFound(root.to_path_buf()));
    }
    let root = root.canonicalize()?;
    // An unreadable root is fatal; unreadable subfolders surface as item errors.
    std::fs::read_dir(&root)?;

    // Only directories strictly below the root can be excluded.
    let exclude: Vec<PathBuf> = options
        .exclude
        .iter()
        .filter_map(|path| path.canonicalize().ok())
        .filter(|path| path != &root && path.starts_with(&root))
        .collect();

    let max_depth = if options.recursive { usize::MAX } else { 0 };
    let images_only = options.images_only;

    let walker = WalkDir::new(&root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry: &DirEntry| {
            if entry.depth() == 0 {
                return true;
            }
            entry.file_type().is_dir()
                && !is_hidden_name(entry.file_name())
                && !exclude.iter().any(|ex| ex == entry.path())
        });

    Ok(walker.filter_map(move |entry| {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e.into())),
        };
        if !entry.file_type().is_dir() {
            return None;
        }

        let dir = entry.into_path();
        match list_files(&dir, images_only) {
            Ok(files) if files.is_empty() => None,
            Ok(files) => Some(Ok(FolderFiles {
                name: folder_name(&dir),
                dir,
                files,
            })),
            Err(e) => Some(Err(e)),
        }
    }))
}
