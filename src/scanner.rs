use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::FatalError;

/// A regular file discovered under the input root with a configured extension.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the input root; mirrored under the output root.
    pub rel_path: PathBuf,
    /// Lowercase extension, without the dot.
    pub extension: String,
}

/// Walk the input root and collect every eligible file, recursing to any
/// depth. Extension matching is case-insensitive. Unreadable entries below
/// the root only produce warnings; an unreadable root is fatal.
pub fn scan(root: &Path, extensions: &[String]) -> Result<Vec<SourceFile>, FatalError> {
    std::fs::read_dir(root).map_err(|e| FatalError::Access {
        path: root.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();

    for entry_result in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry_result {
            Ok(e) => e,
            Err(err) => {
                if let Some(path) = err.path() {
                    eprintln!("Warning: failed to access {}: {}", path.display(), err);
                } else {
                    eprintln!("Warning: walk error: {}", err);
                }
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

        // macOS litter: AppleDouble companions and Finder metadata.
        if filename.starts_with("._") || filename == ".DS_Store" {
            continue;
        }

        let Some(extension) = lowercase_extension(path) else {
            continue;
        };
        if !extensions.contains(&extension) {
            continue;
        }

        let rel_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        files.push(SourceFile {
            path: path.to_path_buf(),
            rel_path,
            extension,
        });
    }

    Ok(files)
}

/// Wrap a single explicitly named file for a single-file run. The file must
/// exist and carry one of the configured extensions.
pub fn single(path: &Path, extensions: &[String]) -> Result<Vec<SourceFile>, FatalError> {
    let metadata = std::fs::metadata(path).map_err(|e| FatalError::Access {
        path: path.to_path_buf(),
        source: e,
    })?;
    if !metadata.is_file() {
        return Err(FatalError::Config(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    let Some(extension) = lowercase_extension(path) else {
        return Err(FatalError::Config(format!(
            "{} has no extension",
            path.display()
        )));
    };
    if !extensions.contains(&extension) {
        return Err(FatalError::Config(format!(
            "extension '{}' of {} is not in --formats",
            extension,
            path.display()
        )));
    }

    let rel_path = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| path.to_path_buf());
    Ok(vec![SourceFile {
        path: path.to_path_buf(),
        rel_path,
        extension,
    }])
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}
