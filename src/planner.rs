use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::args::FormatMap;
use crate::scanner::SourceFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Transcode,
    CopyThrough,
    Skip,
}

/// One unit of work: a source file with its planned action and target path.
#[derive(Debug, Clone)]
pub struct Job {
    pub source: SourceFile,
    pub target: PathBuf,
    pub action: Action,
}

/// Classify each source file and compute its mirrored target path.
///
/// A mapping to the same extension means copy-through, anything else means
/// transcode. A job whose target already exists becomes Skip unless
/// overwriting was requested; re-runs are idempotent and never clobber
/// finished output. Two sources resolving to the same target keep only the
/// first as runnable, so no two jobs ever race on one file.
pub fn plan(
    sources: Vec<SourceFile>,
    formats: &FormatMap,
    output_root: &Path,
    overwrite: bool,
) -> Vec<Job> {
    let mut claimed_targets: HashSet<PathBuf> = HashSet::new();

    sources
        .into_iter()
        .filter_map(|source| {
            // Unmatched extensions get no job; the walker normally filters
            // them out already.
            let target_ext = formats.target_for(&source.extension)?;

            let action = if target_ext == source.extension {
                Action::CopyThrough
            } else {
                Action::Transcode
            };

            let target = output_root.join(source.rel_path.with_extension(target_ext));

            let action = if !claimed_targets.insert(target.clone()) {
                Action::Skip
            } else if target.exists() && !overwrite {
                Action::Skip
            } else {
                action
            };

            Some(Job {
                source,
                target,
                action,
            })
        })
        .collect()
}
