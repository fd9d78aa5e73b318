use std::path::Path;

use anyhow::{bail, Context, Result};

/// Counters produced by [`copy_tree_overwrite`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyTreeStats {
    pub files_copied: u64,
    pub directories_created: u64,
    pub bytes_copied: u64,
}

/// Recursively copies `source` into `destination`, creating directories as
/// needed and overwriting files that already exist. Symlinks are not
/// followed; install trees are expected to contain plain files only.
pub fn copy_tree_overwrite(source: &Path, destination: &Path) -> Result<CopyTreeStats> {
    if !source.is_dir() {
        bail!("copy source '{}' is not a directory", source.display());
    }
    let mut stats = CopyTreeStats::default();
    copy_tree_inner(source, destination, &mut stats)?;
    Ok(stats)
}

fn copy_tree_inner(source: &Path, destination: &Path, stats: &mut CopyTreeStats) -> Result<()> {
    if !destination.exists() {
        std::fs::create_dir_all(destination)
            .with_context(|| format!("failed to create {}", destination.display()))?;
        stats.directories_created = stats.directories_created.saturating_add(1);
    }

    let entries = std::fs::read_dir(source)
        .with_context(|| format!("failed to list {}", source.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", source.display()))?;
        let entry_type = entry
            .file_type()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;
        let target = destination.join(entry.file_name());
        if entry_type.is_dir() {
            copy_tree_inner(&entry.path(), &target, stats)?;
        } else if entry_type.is_file() {
            let copied = std::fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
            stats.files_copied = stats.files_copied.saturating_add(1);
            stats.bytes_copied = stats.bytes_copied.saturating_add(copied);
        }
    }
    Ok(())
}
