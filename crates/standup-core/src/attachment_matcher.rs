//! Best-effort filename matching against a shared folder tree.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use standup_tracker::IssueTracker;

/// Files under `root` whose lowercase name contains the lowercase summary or description.
///
/// Matches inside `root/<expertise>` come first, then the rest of the tree with the
/// expertise subtree skipped. Each group is in sorted path order. A missing root yields
/// no matches.
pub fn match_files(
    root: &Path,
    expertise: Option<&str>,
    summary: &str,
    description: &str,
) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let needles: Vec<String> = [summary, description]
        .iter()
        .map(|needle| needle.trim().to_lowercase())
        .filter(|needle| !needle.is_empty())
        .collect();
    if needles.is_empty() {
        return Ok(Vec::new());
    }

    let expertise_dir = expertise
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| root.join(name))
        .filter(|dir| dir.is_dir());

    let mut files = Vec::new();
    if let Some(dir) = expertise_dir.as_deref() {
        collect_files_recursive(dir, None, &mut files)?;
    }
    collect_files_recursive(root, expertise_dir.as_deref(), &mut files)?;

    Ok(files
        .into_iter()
        .filter(|path| file_name_matches(path, &needles))
        .collect())
}

fn file_name_matches(path: &Path, needles: &[String]) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy().to_lowercase();
    needles.iter().any(|needle| name.contains(needle.as_str()))
}

fn collect_files_recursive(dir: &Path, skip: Option<&Path>, files: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory '{}'", dir.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to list directory entries for '{}'", dir.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to inspect '{}'", path.display()))?;
        if file_type.is_dir() {
            if skip == Some(path.as_path()) {
                continue;
            }
            collect_files_recursive(&path, skip, files)?;
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

/// Uploads each file to `issue_key`; returns how many uploads succeeded. Never fails.
///
/// A file whose name is in `already_attached`, or was uploaded earlier in the same call,
/// is skipped.
pub async fn attach_matching_files(
    tracker: &dyn IssueTracker,
    issue_key: &str,
    files: &[PathBuf],
    already_attached: &[String],
) -> usize {
    let mut seen: HashSet<String> = already_attached.iter().cloned().collect();
    let mut attached = 0;
    for path in files {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());
        if !seen.insert(file_name.clone()) {
            tracing::debug!(issue_key, file_name = %file_name, "attachment already present");
            continue;
        }
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(issue_key, path = %path.display(), %error, "failed to read attachment");
                continue;
            }
        };
        match tracker.add_attachment(issue_key, &file_name, bytes).await {
            Ok(()) => attached += 1,
            Err(error) => {
                tracing::warn!(issue_key, file_name = %file_name, %error, "failed to upload attachment");
            }
        }
    }
    attached
}
