//! File metadata resolution: which repository a buffer belongs to and what it is.

use std::fs;
use std::path::Path;

use thiserror::Error;

/// Metadata extracted for a single file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub repository: String,
    pub filetype: String,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not a file: {0}")]
    NotAFile(String),
    #[error("path is not inside a repository: {0}")]
    OutsideRepository(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves a path into its [`FileMetadata`].
///
/// Failing is expected (scratch buffers, files outside any repository); the
/// caller skips the update instead of treating it as an error.
pub trait MetadataResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Result<FileMetadata, MetadataError>;
}

/// Resolves metadata from the nearest enclosing git repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitMetadataResolver;

impl MetadataResolver for GitMetadataResolver {
    fn resolve(&self, path: &str) -> Result<FileMetadata, MetadataError> {
        let file = Path::new(path);
        if !fs::metadata(file)?.is_file() {
            return Err(MetadataError::NotAFile(path.to_string()));
        }

        let root = file
            .ancestors()
            .skip(1)
            .find(|dir| dir.join(".git").exists())
            .ok_or_else(|| MetadataError::OutsideRepository(path.to_string()))?;

        let remote = read_origin_url(&root.join(".git").join("config"));
        let repository = remote
            .as_deref()
            .and_then(parse_remote_name)
            .or_else(|| {
                root.file_name()
                    .and_then(|n| n.to_str())
                    .map(String::from)
            })
            .ok_or_else(|| MetadataError::OutsideRepository(path.to_string()))?;

        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from)
            .ok_or_else(|| MetadataError::NotAFile(path.to_string()))?;

        Ok(FileMetadata {
            filetype: filetype(file, &name),
            name,
            repository,
        })
    }
}

/// Lowercased extension, or the bare file name for things like `Makefile`.
fn filetype(path: &Path, name: &str) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or_else(|| name.to_string(), str::to_lowercase)
}

/// Reads the `origin` remote URL out of a git config file.
///
/// Worktrees have a `.git` file rather than a directory, in which case this
/// returns `None` and the directory name is used instead.
fn read_origin_url(config_path: &Path) -> Option<String> {
    let content = fs::read_to_string(config_path).ok()?;
    let mut in_origin = false;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_origin = line == r#"[remote "origin"]"#;
            continue;
        }
        if in_origin {
            if let Some((key, value)) = line.split_once('=') {
                if key.trim() == "url" {
                    return Some(value.trim().to_string());
                }
            }
        }
    }
    None
}

/// Extract repo name from a git remote URL.
pub fn parse_remote_name(url: &str) -> Option<String> {
    let name = url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()?
        .trim_end_matches(".git");

    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
