use std::path::{Component, Path, PathBuf};

use thiserror::Error;

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path contains unsupported component")]
    UnsupportedComponent,
    #[error("path is outside the sync root")]
    OutsideRoot,
    #[error("path is not valid UTF-8")]
    NotUtf8,
    #[error("invalid exclusion pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Canonical name of `path`: forward-slash separated, relative to `root`,
/// without a trailing slash.
pub fn canonical_name(root: &Path, path: &Path) -> Result<String, PathError> {
    let relative = path.strip_prefix(root).map_err(|_| PathError::OutsideRoot)?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or(PathError::NotUtf8)?),
            Component::CurDir => continue,
            Component::RootDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(parts.join("/"))
}

pub fn local_path_for(root: &Path, name: &str) -> Result<PathBuf, PathError> {
    let trimmed = name.trim_matches('/');
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = root.to_path_buf();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => continue,
            Component::RootDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    Ok(out)
}

/// Splits a remote object name into its store key and directory flag.
/// Directory placeholders end with `/`.
pub fn split_remote_name(name: &str) -> (&str, bool) {
    match name.strip_suffix('/') {
        Some(key) => (key.trim_end_matches('/'), true),
        None => (name, false),
    }
}

pub fn remote_name_for(key: &str, is_dir: bool) -> String {
    if is_dir {
        format!("{key}/")
    } else {
        key.to_string()
    }
}

pub fn parent_name(name: &str) -> Option<&str> {
    name.rsplit_once('/').map(|(parent, _)| parent)
}

/// Filename patterns that keep untracked local files from being uploaded.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    patterns: Vec<glob::Pattern>,
}

impl ExclusionFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PathError> {
        let patterns = patterns
            .iter()
            .map(|pattern| pattern.as_ref().trim())
            .filter(|pattern| !pattern.is_empty())
            .map(glob::Pattern::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        let file_name = name.rsplit('/').next().unwrap_or(name);
        file_name.ends_with(PARTIAL_SUFFIX)
            || self
                .patterns
                .iter()
                .any(|pattern| pattern.matches(file_name))
    }
}
