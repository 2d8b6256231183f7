use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::output_kind::{OutputKind, Platform};

/// `*` also matches path separators, so `*build/app/*.apk` matches anywhere
/// below the project root.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// One platform build of the project, created from configuration.
#[derive(Debug, Clone)]
pub struct BuildTarget {
    pub display_name: String,
    pub platform: Platform,
    pub kind: OutputKind,
    pub output_patterns: Vec<String>,
    pub project_root: PathBuf,
    pub build_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCandidate {
    pub path: PathBuf,
    pub is_dir: bool,
}

impl ArtifactCandidate {
    pub fn new(path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            path: path.into(),
            is_dir,
        }
    }
}

impl BuildTarget {
    /// Candidates matching any of the output patterns, pattern by pattern in walk order.
    pub fn artifact_paths(&self) -> Result<Vec<ArtifactCandidate>> {
        let want_dir = self.kind.is_dir();
        let mut candidates = Vec::new();

        for pattern in &self.output_patterns {
            let paths = find_paths(&self.project_root, pattern, want_dir)?;
            candidates.extend(
                paths
                    .into_iter()
                    .map(|path| ArtifactCandidate::new(path, want_dir)),
            );
        }

        Ok(candidates)
    }

    /// Like [`BuildTarget::artifact_paths`], but an empty result is an error.
    pub fn discover(&self) -> Result<Vec<ArtifactCandidate>> {
        let candidates = self.artifact_paths()?;
        if candidates.is_empty() {
            return Err(self.no_artifacts());
        }
        Ok(candidates)
    }

    pub fn no_artifacts(&self) -> Error {
        Error::NoArtifacts {
            patterns: self.output_patterns.clone(),
            root: self.project_root.clone(),
        }
    }
}

/// Walks `root` and returns every entry whose directory-ness equals `want_dir`
/// and whose path matches the shell glob `pattern`.
///
/// Entries are visited in file name order; walk errors abort the search.
pub fn find_paths(root: &Path, pattern: &str, want_dir: bool) -> Result<Vec<PathBuf>> {
    let glob = Pattern::new(pattern).map_err(|source| Error::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut out = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| Error::Walk {
            root: root.to_path_buf(),
            source,
        })?;

        if entry.file_type().is_dir() != want_dir {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if glob.matches_path_with(path, MATCH_OPTIONS)
            || glob.matches_path_with(relative, MATCH_OPTIONS)
        {
            out.push(path.to_path_buf());
        }
    }

    if out.is_empty() {
        debug!(
            "couldn't find output artifact on path: {}",
            root.join(pattern).display()
        );
    }

    Ok(out)
}

/// Keeps only the candidates of `kind`, preserving their relative order.
pub fn filter_by_kind(kind: OutputKind, candidates: &mut Vec<ArtifactCandidate>) {
    candidates.retain(|candidate| {
        let keep = kind.matches(&candidate.path);
        if !keep {
            debug!(
                "Artifact ({}) found by output patterns, but it's not the selected output type ({}) - Skip",
                candidate.path.display(),
                kind
            );
        }
        keep
    });
}

/// Picks the last candidate in walk order, warning when there was more than one.
pub fn select_last(candidates: &[ArtifactCandidate]) -> Option<&ArtifactCandidate> {
    let chosen = candidates.last()?;
    if candidates.len() > 1 {
        let all: Vec<String> = candidates
            .iter()
            .map(|c| c.path.display().to_string())
            .collect();
        warn!(
            "- Multiple artifacts found: [{}], exporting {}",
            all.join(", "),
            chosen.path.display()
        );
    }
    Some(chosen)
}
