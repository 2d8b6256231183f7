//! Error types for flutterbuild
//!
//! Library code returns [`Result<T>`]; the CLI wraps these in `anyhow` for
//! context chains.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    // Discovery errors
    #[error("Failed to walk {}: {source}", .root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Invalid output pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error(
        "Artifact path pattern ({}) did not match any artifacts on the path ({})",
        .patterns.join(", "),
        .root.display()
    )]
    NoArtifacts { patterns: Vec<String>, root: PathBuf },

    // Manifest errors
    #[error("Package resolution file not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("unexpected line format: {line}")]
    ManifestLine { line: String },

    #[error("could not parse location URI: {uri}")]
    ManifestUri { uri: String },

    #[error("Failed to parse package config JSON: {0}")]
    ManifestJson(#[from] serde_json::Error),

    #[error("package {package} location is the root directory")]
    RootPackageLocation { package: String },

    // Build errors
    #[error("Code signing is required to build the iOS app")]
    CodeSigningRequired,

    #[error("flutter build {subcommand} failed: {status}")]
    BuildFailed { subcommand: String, status: String },

    // Export errors
    #[error("Failed to export output {key}: {reason}")]
    Publish { key: String, reason: String },

    #[error("Failed to archive {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn config(reason: impl Into<String>) -> Self {
        Error::Config {
            reason: reason.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Remediation text for errors the user can fix from their step inputs.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::NoArtifacts { .. } => Some(
                "Check that 'iOS/Android Output Pattern' and 'Project Location' is correct.",
            ),
            Error::Config { .. } => Some(
                "Review the step inputs; every input can also be set as an environment variable.",
            ),
            Error::CodeSigningRequired => Some(
                "Set the codesign identity to use in the [iOS Platform Configs>Codesign Identity] input field.",
            ),
            _ => None,
        }
    }
}
