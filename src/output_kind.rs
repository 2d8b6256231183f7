use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::Error;

/// The kind of artifact a build target produces. Exactly one is active per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Apk,
    AppBundle,
    IosApp,
    Archive,
}

/// One row of the kind mapping table.
#[derive(Debug)]
pub struct KindSpec {
    pub kind: OutputKind,
    pub name: &'static str,
    pub build_subcommand: &'static str,
    pub extension: Option<&'static str>,
    pub is_dir: bool,
    pub path_output: &'static str,
    /// List output for file kinds, zip output for the archive kind.
    pub secondary_output: Option<&'static str>,
}

const KIND_TABLE: &[KindSpec] = &[
    KindSpec {
        kind: OutputKind::Apk,
        name: "apk",
        build_subcommand: "apk",
        extension: Some("apk"),
        is_dir: false,
        path_output: "BITRISE_APK_PATH",
        secondary_output: Some("BITRISE_APK_PATH_LIST"),
    },
    KindSpec {
        kind: OutputKind::AppBundle,
        name: "appbundle",
        build_subcommand: "appbundle",
        extension: Some("aab"),
        is_dir: false,
        path_output: "BITRISE_AAB_PATH",
        secondary_output: Some("BITRISE_AAB_PATH_LIST"),
    },
    KindSpec {
        kind: OutputKind::IosApp,
        name: "app",
        build_subcommand: "ios",
        extension: None,
        is_dir: true,
        path_output: "BITRISE_APP_DIR_PATH",
        secondary_output: None,
    },
    KindSpec {
        kind: OutputKind::Archive,
        name: "archive",
        build_subcommand: "ipa",
        extension: None,
        is_dir: true,
        path_output: "BITRISE_XCARCHIVE_PATH",
        secondary_output: Some("BITRISE_XCARCHIVE_ZIP_PATH"),
    },
];

impl OutputKind {
    pub fn all() -> impl Iterator<Item = OutputKind> {
        KIND_TABLE.iter().map(|row| row.kind)
    }

    pub fn spec(&self) -> &'static KindSpec {
        // Rows are declared in variant order.
        &KIND_TABLE[*self as usize]
    }

    pub fn as_str(&self) -> &'static str {
        self.spec().name
    }

    pub fn build_subcommand(&self) -> &'static str {
        self.spec().build_subcommand
    }

    pub fn extension(&self) -> Option<&'static str> {
        self.spec().extension
    }

    pub fn is_dir(&self) -> bool {
        self.spec().is_dir
    }

    pub fn is_ios(&self) -> bool {
        matches!(self, OutputKind::IosApp | OutputKind::Archive)
    }

    /// Whether `path` is an artifact of this kind. Directory kinds accept any path.
    pub fn matches(&self, path: &Path) -> bool {
        match self.extension() {
            Some(ext) => path.extension().is_some_and(|e| e == ext),
            None => true,
        }
    }
}

impl FromStr for OutputKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KIND_TABLE
            .iter()
            .find(|row| row.name == s)
            .map(|row| row.kind)
            .ok_or_else(|| {
                Error::config(format!(
                    "unsupported output type: {}. Supported output types: apk, appbundle, app, archive",
                    s
                ))
            })
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which platforms a run builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Platform {
    Both,
    Ios,
    Android,
}

impl Platform {
    pub fn selects(&self, target: Platform) -> bool {
        *self == Platform::Both || *self == target
    }
}
