//! Readers for the Dart package resolution files written by `flutter pub get`.
//!
//! Two formats exist: the legacy line-oriented `.packages` file and the newer
//! `.dart_tool/package_config.json`. Both are reduced to the same
//! package name to [`PackageLocation`] mapping.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

pub const LEGACY_MANIFEST: &str = ".packages";
pub const PACKAGE_CONFIG: &str = ".dart_tool/package_config.json";

/// Where a resolved package's source lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLocation {
    /// URI scheme; empty for scheme-less references.
    pub scheme: String,
    /// Decoded path component of the URI.
    pub path: String,
}

impl PackageLocation {
    pub fn new(scheme: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            path: path.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.scheme.is_empty() || self.scheme == "file"
    }

    /// Parses a location URI. Scheme-less references are kept as plain paths.
    pub fn parse(uri: &str) -> Result<Self> {
        match Url::parse(uri) {
            Ok(url) => Ok(Self::from_url(&url)),
            Err(url::ParseError::RelativeUrlWithoutBase) => Self::parse_relative(uri),
            Err(_) => Err(Error::ManifestUri {
                uri: uri.to_string(),
            }),
        }
    }

    fn from_url(url: &Url) -> Self {
        let path = match url.scheme() {
            "file" => url
                .to_file_path()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| url.path().to_string()),
            _ => url.path().to_string(),
        };
        Self::new(url.scheme(), path)
    }

    fn parse_relative(uri: &str) -> Result<Self> {
        // Resolving against a throwaway base validates the reference.
        let base = Url::parse("file:///").map_err(|_| Error::ManifestUri {
            uri: uri.to_string(),
        })?;
        base.join(uri).map_err(|_| Error::ManifestUri {
            uri: uri.to_string(),
        })?;

        let end = uri.find(['?', '#']).unwrap_or(uri.len());
        Ok(Self::new("", &uri[..end]))
    }
}

pub type PackageLocations = BTreeMap<String, PackageLocation>;

/// Parses the legacy `.packages` format: `name:uri` per line, `#` comments,
/// blank lines ignored, `\r` and `\n` both accepted as line separators.
pub fn parse_legacy(contents: &str) -> Result<PackageLocations> {
    let contents = contents.replace('\r', "\n");
    let mut packages = PackageLocations::new();

    for line in contents.split('\n') {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        // analyzer:file:///Users/vagrant/.pub-cache/hosted/pub.dartlang.org/analyzer-0.36.4/lib/
        let (name, uri) = line.split_once(':').ok_or_else(|| Error::ManifestLine {
            line: line.to_string(),
        })?;

        packages.insert(name.to_string(), PackageLocation::parse(uri)?);
    }

    Ok(packages)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageConfig {
    #[serde(default)]
    packages: Vec<PackageEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageEntry {
    name: String,
    root_uri: String,
    #[serde(default)]
    package_uri: String,
}

/// Parses `package_config.json`; each package lives at `rootUri` joined with `packageUri`.
pub fn parse_package_config(contents: &str) -> Result<PackageLocations> {
    let config: PackageConfig = serde_json::from_str(contents)?;
    let mut packages = PackageLocations::new();

    for entry in config.packages {
        let location = join_location(&entry.root_uri, &entry.package_uri)?;
        packages.insert(entry.name, location);
    }

    Ok(packages)
}

fn join_location(root_uri: &str, package_uri: &str) -> Result<PackageLocation> {
    let joined_err = || Error::ManifestUri {
        uri: format!("{}/{}", root_uri.trim_end_matches('/'), package_uri),
    };

    match Url::parse(root_uri) {
        Ok(mut root) => {
            if !root.path().ends_with('/') {
                let dir_path = format!("{}/", root.path());
                root.set_path(&dir_path);
            }
            let url = root.join(package_uri).map_err(|_| joined_err())?;
            Ok(PackageLocation::from_url(&url))
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let joined = if package_uri.is_empty() {
                root_uri.to_string()
            } else {
                format!("{}/{}", root_uri.trim_end_matches('/'), package_uri)
            };
            PackageLocation::parse(&joined)
        }
        Err(_) => Err(joined_err()),
    }
}

/// Locates and reads the package resolution file of a Flutter project.
pub struct ManifestReader {
    project_dir: PathBuf,
}

impl ManifestReader {
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
        }
    }

    pub fn legacy_path(&self) -> PathBuf {
        self.project_dir.join(LEGACY_MANIFEST)
    }

    pub fn package_config_path(&self) -> PathBuf {
        self.project_dir.join(PACKAGE_CONFIG)
    }

    /// Reads `.packages` if it exists, otherwise `package_config.json`.
    ///
    /// Only a missing legacy file falls through; a malformed one is an error
    /// even when a valid JSON config sits next to it.
    pub fn read(&self) -> Result<PackageLocations> {
        let legacy_path = self.legacy_path();
        if let Some(contents) = read_optional(&legacy_path)? {
            debug!("Reading package resolution file: {}", legacy_path.display());
            return parse_legacy(&contents);
        }

        let config_path = self.package_config_path();
        match read_optional(&config_path)? {
            Some(contents) => {
                debug!("Reading package config: {}", config_path.display());
                parse_package_config(&contents)
            }
            None => Err(Error::ManifestNotFound(config_path)),
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(
            format!("Failed to read package resolution file {}", path.display()),
            e,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_legacy_single_entry() {
        let packages = parse_legacy("pkg:file:///abs/pkg/lib/\n").unwrap();

        assert_eq!(packages.len(), 1);
        assert_eq!(packages["pkg"], PackageLocation::new("file", "/abs/pkg/lib/"));
    }

    #[test]
    fn test_legacy_comments_blank_lines_and_carriage_returns() {
        let contents = "# Generated by pub on 2020-01-01\r\n\r\n\
                        async:file:///home/u/.pub-cache/hosted/pub.dartlang.org/async-2.4.1/lib/\r\n\
                        myapp:lib/\r\n";
        let packages = parse_legacy(contents).unwrap();

        assert_eq!(packages.len(), 2);
        assert_eq!(
            packages["async"].path,
            "/home/u/.pub-cache/hosted/pub.dartlang.org/async-2.4.1/lib/"
        );
        assert_eq!(packages["myapp"], PackageLocation::new("", "lib/"));
    }

    #[test]
    fn test_legacy_line_without_colon_aborts() {
        let err = parse_legacy("good:file:///a/lib/\nbroken-line\n").unwrap_err();
        assert!(matches!(err, Error::ManifestLine { ref line } if line == "broken-line"));
    }

    #[test]
    fn test_legacy_malformed_uri_aborts() {
        let err = parse_legacy("pkg:http://[::1/lib/\n").unwrap_err();
        assert!(matches!(err, Error::ManifestUri { .. }));
    }

    #[test]
    fn test_legacy_last_entry_wins() {
        let packages = parse_legacy("pkg:file:///one/lib/\npkg:file:///two/lib/\n").unwrap();
        assert_eq!(packages["pkg"].path, "/two/lib/");
    }

    #[test]
    fn test_percent_encoded_path_is_decoded() {
        let location = PackageLocation::parse("file:///Users/me/My%20Apps/lib/").unwrap();
        assert_eq!(location.path, "/Users/me/My Apps/lib/");
    }

    #[test]
    fn test_non_file_scheme_is_kept() {
        let location = PackageLocation::parse("https://example.com/pkg/lib/").unwrap();
        assert_eq!(location.scheme, "https");
        assert!(!location.is_local());
    }

    #[test]
    fn test_package_config_joins_root_and_package_uri() {
        let contents = r#"{
            "configVersion": 2,
            "packages": [
                {
                    "name": "async",
                    "rootUri": "file:///home/u/.pub-cache/hosted/pub.dartlang.org/async-2.8.2",
                    "packageUri": "lib/",
                    "languageVersion": "2.12"
                },
                {
                    "name": "myapp",
                    "rootUri": "../",
                    "packageUri": "lib/"
                }
            ],
            "generator": "pub"
        }"#;
        let packages = parse_package_config(contents).unwrap();

        assert_eq!(
            packages["async"],
            PackageLocation::new(
                "file",
                "/home/u/.pub-cache/hosted/pub.dartlang.org/async-2.8.2/lib/"
            )
        );
        assert_eq!(packages["myapp"], PackageLocation::new("", "../lib/"));
    }

    #[test]
    fn test_package_config_invalid_json() {
        let err = parse_package_config("{ not json").unwrap_err();
        assert!(matches!(err, Error::ManifestJson(_)));
    }

    #[test]
    fn test_package_config_malformed_root_uri() {
        let contents =
            r#"{"packages":[{"name":"bad","rootUri":"http://[::1","packageUri":"lib/"}]}"#;
        let err = parse_package_config(contents).unwrap_err();
        assert!(matches!(err, Error::ManifestUri { .. }));
    }

    #[test]
    fn test_reader_prefers_legacy_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".packages"), "a:file:///x/.pub-cache/a/lib/\n").unwrap();
        fs::create_dir_all(dir.path().join(".dart_tool")).unwrap();
        fs::write(
            dir.path().join(PACKAGE_CONFIG),
            r#"{"packages":[{"name":"b","rootUri":"file:///y","packageUri":"lib/"}]}"#,
        )
        .unwrap();

        let packages = ManifestReader::new(dir.path()).read().unwrap();
        assert!(packages.contains_key("a"));
        assert!(!packages.contains_key("b"));
    }

    #[test]
    fn test_reader_falls_back_to_package_config_only_when_legacy_absent() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".dart_tool")).unwrap();
        fs::write(
            dir.path().join(PACKAGE_CONFIG),
            r#"{"packages":[{"name":"b","rootUri":"file:///y","packageUri":"lib/"}]}"#,
        )
        .unwrap();

        let reader = ManifestReader::new(dir.path());
        assert!(reader.read().unwrap().contains_key("b"));

        // A corrupt legacy file is not skipped in favour of the JSON config.
        fs::write(dir.path().join(".packages"), "corrupt\n").unwrap();
        assert!(matches!(reader.read().unwrap_err(), Error::ManifestLine { .. }));
    }

    #[test]
    fn test_reader_without_any_manifest() {
        let dir = TempDir::new().unwrap();
        let err = ManifestReader::new(dir.path()).read().unwrap_err();
        assert!(matches!(err, Error::ManifestNotFound(_)));
    }
}
