//! iOS code signing identity preparation.
//!
//! `flutter build ios` picks the identity stored under `ios-signing-cert` in
//! `~/.flutter_settings`. The store is loaded, changed and persisted explicitly
//! by the caller.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::flutter_integration::NO_CODESIGN_FLAG;

pub const SIGNING_CERT_KEY: &str = "ios-signing-cert";
pub const SETTINGS_FILE: &str = ".flutter_settings";

/// Key-value store backed by the flutter settings JSON file.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl SettingsStore {
    /// Loads the store; a missing file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                Error::config(format!("Failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(Error::io(format!("Failed to read {}", path.display()), e));
            }
        };

        Ok(Self { path, values })
    }

    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(SETTINGS_FILE))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn persist(&self) -> Result<()> {
        let mut contents = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut contents, formatter);
        serde::Serialize::serialize(&self.values, &mut serializer).map_err(|e| {
            Error::config(format!("Failed to serialize {}: {}", self.path.display(), e))
        })?;

        fs::write(&self.path, contents)
            .map_err(|e| Error::io(format!("Failed to write {}", self.path.display()), e))
    }
}

/// Source of the code signing identities installed on the machine.
pub trait IdentityProvider {
    fn installed_identities(&self) -> Result<Vec<String>>;
}

/// Lists identities with `security find-identity -v -p codesigning`.
pub struct SecurityCli;

impl IdentityProvider for SecurityCli {
    fn installed_identities(&self) -> Result<Vec<String>> {
        let output = Command::new("security")
            .args(["find-identity", "-v", "-p", "codesigning"])
            .output()
            .map_err(|e| Error::io("Failed to run security find-identity", e))?;

        if !output.status.success() {
            return Err(Error::config(format!(
                "security find-identity failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_identities(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Extracts the quoted identity names from `security find-identity` output.
///
/// ```text
///   1) 0123456789ABCDEF "iPhone Developer: Jane Doe (ABCDE12345)"
///      1 valid identities found
/// ```
pub fn parse_identities(output: &str) -> Vec<String> {
    let mut identities = Vec::new();
    for line in output.lines() {
        let Some(start) = line.find('"') else { continue };
        let Some(len) = line[start + 1..].rfind('"') else { continue };
        let name = &line[start + 1..start + 1 + len];
        if !name.is_empty() && !identities.iter().any(|i| i == name) {
            identities.push(name.to_string());
        }
    }
    identities
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningOutcome {
    /// `--no-codesign` was passed, nothing to prepare.
    Skipped,
    /// The configured identity was written to the store.
    Overridden(String),
    /// The identity already in the store will be used.
    Stored(String),
    /// No identity set; flutter chooses one itself.
    Unset,
}

pub fn prepare_codesigning(
    ios_params: &[String],
    override_identity: Option<&str>,
    provider: &dyn IdentityProvider,
    store: &mut SettingsStore,
) -> Result<SigningOutcome> {
    if ios_params.iter().any(|p| p == NO_CODESIGN_FLAG) {
        info!(" - Skipping codesign preparation, {} parameter set", NO_CODESIGN_FLAG);
        return Ok(SigningOutcome::Skipped);
    }

    let installed = provider.installed_identities()?;
    info!(" Installed codesign identities:");
    for identity in &installed {
        info!(" - {}", identity);
    }
    if installed.is_empty() {
        return Err(Error::config("No codesign identities installed"));
    }

    if let Some(identity) = override_identity.filter(|i| !i.is_empty()) {
        warn!(" Override codesign identity:");
        info!(" - Store: {}", identity);
        if !installed.iter().any(|i| i == identity) {
            return Err(Error::config(format!(
                "The selected identity \"{}\" is not installed on the system",
                identity
            )));
        }
        store.set(SIGNING_CERT_KEY, identity);
        store.persist()?;
        return Ok(SigningOutcome::Overridden(identity.to_string()));
    }

    info!(" Stored Flutter codesign settings:");
    match store.get(SIGNING_CERT_KEY) {
        None => {
            info!(" - No codesign identity set");
            Ok(SigningOutcome::Unset)
        }
        Some(stored) => {
            info!(" - {}", stored);
            if !installed.iter().any(|i| i == stored) {
                return Err(Error::config(format!(
                    "Identity \"{}\" is not installed on the system",
                    stored
                )));
            }
            Ok(SigningOutcome::Stored(stored.to_string()))
        }
    }
}

/// Guidance shown when the iOS build reports that code signing is required.
pub fn remediation(identity_overridden: bool) -> &'static str {
    if identity_overridden {
        "Invalid codesign identity is selected, choose the appropriate identity in the step's [iOS Platform Configs>Codesign Identity] input field."
    } else {
        "You have multiple codesign identity installed, select the one you want to use and set its name in the [iOS Platform Configs>Codesign Identity] input field."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FixedIdentities(Vec<&'static str>);

    impl IdentityProvider for FixedIdentities {
        fn installed_identities(&self) -> Result<Vec<String>> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    const DEV: &str = "iPhone Developer: Jane Doe (ABCDE12345)";
    const DIST: &str = "iPhone Distribution: Example Inc (FGHIJ67890)";

    #[test]
    fn test_parse_identities() {
        let output = "  1) 0123456789ABCDEF \"iPhone Developer: Jane Doe (ABCDE12345)\"\n  \
                      2) FEDCBA9876543210 \"iPhone Distribution: Example Inc (FGHIJ67890)\"\n     \
                      2 valid identities found\n";
        assert_eq!(parse_identities(output), vec![DEV, DIST]);
    }

    #[test]
    fn test_store_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);

        let mut store = SettingsStore::load(&path).unwrap();
        assert_eq!(store.get(SIGNING_CERT_KEY), None);
        store.set("enable-web", "true");
        store.set(SIGNING_CERT_KEY, DEV);
        store.persist().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\n \"enable-web\": \"true\""));

        let reloaded = SettingsStore::load(&path).unwrap();
        assert_eq!(reloaded.get(SIGNING_CERT_KEY), Some(DEV));
        assert_eq!(reloaded.get("enable-web"), Some("true"));
    }

    #[test]
    fn test_no_codesign_flag_skips_preparation() {
        let mut store = SettingsStore::default();
        let outcome = prepare_codesigning(
            &["--no-codesign".to_string()],
            Some(DEV),
            &FixedIdentities(vec![]),
            &mut store,
        )
        .unwrap();
        assert_eq!(outcome, SigningOutcome::Skipped);
    }

    #[test]
    fn test_no_installed_identities_fails() {
        let mut store = SettingsStore::default();
        let err = prepare_codesigning(&[], None, &FixedIdentities(vec![]), &mut store).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_override_identity_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let mut store = SettingsStore::load(&path).unwrap();

        let outcome =
            prepare_codesigning(&[], Some(DIST), &FixedIdentities(vec![DEV, DIST]), &mut store)
                .unwrap();

        assert_eq!(outcome, SigningOutcome::Overridden(DIST.to_string()));
        assert_eq!(
            SettingsStore::load(&path).unwrap().get(SIGNING_CERT_KEY),
            Some(DIST)
        );
    }

    #[test]
    fn test_override_identity_must_be_installed() {
        let mut store = SettingsStore::default();
        let err = prepare_codesigning(&[], Some(DIST), &FixedIdentities(vec![DEV]), &mut store)
            .unwrap_err();
        assert!(err.to_string().contains("is not installed"));
        assert_eq!(store.get(SIGNING_CERT_KEY), None);
    }

    #[test]
    fn test_stored_identity_checked() {
        let mut store = SettingsStore::default();
        store.set(SIGNING_CERT_KEY, DEV);

        let outcome =
            prepare_codesigning(&[], None, &FixedIdentities(vec![DEV]), &mut store).unwrap();
        assert_eq!(outcome, SigningOutcome::Stored(DEV.to_string()));

        let err =
            prepare_codesigning(&[], None, &FixedIdentities(vec![DIST]), &mut store).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let mut empty = SettingsStore::default();
        let outcome =
            prepare_codesigning(&[], None, &FixedIdentities(vec![DEV]), &mut empty).unwrap();
        assert_eq!(outcome, SigningOutcome::Unset);
    }
}
