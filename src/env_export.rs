use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Persists named outputs of a run so later workflow steps can read them.
pub trait OutputPublisher {
    fn publish(&mut self, key: &str, value: &str) -> Result<()>;
}

/// Publishes outputs through the `envman` CLI.
pub struct Envman {
    program: String,
}

impl Envman {
    pub fn new() -> Self {
        Self {
            program: "envman".to_string(),
        }
    }

    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for Envman {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputPublisher for Envman {
    fn publish(&mut self, key: &str, value: &str) -> Result<()> {
        debug!("$ {} add --key {}", self.program, key);

        let output = Command::new(&self.program)
            .args(["add", "--key", key, "--value", value])
            .output()
            .map_err(|e| Error::Publish {
                key: key.to_string(),
                reason: format!("failed to run {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Publish {
                key: key.to_string(),
                reason: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    stderr.trim()
                ),
            });
        }

        Ok(())
    }
}

/// Keeps outputs in memory; used for dry runs.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    values: BTreeMap<String, String>,
}

impl MemoryPublisher {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}

impl OutputPublisher for MemoryPublisher {
    fn publish(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Copies `source` to `destination` and publishes the destination under `key`.
///
/// An existing file at `destination` is overwritten.
pub fn copy_output_file(
    source: &Path,
    destination: &Path,
    key: &str,
    publisher: &mut dyn OutputPublisher,
) -> Result<()> {
    if source != destination {
        fs::copy(source, destination).map_err(|e| {
            Error::io(
                format!(
                    "Failed to copy {} to {}",
                    source.display(),
                    destination.display()
                ),
                e,
            )
        })?;
    }

    publisher.publish(key, &destination.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_output_file_publishes_destination() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("app-release.apk");
        let destination = dir.path().join("deploy-app-release.apk");
        fs::write(&source, b"apk").unwrap();

        let mut publisher = MemoryPublisher::default();
        copy_output_file(&source, &destination, "BITRISE_APK_PATH", &mut publisher).unwrap();

        assert_eq!(fs::read(&destination).unwrap(), b"apk");
        assert_eq!(
            publisher.get("BITRISE_APK_PATH"),
            Some(destination.to_string_lossy().as_ref())
        );
    }

    #[test]
    fn test_copy_output_file_missing_source() {
        let dir = TempDir::new().unwrap();
        let mut publisher = MemoryPublisher::default();

        let err = copy_output_file(
            &dir.path().join("missing.apk"),
            &dir.path().join("out.apk"),
            "BITRISE_APK_PATH",
            &mut publisher,
        )
        .unwrap_err();

        assert!(matches!(err, Error::Io { .. }));
        assert!(publisher.values().is_empty());
    }

    #[test]
    fn test_envman_missing_binary_fails_loudly() {
        let mut envman = Envman::new().program("flutterbuild-test-no-such-envman");
        let err = envman.publish("KEY", "value").unwrap_err();
        assert!(matches!(err, Error::Publish { ref key, .. } if key == "KEY"));
    }
}
