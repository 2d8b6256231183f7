use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::artifact_discovery::{ArtifactCandidate, BuildTarget, filter_by_kind, select_last};
use crate::env_export::{OutputPublisher, copy_output_file};
use crate::error::{Error, Result};
use crate::output_kind::OutputKind;

pub const DEPLOY_DIR_ENV: &str = "BITRISE_DEPLOY_DIR";

/// What an export put into the deploy directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    /// The artifact published as the single path output.
    pub primary: PathBuf,
    /// Every file copied or written to the deploy directory.
    pub deployed: Vec<PathBuf>,
    pub zip: Option<PathBuf>,
}

/// Publishes build artifacts to the deploy directory.
pub struct ArtifactExporter<'a> {
    deploy_dir: PathBuf,
    publisher: &'a mut dyn OutputPublisher,
}

impl<'a> ArtifactExporter<'a> {
    pub fn new(deploy_dir: impl AsRef<Path>, publisher: &'a mut dyn OutputPublisher) -> Self {
        Self {
            deploy_dir: deploy_dir.as_ref().to_path_buf(),
            publisher,
        }
    }

    pub fn export(
        &mut self,
        target: &BuildTarget,
        mut candidates: Vec<ArtifactCandidate>,
    ) -> Result<ExportReport> {
        fs::create_dir_all(&self.deploy_dir).map_err(|e| {
            Error::io(
                format!("Failed to create deploy directory {}", self.deploy_dir.display()),
                e,
            )
        })?;

        if target.kind.is_dir() {
            let chosen = select_last(&candidates).ok_or_else(|| target.no_artifacts())?;
            self.export_directory(target.kind, &chosen.path)
        } else {
            filter_by_kind(target.kind, &mut candidates);
            if candidates.is_empty() {
                return Err(target.no_artifacts());
            }
            self.export_files(target.kind, &candidates)
        }
    }

    fn export_directory(&mut self, kind: OutputKind, artifact: &Path) -> Result<ExportReport> {
        let file_name = base_name(artifact)?;
        let zip_path = self.deploy_dir.join(format!("{}.zip", file_name));

        zip_dir(artifact, &zip_path)?;
        info!("- ${}/{}.zip", DEPLOY_DIR_ENV, file_name);

        let spec = kind.spec();
        let artifact_value = artifact.to_string_lossy();
        self.publisher.publish(spec.path_output, &artifact_value)?;
        info!("- ${}: {}", spec.path_output, artifact_value);

        if let Some(zip_output) = spec.secondary_output {
            let zip_value = zip_path.to_string_lossy();
            self.publisher.publish(zip_output, &zip_value)?;
            info!("- ${}: {}", zip_output, zip_value);
        }

        Ok(ExportReport {
            primary: artifact.to_path_buf(),
            deployed: vec![zip_path.clone()],
            zip: Some(zip_path),
        })
    }

    fn export_files(
        &mut self,
        kind: OutputKind,
        artifacts: &[ArtifactCandidate],
    ) -> Result<ExportReport> {
        let spec = kind.spec();
        let mut deployed = Vec::with_capacity(artifacts.len());

        for artifact in artifacts {
            let destination = self.deploy_dir.join(base_name(&artifact.path)?);
            copy_output_file(&artifact.path, &destination, spec.path_output, self.publisher)?;
            deployed.push(destination);
        }

        let listed: Vec<String> = deployed
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        if let Some(list_output) = spec.secondary_output {
            self.publisher.publish(list_output, &listed.join("\n"))?;
        }

        let primary = deployed
            .last()
            .cloned()
            .ok_or_else(|| Error::config("no artifacts to export"))?;

        info!("- ${}: {}", spec.path_output, primary.display());
        if let Some(list_output) = spec.secondary_output {
            info!("- ${}: {}", list_output, listed.join("|"));
        }

        Ok(ExportReport {
            primary,
            deployed,
            zip: None,
        })
    }
}

fn base_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| Error::config(format!("artifact path has no file name: {}", path.display())))
}

/// Zips `source_dir` into `zip_path`, with the directory itself as the top level entry.
pub fn zip_dir(source_dir: &Path, zip_path: &Path) -> Result<()> {
    let archive_err = |source| Error::Archive {
        path: source_dir.to_path_buf(),
        source,
    };

    let parent = source_dir.parent().unwrap_or(Path::new(""));
    let file = File::create(zip_path)
        .map_err(|e| Error::io(format!("Failed to create {}", zip_path.display()), e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(|source| Error::Walk {
            root: source_dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let name = entry_name(path.strip_prefix(parent).unwrap_or(path));
        let entry_options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(unix_mode(path));

        if entry.file_type().is_symlink() {
            // Stored as a link; framework bundles rely on Versions/Current.
            let target = fs::read_link(path)
                .map_err(|e| Error::io(format!("Failed to read link {}", path.display()), e))?;
            zip.add_symlink(name, target.to_string_lossy(), entry_options)
                .map_err(archive_err)?;
        } else if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), entry_options)
                .map_err(archive_err)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, entry_options).map_err(archive_err)?;
            let mut input = File::open(path)
                .map_err(|e| Error::io(format!("Failed to open {}", path.display()), e))?;
            io::copy(&mut input, &mut zip)
                .map_err(|e| Error::io(format!("Failed to archive {}", path.display()), e))?;
        }
    }

    zip.finish().map_err(archive_err)?;
    Ok(())
}

fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn unix_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::symlink_metadata(path)
        .map(|m| m.permissions().mode() & 0o777)
        .unwrap_or(0o644)
}

#[cfg(not(unix))]
fn unix_mode(path: &Path) -> u32 {
    if path.is_dir() { 0o755 } else { 0o644 }
}
