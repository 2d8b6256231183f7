use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::artifact_discovery::BuildTarget;
use crate::cache::{CACHE_INCLUDE_PATHS, CacheCollector, commit_cache_paths};
use crate::config::{CacheLevel, StepConfig};
use crate::env_export::{Envman, MemoryPublisher, OutputPublisher};
use crate::error::Error;
use crate::export::ArtifactExporter;
use crate::flutter_integration::{FlutterBuilder, flutter_version};
use crate::output_kind::OutputKind;
use crate::signing::{SecurityCli, SettingsStore, prepare_codesigning, remediation};

#[derive(Parser)]
#[command(name = "flutterbuild")]
#[command(about = "Build Flutter apps, export the artifacts and collect dependency caches")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(long, global = true, env = "is_debug_mode")]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the selected platforms and export their artifacts
    Build {
        #[command(flatten)]
        config: StepConfig,

        /// Export the artifacts of a previous build without running flutter
        #[arg(long)]
        skip_build: bool,
    },

    /// Print the dependency cache include list of a project
    Cache {
        /// Root directory of the Flutter project
        #[arg(long, env = "project_location", default_value = ".")]
        project_location: PathBuf,

        /// Collect every dependency cache and export the include list
        #[arg(long)]
        publish: bool,
    },

    /// Check that the required tools are installed
    Doctor,
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Commands::Build { config, skip_build } => build_command(config, skip_build),
        Commands::Cache {
            project_location,
            publish,
        } => cache_command(project_location, publish),
        Commands::Doctor => doctor_command(),
    }
}

fn init_logging(debug: bool) {
    let default_filter = if debug {
        "flutterbuild=debug"
    } else {
        "flutterbuild=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn build_command(config: StepConfig, skip_build: bool) -> Result<()> {
    let project_root = config.project_root()?;
    let targets = config.build_targets(&project_root)?;

    let identity_overridden = config
        .ios_codesign_identity
        .as_deref()
        .is_some_and(|identity| !identity.is_empty());

    if !skip_build && targets.iter().any(|t| t.kind.is_ios()) {
        info!("iOS Codesign settings");
        let settings_path = SettingsStore::default_path()
            .ok_or_else(|| anyhow!("HOME is not set, cannot locate the flutter settings file"))?;
        let mut store = SettingsStore::load(&settings_path)?;
        prepare_codesigning(
            &config.ios_params()?,
            config.ios_codesign_identity.as_deref(),
            &SecurityCli,
            &mut store,
        )
        .context("Failed to prepare iOS code signing")?;
    }

    let mut publisher = Envman::new();
    let deploy_dir = config.deploy_dir();

    for target in &targets {
        if !skip_build {
            info!("Build {}", target.display_name);
            build_target(target, identity_overridden)?;
        }

        info!("Export {} artifact", target.display_name);
        let candidates = target.discover().context("Failed to find artifacts")?;
        ArtifactExporter::new(&deploy_dir, &mut publisher)
            .export(target, candidates)
            .with_context(|| format!("Failed to export {} artifacts", target.display_name))?;
    }

    if config.cache_level == CacheLevel::All {
        info!("Collecting cache");
        collect_cache(&project_root, &mut publisher);
    }

    Ok(())
}

fn build_target(target: &BuildTarget, identity_overridden: bool) -> Result<()> {
    let result = FlutterBuilder::new(&target.project_root, target.kind)
        .args(target.build_args.clone())
        .build();

    if let Err(Error::CodeSigningRequired) = &result {
        warn!("{}", remediation(identity_overridden));
    }

    result.with_context(|| format!("Failed to build {} platform", target.display_name))
}

/// Cache collection never fails the run.
fn collect_cache(project_root: &Path, publisher: &mut dyn OutputPublisher) {
    let entries = CacheCollector::new(project_root).collect_all();
    let existing = std::env::var(CACHE_INCLUDE_PATHS).ok();

    if let Err(e) = commit_cache_paths(&entries, existing.as_deref(), publisher) {
        warn!("Failed to export cache include paths, error: {}", e);
    }
}

fn cache_command(project_location: PathBuf, publish: bool) -> Result<()> {
    let project_root = std::path::absolute(&project_location)
        .with_context(|| format!("Invalid project path: {}", project_location.display()))?;

    if publish {
        collect_cache(&project_root, &mut Envman::new());
        return Ok(());
    }

    let mut preview = MemoryPublisher::default();
    collect_cache(&project_root, &mut preview);
    if let Some(value) = preview.get(CACHE_INCLUDE_PATHS) {
        println!("{}", value);
    }
    Ok(())
}

fn doctor_command() -> Result<()> {
    println!("flutterbuild doctor - checking system requirements...\n");

    let flutter = check_command_available("flutter", "Flutter SDK")?;
    match flutter_version(&flutter) {
        Ok(version) if !version.is_empty() => println!("  {}", version),
        Ok(_) => {}
        Err(e) => println!("  could not read flutter version: {}", e),
    }

    if check_command_available("envman", "envman (output export)").is_err() {
        println!("  Outputs cannot be exported without envman");
    }

    if cfg!(target_os = "macos") {
        check_command_available("security", "security (codesign identities)")?;
    }

    println!("\nSupported output types:");
    for kind in OutputKind::all() {
        let artifact = match kind.extension() {
            Some(ext) => format!(".{} file", ext),
            None => "directory".to_string(),
        };
        println!(
            "    {} -> flutter build {} ({})",
            kind,
            kind.build_subcommand(),
            artifact
        );
    }

    println!("\n✓ flutterbuild doctor check complete");

    Ok(())
}

fn check_command_available(command: &str, description: &str) -> Result<PathBuf> {
    match which::which(command) {
        Ok(path) => {
            println!("✓ {} found at: {}", description, path.display());
            Ok(path)
        }
        Err(_) => {
            println!("✗ {} not found ({})", description, command);
            Err(anyhow!("{} is required but not found in PATH", description))
        }
    }
}
