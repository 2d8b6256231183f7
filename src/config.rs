//! Step inputs. Every input can be passed as a flag or through the environment
//! variable the CI step exposes it as.

use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::artifact_discovery::BuildTarget;
use crate::error::{Error, Result};
use crate::output_kind::{OutputKind, Platform};

pub const DEFAULT_IOS_APP_PATTERN: &str = "*build/ios/iphoneos/*.app";
pub const DEFAULT_IOS_ARCHIVE_PATTERN: &str = "*build/ios/archive/*.xcarchive";
pub const DEFAULT_ANDROID_PATTERN: &str =
    "*build/app/outputs/flutter-apk/*.apk\n*build/app/outputs/bundle/*/*.aab";
pub const LEGACY_BUNDLE_PATTERN: &str = "*build/app/outputs/bundle/*/*.aab";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheLevel {
    All,
    None,
}

#[derive(Args, Debug, Clone)]
pub struct StepConfig {
    /// Root directory of the Flutter project
    #[arg(long, env = "project_location", default_value = ".")]
    pub project_location: PathBuf,

    /// Platforms to build
    #[arg(long, env = "platform", value_enum, default_value_t = Platform::Both)]
    pub platform: Platform,

    /// iOS output type: app or archive
    #[arg(long, env = "ios_output_type", default_value = "app", value_parser = parse_ios_kind)]
    pub ios_output_type: OutputKind,

    /// Newline separated glob patterns locating the iOS artifact
    #[arg(long, env = "ios_output_pattern")]
    pub ios_output_pattern: Option<String>,

    /// Android output type: apk or appbundle
    #[arg(
        long,
        env = "android_output_type",
        default_value = "apk",
        value_parser = parse_android_kind
    )]
    pub android_output_type: OutputKind,

    /// Newline separated glob patterns locating the Android artifacts
    #[arg(long, env = "android_output_pattern", default_value = DEFAULT_ANDROID_PATTERN)]
    pub android_output_pattern: String,

    /// Deprecated, use --android-output-pattern
    #[arg(long, env = "android_bundle_output_pattern", hide = true)]
    pub android_bundle_output_pattern: Option<String>,

    /// Arguments passed to every flutter build
    #[arg(long, env = "additional_build_params", default_value = "", allow_hyphen_values = true)]
    pub additional_build_params: String,

    /// Arguments passed to the iOS build only
    #[arg(long, env = "ios_additional_params", default_value = "", allow_hyphen_values = true)]
    pub ios_additional_params: String,

    /// Arguments passed to the Android build only
    #[arg(long, env = "android_additional_params", default_value = "", allow_hyphen_values = true)]
    pub android_additional_params: String,

    /// Codesign identity to store in the flutter settings before the iOS build
    #[arg(long, env = "ios_codesign_identity")]
    pub ios_codesign_identity: Option<String>,

    /// Collect dependency caches after the build
    #[arg(long, env = "cache_level", value_enum, default_value_t = CacheLevel::All)]
    pub cache_level: CacheLevel,

    /// Directory receiving the exported artifacts
    #[arg(long, env = "BITRISE_DEPLOY_DIR")]
    pub deploy_dir: Option<PathBuf>,
}

fn parse_ios_kind(s: &str) -> std::result::Result<OutputKind, String> {
    match s.parse::<OutputKind>() {
        Ok(kind) if kind.is_ios() => Ok(kind),
        _ => Err(format!("invalid iOS output type '{}', expected app or archive", s)),
    }
}

fn parse_android_kind(s: &str) -> std::result::Result<OutputKind, String> {
    match s.parse::<OutputKind>() {
        Ok(kind) if !kind.is_ios() => Ok(kind),
        _ => Err(format!("invalid Android output type '{}', expected apk or appbundle", s)),
    }
}

impl StepConfig {
    /// Absolute project root; it has to be an existing directory.
    pub fn project_root(&self) -> Result<PathBuf> {
        let root = std::path::absolute(&self.project_location).map_err(|e| {
            Error::io(
                format!(
                    "Failed to get absolute project path for {}",
                    self.project_location.display()
                ),
                e,
            )
        })?;

        if !root.is_dir() {
            return Err(Error::config(format!(
                "Project path does not exist: {}",
                root.display()
            )));
        }

        Ok(root)
    }

    pub fn deploy_dir(&self) -> PathBuf {
        self.deploy_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("deploy"))
    }

    pub fn ios_patterns(&self) -> Vec<String> {
        match self.ios_output_pattern.as_deref() {
            Some(pattern) => split_patterns(pattern),
            None if self.ios_output_type == OutputKind::Archive => {
                split_patterns(DEFAULT_IOS_ARCHIVE_PATTERN)
            }
            None => split_patterns(DEFAULT_IOS_APP_PATTERN),
        }
    }

    pub fn android_patterns(&self) -> Vec<String> {
        match self.android_bundle_output_pattern.as_deref() {
            Some(bundle) if !bundle.is_empty() && bundle != LEGACY_BUNDLE_PATTERN => {
                warn!(
                    "step input 'App bundle output pattern' (android_bundle_output_pattern) is deprecated, use 'Output (.apk, .aab) pattern' (android_output_pattern) instead!"
                );
                info!(
                    "Using 'App bundle output pattern' (android_bundle_output_pattern) instead of 'Output (.apk, .aab) pattern' (android_output_pattern)."
                );
                split_patterns(bundle)
            }
            _ => split_patterns(&self.android_output_pattern),
        }
    }

    pub fn ios_params(&self) -> Result<Vec<String>> {
        split_params(&self.ios_additional_params)
    }

    /// The targets to build, iOS first, filtered by the platform selector.
    pub fn build_targets(&self, project_root: &Path) -> Result<Vec<BuildTarget>> {
        let general = split_params(&self.additional_build_params)?;
        let mut targets = Vec::new();

        if self.platform.selects(Platform::Ios) {
            let mut args = general.clone();
            args.extend(self.ios_params()?);
            targets.push(BuildTarget {
                display_name: "iOS".to_string(),
                platform: Platform::Ios,
                kind: self.ios_output_type,
                output_patterns: self.ios_patterns(),
                project_root: project_root.to_path_buf(),
                build_args: args,
            });
        }

        if self.platform.selects(Platform::Android) {
            let mut args = general;
            args.extend(split_params(&self.android_additional_params)?);
            targets.push(BuildTarget {
                display_name: "Android".to_string(),
                platform: Platform::Android,
                kind: self.android_output_type,
                output_patterns: self.android_patterns(),
                project_root: project_root.to_path_buf(),
                build_args: args,
            });
        }

        for target in &targets {
            if target.output_patterns.is_empty() {
                return Err(Error::config(format!(
                    "{} output pattern is empty",
                    target.display_name
                )));
            }
            debug!(
                "{}: {} patterns={:?} args={:?}",
                target.display_name, target.kind, target.output_patterns, target.build_args
            );
        }

        Ok(targets)
    }
}

fn split_patterns(patterns: &str) -> Vec<String> {
    patterns
        .lines()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_params(params: &str) -> Result<Vec<String>> {
    shell_words::split(params)
        .map_err(|e| Error::config(format!("Failed to parse build parameters '{}': {}", params, e)))
}
