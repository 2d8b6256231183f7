//! Dependency cache collection.
//!
//! The pub cache layout that drives [`cacheable_pub_paths`]:
//!
//! ```text
//! .pub-cache
//! |- git                                   packages from git sources
//! |   |- cache
//! |   |   |- <package>-<commit>            bare clone, needed to avoid re-fetching
//! |   |- <package>-<commit>                checked out package
//! |       |- lib                           resolved source path
//! |- hosted
//!     |- pub.dartlang.org
//!         |- async-2.4.1
//!             |- lib                       resolved source path
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::env_export::OutputPublisher;
use crate::error::{Error, Result};
use crate::manifest::{ManifestReader, PackageLocations};

pub const CACHE_ROOT_MARKER: &str = ".pub-cache";
pub const GIT_SOURCES_MARKER: &str = "git";
pub const PACKAGE_LEAF: &str = "lib";
pub const CACHE_INCLUDE_PATHS: &str = "BITRISE_CACHE_INCLUDE_PATHS";

/// Directories that must be cached to restore every resolved package from the pub cache.
///
/// Packages outside the pub cache, relative or non-file locations are skipped.
/// All git-sourced packages share a single `.pub-cache/git` entry.
pub fn cacheable_pub_paths(packages: &PackageLocations) -> Result<Vec<PathBuf>> {
    let mut cache_paths = BTreeSet::new();
    let mut git_root_added = false;

    for (package, location) in packages {
        if !location.is_local() {
            debug!(
                "Flutter dependency cache: ignoring non-file scheme package: {}",
                location.path
            );
            continue;
        }

        let path = Path::new(&location.path);
        if !path.is_absolute() {
            debug!(
                "Flutter dependency cache: ignoring relative package: {}",
                location.path
            );
            continue;
        }

        let trimmed = location.path.trim_end_matches(std::path::MAIN_SEPARATOR);
        let path = Path::new(trimmed);
        let components = path_components(path);

        if components.is_empty() {
            return Err(Error::RootPackageLocation {
                package: package.clone(),
            });
        }

        let Some(cache_root_index) = components.iter().position(|c| c == CACHE_ROOT_MARKER)
        else {
            debug!(
                "Flutter dependency cache: package not in system dependency cache: {}",
                trimmed
            );
            continue;
        };

        if components.last().map(String::as_str) != Some(PACKAGE_LEAF) {
            warn!(
                "Flutter dependency cache: package path does not have top level '{}' element: {}",
                PACKAGE_LEAF, trimmed
            );
            continue;
        }

        let git_index = cache_root_index + 1;
        if components.len() > git_index + 1 && components[git_index] == GIT_SOURCES_MARKER {
            debug!(
                "Flutter dependency cache: found pub package with git source: {}",
                trimmed
            );
            if !git_root_added {
                // .pub-cache/git also holds the bare clones under git/cache.
                let levels_up = components.len() - (git_index + 1);
                if let Some(git_root) = path.ancestors().nth(levels_up) {
                    cache_paths.insert(git_root.to_path_buf());
                    git_root_added = true;
                }
            }
            continue;
        }

        if let Some(package_root) = path.parent() {
            cache_paths.insert(package_root.to_path_buf());
        }
    }

    Ok(cache_paths.into_iter().collect())
}

fn path_components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect()
}

/// A path to cache, optionally keyed on an indicator file whose change invalidates it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub indicator: Option<PathBuf>,
}

impl CacheEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            indicator: None,
        }
    }

    pub fn with_indicator(path: impl Into<PathBuf>, indicator: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            indicator: Some(indicator.into()),
        }
    }
}

impl fmt::Display for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.indicator {
            Some(indicator) => write!(f, "{} -> {}", self.path.display(), indicator.display()),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// Collects cache entries for the dependency managers a Flutter project uses.
pub struct CacheCollector {
    project_dir: PathBuf,
    home_dir: Option<PathBuf>,
}

impl CacheCollector {
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            home_dir: std::env::var_os("HOME").map(PathBuf::from),
        }
    }

    pub fn home_dir(mut self, home_dir: Option<PathBuf>) -> Self {
        self.home_dir = home_dir;
        self
    }

    pub fn cocoapods(&self) -> Result<Option<CacheEntry>> {
        let ios_dir = self.project_dir.join("ios");
        let lock_file = ios_dir.join("Podfile.lock");
        if !exists(&lock_file)? {
            return Ok(None);
        }
        Ok(Some(CacheEntry::with_indicator(ios_dir.join("Pods"), lock_file)))
    }

    pub fn carthage(&self) -> Result<Option<CacheEntry>> {
        let ios_dir = self.project_dir.join("ios");
        let resolved = ios_dir.join("Cartfile.resolved");
        if !exists(&resolved)? {
            return Ok(None);
        }
        Ok(Some(CacheEntry::with_indicator(ios_dir.join("Carthage"), resolved)))
    }

    pub fn android(&self) -> Result<Vec<CacheEntry>> {
        let android_dir = self.project_dir.join("android");
        if !android_dir.is_dir() {
            return Ok(Vec::new());
        }

        let build_gradle = android_dir.join("build.gradle");
        let indicator = exists(&build_gradle)?.then_some(build_gradle);
        let gradle_entry = |path: PathBuf| CacheEntry {
            path,
            indicator: indicator.clone(),
        };

        let mut entries = Vec::new();
        if let Some(home) = &self.home_dir {
            entries.push(gradle_entry(home.join(".gradle").join("caches")));
            entries.push(gradle_entry(home.join(".gradle").join("wrapper")));
        }
        entries.push(gradle_entry(android_dir.join(".gradle")));

        Ok(entries)
    }

    pub fn flutter(&self) -> Result<Vec<CacheEntry>> {
        let packages = ManifestReader::new(&self.project_dir).read()?;
        let paths = cacheable_pub_paths(&packages)?;
        debug!("Marking Flutter dependency paths to be cached: {:?}", paths);
        Ok(paths.into_iter().map(CacheEntry::new).collect())
    }

    /// Runs every collector. A failing collector is reported and skipped.
    pub fn collect_all(&self) -> Vec<CacheEntry> {
        let mut entries = Vec::new();

        match self.cocoapods() {
            Ok(entry) => entries.extend(entry),
            Err(e) => warn!("Failed to collect cocoapods cache, error: {}", e),
        }
        match self.carthage() {
            Ok(entry) => entries.extend(entry),
            Err(e) => warn!("Failed to collect carthage cache, error: {}", e),
        }
        match self.android() {
            Ok(found) => entries.extend(found),
            Err(e) => warn!("Failed to collect android cache, error: {}", e),
        }
        match self.flutter() {
            Ok(found) => entries.extend(found),
            Err(e) => warn!("Failed to collect flutter cache, error: {}", e),
        }

        entries
    }
}

fn exists(path: &Path) -> Result<bool> {
    path.try_exists()
        .map_err(|e| Error::io(format!("Failed to check if {} exists", path.display()), e))
}

/// Appends `entries` to the cache include list and publishes it.
///
/// `existing` is the current value of the include list; lines already present are not repeated.
pub fn commit_cache_paths(
    entries: &[CacheEntry],
    existing: Option<&str>,
    publisher: &mut dyn OutputPublisher,
) -> Result<String> {
    let mut lines: Vec<String> = existing
        .unwrap_or_default()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    for entry in entries {
        let line = entry.to_string();
        if !lines.contains(&line) {
            lines.push(line);
        }
    }

    let value = lines.join("\n");
    publisher.publish(CACHE_INCLUDE_PATHS, &value)?;
    info!("Cache include paths: {} entries", lines.len());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env_export::MemoryPublisher;
    use crate::manifest::{PackageLocation, parse_legacy};
    use std::fs;
    use tempfile::TempDir;

    fn locations(entries: &[(&str, &str, &str)]) -> PackageLocations {
        entries
            .iter()
            .map(|(name, scheme, path)| (name.to_string(), PackageLocation::new(*scheme, *path)))
            .collect()
    }

    #[test]
    fn test_hosted_package_caches_parent_of_lib() {
        let packages = locations(&[(
            "async",
            "file",
            "/home/u/.pub-cache/hosted/pub.dartlang.org/async-2.4.1/lib/",
        )]);

        let paths = cacheable_pub_paths(&packages).unwrap();
        assert_eq!(
            paths,
            vec![PathBuf::from("/home/u/.pub-cache/hosted/pub.dartlang.org/async-2.4.1")]
        );
    }

    #[test]
    fn test_git_packages_share_one_root() {
        let packages = locations(&[
            ("a", "file", "/home/u/.pub-cache/git/a-1234/lib/"),
            ("b", "", "/home/u/.pub-cache/git/b-5678/mypath/lib"),
            ("c", "file", "/home/u/.pub-cache/hosted/pub.dartlang.org/c-1.0.0/lib/"),
        ]);

        let paths = cacheable_pub_paths(&packages).unwrap();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/home/u/.pub-cache/git"),
                PathBuf::from("/home/u/.pub-cache/hosted/pub.dartlang.org/c-1.0.0"),
            ]
        );
    }

    #[test]
    fn test_skipped_locations() {
        let packages = locations(&[
            ("remote", "https", "/home/u/.pub-cache/hosted/x/lib/"),
            ("relative", "", "lib/"),
            ("vendored", "file", "/work/app/packages/local/lib/"),
            ("odd_layout", "file", "/home/u/.pub-cache/hosted/y/src/"),
        ]);

        assert!(cacheable_pub_paths(&packages).unwrap().is_empty());
    }

    #[test]
    fn test_root_location_is_an_error() {
        let packages = locations(&[("root", "file", "/")]);
        let err = cacheable_pub_paths(&packages).unwrap_err();
        assert!(matches!(err, Error::RootPackageLocation { ref package } if package == "root"));
    }

    #[test]
    fn test_result_set_is_order_independent() {
        let entries = [
            ("a", "file", "/h/.pub-cache/git/a-1/lib/"),
            ("b", "file", "/h/.pub-cache/git/b-2/lib/"),
            ("c", "file", "/h/.pub-cache/hosted/pub.dev/c-1/lib/"),
            ("d", "file", "/h/.pub-cache/hosted/pub.dev/d-2/lib/"),
        ];
        let forward = cacheable_pub_paths(&locations(&entries)).unwrap();

        let mut reversed = entries;
        reversed.reverse();
        let renamed: Vec<(String, &str, &str)> = reversed
            .iter()
            .enumerate()
            .map(|(i, (_, scheme, path))| (format!("p{i}"), *scheme, *path))
            .collect();
        let packages: PackageLocations = renamed
            .iter()
            .map(|(name, scheme, path)| (name.clone(), PackageLocation::new(*scheme, *path)))
            .collect();

        assert_eq!(forward, cacheable_pub_paths(&packages).unwrap());
        assert_eq!(forward, cacheable_pub_paths(&locations(&entries)).unwrap());
    }

    #[test]
    fn test_legacy_manifest_to_cache_paths() {
        let packages = parse_legacy(
            "# comment\n\
             async:file:///home/u/.pub-cache/hosted/pub.dartlang.org/async-2.4.1/lib/\n\
             dep:file:///home/u/.pub-cache/git/dep-abc/lib/\n\
             myapp:lib/\n",
        )
        .unwrap();

        let paths = cacheable_pub_paths(&packages).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&PathBuf::from("/home/u/.pub-cache/git")));
    }

    #[test]
    fn test_collector_ios_and_android_entries() {
        let dir = TempDir::new().unwrap();
        let ios = dir.path().join("ios");
        let android = dir.path().join("android");
        fs::create_dir_all(&ios).unwrap();
        fs::create_dir_all(&android).unwrap();
        fs::write(ios.join("Podfile.lock"), "PODFILE CHECKSUM: x").unwrap();
        fs::write(android.join("build.gradle"), "").unwrap();

        let collector = CacheCollector::new(dir.path()).home_dir(Some(PathBuf::from("/home/u")));

        assert_eq!(
            collector.cocoapods().unwrap(),
            Some(CacheEntry::with_indicator(ios.join("Pods"), ios.join("Podfile.lock")))
        );
        assert_eq!(collector.carthage().unwrap(), None);

        let android_entries = collector.android().unwrap();
        assert_eq!(android_entries.len(), 3);
        assert_eq!(
            android_entries[0],
            CacheEntry::with_indicator("/home/u/.gradle/caches", android.join("build.gradle"))
        );
    }

    #[test]
    fn test_collect_all_skips_failing_flutter_collector() {
        let dir = TempDir::new().unwrap();
        let collector = CacheCollector::new(dir.path()).home_dir(None);

        // No manifest at all: the flutter collector fails, the rest still run.
        assert!(collector.flutter().is_err());
        assert!(collector.collect_all().is_empty());
    }

    #[test]
    fn test_commit_appends_without_duplicates() {
        let mut publisher = MemoryPublisher::default();
        let entries = vec![
            CacheEntry::new("/home/u/.pub-cache/git"),
            CacheEntry::with_indicator("/app/ios/Pods", "/app/ios/Podfile.lock"),
        ];

        let value = commit_cache_paths(
            &entries,
            Some("/home/u/.pub-cache/git\n/other"),
            &mut publisher,
        )
        .unwrap();

        assert_eq!(
            value,
            "/home/u/.pub-cache/git\n/other\n/app/ios/Pods -> /app/ios/Podfile.lock"
        );
        assert_eq!(publisher.get(CACHE_INCLUDE_PATHS), Some(value.as_str()));
    }
}
