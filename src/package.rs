//! Package Loader (spec §4.C) — resolves a package reference (directory or
//! zip archive) to a sealed workspace root, and provides the manifest that
//! the Topic Registry is built from.
//!
//! Grounded on the teacher's use of `sha2` for content fingerprinting
//! (`bpmn-lite-core`'s bytecode hash) and `tempfile` for scratch
//! directories already present in the teacher's `Cargo.toml`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Well-known manifest filename at the root of a package (spec §6).
pub const MANIFEST_FILE: &str = "worker.yml";

/// Failure policy, named `onFailure` on `TopicSpec` (spec §3/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FailurePolicy {
    Fail,
    Error,
    Complete,
}

/// One topic declaration inside a package manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestTopic {
    pub topic: String,
    pub entry: String,
    /// `None` when the manifest omits `onFailure`, so the worker's
    /// CLI/env-level default can actually take effect (spec §9 open
    /// question: topic-level setting wins when present, otherwise the
    /// CLI/env default is the fallback — see `WorkerConfig::effective_failure_policy`).
    #[serde(rename = "onFailure", default)]
    pub on_failure: Option<FailurePolicy>,
    #[serde(rename = "processVariables", default)]
    pub process_variables: bool,
    #[serde(rename = "pythonPath", default)]
    pub python_path: Vec<String>,
    #[serde(rename = "secretProfile", default)]
    pub secret_profile: Option<String>,
}

/// The package manifest, deserialized from `worker.yml` at the package root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub topics: Vec<ManifestTopic>,
}

/// A package reference as given in a `TopicSpec.packageRef` / CLI argument.
#[derive(Debug, Clone)]
pub enum PackageRef {
    Directory(PathBuf),
    Archive(PathBuf),
}

impl PackageRef {
    /// Classify a filesystem path: a directory is used in place, anything
    /// else is treated as a zip archive (spec §4.C).
    pub fn classify(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            PackageRef::Directory(path)
        } else {
            PackageRef::Archive(path)
        }
    }
}

/// A resolved package: its manifest plus the root directory the executor
/// will be invoked against. For a directory package, `root` is the package
/// directory itself (no copy, per spec §4.C); for an archive, `root` is a
/// fresh temporary directory holding the extracted contents.
pub struct ResolvedPackage {
    pub manifest: Manifest,
    pub root: PathBuf,
    pub fingerprint: String,
    /// Kept alive for the lifetime of the package when it owns a temp dir
    /// (archive case); `None` for directory packages, which are not owned.
    _tempdir: Option<tempfile::TempDir>,
}

impl ResolvedPackage {
    pub fn topic(&self, name: &str) -> Option<&ManifestTopic> {
        self.manifest.topics.iter().find(|t| t.topic == name)
    }
}

/// Files excluded from fingerprinting and from per-lease isolation copies
/// (spec §6 "An ignore list determines which files are excluded").
pub fn is_ignored(relative_path: &Path) -> bool {
    relative_path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some(".git") | Some(".hg") | Some("__pycache__") | Some("target")
                | Some(".pytest_cache") | Some(".DS_Store")
        )
    }) || relative_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "pyc")
        .unwrap_or(false)
}

/// Load and resolve a package reference into a sealed workspace root.
///
/// Directory packages are validated and used directly (no copy — spec
/// §4.C explicitly calls this out, since per-lease isolation for
/// directory packages is instead achieved by the Executor Runner copying
/// only what it stages). Archive packages are extracted into a fresh
/// per-lease temp directory, which *is* the isolation boundary.
pub fn resolve(package_ref: &PackageRef) -> Result<ResolvedPackage, ConfigError> {
    match package_ref {
        PackageRef::Directory(dir) => resolve_directory(dir),
        PackageRef::Archive(archive_path) => resolve_archive(archive_path),
    }
}

fn resolve_directory(dir: &Path) -> Result<ResolvedPackage, ConfigError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Err(ConfigError::ManifestMissing(manifest_path));
    }
    let manifest = load_manifest(&manifest_path)?;
    let fingerprint = fingerprint_directory(dir)?;
    Ok(ResolvedPackage {
        manifest,
        root: dir.to_path_buf(),
        fingerprint,
        _tempdir: None,
    })
}

fn resolve_archive(archive_path: &Path) -> Result<ResolvedPackage, ConfigError> {
    let file = fs::File::open(archive_path).map_err(|e| {
        ConfigError::UnreadableArchive(archive_path.to_path_buf(), e.to_string())
    })?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| {
        ConfigError::UnreadableArchive(archive_path.to_path_buf(), e.to_string())
    })?;

    let tempdir = tempfile::tempdir().map_err(|e| {
        ConfigError::UnreadableArchive(archive_path.to_path_buf(), e.to_string())
    })?;

    zip.extract(tempdir.path()).map_err(|e| {
        ConfigError::UnreadableArchive(archive_path.to_path_buf(), e.to_string())
    })?;

    let manifest_path = tempdir.path().join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Err(ConfigError::ManifestMissing(manifest_path));
    }
    let manifest = load_manifest(&manifest_path)?;
    let fingerprint = fingerprint_directory(tempdir.path())?;

    Ok(ResolvedPackage {
        manifest,
        root: tempdir.path().to_path_buf(),
        fingerprint,
        _tempdir: Some(tempdir),
    })
}

fn load_manifest(manifest_path: &Path) -> Result<Manifest, ConfigError> {
    let content = fs::read_to_string(manifest_path)
        .map_err(|_| ConfigError::ManifestMissing(manifest_path.to_path_buf()))?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::ManifestMalformed {
        path: manifest_path.to_path_buf(),
        source: e,
    })
}

/// SHA-256 over sorted file contents within `dir`, skipping ignored paths
/// (spec §4.C "derives a fingerprint ... used for diagnostic identity").
fn fingerprint_directory(dir: &Path) -> Result<String, ConfigError> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for relative in &files {
        hasher.update(relative.to_string_lossy().as_bytes());
        let mut f = fs::File::open(dir.join(relative)).map_err(|e| {
            ConfigError::UnreadableArchive(dir.join(relative), e.to_string())
        })?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).map_err(|e| {
            ConfigError::UnreadableArchive(dir.join(relative), e.to_string())
        })?;
        hasher.update(&buf);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ConfigError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| ConfigError::UnreadableArchive(dir.to_path_buf(), e.to_string()))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| ConfigError::UnreadableArchive(dir.to_path_buf(), e.to_string()))?;
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        if is_ignored(&relative) {
            continue;
        }
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            out.push(relative);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(dir: &Path, yaml: &str) {
        let mut f = fs::File::create(dir.join(MANIFEST_FILE)).unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
    }

    #[test]
    fn directory_package_resolves_manifest_and_topics() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            r#"
topics:
  - topic: "create-invoice"
    entry: "suites/invoice.robot"
    onFailure: "FAIL"
"#,
        );
        let pkg = resolve(&PackageRef::classify(dir.path())).unwrap();
        assert_eq!(pkg.manifest.topics.len(), 1);
        assert!(pkg.topic("create-invoice").is_some());
        assert_eq!(pkg.root, dir.path());
    }

    #[test]
    fn missing_manifest_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolve(&PackageRef::classify(dir.path()));
        assert!(matches!(result, Err(ConfigError::ManifestMissing(_))));
    }

    #[test]
    fn malformed_manifest_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "not: [valid, yaml: structure");
        let result = resolve(&PackageRef::classify(dir.path()));
        assert!(matches!(result, Err(ConfigError::ManifestMalformed { .. })));
    }

    #[test]
    fn fingerprint_is_stable_across_reads_and_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "topics: []\n");
        let fp1 = fingerprint_directory(dir.path()).unwrap();
        let fp2 = fingerprint_directory(dir.path()).unwrap();
        assert_eq!(fp1, fp2);

        write_manifest(dir.path(), "topics: []\n# changed\n");
        let fp3 = fingerprint_directory(dir.path()).unwrap();
        assert_ne!(fp1, fp3);
    }

    #[test]
    fn ignore_list_excludes_vcs_and_build_output() {
        assert!(is_ignored(Path::new(".git/HEAD")));
        assert!(is_ignored(Path::new("__pycache__/mod.pyc")));
        assert!(is_ignored(Path::new("target/debug/foo")));
        assert!(is_ignored(Path::new("a/b.pyc")));
        assert!(!is_ignored(Path::new("suites/invoice.robot")));
    }

    #[test]
    fn archive_package_extracts_into_fresh_tempdir() {
        let src_dir = tempfile::tempdir().unwrap();
        write_manifest(src_dir.path(), "topics: []\n");

        let archive_path = tempfile::Builder::new().suffix(".zip").tempfile().unwrap();
        let archive_path = archive_path.path().to_path_buf();
        {
            let file = fs::File::create(&archive_path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            zip.start_file(MANIFEST_FILE, zip::write::FileOptions::default())
                .unwrap();
            zip.write_all(b"topics: []\n").unwrap();
            zip.finish().unwrap();
        }

        let pkg = resolve(&PackageRef::classify(&archive_path)).unwrap();
        assert_ne!(pkg.root, src_dir.path());
        assert!(pkg.root.join(MANIFEST_FILE).exists());
    }
}
