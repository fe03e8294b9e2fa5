//! Topic Registry (spec §4.D) — the immutable, lock-free-read mapping from
//! engine topic to its `TopicSpec`, built once at startup from the union of
//! all loaded packages.
//!
//! Grounded on `bpmn_integration::config::WorkflowConfigIndex`, which
//! builds the same shape of `by_key` index once from a list of bindings —
//! generalized here to reject ambiguous routing (spec: "duplicate topics
//! across packages are a fatal configuration error") instead of the
//! teacher's last-write-wins `HashMap::insert`.

use crate::error::ConfigError;
use crate::package::{FailurePolicy, ManifestTopic, PackageRef, ResolvedPackage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Fully resolved routing entry for one topic (spec §3 `TopicSpec`).
#[derive(Debug, Clone)]
pub struct TopicSpec {
    pub topic: String,
    pub entry: String,
    pub package_ref: PathBuf,
    /// Root directory of the resolved package this topic belongs to,
    /// shared across topics declared by the same package.
    pub package_root: Arc<ResolvedPackage>,
    /// `None` when the manifest omits `onFailure`; the worker's CLI/env
    /// default applies in that case (see `WorkerConfig::effective_failure_policy`).
    pub on_failure: Option<FailurePolicy>,
    pub process_variables: bool,
    pub python_path: Vec<String>,
    pub secret_profile: Option<String>,
}

/// Immutable topic → `TopicSpec` mapping, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    topics: HashMap<String, TopicSpec>,
}

impl TopicRegistry {
    /// Build a registry from a set of package references, resolving each
    /// package and indexing every topic it declares. Fails fast
    /// (spec §4.D: "fatal configuration error") on any unresolvable
    /// package or duplicate topic.
    pub fn build(package_refs: &[PackageRef]) -> Result<Self, ConfigError> {
        let mut topics = HashMap::new();

        for package_ref in package_refs {
            let resolved = crate::package::resolve(package_ref)?;
            let package_path = match package_ref {
                PackageRef::Directory(p) | PackageRef::Archive(p) => p.clone(),
            };
            let resolved = Arc::new(resolved);

            for manifest_topic in &resolved.manifest.topics {
                if topics.contains_key(&manifest_topic.topic) {
                    return Err(ConfigError::DuplicateTopic(manifest_topic.topic.clone()));
                }
                topics.insert(
                    manifest_topic.topic.clone(),
                    to_topic_spec(manifest_topic, &package_path, resolved.clone()),
                );
            }
        }

        Ok(Self { topics })
    }

    pub fn get(&self, topic: &str) -> Option<&TopicSpec> {
        self.topics.get(topic)
    }

    /// All topic keys, used to assemble the `fetchAndLock` request body
    /// (spec §4.D).
    pub fn topic_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.topics.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn specs(&self) -> impl Iterator<Item = &TopicSpec> {
        self.topics.values()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Fail fast if any topic references a `secretProfile` the worker was
    /// not configured with a provider for (spec §7: an "unresolvable
    /// secrets provider" is a fatal `ConfigurationError` at startup, never
    /// a silent no-op).
    pub fn validate_secret_profiles(
        &self,
        configured: &std::collections::HashSet<String>,
    ) -> Result<(), ConfigError> {
        for spec in self.specs() {
            if let Some(profile) = &spec.secret_profile {
                if !configured.contains(profile) {
                    return Err(ConfigError::UnknownSecretProfile {
                        topic: spec.topic.clone(),
                        profile: profile.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn to_topic_spec(
    manifest_topic: &ManifestTopic,
    package_path: &std::path::Path,
    package_root: Arc<ResolvedPackage>,
) -> TopicSpec {
    TopicSpec {
        topic: manifest_topic.topic.clone(),
        entry: manifest_topic.entry.clone(),
        package_ref: package_path.to_path_buf(),
        package_root,
        on_failure: manifest_topic.on_failure,
        process_variables: manifest_topic.process_variables,
        python_path: manifest_topic.python_path.clone(),
        secret_profile: manifest_topic.secret_profile.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    fn package_dir(yaml: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fs::File::create(dir.path().join(crate::package::MANIFEST_FILE)).unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        dir
    }

    #[test]
    fn registry_indexes_topics_across_packages() {
        let pkg_a = package_dir(
            r#"
topics:
  - topic: "invoice.create"
    entry: "suites/invoice.robot"
"#,
        );
        let pkg_b = package_dir(
            r#"
topics:
  - topic: "invoice.cancel"
    entry: "suites/cancel.robot"
    onFailure: "ERROR"
"#,
        );

        let registry = TopicRegistry::build(&[
            PackageRef::classify(pkg_a.path()),
            PackageRef::classify(pkg_b.path()),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("invoice.create").unwrap().on_failure, None);
        assert_eq!(
            registry.get("invoice.cancel").unwrap().on_failure,
            Some(FailurePolicy::Error)
        );
        assert_eq!(registry.topic_keys(), vec!["invoice.cancel", "invoice.create"]);
    }

    #[test]
    fn unconfigured_secret_profile_is_fatal_at_startup() {
        let pkg = package_dir(
            r#"
topics:
  - topic: "invoice.create"
    entry: "suites/invoice.robot"
    secretProfile: "vault-default"
"#,
        );
        let registry = TopicRegistry::build(&[PackageRef::classify(pkg.path())]).unwrap();

        let result = registry.validate_secret_profiles(&std::collections::HashSet::new());
        assert!(matches!(
            result,
            Err(ConfigError::UnknownSecretProfile { ref topic, ref profile })
                if topic == "invoice.create" && profile == "vault-default"
        ));

        let mut configured = std::collections::HashSet::new();
        configured.insert("vault-default".to_string());
        assert!(registry.validate_secret_profiles(&configured).is_ok());
    }

    #[test]
    fn duplicate_topic_across_packages_is_fatal() {
        let pkg_a = package_dir(
            r#"
topics:
  - topic: "invoice.create"
    entry: "suites/invoice.robot"
"#,
        );
        let pkg_b = package_dir(
            r#"
topics:
  - topic: "invoice.create"
    entry: "suites/other.robot"
"#,
        );

        let result = TopicRegistry::build(&[
            PackageRef::classify(pkg_a.path()),
            PackageRef::classify(pkg_b.path()),
        ]);
        assert!(matches!(result, Err(ConfigError::DuplicateTopic(t)) if t == "invoice.create"));
    }
}
