//! Secret provider boundary and redaction registry (spec §4.E step 2, §7,
//! §9's "secrets via global injection" redesign note).
//!
//! `Provider` is specified only at its boundary (spec §1 non-goals list
//! "secret-store providers ... beyond the `Provider` interface"); this
//! module defines that interface the way the teacher defines
//! `DslExecutorV2` — an `async_trait` object the runner holds as
//! `Arc<dyn Provider>` — and never itself ships a file/vault backend.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret provider '{provider}' has no secret named '{name}'")]
    NotFound { provider: String, name: String },
    #[error("secret provider failed: {0}")]
    ProviderFailure(String),
}

/// A named source of secret values, resolved per-lease and never persisted.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Resolve the named secrets. Implementations MUST NOT log values.
    async fn resolve(&self, names: &[String]) -> Result<HashMap<String, String>, SecretError>;
}

/// A `Provider` with no secrets, used by topics that omit `secretProfile`.
pub struct EmptyProvider;

#[async_trait]
impl Provider for EmptyProvider {
    async fn resolve(&self, _names: &[String]) -> Result<HashMap<String, String>, SecretError> {
        Ok(HashMap::new())
    }
}

/// Registry of secret values that must never appear in a variable returned
/// to the engine nor in any log line (spec §3 invariant, §7 "redaction
/// applies to every string written to the log sink"). Built fresh for each
/// lease from the secrets resolved for that lease's topic.
#[derive(Debug, Default, Clone)]
pub struct Redactor {
    /// The set of secret values to mask. A `HashSet` rather than the
    /// original name→value map: redaction matches on value, not name.
    values: HashSet<String>,
    mask: String,
}

const DEFAULT_MASK: &str = "***REDACTED***";

impl Redactor {
    pub fn new(secrets: &HashMap<String, String>) -> Self {
        Self {
            values: secrets.values().filter(|v| !v.is_empty()).cloned().collect(),
            mask: DEFAULT_MASK.to_string(),
        }
    }

    pub fn empty() -> Self {
        Self {
            values: HashSet::new(),
            mask: DEFAULT_MASK.to_string(),
        }
    }

    /// Replace every occurrence of every registered secret value with the
    /// fixed mask. Order-independent: no secret value may be a substring
    /// of the mask, so repeated passes are unnecessary.
    pub fn redact(&self, text: &str) -> String {
        if self.values.is_empty() {
            return text.to_string();
        }
        let mut out = text.to_string();
        for secret in &self.values {
            if !secret.is_empty() {
                out = out.replace(secret.as_str(), &self.mask);
            }
        }
        out
    }

    /// True if `text` contains any registered secret value verbatim.
    pub fn contains_secret(&self, text: &str) -> bool {
        self.values.iter().any(|v| !v.is_empty() && text.contains(v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Absorb another redactor's masked values into this one. Used to
    /// build a process-wide "every secret seen so far" set from per-lease
    /// redactors without ever losing an entry.
    pub fn merge(&mut self, other: &Redactor) {
        self.values.extend(other.values.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_provider_resolves_nothing() {
        let p = EmptyProvider;
        let resolved = p.resolve(&["anything".to_string()]).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn redactor_masks_every_occurrence() {
        let mut secrets = HashMap::new();
        secrets.insert("api_key".to_string(), "s3cret".to_string());
        let r = Redactor::new(&secrets);

        let log_line = "calling api with key=s3cret and again s3cret here";
        let redacted = r.redact(log_line);
        assert!(!redacted.contains("s3cret"));
        assert!(redacted.contains(DEFAULT_MASK));
    }

    #[test]
    fn redactor_is_noop_with_no_secrets() {
        let r = Redactor::empty();
        assert_eq!(r.redact("hello"), "hello");
        assert!(!r.contains_secret("hello"));
    }

    #[test]
    fn contains_secret_detects_leak() {
        let mut secrets = HashMap::new();
        secrets.insert("token".to_string(), "leaky-value".to_string());
        let r = Redactor::new(&secrets);
        assert!(r.contains_secret("oops leaky-value leaked"));
        assert!(!r.contains_secret("nothing to see"));
    }
}
