//! `WorkerConfig` + CLI boundary (spec §1.1, §6, §9's "process-wide
//! configuration object" redesign note).
//!
//! Grounded on `bpmn_integration::config::WorkflowConfig` (serde+serde_yaml
//! manifest, `load_from_file`) for the shape of configuration loading, and
//! on the teacher's root `Cargo.toml` `clap`(derive, env)/`dotenvy`
//! dependencies for the CLI boundary named in spec §6 ("a subcommand
//! `serve` ... exit 0 clean shutdown; exit 1 configuration error; exit 2
//! fatal runtime error").

use crate::error::ConfigError;
use crate::package::FailurePolicy;
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variables honored by the worker (spec §6).
pub mod env_vars {
    pub const ENGINE_REST_BASE_URL: &str = "ENGINE_REST_BASE_URL";
    pub const ENGINE_REST_AUTHORIZATION: &str = "ENGINE_REST_AUTHORIZATION";
    pub const ENGINE_REST_TIMEOUT_SECONDS: &str = "ENGINE_REST_TIMEOUT_SECONDS";
    pub const ENGINE_REST_POLL_TTL_SECONDS: &str = "ENGINE_REST_POLL_TTL_SECONDS";
    pub const ENGINE_REST_LOCK_TTL_SECONDS: &str = "ENGINE_REST_LOCK_TTL_SECONDS";
    pub const TASKS_WORKER_ID: &str = "TASKS_WORKER_ID";
    pub const TASKS_SECRETS_PROFILE: &str = "TASKS_SECRETS_PROFILE";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const TASKS_MAX_JOBS: &str = "TASKS_MAX_JOBS";
}

/// `serve` subcommand CLI surface (spec §6: "CLI surface (boundary
/// only)"). Deliberately thin — deployment subcommands, `init`/`wrap`
/// scaffolding, and full config-file parsing are out of scope (spec §1).
#[derive(Debug, Parser)]
#[command(name = "task-worker", about = "External task worker core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Run the fetch-lock scheduler against one or more package references.
    Serve(ServeArgs),
}

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Package references: directories or zip archives, one per package.
    #[arg(required = true)]
    pub packages: Vec<PathBuf>,

    /// Base URL of the engine's REST API.
    #[arg(long, env = "ENGINE_REST_BASE_URL")]
    pub engine_url: String,

    /// Opaque authorization header value, supplied verbatim (spec §4.A).
    #[arg(long, env = "ENGINE_REST_AUTHORIZATION")]
    pub authorization: Option<String>,

    /// Worker identity sent with every request.
    #[arg(long, env = "TASKS_WORKER_ID", default_value = "task-worker")]
    pub worker_id: String,

    /// Cap on concurrent in-flight leases.
    #[arg(long, env = "TASKS_MAX_JOBS", default_value_t = 1)]
    pub max_jobs: u32,

    /// Long-poll timeout, in seconds. (Resolves spec §9's open question:
    /// `--async-response-timeout` and `--timeout` are the same knob; this
    /// is the only flag exposed, matching the engine wire field name.)
    #[arg(
        long = "async-response-timeout",
        env = "ENGINE_REST_POLL_TTL_SECONDS",
        default_value_t = 20
    )]
    pub async_response_timeout_seconds: u64,

    /// Per-lease initial lock duration, in seconds.
    #[arg(long, env = "ENGINE_REST_LOCK_TTL_SECONDS", default_value_t = 30)]
    pub lock_duration_seconds: u64,

    /// Per-call HTTP deadline for non-long-poll calls, in seconds.
    #[arg(long, env = "ENGINE_REST_TIMEOUT_SECONDS", default_value_t = 10)]
    pub call_timeout_seconds: u64,

    /// CLI/env-level default failure policy, overridden per-topic when the
    /// manifest specifies one (spec §9 open question, resolved in
    /// DESIGN.md: topic-level setting always wins when present).
    #[arg(long, value_enum, default_value = "fail")]
    pub default_on_failure: CliFailurePolicy,

    /// Comma-separated list of `secretProfile` names this worker has a
    /// provider wired up for. Any topic whose manifest names a profile
    /// outside this set is a fatal `ConfigurationError` at startup (spec
    /// §7: "unresolvable secrets provider"), rather than silently getting
    /// no secret resolution at all.
    #[arg(
        long = "secrets-profile",
        env = "TASKS_SECRETS_PROFILE",
        value_delimiter = ',',
        default_value = ""
    )]
    pub secret_profiles: Vec<String>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliFailurePolicy {
    Fail,
    Error,
    Complete,
}

impl From<CliFailurePolicy> for FailurePolicy {
    fn from(v: CliFailurePolicy) -> Self {
        match v {
            CliFailurePolicy::Fail => FailurePolicy::Fail,
            CliFailurePolicy::Error => FailurePolicy::Error,
            CliFailurePolicy::Complete => FailurePolicy::Complete,
        }
    }
}

/// Explicit immutable worker configuration, threaded from the entry point
/// (spec §9: "replace [process-wide configuration object] with an explicit
/// immutable `WorkerConfig` struct").
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub engine_url: String,
    pub authorization: Option<String>,
    pub worker_id: String,
    pub max_jobs: u32,
    pub async_response_timeout: Duration,
    pub lock_duration: Duration,
    pub call_timeout: Duration,
    pub default_on_failure: FailurePolicy,
    /// `secretProfile` names this worker is configured to resolve. Any topic
    /// naming a profile outside this set fails registry validation at
    /// startup (spec §7).
    pub secret_profiles: HashSet<String>,
}

/// Ceiling beyond which a still-running subprocess is force-terminated
/// (spec §8 boundary behavior: `lockDuration × 10`, proposed ceiling).
pub const EXECUTION_DEADLINE_MULTIPLE: u32 = 10;

/// Safety margin before lock expiry at which the runner issues an extend
/// (spec §4.E step 5 "while now + safety_margin ≥ lockExpiresAt"),
/// expressed as a fraction of `lockDuration` per §5 ("renewer ... whenever
/// lockExpiresAt - now < lockDuration / 2").
pub const LOCK_RENEWAL_FRACTION: u32 = 2;

/// Retries assumed for a lease whose `retriesRemaining` came back `null`
/// (spec §3: the field is "integer or null"; spec is silent on what null
/// means operationally). A fresh external task in a typical engine
/// deployment starts with 2-3 configured retries, not 1 — defaulting to 1
/// here would send every lease whose engine omits the field straight to a
/// terminal incident on its first failure. Chosen as the conservative
/// middle of that range rather than guessing any one engine's configured
/// default.
pub const DEFAULT_RETRIES_WHEN_UNSPECIFIED: i32 = 3;

impl WorkerConfig {
    pub fn from_serve_args(args: &ServeArgs) -> Result<Self, ConfigError> {
        if args.max_jobs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_jobs",
                value: "0".to_string(),
            });
        }
        if args.engine_url.trim().is_empty() {
            return Err(ConfigError::MissingEnv(env_vars::ENGINE_REST_BASE_URL));
        }
        Ok(Self {
            engine_url: args.engine_url.clone(),
            authorization: args.authorization.clone(),
            worker_id: args.worker_id.clone(),
            max_jobs: args.max_jobs,
            async_response_timeout: Duration::from_secs(args.async_response_timeout_seconds),
            lock_duration: Duration::from_secs(args.lock_duration_seconds),
            call_timeout: Duration::from_secs(args.call_timeout_seconds),
            default_on_failure: args.default_on_failure.into(),
            secret_profiles: args
                .secret_profiles
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }

    /// Effective failure policy for a topic: the topic's own setting always
    /// wins when present; the CLI/env default is only a fallback (spec §9
    /// open question, resolved — see DESIGN.md).
    pub fn effective_failure_policy(&self, topic_policy: Option<FailurePolicy>) -> FailurePolicy {
        topic_policy.unwrap_or(self.default_on_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(max_jobs: u32) -> ServeArgs {
        ServeArgs {
            packages: vec![PathBuf::from("/tmp/pkg")],
            engine_url: "http://localhost:8080/engine-rest".to_string(),
            authorization: None,
            worker_id: "w1".to_string(),
            max_jobs,
            async_response_timeout_seconds: 20,
            lock_duration_seconds: 30,
            call_timeout_seconds: 10,
            default_on_failure: CliFailurePolicy::Fail,
            secret_profiles: Vec::new(),
        }
    }

    #[test]
    fn rejects_zero_max_jobs() {
        let result = WorkerConfig::from_serve_args(&args(0));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn builds_config_with_expected_durations() {
        let cfg = WorkerConfig::from_serve_args(&args(3)).unwrap();
        assert_eq!(cfg.max_jobs, 3);
        assert_eq!(cfg.lock_duration, Duration::from_secs(30));
        assert_eq!(cfg.async_response_timeout, Duration::from_secs(20));
    }

    #[test]
    fn secret_profiles_filters_blank_entries() {
        let mut a = args(1);
        a.secret_profiles = vec!["vault-default".to_string(), "".to_string(), " ".to_string()];
        let cfg = WorkerConfig::from_serve_args(&a).unwrap();
        assert_eq!(cfg.secret_profiles.len(), 1);
        assert!(cfg.secret_profiles.contains("vault-default"));
    }

    #[test]
    fn topic_policy_overrides_default() {
        let cfg = WorkerConfig::from_serve_args(&args(1)).unwrap();
        assert_eq!(
            cfg.effective_failure_policy(Some(FailurePolicy::Error)),
            FailurePolicy::Error
        );
        assert_eq!(cfg.effective_failure_policy(None), FailurePolicy::Fail);
    }
}
