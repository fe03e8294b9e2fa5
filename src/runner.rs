//! Executor Runner (spec §4.E) — the per-lease pipeline: materialize a
//! sealed workspace, inject variables and secrets, invoke the subprocess,
//! keep the lock alive while it runs, harvest its result, and issue
//! exactly one terminal report.
//!
//! Grounded on `bpmn_integration::worker::JobWorker`'s per-job pipeline
//! (dedupe → execute → complete/fail) and its cancellation-aware
//! `tokio::select!` sleep pattern, generalized from "run one DSL verb" to
//! the nine explicit steps spec §4.E names.

use crate::config::{
    WorkerConfig, DEFAULT_RETRIES_WHEN_UNSPECIFIED, EXECUTION_DEADLINE_MULTIPLE,
    LOCK_RENEWAL_FRACTION,
};
use crate::engine::types::EngineAck;
use crate::engine::EngineClient;
use crate::error::ExecutorError;
use crate::lease::Lease;
use crate::logging::RedactingWriter;
use crate::package::is_ignored;
use crate::registry::TopicSpec;
use crate::secrets::{Provider, Redactor};
use crate::variable::{self, FileValue, TypedValue};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;

/// What the executor reported for this lease (spec §3 `Result.outcome`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    TaskFailure,
    BpmnError,
}

/// Outcome of running one lease through the full pipeline, after the
/// terminal report has already been issued (or the lease abandoned).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseReport {
    /// A terminal report (`complete`/`failure`/`bpmnError`) was issued.
    Reported,
    /// The engine had already reclaimed the lease (404/409); per spec §4.F
    /// this is logged at INFO and treated as a successful lifecycle end.
    Abandoned,
}

/// Shape of the executor's `outputsPath` JSON document (spec §6).
#[derive(Debug, Default, Deserialize)]
struct ExecutorOutputsFile {
    #[serde(default)]
    outputs: HashMap<String, serde_json::Value>,
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
    #[serde(default)]
    artifacts: HashMap<String, ArtifactEntry>,
}

#[derive(Debug, Deserialize)]
struct ArtifactEntry {
    #[serde(rename = "mimeType")]
    #[allow(dead_code)]
    mime_type: Option<String>,
    base64: String,
}

/// Shape of the executor's `inputsPath` JSON document (spec §6).
#[derive(Debug, Serialize)]
struct ExecutorInputsFile {
    variables: std::collections::BTreeMap<String, variable::WireValue>,
    secrets: std::collections::BTreeMap<String, String>,
    config: std::collections::BTreeMap<String, String>,
}

/// A per-lease sealed temporary directory (spec §3 `Workspace`). Dropping
/// it removes the directory tree, which is how teardown happens on every
/// exit path (success, failure, panic-unwind, cancellation) without an
/// explicit cleanup call.
pub struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn materialize_workspace(package_root: &Path) -> Result<Workspace, ExecutorError> {
    let dir = tempfile::tempdir()?;
    copy_tree(package_root, dir.path())?;
    Ok(Workspace { dir })
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), ExecutorError> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let relative = path.strip_prefix(src).unwrap_or(&path);
        if is_ignored(relative) {
            continue;
        }
        let target = dst.join(relative);
        if path.is_dir() {
            std::fs::create_dir_all(&target)?;
            copy_tree(&path, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&path, &target)?;
        }
    }
    Ok(())
}

/// Last N bytes of a string, used for `stderr-tail` diagnostics (spec §4.E
/// step 6, §7 `errorDetails`).
fn tail(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let skip = s.chars().count() - max_chars;
        s.chars().skip(skip).collect()
    }
}

const STDERR_TAIL_CHARS: usize = 4000;

pub struct ExecutorRunner {
    engine: Arc<dyn EngineClient>,
    secret_providers: HashMap<String, Arc<dyn Provider>>,
    config: WorkerConfig,
    executor_binary: PathBuf,
    log_writer: Option<Arc<RedactingWriter>>,
}

impl ExecutorRunner {
    pub fn new(
        engine: Arc<dyn EngineClient>,
        secret_providers: HashMap<String, Arc<dyn Provider>>,
        config: WorkerConfig,
        executor_binary: PathBuf,
    ) -> Self {
        Self {
            engine,
            secret_providers,
            config,
            executor_binary,
            log_writer: None,
        }
    }

    /// Register the process-wide log writer so every secret resolved for a
    /// lease gets masked out of subsequent log lines (spec §7).
    pub fn with_log_writer(mut self, log_writer: Arc<RedactingWriter>) -> Self {
        self.log_writer = Some(log_writer);
        self
    }

    /// Run the full nine-step pipeline for one lease and issue its
    /// terminal report. Cancel-safe with respect to `shutdown`: if
    /// shutdown fires mid-execution, the subprocess is given a grace
    /// window to finish, then force-terminated, and the lease is reported
    /// as a failure with retries unchanged (spec §5 cancellation
    /// semantics).
    #[tracing::instrument(skip_all, fields(lease_id = %lease.id, topic = %lease.topic))]
    pub async fn run(
        &self,
        lease: Lease,
        topic_spec: &TopicSpec,
        mut shutdown: watch::Receiver<bool>,
    ) -> LeaseReport {
        // Step 1: materialize.
        let workspace = match materialize_workspace(&topic_spec.package_root.root) {
            Ok(ws) => ws,
            Err(e) => {
                tracing::error!(error = %e, "failed to materialize workspace");
                return self
                    .report_failure(&lease, topic_spec, &format!("workspace error: {e}"), Redactor::empty())
                    .await;
            }
        };

        // Step 2: resolve secrets.
        let secrets = match &topic_spec.secret_profile {
            Some(profile) => match self.secret_providers.get(profile) {
                Some(provider) => match provider.resolve(&[]).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(error = %e, profile = %profile, "secret resolution failed");
                        return self
                            .report_failure(&lease, topic_spec, &format!("secret error: {e}"), Redactor::empty())
                            .await;
                    }
                },
                None => {
                    tracing::error!(profile = %profile, "unknown secret profile");
                    return self
                        .report_failure(
                            &lease,
                            topic_spec,
                            &format!("unknown secret profile '{profile}'"),
                            Redactor::empty(),
                        )
                        .await;
                }
            },
            None => HashMap::new(),
        };
        let redactor = Redactor::new(&secrets);
        if let Some(writer) = &self.log_writer {
            writer.register_secrets(&redactor);
        }

        // Step 3: stage inputs.
        let inputs_path = workspace.path().join("inputs.json");
        let outputs_path = workspace.path().join("outputs.json");
        if let Err(e) = self.stage_inputs(&inputs_path, &lease, topic_spec, &secrets) {
            tracing::error!(error = %e, "failed to stage inputs");
            return self
                .report_failure(&lease, topic_spec, &format!("stage error: {e}"), redactor)
                .await;
        }

        // Step 4: invoke subprocess.
        let mut child = match self.spawn_executor(&workspace, topic_spec, &inputs_path, &outputs_path) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn executor");
                return self
                    .report_failure(&lease, topic_spec, &format!("spawn error: {e}"), redactor)
                    .await;
            }
        };

        // Drain stdout/stderr concurrently with the monitor loop below —
        // reading them only after `wait()` returns risks a deadlock once a
        // pipe buffer fills on a chatty subprocess.
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(discard_stdout(stdout));
        }
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_stderr(stderr)));

        // Step 5: monitor + extend lock, cancellation-aware.
        let monitor_result = self
            .monitor(&mut child, lease.clone(), &mut shutdown)
            .await;

        let stderr_tail = match stderr_task {
            Some(task) => redactor.redact(&task.await.unwrap_or_default()),
            None => String::new(),
        };

        let run_outcome = match monitor_result {
            MonitorOutcome::Exited(status) => {
                // Step 6: harvest.
                self.harvest(&outputs_path, status, &stderr_tail)
            }
            MonitorOutcome::LockLost => {
                kill_child(&mut child).await;
                return LeaseReport::Abandoned;
            }
            MonitorOutcome::ShuttingDown => {
                kill_child(&mut child).await;
                return self
                    .report_failure(&lease, topic_spec, "worker shutting down", redactor)
                    .await;
            }
            MonitorOutcome::DeadlineExceeded => {
                kill_child(&mut child).await;
                Err(ExecutorError::DeadlineExceeded(
                    self.config.lock_duration * EXECUTION_DEADLINE_MULTIPLE,
                ))
            }
        };

        let harvested = match run_outcome {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "executor error, mapping to failure policy");
                Harvested {
                    outcome: Outcome::TaskFailure,
                    outputs: HashMap::new(),
                    error_code: None,
                    error_message: Some(redactor.redact(&e.to_string())),
                    artifacts: HashMap::new(),
                }
            }
        };

        // Step 7: artifact upload, best-effort, before the terminal report.
        for (name, bytes) in &harvested.artifacts {
            match self
                .engine
                .set_variable(
                    &lease.process_instance_id,
                    name,
                    TypedValue::Bytes { value: bytes.clone() },
                )
                .await
            {
                Ok(_) => {}
                Err(e) => tracing::warn!(artifact = %name, error = %e, "artifact upload failed"),
            }
        }

        // Step 8: map outcome to terminal report via failure policy.
        let report = self
            .report(&lease, topic_spec, harvested, &redactor)
            .await;

        // Step 9: teardown — `workspace` drops here, removing the temp dir.
        report
    }

    fn stage_inputs(
        &self,
        inputs_path: &Path,
        lease: &Lease,
        topic_spec: &TopicSpec,
        secrets: &HashMap<String, String>,
    ) -> std::io::Result<()> {
        let variables: std::collections::BTreeMap<String, variable::WireValue> = lease
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), variable::encode(v)))
            .collect();
        let mut config = std::collections::BTreeMap::new();
        config.insert("entry".to_string(), topic_spec.entry.clone());
        config.insert("topic".to_string(), topic_spec.topic.clone());
        let payload = ExecutorInputsFile {
            variables,
            secrets: secrets.clone().into_iter().collect(),
            config,
        };
        let json = serde_json::to_vec_pretty(&payload)?;
        std::fs::write(inputs_path, json)
    }

    fn spawn_executor(
        &self,
        workspace: &Workspace,
        topic_spec: &TopicSpec,
        inputs_path: &Path,
        outputs_path: &Path,
    ) -> std::io::Result<tokio::process::Child> {
        let python_path = topic_spec.python_path.join(":");
        tokio::process::Command::new(&self.executor_binary)
            .arg(workspace.path())
            .arg(&topic_spec.entry)
            .arg(inputs_path)
            .arg(outputs_path)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("ENGINE_URL", &self.config.engine_url)
            .env("LOG_LEVEL", std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
            .env("TASK_PYTHONPATH", python_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    async fn monitor(
        &self,
        child: &mut tokio::process::Child,
        mut lease: Lease,
        shutdown: &mut watch::Receiver<bool>,
    ) -> MonitorOutcome {
        let safety_margin = self.config.lock_duration / LOCK_RENEWAL_FRACTION;
        let deadline = self.config.lock_duration * EXECUTION_DEADLINE_MULTIPLE;
        let started = tokio::time::Instant::now();

        loop {
            let now = Utc::now();
            let remaining = (lease.lock_expires_at - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let next_extend_in = remaining.saturating_sub(safety_margin);

            tokio::select! {
                status = child.wait() => {
                    return match status {
                        Ok(s) => MonitorOutcome::Exited(s.code().unwrap_or(-1)),
                        Err(_) => MonitorOutcome::Exited(-1),
                    };
                }
                _ = tokio::time::sleep(next_extend_in) => {
                    if started.elapsed() >= deadline {
                        return MonitorOutcome::DeadlineExceeded;
                    }
                    match self
                        .engine
                        .extend_lock(&lease.id, &self.config.worker_id, self.config.lock_duration)
                        .await
                    {
                        Ok(EngineAck::Ok) => {
                            lease.extend(Utc::now() + chrono::Duration::from_std(self.config.lock_duration).unwrap_or_default());
                        }
                        Ok(EngineAck::Gone) => return MonitorOutcome::LockLost,
                        Err(e) if e.is_lease_lost() => return MonitorOutcome::LockLost,
                        Err(e) => {
                            tracing::warn!(error = %e, "extendLock failed transiently, will retry on next cycle");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return MonitorOutcome::ShuttingDown;
                    }
                }
            }
        }
    }

    fn harvest(
        &self,
        outputs_path: &Path,
        exit_code: i32,
        stderr_tail: &str,
    ) -> Result<Harvested, ExecutorError> {
        if !outputs_path.exists() {
            if exit_code == 0 {
                return Ok(Harvested {
                    outcome: Outcome::Success,
                    outputs: HashMap::new(),
                    error_code: None,
                    error_message: None,
                    artifacts: HashMap::new(),
                });
            }
            return Err(ExecutorError::NonZeroExit {
                status: exit_code,
                stderr_tail: tail(stderr_tail, STDERR_TAIL_CHARS),
            });
        }

        let content = std::fs::read_to_string(outputs_path)
            .map_err(|_| ExecutorError::MissingOutputs(outputs_path.to_path_buf()))?;
        let parsed: ExecutorOutputsFile =
            serde_json::from_str(&content).map_err(|e| ExecutorError::MalformedOutputs {
                path: outputs_path.to_path_buf(),
                source: e,
            })?;

        if exit_code != 0 {
            return Err(ExecutorError::NonZeroExit {
                status: exit_code,
                stderr_tail: tail(stderr_tail, STDERR_TAIL_CHARS),
            });
        }

        let outputs: HashMap<String, TypedValue> = parsed
            .outputs
            .into_iter()
            .map(|(k, v)| (k, variable::infer(v)))
            .collect();

        let mut artifacts = HashMap::new();
        for (name, entry) in parsed.artifacts {
            use base64::Engine as _;
            match base64::engine::general_purpose::STANDARD.decode(&entry.base64) {
                Ok(bytes) => {
                    artifacts.insert(name, bytes);
                }
                Err(e) => tracing::warn!(artifact = %name, error = %e, "malformed artifact base64, dropping"),
            }
        }

        let outcome = if parsed.error_code.is_some() {
            Outcome::BpmnError
        } else {
            Outcome::Success
        };

        Ok(Harvested {
            outcome,
            outputs,
            error_code: parsed.error_code,
            error_message: parsed.error_message,
            artifacts,
        })
    }

    async fn report(
        &self,
        lease: &Lease,
        topic_spec: &TopicSpec,
        harvested: Harvested,
        redactor: &Redactor,
    ) -> LeaseReport {
        let policy = self.config.effective_failure_policy(topic_spec.on_failure);

        let ack = match harvested.outcome {
            Outcome::Success => {
                let outputs = sanitize_outputs(redactor, harvested.outputs);
                let inline = self.upload_oversized_outputs(lease, outputs).await;
                self.engine
                    .complete(&lease.id, &self.config.worker_id, inline, HashMap::new())
                    .await
            }
            Outcome::BpmnError | Outcome::TaskFailure => {
                self.report_via_policy(lease, policy, harvested, redactor).await
            }
        };

        match ack {
            Ok(EngineAck::Ok) => LeaseReport::Reported,
            Ok(EngineAck::Gone) => {
                tracing::info!("lease already reclaimed by the engine");
                LeaseReport::Abandoned
            }
            Err(e) => {
                tracing::error!(error = %e, "terminal report failed");
                LeaseReport::Abandoned
            }
        }
    }

    /// Failure-policy mapping (spec §7): `FAIL` → handleFailure, `ERROR` →
    /// handleBpmnError (falling back to `FAIL` with no errorCode),
    /// `COMPLETE` → complete with outputs + errorCode/errorMessage folded in.
    async fn report_via_policy(
        &self,
        lease: &Lease,
        policy: crate::package::FailurePolicy,
        harvested: Harvested,
        redactor: &Redactor,
    ) -> Result<EngineAck, crate::error::EngineError> {
        use crate::package::FailurePolicy;

        let error_message = harvested
            .error_message
            .clone()
            .unwrap_or_else(|| "task failed".to_string());
        let error_message = redactor.redact(&error_message);
        let error_code = harvested.error_code.clone();
        let outputs = sanitize_outputs(redactor, harvested.outputs);

        match policy {
            FailurePolicy::Fail => {
                let retries = lease
                    .retries_remaining
                    .unwrap_or(DEFAULT_RETRIES_WHEN_UNSPECIFIED)
                    .saturating_sub(1);
                self.engine
                    .handle_failure(
                        &lease.id,
                        &self.config.worker_id,
                        &error_message,
                        &error_message,
                        retries,
                        Duration::from_secs(0),
                    )
                    .await
            }
            FailurePolicy::Error => match &error_code {
                Some(code) => {
                    self.engine
                        .handle_bpmn_error(
                            &lease.id,
                            &self.config.worker_id,
                            code,
                            &error_message,
                            outputs,
                        )
                        .await
                }
                None => {
                    // No errorCode: falls back to FAIL (spec §7).
                    let retries = lease
                        .retries_remaining
                        .unwrap_or(DEFAULT_RETRIES_WHEN_UNSPECIFIED)
                        .saturating_sub(1);
                    self.engine
                        .handle_failure(
                            &lease.id,
                            &self.config.worker_id,
                            &error_message,
                            &error_message,
                            retries,
                            Duration::from_secs(0),
                        )
                        .await
                }
            },
            FailurePolicy::Complete => {
                let mut outputs = outputs;
                if let Some(code) = error_code {
                    outputs.insert("errorCode".to_string(), TypedValue::String { value: code });
                }
                outputs.insert(
                    "errorMessage".to_string(),
                    TypedValue::String {
                        value: error_message,
                    },
                );
                let inline = self.upload_oversized_outputs(lease, outputs).await;
                self.engine
                    .complete(&lease.id, &self.config.worker_id, inline, HashMap::new())
                    .await
            }
        }
    }

    /// Split `outputs` into what gets inlined into a `complete` call versus
    /// what gets uploaded out-of-band first (spec §4.B: an encoded output
    /// over `DEFAULT_INLINE_VARIABLE_LIMIT_BYTES` "MUST be uploaded via
    /// setVariable rather than inlined into a complete call, to avoid
    /// request bloat"). Upload failures are logged and the value is dropped
    /// from the report rather than inlined anyway, since inlining it is
    /// exactly what the threshold forbids.
    async fn upload_oversized_outputs(
        &self,
        lease: &Lease,
        outputs: HashMap<String, TypedValue>,
    ) -> HashMap<String, TypedValue> {
        let mut inline = HashMap::with_capacity(outputs.len());
        for (name, value) in outputs {
            if variable::encoded_size(&value) > variable::DEFAULT_INLINE_VARIABLE_LIMIT_BYTES {
                match self
                    .engine
                    .set_variable(&lease.process_instance_id, &name, value)
                    .await
                {
                    Ok(_) => {}
                    Err(e) => tracing::warn!(variable = %name, error = %e, "oversized output upload failed, dropping from report"),
                }
            } else {
                inline.insert(name, value);
            }
        }
        inline
    }

    async fn report_failure(
        &self,
        lease: &Lease,
        topic_spec: &TopicSpec,
        message: &str,
        redactor: Redactor,
    ) -> LeaseReport {
        let harvested = Harvested {
            outcome: Outcome::TaskFailure,
            outputs: HashMap::new(),
            error_code: None,
            error_message: Some(message.to_string()),
            artifacts: HashMap::new(),
        };
        self.report(lease, topic_spec, harvested, &redactor).await
    }
}

/// Redact every string-bearing `TypedValue`, recursing into `Json`/`Object`
/// trees, then defensively re-check the result against the redactor's
/// secret set (spec §3 invariant: "no string in S appears in any variable
/// returned to the engine", spec §7 Scenario 6). The second pass is a
/// belt-and-braces guard against a future `TypedValue` variant whose string
/// content `redact_typed_value` doesn't yet know to walk — if one somehow
/// still carries a secret verbatim, the variable is dropped rather than
/// reported.
fn sanitize_outputs(
    redactor: &Redactor,
    outputs: HashMap<String, TypedValue>,
) -> HashMap<String, TypedValue> {
    outputs
        .into_iter()
        .map(|(name, value)| (name, redact_typed_value(redactor, value)))
        .map(|(name, value)| {
            let wire = serde_json::to_string(&variable::encode(&value)).unwrap_or_default();
            if redactor.contains_secret(&wire) {
                tracing::error!(variable = %name, "secret survived redaction, dropping variable from report");
                (
                    name,
                    TypedValue::String {
                        value: "<redacted: secret leak>".to_string(),
                    },
                )
            } else {
                (name, value)
            }
        })
        .collect()
}

fn redact_typed_value(redactor: &Redactor, value: TypedValue) -> TypedValue {
    match value {
        TypedValue::String { value } => TypedValue::String {
            value: redactor.redact(&value),
        },
        TypedValue::Xml { value } => TypedValue::Xml {
            value: redactor.redact(&value),
        },
        TypedValue::Json {
            value,
            serialization_data_format,
        } => TypedValue::Json {
            value: redact_json_value(redactor, value),
            serialization_data_format,
        },
        TypedValue::Object {
            value,
            raw,
            object_type_name,
            serialization_data_format,
        } => TypedValue::Object {
            value: value.map(|v| redact_json_value(redactor, v)),
            raw: redactor.redact(&raw),
            object_type_name,
            serialization_data_format,
        },
        TypedValue::File { value: file } => TypedValue::File {
            value: FileValue {
                filename: redactor.redact(&file.filename),
                mime_type: file.mime_type.map(|m| redactor.redact(&m)),
                encoding: file.encoding.map(|e| redactor.redact(&e)),
                bytes: file.bytes,
            },
        },
        other @ (TypedValue::Long { .. }
        | TypedValue::Double { .. }
        | TypedValue::Boolean { .. }
        | TypedValue::Date { .. }
        | TypedValue::Bytes { .. }
        | TypedValue::Null) => other,
    }
}

/// Recurse into a JSON tree, redacting every string leaf. Arrays and object
/// keys' values are walked; object keys themselves are left alone (spec
/// names variable values, not names, as the leak surface).
fn redact_json_value(redactor: &Redactor, value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(redactor.redact(&s)),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .into_iter()
                .map(|v| redact_json_value(redactor, v))
                .collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, redact_json_value(redactor, v)))
                .collect(),
        ),
        other => other,
    }
}

struct Harvested {
    outcome: Outcome,
    outputs: HashMap<String, TypedValue>,
    error_code: Option<String>,
    error_message: Option<String>,
    artifacts: HashMap<String, Vec<u8>>,
}

enum MonitorOutcome {
    Exited(i32),
    LockLost,
    ShuttingDown,
    DeadlineExceeded,
}

async fn kill_child(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        let grace = tokio::time::sleep(Duration::from_secs(5));
        tokio::select! {
            _ = child.wait() => return,
            _ = grace => {}
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

async fn collect_stderr(mut stderr: tokio::process::ChildStderr) -> String {
    let mut buf = String::new();
    let _ = stderr.read_to_string(&mut buf).await;
    buf
}

async fn discard_stdout(mut stdout: tokio::process::ChildStdout) {
    let _ = tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await;
}
