//! Fetch-Lock Scheduler (spec §4.F, §5) — the long-poll loop that fills
//! `maxJobs` worth of in-flight leases, hands each lease to the
//! `ExecutorRunner`, and backs off exponentially on engine errors.
//!
//! Grounded on `bpmn_integration::worker::JobWorker::run` (long-poll,
//! backoff-on-empty, backoff-on-error, `watch::Receiver<bool>` shutdown),
//! generalized from "one job type, sequential processing" to "N concurrent
//! leases capped by `maxJobs`, real per-lease execution units" via
//! `tokio::sync::Semaphore` + `tokio::task::JoinSet`.

use crate::config::WorkerConfig;
use crate::engine::types::FetchAndLockTopic;
use crate::engine::EngineClient;
use crate::lease::Lease;
use crate::registry::TopicRegistry;
use crate::runner::{ExecutorRunner, LeaseReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

/// Initial backoff after an engine error (spec §5: "exponential backoff,
/// starting at 1s").
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Backoff ceiling (spec §5: "capped at 30s").
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponential backoff after a `fetchAndLock` failure, doubling on every
/// consecutive error and resetting on the first success. Pulled out of the
/// loop as its own type (mirroring `worker.rs`'s `BACKOFF_SLEEP_MS`
/// constant, generalized to the doubling policy spec §5 actually asks for)
/// so the doubling/reset/cap rules live in one place instead of being
/// re-derived at each call site.
struct EngineBackoff {
    current: Duration,
}

impl EngineBackoff {
    fn new() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }

    fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }

    fn current(&self) -> Duration {
        self.current
    }

    /// Sleep for the current duration (cancellable against `shutdown`),
    /// then double it, capped at `MAX_BACKOFF`. Returns the duration slept.
    async fn sleep_and_advance(&mut self, shutdown: &mut watch::Receiver<bool>) -> Duration {
        let slept = self.current;
        tokio::select! {
            _ = tokio::time::sleep(self.current) => {}
            _ = shutdown.changed() => {}
        }
        self.current = (self.current * 2).min(MAX_BACKOFF);
        slept
    }
}

pub struct Scheduler {
    engine: Arc<dyn EngineClient>,
    registry: Arc<TopicRegistry>,
    runner: Arc<ExecutorRunner>,
    config: WorkerConfig,
}

impl Scheduler {
    pub fn new(
        engine: Arc<dyn EngineClient>,
        registry: Arc<TopicRegistry>,
        runner: Arc<ExecutorRunner>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            engine,
            registry,
            runner,
            config,
        }
    }

    /// Run the scheduler loop until `shutdown` fires. `inFlight` (the
    /// semaphore's available-permit count) is the single synchronization
    /// point gating how many leases may run concurrently (spec §5).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker_id = %self.config.worker_id, max_jobs = self.config.max_jobs, "scheduler started");

        let semaphore = Arc::new(Semaphore::new(self.config.max_jobs as usize));
        let mut in_flight: JoinSet<LeaseReport> = JoinSet::new();
        let mut backoff = EngineBackoff::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let available = semaphore.available_permits();
            if available == 0 {
                tokio::select! {
                    Some(_) = in_flight.join_next() => {}
                    _ = shutdown.changed() => continue,
                }
                continue;
            }

            match self.fetch_and_lock(available as u32).await {
                Ok(leases) => {
                    backoff.reset();
                    if leases.is_empty() {
                        // Long-poll came back empty: not an error, so the
                        // driver re-polls immediately with no backoff and no
                        // artificial delay (spec §8: "must cause the driver
                        // to immediately re-poll without backoff").
                        continue;
                    }
                    for lease in leases {
                        self.dispatch(lease, &semaphore, &mut in_flight, shutdown.clone());
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, backoff_ms = backoff.current().as_millis() as u64, "fetchAndLock failed, backing off");
                    backoff.sleep_and_advance(&mut shutdown).await;
                    if *shutdown.borrow() {
                        continue;
                    }
                }
            }

            // Drain any execution units that finished without blocking.
            while let Some(Ok(_report)) = in_flight.try_join_next() {}
        }

        tracing::info!("scheduler shutting down, draining in-flight leases");
        while in_flight.join_next().await.is_some() {}
        tracing::info!("scheduler stopped");
    }

    async fn fetch_and_lock(&self, max_tasks: u32) -> Result<Vec<Lease>, crate::error::EngineError> {
        let topics: Vec<FetchAndLockTopic> = self
            .registry
            .specs()
            .map(|spec| FetchAndLockTopic {
                topic_name: spec.topic.clone(),
                lock_duration: self.config.lock_duration.as_millis() as u64,
                // spec §3/§4.A: `processVariables == false` opts out of the
                // full process-variable scope, leaving only the task-local
                // variables the engine always returns regardless of the
                // filter; `true` passes no filter at all so every in-scope
                // process variable is fetched too.
                variables: if spec.process_variables {
                    None
                } else {
                    Some(Vec::new())
                },
                deserialize_values: true,
            })
            .collect();

        if topics.is_empty() {
            return Ok(Vec::new());
        }

        let wire_tasks = self
            .engine
            .fetch_and_lock(
                &self.config.worker_id,
                max_tasks,
                self.config.async_response_timeout,
                &topics,
            )
            .await?;

        let mut leases = Vec::with_capacity(wire_tasks.len());
        for task in wire_tasks {
            match Lease::from_wire(task) {
                Ok(lease) => leases.push(lease),
                Err(e) => tracing::error!(error = %e, "dropping lease with undecodable variables"),
            }
        }
        Ok(leases)
    }

    /// Acquire a permit and spawn one execution unit for `lease`. The
    /// permit is held by the spawned task and released on completion,
    /// which is how `available_permits()` tracks `inFlight` (spec §5).
    fn dispatch(
        &self,
        lease: Lease,
        semaphore: &Arc<Semaphore>,
        in_flight: &mut JoinSet<LeaseReport>,
        shutdown: watch::Receiver<bool>,
    ) {
        let topic_spec = match self.registry.get(&lease.topic) {
            Some(spec) => spec.clone(),
            None => {
                tracing::error!(topic = %lease.topic, lease_id = %lease.id, "lease for unregistered topic, abandoning");
                return;
            }
        };
        let semaphore = semaphore.clone();
        let runner = self.runner.clone();

        in_flight.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed while the scheduler runs");
            runner.run(lease, &topic_spec, shutdown).await
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{EngineAck, LockedExternalTask};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct CountingEngine {
        fetch_calls: AtomicUsize,
        tasks_per_call: Vec<Vec<LockedExternalTask>>,
    }

    #[async_trait]
    impl EngineClient for CountingEngine {
        async fn fetch_and_lock(
            &self,
            _worker_id: &str,
            _max_tasks: u32,
            _async_response_timeout: Duration,
            _topics: &[FetchAndLockTopic],
        ) -> Result<Vec<LockedExternalTask>, crate::error::EngineError> {
            let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tasks_per_call.get(call).cloned().unwrap_or_default())
        }

        async fn complete(
            &self,
            _id: &str,
            _worker_id: &str,
            _variables: HashMap<String, crate::variable::TypedValue>,
            _local_variables: HashMap<String, crate::variable::TypedValue>,
        ) -> Result<EngineAck, crate::error::EngineError> {
            Ok(EngineAck::Ok)
        }

        async fn handle_failure(
            &self,
            _id: &str,
            _worker_id: &str,
            _error_message: &str,
            _error_details: &str,
            _retries: i32,
            _retry_timeout: Duration,
        ) -> Result<EngineAck, crate::error::EngineError> {
            Ok(EngineAck::Ok)
        }

        async fn handle_bpmn_error(
            &self,
            _id: &str,
            _worker_id: &str,
            _error_code: &str,
            _error_message: &str,
            _variables: HashMap<String, crate::variable::TypedValue>,
        ) -> Result<EngineAck, crate::error::EngineError> {
            Ok(EngineAck::Ok)
        }

        async fn extend_lock(
            &self,
            _id: &str,
            _worker_id: &str,
            _new_duration: Duration,
        ) -> Result<EngineAck, crate::error::EngineError> {
            Ok(EngineAck::Ok)
        }

        async fn set_variable(
            &self,
            _process_instance_id: &str,
            _name: &str,
            _value: crate::variable::TypedValue,
        ) -> Result<EngineAck, crate::error::EngineError> {
            Ok(EngineAck::Ok)
        }
    }

    fn sample_task(id: &str) -> LockedExternalTask {
        LockedExternalTask {
            id: id.to_string(),
            topic_name: "demo.topic".to_string(),
            worker_id: "w1".to_string(),
            lock_expiration_time: chrono::Utc::now() + chrono::Duration::seconds(30),
            process_instance_id: "P1".to_string(),
            process_definition_key: "D1".to_string(),
            activity_id: "A1".to_string(),
            business_key: None,
            variables: HashMap::new(),
            retries: None,
        }
    }

    #[tokio::test]
    async fn fetch_and_lock_drops_leases_with_unregistered_topics() {
        let engine: Arc<dyn EngineClient> = Arc::new(CountingEngine {
            fetch_calls: AtomicUsize::new(0),
            tasks_per_call: vec![vec![sample_task("L1")]],
        });
        let lease = Lease::from_wire(sample_task("L1")).unwrap();
        assert_eq!(lease.topic, "demo.topic");
        // fetch_and_lock path is exercised end-to-end in the scheduler
        // integration tests; here we only confirm the decode step used by
        // `Scheduler::fetch_and_lock` succeeds for a well-formed task.
        let _ = engine;
    }

    struct CapturingEngine {
        seen_topics: Mutex<Vec<FetchAndLockTopic>>,
    }

    #[async_trait]
    impl EngineClient for CapturingEngine {
        async fn fetch_and_lock(
            &self,
            _worker_id: &str,
            _max_tasks: u32,
            _async_response_timeout: Duration,
            topics: &[FetchAndLockTopic],
        ) -> Result<Vec<LockedExternalTask>, crate::error::EngineError> {
            self.seen_topics.lock().unwrap().extend_from_slice(topics);
            Ok(Vec::new())
        }

        async fn complete(
            &self,
            _id: &str,
            _worker_id: &str,
            _variables: HashMap<String, crate::variable::TypedValue>,
            _local_variables: HashMap<String, crate::variable::TypedValue>,
        ) -> Result<EngineAck, crate::error::EngineError> {
            Ok(EngineAck::Ok)
        }

        async fn handle_failure(
            &self,
            _id: &str,
            _worker_id: &str,
            _error_message: &str,
            _error_details: &str,
            _retries: i32,
            _retry_timeout: Duration,
        ) -> Result<EngineAck, crate::error::EngineError> {
            Ok(EngineAck::Ok)
        }

        async fn handle_bpmn_error(
            &self,
            _id: &str,
            _worker_id: &str,
            _error_code: &str,
            _error_message: &str,
            _variables: HashMap<String, crate::variable::TypedValue>,
        ) -> Result<EngineAck, crate::error::EngineError> {
            Ok(EngineAck::Ok)
        }

        async fn extend_lock(
            &self,
            _id: &str,
            _worker_id: &str,
            _new_duration: Duration,
        ) -> Result<EngineAck, crate::error::EngineError> {
            Ok(EngineAck::Ok)
        }

        async fn set_variable(
            &self,
            _process_instance_id: &str,
            _name: &str,
            _value: crate::variable::TypedValue,
        ) -> Result<EngineAck, crate::error::EngineError> {
            Ok(EngineAck::Ok)
        }
    }

    fn registry_with_topic(topic: &str, process_variables: bool) -> TopicRegistry {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "topics:\n  - topic: \"{topic}\"\n    entry: \"run.sh\"\n    processVariables: {process_variables}\n"
        );
        std::fs::write(dir.path().join(crate::package::MANIFEST_FILE), yaml).unwrap();
        let registry =
            TopicRegistry::build(&[crate::package::PackageRef::classify(dir.path())]).unwrap();
        std::mem::forget(dir);
        registry
    }

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            engine_url: "http://localhost:0".to_string(),
            authorization: None,
            worker_id: "w1".to_string(),
            max_jobs: 1,
            async_response_timeout: Duration::from_secs(20),
            lock_duration: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
            default_on_failure: crate::package::FailurePolicy::Fail,
            secret_profiles: std::collections::HashSet::new(),
        }
    }

    #[tokio::test]
    async fn process_variables_false_requests_task_local_only() {
        let registry = Arc::new(registry_with_topic("demo.local", false));
        let engine = Arc::new(CapturingEngine {
            seen_topics: Mutex::new(Vec::new()),
        });
        let config = test_config();
        let scheduler = Scheduler::new(
            engine.clone(),
            registry,
            Arc::new(ExecutorRunner::new(
                engine.clone(),
                HashMap::new(),
                config.clone(),
                "task-executor".into(),
            )),
            config,
        );

        scheduler.fetch_and_lock(1).await.unwrap();
        let seen = engine.seen_topics.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].variables, Some(Vec::new()));
    }

    #[tokio::test]
    async fn process_variables_true_requests_full_scope() {
        let registry = Arc::new(registry_with_topic("demo.full", true));
        let engine = Arc::new(CapturingEngine {
            seen_topics: Mutex::new(Vec::new()),
        });
        let config = test_config();
        let scheduler = Scheduler::new(
            engine.clone(),
            registry,
            Arc::new(ExecutorRunner::new(
                engine.clone(),
                HashMap::new(),
                config.clone(),
                "task-executor".into(),
            )),
            config,
        );

        scheduler.fetch_and_lock(1).await.unwrap();
        let seen = engine.seen_topics.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].variables, None);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_and_caps_at_ceiling() {
        let mut backoff = EngineBackoff::new();
        let (_tx, mut rx) = watch::channel(false);
        assert_eq!(backoff.current(), INITIAL_BACKOFF);
        for _ in 0..10 {
            backoff.sleep_and_advance(&mut rx).await;
        }
        assert_eq!(backoff.current(), MAX_BACKOFF);
    }

    #[test]
    fn backoff_reset_returns_to_initial() {
        let mut backoff = EngineBackoff::new();
        backoff.current = MAX_BACKOFF;
        backoff.reset();
        assert_eq!(backoff.current(), INITIAL_BACKOFF);
    }
}
