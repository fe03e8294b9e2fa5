//! Engine Client (spec §4.A) — typed HTTP calls against the BPMN engine's
//! external-task REST surface.
//!
//! Hides raw JSON bodies behind domain-friendly methods, the same shape as
//! the teacher's `bpmn_integration::client::BpmnLiteConnection` (lazy
//! construction from env, `#[cfg(test)] mod tests` with `tokio::test`) —
//! with `reqwest`/REST in place of `tonic`/gRPC, since this engine's
//! contract is HTTP long-polling, not a streaming RPC.

pub mod types;

use crate::error::EngineError;
use crate::variable::{TypedValue, ValueInfo, WireValue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use types::*;

/// Environment variable carrying the engine's base REST URL.
pub const ENV_BASE_URL: &str = "ENGINE_REST_BASE_URL";
/// Environment variable carrying the (opaque) authorization header value.
pub const ENV_AUTHORIZATION: &str = "ENGINE_REST_AUTHORIZATION";
/// Environment variable carrying the per-call HTTP deadline, in seconds.
pub const ENV_TIMEOUT_SECONDS: &str = "ENGINE_REST_TIMEOUT_SECONDS";

/// Default per-call deadline for non-long-poll calls (spec §5, proposed 10s).
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Abstraction over the engine REST surface, so the scheduler and runner
/// can be exercised against a mock engine in tests without a real HTTP
/// server on the other end of a trait object.
#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn fetch_and_lock(
        &self,
        worker_id: &str,
        max_tasks: u32,
        async_response_timeout: Duration,
        topics: &[FetchAndLockTopic],
    ) -> Result<Vec<LockedExternalTask>, EngineError>;

    async fn complete(
        &self,
        id: &str,
        worker_id: &str,
        variables: HashMap<String, TypedValue>,
        local_variables: HashMap<String, TypedValue>,
    ) -> Result<EngineAck, EngineError>;

    async fn handle_failure(
        &self,
        id: &str,
        worker_id: &str,
        error_message: &str,
        error_details: &str,
        retries: i32,
        retry_timeout: Duration,
    ) -> Result<EngineAck, EngineError>;

    async fn handle_bpmn_error(
        &self,
        id: &str,
        worker_id: &str,
        error_code: &str,
        error_message: &str,
        variables: HashMap<String, TypedValue>,
    ) -> Result<EngineAck, EngineError>;

    async fn extend_lock(
        &self,
        id: &str,
        worker_id: &str,
        new_duration: Duration,
    ) -> Result<EngineAck, EngineError>;

    async fn set_variable(
        &self,
        process_instance_id: &str,
        name: &str,
        value: TypedValue,
    ) -> Result<EngineAck, EngineError>;
}

/// `reqwest`-backed implementation of [`EngineClient`].
///
/// Cloneable — `reqwest::Client` is internally reference-counted, the same
/// pattern as the teacher's `BpmnLiteConnection` wrapping a cheaply-cloned
/// `tonic` channel.
#[derive(Debug, Clone)]
pub struct HttpEngineClient {
    http: reqwest::Client,
    base_url: String,
    authorization: Option<String>,
}

impl HttpEngineClient {
    /// Build a client from `ENGINE_REST_BASE_URL` / `ENGINE_REST_AUTHORIZATION`
    /// / `ENGINE_REST_TIMEOUT_SECONDS`.
    pub fn from_env() -> Result<Self, crate::error::ConfigError> {
        let base_url = std::env::var(ENV_BASE_URL)
            .map_err(|_| crate::error::ConfigError::MissingEnv(ENV_BASE_URL))?;
        let authorization = std::env::var(ENV_AUTHORIZATION).ok();
        let timeout = std::env::var(ENV_TIMEOUT_SECONDS)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CALL_TIMEOUT);
        Ok(Self::new(base_url, authorization, timeout))
    }

    /// Build a client pointed at `base_url`, with an HTTP connection pool
    /// sized to accommodate `maxJobs + 1` concurrent requests (spec §5).
    /// `reqwest::Client`'s pool grows on demand, so no explicit sizing call
    /// is required here; the constructor documents the invariant instead.
    pub fn new(base_url: String, authorization: Option<String>, call_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .expect("reqwest client builder with only timeout configured cannot fail");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.authorization {
            Some(header) => builder.header(reqwest::header::AUTHORIZATION, header),
            None => builder,
        }
    }

    /// POST helper for the fire-and-forget (204-on-success) endpoints that
    /// may be rejected with `notFound`/`gone` because the lease is no
    /// longer ours (spec §6's "404 ⇒ lease is gone; 409 ⇒ lock lost").
    async fn post_ack<B: serde::Serialize>(
        &self,
        path: String,
        body: &B,
    ) -> Result<EngineAck, EngineError> {
        let resp = self
            .authorize(self.http.post(self.url(&path)).json(body))
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(EngineAck::Ok);
        }
        if status.as_u16() == 404 || status.as_u16() == 409 {
            return Ok(EngineAck::Gone);
        }
        let body_text = resp.text().await.unwrap_or_default();
        Err(EngineError::from_status(status, body_text))
    }
}

#[async_trait]
impl EngineClient for HttpEngineClient {
    async fn fetch_and_lock(
        &self,
        worker_id: &str,
        max_tasks: u32,
        async_response_timeout: Duration,
        topics: &[FetchAndLockTopic],
    ) -> Result<Vec<LockedExternalTask>, EngineError> {
        let req = FetchAndLockRequest {
            worker_id: worker_id.to_string(),
            max_tasks,
            async_response_timeout: async_response_timeout.as_millis() as u64,
            topics: topics.to_vec(),
        };
        // The engine holds this request open for up to async_response_timeout;
        // give the HTTP layer generous headroom above that instead of the
        // short default call timeout.
        let resp = self
            .authorize(
                self.http
                    .post(self.url("/external-task/fetchAndLock"))
                    .timeout(async_response_timeout + Duration::from_secs(5))
                    .json(&req),
            )
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::from_status(status, body));
        }
        Ok(resp.json::<Vec<LockedExternalTask>>().await?)
    }

    async fn complete(
        &self,
        id: &str,
        worker_id: &str,
        variables: HashMap<String, TypedValue>,
        local_variables: HashMap<String, TypedValue>,
    ) -> Result<EngineAck, EngineError> {
        let req = CompleteRequest {
            worker_id: worker_id.to_string(),
            variables: crate::variable::encode_all(&variables),
            local_variables: crate::variable::encode_all(&local_variables),
        };
        self.post_ack(format!("/external-task/{id}/complete"), &req).await
    }

    async fn handle_failure(
        &self,
        id: &str,
        worker_id: &str,
        error_message: &str,
        error_details: &str,
        retries: i32,
        retry_timeout: Duration,
    ) -> Result<EngineAck, EngineError> {
        let req = FailureRequest {
            worker_id: worker_id.to_string(),
            error_message: error_message.to_string(),
            error_details: error_details.to_string(),
            retries,
            retry_timeout: retry_timeout.as_millis() as u64,
        };
        self.post_ack(format!("/external-task/{id}/failure"), &req).await
    }

    async fn handle_bpmn_error(
        &self,
        id: &str,
        worker_id: &str,
        error_code: &str,
        error_message: &str,
        variables: HashMap<String, TypedValue>,
    ) -> Result<EngineAck, EngineError> {
        let req = BpmnErrorRequest {
            worker_id: worker_id.to_string(),
            error_code: error_code.to_string(),
            error_message: error_message.to_string(),
            variables: crate::variable::encode_all(&variables),
        };
        self.post_ack(format!("/external-task/{id}/bpmnError"), &req).await
    }

    async fn extend_lock(
        &self,
        id: &str,
        worker_id: &str,
        new_duration: Duration,
    ) -> Result<EngineAck, EngineError> {
        let req = ExtendLockRequest {
            worker_id: worker_id.to_string(),
            new_duration: new_duration.as_millis() as u64,
        };
        self.post_ack(format!("/external-task/{id}/extendLock"), &req).await
    }

    async fn set_variable(
        &self,
        process_instance_id: &str,
        name: &str,
        value: TypedValue,
    ) -> Result<EngineAck, EngineError> {
        let wire: WireValue = crate::variable::encode(&value);
        let req = SetVariableRequest {
            value: wire.value,
            type_name: wire.type_name,
            value_info: wire.value_info,
        };
        let resp = self
            .authorize(
                self.http
                    .put(self.url(&format!(
                        "/process-instance/{process_instance_id}/variables/{name}"
                    )))
                    .json(&req),
            )
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(EngineAck::Ok);
        }
        if status.as_u16() == 404 {
            return Ok(EngineAck::Gone);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(EngineError::from_status(status, body))
    }
}

// Re-export so callers building requests don't need to reach into `types`.
pub use types::{EngineAck as Ack, FetchAndLockTopic, LockedExternalTask};

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct MockState {
        fetch_calls: Arc<AtomicUsize>,
    }

    async fn spawn_mock_engine() -> (String, Arc<AtomicUsize>) {
        let state = MockState::default();
        let counter = state.fetch_calls.clone();

        async fn fetch_and_lock(
            State(state): State<MockState>,
            Json(_req): Json<serde_json::Value>,
        ) -> Json<Vec<serde_json::Value>> {
            state.fetch_calls.fetch_add(1, Ordering::SeqCst);
            Json(vec![serde_json::json!({
                "id": "L1",
                "topicName": "T",
                "workerId": "w1",
                "lockExpirationTime": chrono::Utc::now().to_rfc3339(),
                "processInstanceId": "P1",
                "processDefinitionKey": "D1",
                "activityId": "A1",
                "businessKey": null,
                "variables": {
                    "name": {"type": "String", "value": "Alice"}
                },
                "retries": null
            })])
        }

        async fn complete() -> axum::http::StatusCode {
            axum::http::StatusCode::NO_CONTENT
        }

        async fn not_found() -> axum::http::StatusCode {
            axum::http::StatusCode::NOT_FOUND
        }

        let app = Router::new()
            .route("/external-task/fetchAndLock", post(fetch_and_lock))
            .route("/external-task/:id/complete", post(complete))
            .route("/external-task/:id/failure", post(not_found))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), counter)
    }

    #[tokio::test]
    async fn fetch_and_lock_decodes_locked_tasks() {
        let (url, _counter) = spawn_mock_engine().await;
        let client = HttpEngineClient::new(url, None, Duration::from_secs(5));
        let topics = vec![FetchAndLockTopic {
            topic_name: "T".to_string(),
            lock_duration: 30_000,
            variables: None,
            deserialize_values: true,
        }];
        let tasks = client
            .fetch_and_lock("w1", 1, Duration::from_secs(1), &topics)
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "L1");
        assert_eq!(tasks[0].topic_name, "T");
    }

    #[tokio::test]
    async fn complete_returns_ok_on_204() {
        let (url, _counter) = spawn_mock_engine().await;
        let client = HttpEngineClient::new(url, None, Duration::from_secs(5));
        let ack = client
            .complete("L1", "w1", HashMap::new(), HashMap::new())
            .await
            .unwrap();
        assert_eq!(ack, EngineAck::Ok);
    }

    #[tokio::test]
    async fn failure_maps_404_to_gone() {
        let (url, _counter) = spawn_mock_engine().await;
        let client = HttpEngineClient::new(url, None, Duration::from_secs(5));
        let ack = client
            .handle_failure("L1", "w1", "boom", "", 0, Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(ack, EngineAck::Gone);
    }

    #[test]
    fn engine_error_classifies_status_codes() {
        let transient = EngineError::from_status(
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            "down".to_string(),
        );
        assert!(transient.is_transient());

        let gone = EngineError::from_status(reqwest::StatusCode::NOT_FOUND, "".to_string());
        assert!(gone.is_lease_lost());

        let permanent =
            EngineError::from_status(reqwest::StatusCode::BAD_REQUEST, "bad".to_string());
        assert!(!permanent.is_transient() && !permanent.is_lease_lost());
    }
}
