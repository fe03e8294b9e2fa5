//! Wire DTOs for the engine REST surface (spec §6).
//!
//! Kept separate from `crate::variable`'s `TypedValue` so the HTTP shapes
//! can evolve independently of the decoded domain model, mirroring the
//! teacher's split between `bpmn_integration::client::proto` (raw wire) and
//! the domain-friendly types built on top of it.

use crate::variable::WireValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct FetchAndLockRequest {
    #[serde(rename = "workerId")]
    pub worker_id: String,
    #[serde(rename = "maxTasks")]
    pub max_tasks: u32,
    #[serde(rename = "asyncResponseTimeout")]
    pub async_response_timeout: u64,
    pub topics: Vec<FetchAndLockTopic>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchAndLockTopic {
    #[serde(rename = "topicName")]
    pub topic_name: String,
    #[serde(rename = "lockDuration")]
    pub lock_duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<String>>,
    #[serde(rename = "deserializeValues")]
    pub deserialize_values: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockedExternalTask {
    pub id: String,
    #[serde(rename = "topicName")]
    pub topic_name: String,
    #[serde(rename = "workerId")]
    pub worker_id: String,
    #[serde(rename = "lockExpirationTime")]
    pub lock_expiration_time: DateTime<Utc>,
    #[serde(rename = "processInstanceId")]
    pub process_instance_id: String,
    #[serde(rename = "processDefinitionKey")]
    pub process_definition_key: String,
    #[serde(rename = "activityId")]
    pub activity_id: String,
    #[serde(rename = "businessKey", default)]
    pub business_key: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, WireValue>,
    #[serde(default)]
    pub retries: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteRequest {
    #[serde(rename = "workerId")]
    pub worker_id: String,
    pub variables: HashMap<String, WireValue>,
    #[serde(rename = "localVariables")]
    pub local_variables: HashMap<String, WireValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRequest {
    #[serde(rename = "workerId")]
    pub worker_id: String,
    #[serde(rename = "errorMessage")]
    pub error_message: String,
    #[serde(rename = "errorDetails")]
    pub error_details: String,
    pub retries: i32,
    #[serde(rename = "retryTimeout")]
    pub retry_timeout: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BpmnErrorRequest {
    #[serde(rename = "workerId")]
    pub worker_id: String,
    #[serde(rename = "errorCode")]
    pub error_code: String,
    #[serde(rename = "errorMessage")]
    pub error_message: String,
    pub variables: HashMap<String, WireValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtendLockRequest {
    #[serde(rename = "workerId")]
    pub worker_id: String,
    #[serde(rename = "newDuration")]
    pub new_duration: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetVariableRequest {
    pub value: serde_json::Value,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "valueInfo")]
    pub value_info: crate::variable::ValueInfo,
}

/// Outcome of a call that the engine may reject as `notFound`/`gone`
/// because another worker (or lock expiry) already reclaimed the lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAck {
    Ok,
    Gone,
}
