//! The `Lease` (spec §3) — a locked external task, created on
//! `fetchAndLock` and destroyed at terminal report.

use crate::engine::types::LockedExternalTask;
use crate::variable::{decode_all, CodecError, TypedValue};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Lease {
    pub id: String,
    pub topic: String,
    pub process_instance_id: String,
    pub process_definition_key: String,
    pub activity_id: String,
    pub business_key: Option<String>,
    pub variables: HashMap<String, TypedValue>,
    pub lock_expires_at: DateTime<Utc>,
    pub retries_remaining: Option<i32>,
}

impl Lease {
    /// Decode a locked task from the engine's wire response (spec §4.B
    /// decode direction applied to an entire lease).
    pub fn from_wire(task: LockedExternalTask) -> Result<Self, CodecError> {
        Ok(Self {
            id: task.id,
            topic: task.topic_name,
            process_instance_id: task.process_instance_id,
            process_definition_key: task.process_definition_key,
            activity_id: task.activity_id,
            business_key: task.business_key,
            variables: decode_all(&task.variables)?,
            lock_expires_at: task.lock_expiration_time,
            retries_remaining: task.retries,
        })
    }

    /// True once the wall clock has passed the lock expiry (spec §3
    /// invariant: "lockExpiresAt is monotonically extended, never
    /// shortened" — this only ever moves forward via `extend`).
    pub fn is_lock_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.lock_expires_at
    }

    pub fn extend(&mut self, new_expiry: DateTime<Utc>) {
        if new_expiry > self.lock_expires_at {
            self.lock_expires_at = new_expiry;
        }
    }
}
