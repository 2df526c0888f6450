use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::{info, warn};

use super::remote::{ErrorClass, RemoteError, RemoteStore};
use crate::models::{FieldMap, UPDATED_AT_FIELD};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total calls made before a write is abandoned.
    pub max_attempts: u32,
    /// Linear backoff step: attempt `n` waits `n × base_delay`.
    pub base_delay: Duration,
    /// Fixed wait after a rate-limited attempt.
    pub rate_limited_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            rate_limited_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn backoff(&self, attempt: u32, class: ErrorClass) -> Duration {
        match class {
            ErrorClass::RateLimited => self.rate_limited_delay,
            ErrorClass::Transient | ErrorClass::Other => self.base_delay * attempt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { attempts: u32 },
    /// Retries exhausted. The payload was not applied and nothing was lost locally.
    Abandoned { attempts: u32, error: RemoteError },
}

impl WriteOutcome {
    #[must_use]
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

pub struct RemoteWriter {
    store: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
}

impl RemoteWriter {
    pub fn new(store: Arc<dyn RemoteStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Drop null fields and stamp the `updatedAt` marker.
    #[must_use]
    pub fn prepare_payload(payload: &FieldMap, now: DateTime<Utc>) -> FieldMap {
        let mut out: FieldMap = payload
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.insert(
            UPDATED_AT_FIELD.to_string(),
            Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        out
    }

    pub async fn write(&self, user_id: &str, payload: &FieldMap) -> WriteOutcome {
        let body = Self::prepare_payload(payload, Utc::now());
        let max_attempts = self.policy.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.store.update(user_id, &body).await {
                Ok(()) => {
                    info!(user_id, attempt, fields = body.len(), "remote write applied");
                    return WriteOutcome::Written { attempts: attempt };
                }
                Err(error) if attempt >= max_attempts => {
                    warn!(user_id, attempt, %error, "remote write abandoned after retries");
                    return WriteOutcome::Abandoned {
                        attempts: attempt,
                        error,
                    };
                }
                Err(error) => {
                    let delay = self.policy.backoff(attempt, error.code.class());
                    warn!(
                        user_id,
                        attempt,
                        %error,
                        delay_ms = delay.as_millis() as u64,
                        "remote write failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
