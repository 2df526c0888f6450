use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use super::remote::{ErrorCode, RemoteError, RemoteStore};
use crate::models::FieldMap;

/// In-memory remote with scripted failures and a log of every update call.
#[derive(Default)]
pub(crate) struct MemoryRemoteStore {
    docs: Mutex<HashMap<String, FieldMap>>,
    failures: Mutex<VecDeque<ErrorCode>>,
    get_failure: Mutex<Option<ErrorCode>>,
    calls: Mutex<Vec<(Instant, FieldMap)>>,
}

impl MemoryRemoteStore {
    pub(crate) fn with_document(user_id: &str, doc: FieldMap) -> Self {
        let store = Self::default();
        store.docs.lock().unwrap().insert(user_id.to_string(), doc);
        store
    }

    /// Fail the next `codes.len()` update calls, in order.
    pub(crate) fn fail_next(&self, codes: impl IntoIterator<Item = ErrorCode>) {
        self.failures.lock().unwrap().extend(codes);
    }

    pub(crate) fn fail_get(&self, code: ErrorCode) {
        *self.get_failure.lock().unwrap() = Some(code);
    }

    pub(crate) fn calls(&self) -> Vec<(Instant, FieldMap)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn document(&self, user_id: &str) -> Option<FieldMap> {
        self.docs.lock().unwrap().get(user_id).cloned()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, user_id: &str) -> Result<Option<FieldMap>, RemoteError> {
        if let Some(code) = self.get_failure.lock().unwrap().clone() {
            return Err(RemoteError::new(code, "scripted get failure"));
        }
        Ok(self.docs.lock().unwrap().get(user_id).cloned())
    }

    async fn update(&self, user_id: &str, fields: &FieldMap) -> Result<(), RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), fields.clone()));
        if let Some(code) = self.failures.lock().unwrap().pop_front() {
            return Err(RemoteError::new(code, "scripted failure"));
        }
        let mut docs = self.docs.lock().unwrap();
        let doc = docs.entry(user_id.to_string()).or_default();
        for (k, v) in fields {
            doc.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}
