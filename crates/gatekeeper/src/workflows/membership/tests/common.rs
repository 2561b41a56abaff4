use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::WhitelistConfig;
use crate::workflows::membership::{
    Application, ApplicationForm, ApplicationStatus, ApplicationStore, ApplicationSubmission,
    ArtifactHandle, MembershipService, Nickname, Notice, OutboxTransport, RconError,
    RemoteConsole, RequesterId, StoreError, Transport, TransportError,
};

pub(super) fn nickname(raw: &str) -> Nickname {
    Nickname::parse(raw).expect("valid nickname")
}

pub(super) fn submission() -> ApplicationSubmission {
    submission_for("Steve123", 42)
}

pub(super) fn submission_for(raw: &str, requester: u64) -> ApplicationSubmission {
    ApplicationSubmission {
        requester_id: RequesterId(requester),
        nickname: nickname(raw),
        form: ApplicationForm {
            age: "17".to_string(),
            how_found: "friend".to_string(),
            interests: "building".to_string(),
            about: "hi".to_string(),
        },
    }
}

pub(super) fn whitelist_config() -> WhitelistConfig {
    WhitelistConfig {
        max_attempts: 3,
        backoff: Duration::from_secs(2),
    }
}

pub(super) type TestService = MembershipService<MemoryStore, ScriptedConsole, OutboxTransport>;

pub(super) fn build_service(
    console: ScriptedConsole,
) -> (
    TestService,
    Arc<MemoryStore>,
    Arc<ScriptedConsole>,
    Arc<OutboxTransport>,
) {
    let store = Arc::new(MemoryStore::default());
    let console = Arc::new(console);
    let outbox = Arc::new(OutboxTransport::default());
    let service = MembershipService::new(
        store.clone(),
        console.clone(),
        outbox.clone(),
        whitelist_config(),
    );
    (service, store, console, outbox)
}

/// In-memory store with the same single-row guard semantics as the SQLite table.
#[derive(Default)]
pub(super) struct MemoryStore {
    records: Mutex<BTreeMap<Nickname, Application>>,
    next_id: AtomicU32,
}

impl MemoryStore {
    pub(super) fn len(&self) -> usize {
        self.records.lock().expect("store mutex poisoned").len()
    }

    pub(super) fn get(&self, nickname: &Nickname) -> Option<Application> {
        self.records
            .lock()
            .expect("store mutex poisoned")
            .get(nickname)
            .cloned()
    }
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn insert(&self, submission: &ApplicationSubmission) -> Result<Application, StoreError> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        if records.contains_key(&submission.nickname) {
            return Err(StoreError::DuplicateKey);
        }
        let application = Application {
            id: i64::from(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            requester_id: submission.requester_id,
            nickname: submission.nickname.clone(),
            form: submission.form.clone(),
            status: ApplicationStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
            processed_by: None,
        };
        records.insert(submission.nickname.clone(), application.clone());
        Ok(application)
    }

    async fn exists(&self, nickname: &Nickname) -> Result<bool, StoreError> {
        Ok(self
            .records
            .lock()
            .expect("store mutex poisoned")
            .contains_key(nickname))
    }

    async fn set_status(
        &self,
        nickname: &Nickname,
        status: ApplicationStatus,
        processed_by: &str,
    ) -> Result<Application, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidTransition(status));
        }
        let mut records = self.records.lock().expect("store mutex poisoned");
        let record = records.get_mut(nickname).ok_or(StoreError::NotFound)?;
        if record.status.is_terminal() {
            return Err(StoreError::AlreadyProcessed(record.status));
        }
        record.status = status;
        record.processed_at = Some(Utc::now());
        record.processed_by = Some(processed_by.to_string());
        Ok(record.clone())
    }

    async fn lookup(&self, nickname: &Nickname) -> Result<Option<Application>, StoreError> {
        Ok(self.get(nickname))
    }

    async fn delete(&self, nickname: &Nickname) -> Result<(), StoreError> {
        self.records
            .lock()
            .expect("store mutex poisoned")
            .remove(nickname)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn list(
        &self,
        status: Option<ApplicationStatus>,
        limit: usize,
    ) -> Result<Vec<Application>, StoreError> {
        let records = self.records.lock().expect("store mutex poisoned");
        let mut matching: Vec<Application> = records
            .values()
            .filter(|record| status.map_or(true, |wanted| record.status == wanted))
            .cloned()
            .collect();
        matching.sort_by_key(|record| record.id);
        matching.truncate(limit);
        Ok(matching)
    }
}

pub(super) struct UnavailableStore;

#[async_trait]
impl ApplicationStore for UnavailableStore {
    async fn insert(&self, _submission: &ApplicationSubmission) -> Result<Application, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn exists(&self, _nickname: &Nickname) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn set_status(
        &self,
        _nickname: &Nickname,
        _status: ApplicationStatus,
        _processed_by: &str,
    ) -> Result<Application, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn lookup(&self, _nickname: &Nickname) -> Result<Option<Application>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn delete(&self, _nickname: &Nickname) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn list(
        &self,
        _status: Option<ApplicationStatus>,
        _limit: usize,
    ) -> Result<Vec<Application>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}

/// Console that fails a fixed number of times before answering, recording every call.
pub(super) struct ScriptedConsole {
    failures_left: AtomicU32,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedConsole {
    pub(super) fn succeeding() -> Self {
        Self::failing(0)
    }

    pub(super) fn failing(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("console mutex poisoned")
            .iter()
            .map(|(command, _)| command.clone())
            .collect()
    }

    pub(super) fn call_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .expect("console mutex poisoned")
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl RemoteConsole for ScriptedConsole {
    async fn execute(&self, command: &str) -> Result<String, RconError> {
        self.calls
            .lock()
            .expect("console mutex poisoned")
            .push((command.to_string(), Instant::now()));

        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(RconError::ConnectionRefused {
                addr: "127.0.0.1:25575".to_string(),
            });
        }
        let player = command.strip_prefix("whitelist add ").unwrap_or(command);
        Ok(format!("Added {player} to the whitelist"))
    }
}

/// Transport whose decision requests never go out.
#[derive(Default)]
pub(super) struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn publish_decision_request(
        &self,
        _application: &Application,
    ) -> Result<ArtifactHandle, TransportError> {
        Err(TransportError::Unavailable("chat bridge offline".to_string()))
    }

    async fn notify_user(
        &self,
        _requester: RequesterId,
        _notice: Notice,
    ) -> Result<(), TransportError> {
        Err(TransportError::Unavailable("chat bridge offline".to_string()))
    }

    async fn notify_actor(&self, _actor: &str, _notice: Notice) -> Result<(), TransportError> {
        Err(TransportError::Unavailable("chat bridge offline".to_string()))
    }

    async fn retract_artifact(&self, _artifact: &ArtifactHandle) -> Result<(), TransportError> {
        Err(TransportError::Unavailable("chat bridge offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
