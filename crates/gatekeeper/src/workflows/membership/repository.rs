use async_trait::async_trait;

use super::domain::{Application, ApplicationStatus, ApplicationSubmission, Nickname};

/// Storage abstraction so the service can be exercised without a database file.
///
/// Every write targets a single row keyed by nickname and is one statement, which is what
/// keeps concurrent decisions from losing updates.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// Creates a `Pending` record. Fails with [`StoreError::DuplicateKey`] if the nickname is
    /// taken; the existing record is left untouched.
    async fn insert(&self, submission: &ApplicationSubmission) -> Result<Application, StoreError>;

    async fn exists(&self, nickname: &Nickname) -> Result<bool, StoreError>;

    /// Moves a `Pending` record to a terminal status, stamping `processed_at` and
    /// `processed_by`. Terminal records are never overwritten.
    async fn set_status(
        &self,
        nickname: &Nickname,
        status: ApplicationStatus,
        processed_by: &str,
    ) -> Result<Application, StoreError>;

    async fn lookup(&self, nickname: &Nickname) -> Result<Option<Application>, StoreError>;

    async fn delete(&self, nickname: &Nickname) -> Result<(), StoreError>;

    /// Records in creation order, optionally filtered by status.
    async fn list(
        &self,
        status: Option<ApplicationStatus>,
        limit: usize,
    ) -> Result<Vec<Application>, StoreError>;
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("nickname already registered")]
    DuplicateKey,
    #[error("record not found")]
    NotFound,
    #[error("record already {0}")]
    AlreadyProcessed(ApplicationStatus),
    #[error("cannot transition a record to {0}")]
    InvalidTransition(ApplicationStatus),
    #[error("stored record is malformed: {0}")]
    Malformed(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
