use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use super::correlation::{Correlation, DecisionLedger};
use super::domain::{
    Application, ApplicationStatus, ApplicationSubmission, ArtifactHandle, Decision, Nickname,
    ValidationError,
};
use super::rcon::{RconError, RemoteConsole};
use super::repository::{ApplicationStore, StoreError};
use super::transport::{Notice, Transport, TransportError};
use crate::config::WhitelistConfig;

/// Result of a successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub application: Application,
    pub artifact: ArtifactHandle,
}

/// What a decision did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approved {
        application: Application,
        attempts: u32,
        console_response: String,
    },
    Rejected {
        application: Application,
    },
    /// The record was already terminal; nothing changed.
    AlreadyProcessed {
        nickname: Nickname,
        status: ApplicationStatus,
    },
}

impl DecisionOutcome {
    pub fn status(&self) -> ApplicationStatus {
        match self {
            DecisionOutcome::Approved { .. } => ApplicationStatus::Approved,
            DecisionOutcome::Rejected { .. } => ApplicationStatus::Rejected,
            DecisionOutcome::AlreadyProcessed { status, .. } => *status,
        }
    }
}

/// Lifecycle controller: intake, moderator decisions, whitelist side effect.
///
/// The controller is the only writer of status fields. Calls touching the same nickname are
/// serialized through the [`DecisionLedger`]; different nicknames run concurrently.
pub struct MembershipService<S, C, T> {
    store: Arc<S>,
    console: Arc<C>,
    transport: Arc<T>,
    ledger: DecisionLedger,
    whitelist: WhitelistConfig,
}

impl<S, C, T> MembershipService<S, C, T>
where
    S: ApplicationStore + 'static,
    C: RemoteConsole + 'static,
    T: Transport + 'static,
{
    pub fn new(
        store: Arc<S>,
        console: Arc<C>,
        transport: Arc<T>,
        whitelist: WhitelistConfig,
    ) -> Self {
        Self {
            store,
            console,
            transport,
            ledger: DecisionLedger::new(),
            whitelist,
        }
    }

    pub fn ledger(&self) -> &DecisionLedger {
        &self.ledger
    }

    /// Accept a filled-in form and publish it for moderators.
    pub async fn submit(
        &self,
        submission: ApplicationSubmission,
    ) -> Result<SubmissionReceipt, MembershipError> {
        submission.validate()?;
        let nickname = submission.nickname.clone();
        let _guard = self.ledger.serialize(&nickname).await;

        if self.store.exists(&nickname).await? {
            info!(%nickname, "duplicate application rejected");
            return Err(MembershipError::DuplicateApplication(nickname));
        }

        let application = self.store.insert(&submission).await.map_err(|err| match err {
            StoreError::DuplicateKey => MembershipError::DuplicateApplication(nickname.clone()),
            other => MembershipError::Store(other),
        })?;

        let artifact = match self.transport.publish_decision_request(&application).await {
            Ok(artifact) => artifact,
            Err(err) => {
                error!(%nickname, error = %err, "decision request could not be published");
                // Without a rendered request nobody can act on the row, and it would block
                // the applicant from resubmitting.
                if let Err(cleanup) = self.store.delete(&nickname).await {
                    error!(%nickname, error = %cleanup, "failed to remove unpublished application");
                }
                return Err(MembershipError::Transport(err));
            }
        };

        self.ledger.record(
            artifact.clone(),
            Correlation {
                application_id: application.id,
                nickname: nickname.clone(),
                requester_id: application.requester_id,
            },
        );

        info!(
            %nickname,
            requester = %application.requester_id,
            %artifact,
            "application submitted"
        );
        Ok(SubmissionReceipt {
            application,
            artifact,
        })
    }

    /// Apply a moderator decision delivered against a published decision request. The
    /// request is retracted afterwards whether or not the decision went through. A request
    /// only ever acts on the application it was rendered from.
    pub async fn decide(
        &self,
        artifact: &ArtifactHandle,
        decision: Decision,
        decided_by: &str,
    ) -> Result<DecisionOutcome, MembershipError> {
        let Some(correlation) = self.ledger.resolve(artifact) else {
            return self.settled_decision(artifact).await;
        };

        let result = self
            .decide_record(&correlation.nickname, Some(&correlation), decision, decided_by)
            .await
            .map_err(|err| match err {
                MembershipError::NotFound(_) => MembershipError::UnknownArtifact(artifact.clone()),
                other => other,
            });

        if self.ledger.take(artifact).is_some() {
            if let Err(err) = self.transport.retract_artifact(artifact).await {
                warn!(%artifact, error = %err, "failed to retract decision request");
            }
        }

        result
    }

    /// A repeated click on a request an earlier decision already consumed.
    async fn settled_decision(
        &self,
        artifact: &ArtifactHandle,
    ) -> Result<DecisionOutcome, MembershipError> {
        let unknown = || MembershipError::UnknownArtifact(artifact.clone());
        let correlation = self.ledger.settled(artifact).ok_or_else(unknown)?;
        let _guard = self.ledger.serialize(&correlation.nickname).await;

        match self.store.lookup(&correlation.nickname).await? {
            Some(application)
                if correlation.matches(&application) && application.status.is_terminal() =>
            {
                info!(%artifact, status = %application.status, "duplicate decision ignored");
                Ok(DecisionOutcome::AlreadyProcessed {
                    nickname: application.nickname,
                    status: application.status,
                })
            }
            _ => Err(unknown()),
        }
    }

    /// Apply a decision by nickname. Used directly to re-trigger an approval whose
    /// whitelist command failed.
    pub async fn decide_nickname(
        &self,
        nickname: &Nickname,
        decision: Decision,
        decided_by: &str,
    ) -> Result<DecisionOutcome, MembershipError> {
        self.decide_record(nickname, None, decision, decided_by).await
    }

    async fn decide_record(
        &self,
        nickname: &Nickname,
        expected: Option<&Correlation>,
        decision: Decision,
        decided_by: &str,
    ) -> Result<DecisionOutcome, MembershipError> {
        let _guard = self.ledger.serialize(nickname).await;

        let application = self
            .store
            .lookup(nickname)
            .await?
            .ok_or_else(|| MembershipError::NotFound(nickname.clone()))?;

        if let Some(correlation) = expected {
            if !correlation.matches(&application) {
                warn!(
                    %nickname,
                    requested = correlation.application_id,
                    current = application.id,
                    "decision request belongs to an earlier application"
                );
                return Err(MembershipError::NotFound(nickname.clone()));
            }
        }

        if application.status.is_terminal() {
            info!(%nickname, status = %application.status, "decision ignored, already processed");
            return Ok(DecisionOutcome::AlreadyProcessed {
                nickname: nickname.clone(),
                status: application.status,
            });
        }

        match decision {
            Decision::Reject => self.reject(application, decided_by).await,
            Decision::Approve => self.approve(application, decided_by).await,
        }
    }

    async fn reject(
        &self,
        application: Application,
        decided_by: &str,
    ) -> Result<DecisionOutcome, MembershipError> {
        let nickname = application.nickname.clone();
        let updated = match self
            .finalize(&nickname, ApplicationStatus::Rejected, decided_by)
            .await?
        {
            Finalized::Updated(updated) => updated,
            Finalized::AlreadyProcessed(outcome) => return Ok(outcome),
        };

        info!(%nickname, %decided_by, "application rejected");
        let notice = Notice::rejected(&nickname, decided_by, Utc::now());
        if let Err(err) = self.transport.notify_user(updated.requester_id, notice).await {
            warn!(%nickname, error = %err, "failed to notify applicant of rejection");
        }

        Ok(DecisionOutcome::Rejected {
            application: updated,
        })
    }

    async fn approve(
        &self,
        application: Application,
        decided_by: &str,
    ) -> Result<DecisionOutcome, MembershipError> {
        // Rows addressed by admin lookups are not validated; the console only sees valid names.
        let nickname = Nickname::parse(application.nickname.as_str())?;

        let (attempts, console_response) = match self.whitelist_add(&nickname).await {
            Ok(receipt) => receipt,
            Err((attempts, source)) => {
                error!(%nickname, attempts, error = %source, "whitelist command exhausted retries");
                let notice = Notice::whitelist_failed(&nickname, attempts, &source.to_string());
                if let Err(err) = self.transport.notify_actor(decided_by, notice).await {
                    error!(%nickname, %decided_by, error = %err, "failed to notify moderator");
                }
                return Err(MembershipError::RemoteCommand {
                    nickname,
                    attempts,
                    source,
                });
            }
        };

        let updated = match self
            .finalize(&nickname, ApplicationStatus::Approved, decided_by)
            .await?
        {
            Finalized::Updated(updated) => updated,
            Finalized::AlreadyProcessed(outcome) => return Ok(outcome),
        };

        info!(%nickname, %decided_by, attempts, "application approved");
        let notice = Notice::approved(&nickname, decided_by, Utc::now());
        if let Err(err) = self.transport.notify_user(updated.requester_id, notice).await {
            warn!(%nickname, error = %err, "failed to notify applicant of approval");
        }

        Ok(DecisionOutcome::Approved {
            application: updated,
            attempts,
            console_response,
        })
    }

    async fn finalize(
        &self,
        nickname: &Nickname,
        status: ApplicationStatus,
        decided_by: &str,
    ) -> Result<Finalized, MembershipError> {
        match self.store.set_status(nickname, status, decided_by).await {
            Ok(updated) => Ok(Finalized::Updated(updated)),
            // Another process finished it between our lookup and the update.
            Err(StoreError::AlreadyProcessed(current)) => {
                Ok(Finalized::AlreadyProcessed(DecisionOutcome::AlreadyProcessed {
                    nickname: nickname.clone(),
                    status: current,
                }))
            }
            Err(StoreError::NotFound) => Err(MembershipError::NotFound(nickname.clone())),
            Err(other) => Err(MembershipError::Store(other)),
        }
    }

    /// Runs `whitelist add` with bounded retry and a fixed pause between failed attempts.
    async fn whitelist_add(&self, nickname: &Nickname) -> Result<(u32, String), (u32, RconError)> {
        let command = format!("whitelist add {nickname}");
        let max_attempts = self.whitelist.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.console.execute(&command).await {
                Ok(response) => {
                    info!(%nickname, attempt, response = %response, "whitelist command accepted");
                    return Ok((attempt, response));
                }
                Err(err) if attempt < max_attempts => {
                    warn!(
                        %nickname,
                        attempt,
                        max_attempts,
                        error = %err,
                        "whitelist command failed, retrying"
                    );
                    tokio::time::sleep(self.whitelist.backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(%nickname, attempt, error = %err, "whitelist command failed");
                    return Err((attempt, err));
                }
            }
        }
    }

    /// Read-only status lookup for administrators.
    pub async fn query_status(
        &self,
        nickname: &Nickname,
    ) -> Result<Option<Application>, MembershipError> {
        Ok(self.store.lookup(nickname).await?)
    }

    /// Pending applications, oldest first.
    pub async fn pending(&self, limit: usize) -> Result<Vec<Application>, MembershipError> {
        Ok(self
            .store
            .list(Some(ApplicationStatus::Pending), limit)
            .await?)
    }

    /// All applications, oldest first.
    pub async fn all(&self, limit: usize) -> Result<Vec<Application>, MembershipError> {
        Ok(self.store.list(None, limit).await?)
    }

    /// Delete a record regardless of its state and withdraw any open decision requests.
    pub async fn purge_record(&self, nickname: &Nickname) -> Result<(), MembershipError> {
        let _guard = self.ledger.serialize(nickname).await;

        self.store.delete(nickname).await.map_err(|err| match err {
            StoreError::NotFound => MembershipError::NotFound(nickname.clone()),
            other => MembershipError::Store(other),
        })?;

        for artifact in self.ledger.forget(nickname) {
            if let Err(err) = self.transport.retract_artifact(&artifact).await {
                warn!(%nickname, %artifact, error = %err, "failed to retract decision request");
            }
        }

        info!(%nickname, "application purged");
        Ok(())
    }

    /// Runs an arbitrary console command once, without retry.
    pub async fn console_command(&self, command: &str) -> Result<String, RconError> {
        self.console.execute(command).await
    }
}

enum Finalized {
    Updated(Application),
    AlreadyProcessed(DecisionOutcome),
}

/// Error raised by the membership service.
#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("nickname `{0}` is already registered")]
    DuplicateApplication(Nickname),
    #[error("no application found for `{0}`")]
    NotFound(Nickname),
    #[error("unknown decision request `{0}`")]
    UnknownArtifact(ArtifactHandle),
    #[error("adding `{nickname}` to the whitelist failed after {attempts} attempts: {source}")]
    RemoteCommand {
        nickname: Nickname,
        attempts: u32,
        #[source]
        source: RconError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
