use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::domain::{Application, ArtifactHandle, Nickname, Question, RequesterId};

/// Outbound side of the chat integration.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Renders a pending application for moderators and returns the handle decisions will
    /// reference.
    async fn publish_decision_request(
        &self,
        application: &Application,
    ) -> Result<ArtifactHandle, TransportError>;

    async fn notify_user(&self, requester: RequesterId, notice: Notice)
        -> Result<(), TransportError>;

    async fn notify_actor(&self, actor: &str, notice: Notice) -> Result<(), TransportError>;

    /// Removes a decision request once it has been acted on.
    async fn retract_artifact(&self, artifact: &ArtifactHandle) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("transport rejected event with status {0}")]
    Rejected(u16),
    #[error("webhook client could not be built: {0}")]
    Client(String),
}

/// One answer as rendered on the decision request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerView {
    pub question: Question,
    pub label: String,
    pub answer: String,
}

/// Payload moderators see when asked to approve or reject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub artifact: ArtifactHandle,
    pub nickname: Nickname,
    pub requester_id: RequesterId,
    pub answers: Vec<AnswerView>,
    pub submitted_at: DateTime<Utc>,
}

impl DecisionRequest {
    pub fn new(artifact: ArtifactHandle, application: &Application) -> Self {
        let answers = application
            .answers()
            .into_iter()
            .map(|(question, answer)| AnswerView {
                question,
                label: question.label().to_string(),
                answer: answer.to_string(),
            })
            .collect();

        Self {
            artifact,
            nickname: application.nickname.clone(),
            requester_id: application.requester_id,
            answers,
            submitted_at: application.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Approved,
    Rejected,
    WhitelistFailed,
}

/// Message for an applicant or moderator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub nickname: Nickname,
    pub text: String,
}

impl Notice {
    pub fn approved(nickname: &Nickname, decided_by: &str, at: DateTime<Utc>) -> Self {
        Self {
            kind: NoticeKind::Approved,
            nickname: nickname.clone(),
            text: format!(
                "Hello, {nickname}! Your application has been approved by {decided_by} on {}. \
                 You can join the server now.",
                at.format("%Y-%m-%d %H:%M")
            ),
        }
    }

    pub fn rejected(nickname: &Nickname, decided_by: &str, at: DateTime<Utc>) -> Self {
        Self {
            kind: NoticeKind::Rejected,
            nickname: nickname.clone(),
            text: format!(
                "Your application for {nickname} was rejected by {decided_by} on {}. \
                 Contact the administration if you have questions.",
                at.format("%Y-%m-%d %H:%M")
            ),
        }
    }

    pub fn whitelist_failed(nickname: &Nickname, attempts: u32, error: &str) -> Self {
        Self {
            kind: NoticeKind::WhitelistFailed,
            nickname: nickname.clone(),
            text: format!(
                "Adding {nickname} to the whitelist failed after {attempts} attempts ({error}). \
                 The application is still pending; check the RCON connection and server \
                 settings, then approve it again."
            ),
        }
    }
}

/// Everything the service asks the chat side to do, as delivered to a bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundEvent {
    DecisionRequested(DecisionRequest),
    UserNotified {
        requester_id: RequesterId,
        notice: Notice,
    },
    ActorNotified {
        actor: String,
        notice: Notice,
    },
    ArtifactRetracted {
        artifact: ArtifactHandle,
    },
}

/// Bounded in-memory queue a chat bridge drains over HTTP.
#[derive(Debug)]
pub struct OutboxTransport {
    events: Mutex<VecDeque<OutboundEvent>>,
    capacity: usize,
}

impl Default for OutboxTransport {
    fn default() -> Self {
        Self::with_capacity(1000)
    }
}

impl OutboxTransport {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, event: OutboundEvent) -> Result<(), TransportError> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.capacity {
            return Err(TransportError::Unavailable(format!(
                "outbox is full ({} events)",
                self.capacity
            )));
        }
        events.push_back(event);
        Ok(())
    }

    /// Removes and returns up to `limit` of the oldest events.
    pub fn drain(&self, limit: usize) -> Vec<OutboundEvent> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let count = limit.min(events.len());
        events.drain(..count).collect()
    }

    /// Copy of the queued events, oldest first.
    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Transport for OutboxTransport {
    async fn publish_decision_request(
        &self,
        application: &Application,
    ) -> Result<ArtifactHandle, TransportError> {
        let artifact = ArtifactHandle::generate();
        self.push(OutboundEvent::DecisionRequested(DecisionRequest::new(
            artifact.clone(),
            application,
        )))?;
        Ok(artifact)
    }

    async fn notify_user(
        &self,
        requester: RequesterId,
        notice: Notice,
    ) -> Result<(), TransportError> {
        self.push(OutboundEvent::UserNotified {
            requester_id: requester,
            notice,
        })
    }

    async fn notify_actor(&self, actor: &str, notice: Notice) -> Result<(), TransportError> {
        self.push(OutboundEvent::ActorNotified {
            actor: actor.to_string(),
            notice,
        })
    }

    async fn retract_artifact(&self, artifact: &ArtifactHandle) -> Result<(), TransportError> {
        self.push(OutboundEvent::ArtifactRetracted {
            artifact: artifact.clone(),
        })
    }
}

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs every outbound event as JSON to a chat bridge.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl WebhookTransport {
    pub fn new(
        url: impl Into<String>,
        auth_token: Option<String>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|err| TransportError::Client(err.to_string()))?;
        Ok(Self {
            url: url.into(),
            auth_token,
            client,
        })
    }

    async fn deliver(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        let mut request = self.client.post(&self.url).json(event);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| {
            warn!(url = %self.url, error = %err, "webhook delivery failed");
            TransportError::Unavailable(err.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %self.url, status = status.as_u16(), "webhook rejected event");
            return Err(TransportError::Rejected(status.as_u16()));
        }

        debug!(url = %self.url, "webhook event delivered");
        Ok(())
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    async fn publish_decision_request(
        &self,
        application: &Application,
    ) -> Result<ArtifactHandle, TransportError> {
        let artifact = ArtifactHandle::generate();
        self.deliver(&OutboundEvent::DecisionRequested(DecisionRequest::new(
            artifact.clone(),
            application,
        )))
        .await?;
        Ok(artifact)
    }

    async fn notify_user(
        &self,
        requester: RequesterId,
        notice: Notice,
    ) -> Result<(), TransportError> {
        self.deliver(&OutboundEvent::UserNotified {
            requester_id: requester,
            notice,
        })
        .await
    }

    async fn notify_actor(&self, actor: &str, notice: Notice) -> Result<(), TransportError> {
        self.deliver(&OutboundEvent::ActorNotified {
            actor: actor.to_string(),
            notice,
        })
        .await
    }

    async fn retract_artifact(&self, artifact: &ArtifactHandle) -> Result<(), TransportError> {
        self.deliver(&OutboundEvent::ArtifactRetracted {
            artifact: artifact.clone(),
        })
        .await
    }
}

/// Transport picked from configuration at startup.
pub enum TransportVariant {
    Outbox(Arc<OutboxTransport>),
    Webhook(WebhookTransport),
}

#[async_trait]
impl Transport for TransportVariant {
    async fn publish_decision_request(
        &self,
        application: &Application,
    ) -> Result<ArtifactHandle, TransportError> {
        match self {
            TransportVariant::Outbox(inner) => inner.publish_decision_request(application).await,
            TransportVariant::Webhook(inner) => inner.publish_decision_request(application).await,
        }
    }

    async fn notify_user(
        &self,
        requester: RequesterId,
        notice: Notice,
    ) -> Result<(), TransportError> {
        match self {
            TransportVariant::Outbox(inner) => inner.notify_user(requester, notice).await,
            TransportVariant::Webhook(inner) => inner.notify_user(requester, notice).await,
        }
    }

    async fn notify_actor(&self, actor: &str, notice: Notice) -> Result<(), TransportError> {
        match self {
            TransportVariant::Outbox(inner) => inner.notify_actor(actor, notice).await,
            TransportVariant::Webhook(inner) => inner.notify_actor(actor, notice).await,
        }
    }

    async fn retract_artifact(&self, artifact: &ArtifactHandle) -> Result<(), TransportError> {
        match self {
            TransportVariant::Outbox(inner) => inner.retract_artifact(artifact).await,
            TransportVariant::Webhook(inner) => inner.retract_artifact(artifact).await,
        }
    }
}
