//! Membership applications: intake from the chat bridge, moderator decisions, and the
//! RCON `whitelist add` side effect with bounded retry.

pub mod correlation;
pub mod domain;
pub mod rcon;
pub mod repository;
pub mod router;
pub mod service;
pub mod sqlite;
pub mod transport;

#[cfg(test)]
mod tests;

pub use correlation::{Correlation, DecisionLedger};
pub use domain::{
    Application, ApplicationForm, ApplicationStatus, ApplicationStatusView, ApplicationSubmission,
    ArtifactHandle, Decision, Nickname, Question, RequesterId, ValidationError,
};
pub use rcon::{RconClient, RconError, RemoteConsole};
pub use repository::{ApplicationStore, StoreError};
pub use router::{membership_router, require_admin, AdminToken};
pub use service::{DecisionOutcome, MembershipError, MembershipService, SubmissionReceipt};
pub use sqlite::SqliteApplicationStore;
pub use transport::{
    DecisionRequest, Notice, NoticeKind, OutboundEvent, OutboxTransport, Transport,
    TransportError, TransportVariant, WebhookTransport,
};
