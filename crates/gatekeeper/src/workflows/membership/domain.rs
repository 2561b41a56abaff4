use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest nickname the game accepts.
pub const NICKNAME_MAX_LEN: usize = 16;

/// In-game nickname; the unique, case-sensitive key of an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Nickname(String);

impl Nickname {
    /// Validates a nickname. It ends up inside a console command, so whitespace and control
    /// characters are refused outright.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        let length = raw.chars().count();
        if length == 0 {
            return Err(ValidationError::Blank(Question::Nickname));
        }
        if length > NICKNAME_MAX_LEN {
            return Err(ValidationError::TooLong {
                question: Question::Nickname,
                max: NICKNAME_MAX_LEN,
            });
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ValidationError::IllegalNickname(raw));
        }
        Ok(Self(raw))
    }

    /// Addresses an existing record by its exact stored name. Rows written by older
    /// deployments may not pass `parse`.
    pub fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nickname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Nickname {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Nickname> for String {
    fn from(value: Nickname) -> Self {
        value.0
    }
}

/// Chat-platform user id of the applicant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequesterId(pub u64);

impl RequesterId {
    /// SQLite integers are signed; the id is stored bit-for-bit.
    pub(crate) fn to_column(self) -> i64 {
        self.0 as i64
    }

    pub(crate) fn from_column(value: i64) -> Self {
        Self(value as u64)
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed questions of the application form, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Question {
    Nickname,
    Age,
    HowFound,
    Interests,
    About,
}

impl Question {
    pub const ALL: [Question; 5] = [
        Question::Nickname,
        Question::Age,
        Question::HowFound,
        Question::Interests,
        Question::About,
    ];

    pub const fn key(self) -> &'static str {
        match self {
            Question::Nickname => "nickname",
            Question::Age => "age",
            Question::HowFound => "how_found",
            Question::Interests => "interests",
            Question::About => "about",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Question::Nickname => "In-game nickname",
            Question::Age => "Age",
            Question::HowFound => "How did you find us?",
            Question::Interests => "What do you want to do?",
            Question::About => "About you",
        }
    }

    pub const fn max_len(self) -> usize {
        match self {
            Question::Nickname => NICKNAME_MAX_LEN,
            Question::Age => 3,
            Question::HowFound | Question::Interests => 100,
            Question::About => 4096,
        }
    }
}

/// Free-text answers besides the nickname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationForm {
    pub age: String,
    pub how_found: String,
    pub interests: String,
    pub about: String,
}

impl ApplicationForm {
    pub fn answer(&self, question: Question) -> Option<&str> {
        match question {
            Question::Nickname => None,
            Question::Age => Some(&self.age),
            Question::HowFound => Some(&self.how_found),
            Question::Interests => Some(&self.interests),
            Question::About => Some(&self.about),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for question in Question::ALL {
            let Some(answer) = self.answer(question) else {
                continue;
            };
            if answer.trim().is_empty() {
                return Err(ValidationError::Blank(question));
            }
            if answer.chars().count() > question.max_len() {
                return Err(ValidationError::TooLong {
                    question,
                    max: question.max_len(),
                });
            }
        }
        Ok(())
    }
}

/// Everything the transport hands over when an applicant submits the form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSubmission {
    pub requester_id: RequesterId,
    pub nickname: Nickname,
    #[serde(flatten)]
    pub form: ApplicationForm,
}

impl ApplicationSubmission {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.form.validate()
    }
}

/// Lifecycle state. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(ApplicationStatus::Pending),
            "approved" => Some(ApplicationStatus::Approved),
            "rejected" => Some(ApplicationStatus::Rejected),
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, ApplicationStatus::Pending)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Moderator verdict on a pending application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Stored application record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub requester_id: RequesterId,
    pub nickname: Nickname,
    pub form: ApplicationForm,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
}

impl Application {
    /// Answers in form order, nickname first.
    pub fn answers(&self) -> Vec<(Question, &str)> {
        Question::ALL
            .into_iter()
            .map(|question| {
                let answer = self
                    .form
                    .answer(question)
                    .unwrap_or_else(|| self.nickname.as_str());
                (question, answer)
            })
            .collect()
    }

    pub fn status_view(&self) -> ApplicationStatusView {
        ApplicationStatusView {
            nickname: self.nickname.clone(),
            requester_id: self.requester_id,
            status: self.status.label(),
            created_at: self.created_at,
            processed_at: self.processed_at,
            processed_by: self.processed_by.clone(),
        }
    }
}

/// Administrative summary returned by status checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationStatusView {
    pub nickname: Nickname,
    pub requester_id: RequesterId,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<String>,
}

/// Handle of a rendered decision request on the chat side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactHandle(pub String);

impl ArtifactHandle {
    pub fn generate() -> Self {
        Self(format!("req-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rejected form input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{} must not be blank", .0.key())]
    Blank(Question),
    #[error("{} must be at most {max} characters", .question.key())]
    TooLong { question: Question, max: usize },
    #[error("nickname `{0}` contains whitespace or control characters")]
    IllegalNickname(String),
}
