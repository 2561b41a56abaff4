use super::common::*;
use serde_json::json;

use crate::workflows::membership::{
    ApplicationStatus, ApplicationSubmission, Nickname, Question, ValidationError,
};

#[test]
fn nicknames_reject_whitespace_and_overlong_values() {
    assert!(Nickname::parse("Steve123").is_ok());
    assert_eq!(
        Nickname::parse(""),
        Err(ValidationError::Blank(Question::Nickname))
    );
    assert!(matches!(
        Nickname::parse("Steve;\nop Steve"),
        Err(ValidationError::IllegalNickname(_))
    ));
    assert!(matches!(
        Nickname::parse("a".repeat(17)),
        Err(ValidationError::TooLong { max: 16, .. })
    ));
}

#[test]
fn form_enforces_per_question_limits() {
    let mut long_age = submission();
    long_age.form.age = "1234".to_string();
    assert_eq!(
        long_age.validate(),
        Err(ValidationError::TooLong {
            question: Question::Age,
            max: 3
        })
    );

    let mut long_about = submission();
    long_about.form.about = "x".repeat(4097);
    assert!(matches!(
        long_about.validate(),
        Err(ValidationError::TooLong {
            question: Question::About,
            ..
        })
    ));

    assert_eq!(submission().validate(), Ok(()));
}

#[test]
fn submissions_deserialize_from_flat_json() {
    let payload = json!({
        "requester_id": 42,
        "nickname": "Steve123",
        "age": "17",
        "how_found": "friend",
        "interests": "building",
        "about": "hi"
    });

    let parsed: ApplicationSubmission = serde_json::from_value(payload).expect("valid payload");
    assert_eq!(parsed, submission());

    let bad = json!({
        "requester_id": 42,
        "nickname": "two words",
        "age": "17",
        "how_found": "friend",
        "interests": "building",
        "about": "hi"
    });
    assert!(serde_json::from_value::<ApplicationSubmission>(bad).is_err());
}

#[test]
fn status_labels_round_trip_case_insensitively() {
    assert_eq!(
        ApplicationStatus::from_label(" Approved "),
        Some(ApplicationStatus::Approved)
    );
    assert_eq!(ApplicationStatus::from_label("archived"), None);
    assert!(ApplicationStatus::Rejected.is_terminal());
    assert!(!ApplicationStatus::Pending.is_terminal());
}
