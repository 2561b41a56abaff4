use super::common::*;
use std::sync::Arc;
use std::time::Duration;

use crate::workflows::membership::{
    ApplicationStore, ArtifactHandle, Correlation, DecisionLedger, RequesterId,
};

fn correlation(raw: &str) -> Correlation {
    Correlation {
        application_id: 1,
        nickname: nickname(raw),
        requester_id: RequesterId(42),
    }
}

#[test]
fn take_hands_out_a_correlation_once() {
    let ledger = DecisionLedger::new();
    let artifact = ArtifactHandle("req-1".to_string());
    ledger.record(artifact.clone(), correlation("Steve123"));

    assert_eq!(ledger.resolve(&artifact), Some(correlation("Steve123")));
    assert_eq!(ledger.take(&artifact), Some(correlation("Steve123")));
    assert_eq!(ledger.take(&artifact), None);
    assert_eq!(ledger.outstanding(), 0);
    assert_eq!(ledger.settled(&artifact), Some(correlation("Steve123")));
}

#[test]
fn settled_artifacts_are_bounded() {
    let ledger = DecisionLedger::new();
    for n in 0..1100 {
        let artifact = ArtifactHandle(format!("req-{n}"));
        ledger.record(artifact.clone(), correlation("Steve123"));
        ledger.take(&artifact);
    }

    assert_eq!(ledger.settled(&ArtifactHandle("req-0".to_string())), None);
    assert!(ledger.settled(&ArtifactHandle("req-1099".to_string())).is_some());
}

#[tokio::test]
async fn correlation_matches_only_its_own_row() {
    let store = MemoryStore::default();
    let mut application = store.insert(&submission()).await.expect("insert");
    assert_eq!(application.id, 1);
    assert!(correlation("Steve123").matches(&application));

    application.id = 2;
    assert!(!correlation("Steve123").matches(&application));
}

#[test]
fn forget_drops_only_the_named_nickname() {
    let ledger = DecisionLedger::new();
    ledger.record(ArtifactHandle("req-1".to_string()), correlation("Steve123"));
    ledger.record(ArtifactHandle("req-2".to_string()), correlation("Steve123"));
    ledger.record(ArtifactHandle("req-3".to_string()), correlation("Alex"));

    let mut forgotten = ledger.forget(&nickname("Steve123"));
    forgotten.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(
        forgotten,
        vec![
            ArtifactHandle("req-1".to_string()),
            ArtifactHandle("req-2".to_string())
        ]
    );
    assert_eq!(ledger.outstanding(), 1);
}

#[tokio::test]
async fn serialize_blocks_the_same_nickname_only() {
    let ledger = Arc::new(DecisionLedger::new());
    let guard = ledger.serialize(&nickname("Steve123")).await;

    let other = tokio::time::timeout(
        Duration::from_millis(50),
        ledger.serialize(&nickname("Alex")),
    )
    .await;
    assert!(other.is_ok(), "unrelated nickname must not wait");

    let same = tokio::time::timeout(
        Duration::from_millis(50),
        ledger.serialize(&nickname("Steve123")),
    )
    .await;
    assert!(same.is_err(), "same nickname waits for the holder");

    drop(guard);
    let same = tokio::time::timeout(
        Duration::from_millis(50),
        ledger.serialize(&nickname("Steve123")),
    )
    .await;
    assert!(same.is_ok());
}
