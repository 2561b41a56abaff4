//! End-to-end membership flow through the public service facade: real SQLite (in memory),
//! the real RCON client against a loopback game server, and the outbox transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gatekeeper::config::{RconConfig, WhitelistConfig};
use gatekeeper::workflows::membership::rcon::{
    Packet, SERVERDATA_AUTH_RESPONSE, SERVERDATA_RESPONSE_VALUE,
};
use gatekeeper::workflows::membership::{
    ApplicationForm, ApplicationStatus, ApplicationSubmission, Decision, DecisionOutcome,
    MembershipService, Nickname, NoticeKind, OutboundEvent, OutboxTransport, RconClient,
    RequesterId, SqliteApplicationStore,
};
use tokio::net::TcpListener;
use tokio_util::codec::LengthDelimitedCodec;

const PASSWORD: &str = "correct-horse";

/// Minimal game server: accepts the password above and echoes whitelist additions.
async fn fake_game_server() -> (u16, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let commands = Arc::new(Mutex::new(Vec::new()));
    let seen = commands.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut framed = LengthDelimitedCodec::builder()
                    .little_endian()
                    .length_field_length(4)
                    .new_framed(stream);

                let Some(Ok(frame)) = framed.next().await else { return };
                let auth = Packet::decode(frame).expect("auth packet");
                let id = if auth.body == PASSWORD { auth.request_id } else { -1 };
                let _ = framed
                    .send(Packet::new(id, SERVERDATA_AUTH_RESPONSE, "").encode())
                    .await;

                while let Some(Ok(frame)) = framed.next().await {
                    let command = Packet::decode(frame).expect("command packet");
                    seen.lock().expect("commands").push(command.body.clone());
                    let player = command.body.trim_start_matches("whitelist add ");
                    let reply = Packet::new(
                        command.request_id,
                        SERVERDATA_RESPONSE_VALUE,
                        format!("Added {player} to the whitelist"),
                    );
                    let _ = framed.send(reply.encode()).await;
                }
            });
        }
    });

    (port, commands)
}

fn steve() -> ApplicationSubmission {
    ApplicationSubmission {
        requester_id: RequesterId(42),
        nickname: Nickname::parse("Steve123").expect("valid nickname"),
        form: ApplicationForm {
            age: "17".to_string(),
            how_found: "friend".to_string(),
            interests: "building".to_string(),
            about: "hi".to_string(),
        },
    }
}

#[tokio::test]
async fn approved_application_is_whitelisted_exactly_once() {
    let (port, commands) = fake_game_server().await;
    let store = Arc::new(SqliteApplicationStore::in_memory().await.expect("database"));
    let console = Arc::new(RconClient::new(RconConfig {
        host: "127.0.0.1".to_string(),
        port,
        password: PASSWORD.to_string(),
        timeout: Duration::from_secs(2),
    }));
    let outbox = Arc::new(OutboxTransport::default());
    let service = MembershipService::new(
        store.clone(),
        console,
        outbox.clone(),
        WhitelistConfig::default(),
    );

    let receipt = service.submit(steve()).await.expect("submission accepted");
    let published = outbox.drain(10);
    assert!(matches!(
        published.as_slice(),
        [OutboundEvent::DecisionRequested(request)] if request.artifact == receipt.artifact
    ));

    let outcome = service
        .decide(&receipt.artifact, Decision::Approve, "ModA")
        .await
        .expect("approval succeeds");
    assert!(matches!(outcome, DecisionOutcome::Approved { attempts: 1, .. }));

    let nickname = Nickname::parse("Steve123").expect("valid nickname");
    let stored = service
        .query_status(&nickname)
        .await
        .expect("lookup")
        .expect("record present");
    assert_eq!(stored.status, ApplicationStatus::Approved);
    assert_eq!(stored.processed_by.as_deref(), Some("ModA"));
    assert!(stored.processed_at.is_some());
    assert_eq!(stored.requester_id, RequesterId(42));

    assert_eq!(
        *commands.lock().expect("commands"),
        vec!["whitelist add Steve123".to_string()]
    );

    let delivered = outbox.drain(10);
    assert!(delivered.iter().any(|event| matches!(
        event,
        OutboundEvent::UserNotified { notice, .. } if notice.kind == NoticeKind::Approved
    )));

    // A late click on the same request is answered without touching the record.
    let late = service
        .decide(&receipt.artifact, Decision::Reject, "ModB")
        .await
        .expect("late click is a no-op");
    assert!(matches!(
        late,
        DecisionOutcome::AlreadyProcessed {
            status: ApplicationStatus::Approved,
            ..
        }
    ));
    let again = service
        .decide_nickname(&nickname, Decision::Reject, "ModB")
        .await
        .expect("no-op");
    assert_eq!(again.status(), ApplicationStatus::Approved);
    let unchanged = service
        .query_status(&nickname)
        .await
        .expect("lookup")
        .expect("record present");
    assert_eq!(unchanged.processed_at, stored.processed_at);
    assert_eq!(unchanged.processed_by.as_deref(), Some("ModA"));
    assert_eq!(commands.lock().expect("commands").len(), 1);

    store.close().await;
}
