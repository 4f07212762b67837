//! Session views driven against a live in-process server

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use supportdesk_api::{routes::create_router, AppState, Config};
use supportdesk_client::{
    ClientConfig, ClientError, Participant, PresenceApi, RestClient, SessionView, ViewEvent,
};
use supportdesk_shared::{
    ConnectionStatus, CreateSessionRequest, ParticipantRole, PresenceStatus, SenderType, Session, SessionPriority,
    SessionStatus,
};
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(5);

async fn start_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = create_router(AppState::new(Config::default()));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client_config(api_url: &str) -> ClientConfig {
    let mut config = ClientConfig::new(api_url);
    config.reconnect_delay = Duration::from_millis(100);
    config.typing_idle_timeout = Duration::from_millis(200);
    config
}

async fn create_session(rest: &RestClient) -> Session {
    rest.create_session(&CreateSessionRequest {
        customer_name: "Ada".into(),
        customer_email: "ada@example.com".into(),
        subject: Some("Refund".into()),
        priority: SessionPriority::default(),
    })
    .await
    .unwrap()
}

async fn open(
    config: &ClientConfig,
    rest: &RestClient,
    session_id: &str,
    id: &str,
    role: ParticipantRole,
) -> (SessionView, UnboundedReceiver<ViewEvent>) {
    SessionView::open(
        config,
        rest.clone(),
        Participant {
            id: id.to_string(),
            role,
        },
        session_id,
    )
    .await
    .unwrap()
}

async fn wait_for<F>(events: &mut UnboundedReceiver<ViewEvent>, mut matches: F) -> ViewEvent
where
    F: FnMut(&ViewEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("view event stream ended");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for view event")
}

async fn wait_for_status<F>(view: &SessionView, matches: F)
where
    F: Fn(&ConnectionStatus) -> bool,
{
    let mut status = view.connection_status();
    tokio::time::timeout(WAIT, status.wait_for(|s| s.as_ref().is_some_and(&matches)))
        .await
        .expect("timed out waiting for connection status")
        .expect("view dropped");
}

/// Both sockets have joined the session room
async fn wait_joined(view: &SessionView) {
    wait_for_status(view, |s| s.customer_connected && s.agent_connected).await;
}

#[tokio::test]
async fn test_customer_join_activates_session() {
    let api_url = start_server().await;
    let config = client_config(&api_url);
    let rest = RestClient::new(&api_url, config.request_timeout).unwrap();
    let session = create_session(&rest).await;
    assert_eq!(session.status, SessionStatus::Waiting);

    let (agent, mut agent_events) =
        open(&config, &rest, &session.id, "agent-1", ParticipantRole::Agent).await;
    wait_for_status(&agent, |s| s.agent_connected).await;

    let (customer, mut customer_events) =
        open(&config, &rest, &session.id, "cust-1", ParticipantRole::Customer).await;

    wait_for(&mut customer_events, |e| {
        matches!(e, ViewEvent::SessionStatusChanged(SessionStatus::Active))
    })
    .await;
    wait_for(&mut agent_events, |e| {
        matches!(e, ViewEvent::SessionStatusChanged(SessionStatus::Active))
    })
    .await;

    let stored = rest.get_session(&session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Active);
    assert_eq!(stored.agent_id.as_deref(), Some("agent-1"));

    wait_joined(&agent).await;

    // Customer leaves, the agent sees the count drop
    customer.shutdown().await;
    wait_for_status(&agent, |s| !s.customer_connected && s.agent_connected).await;

    agent.shutdown().await;
}

#[tokio::test]
async fn test_own_message_echo_is_merged_once() {
    let api_url = start_server().await;
    let config = client_config(&api_url);
    let rest = RestClient::new(&api_url, config.request_timeout).unwrap();
    let session = create_session(&rest).await;

    let (agent, mut agent_events) =
        open(&config, &rest, &session.id, "agent-1", ParticipantRole::Agent).await;
    let (customer, mut customer_events) =
        open(&config, &rest, &session.id, "cust-1", ParticipantRole::Customer).await;
    wait_joined(&agent).await;
    wait_joined(&customer).await;

    let sent = customer.send_message("my order never arrived").await.unwrap();
    assert_eq!(sent.sender_type, SenderType::Customer);

    wait_for(&mut agent_events, |e| {
        matches!(e, ViewEvent::MessageAppended(m) if m.id == sent.id)
    })
    .await;

    // The agent's reply is broadcast after the customer's echo on the same socket
    let reply = agent.send_message("looking into it").await.unwrap();
    wait_for(&mut customer_events, |e| {
        matches!(e, ViewEvent::MessageAppended(m) if m.id == reply.id)
    })
    .await;

    let snapshot = customer.snapshot().await.unwrap();
    let ids: Vec<_> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![sent.id.as_str(), reply.id.as_str()]);

    // A view opened later loads the same history
    let (late, _late_events) =
        open(&config, &rest, &session.id, "agent-2", ParticipantRole::Agent).await;
    assert_eq!(late.snapshot().await.unwrap().messages.len(), 2);

    late.shutdown().await;
    agent.shutdown().await;
    customer.shutdown().await;
}

#[tokio::test]
async fn test_typing_reaches_counterpart_then_clears() {
    let api_url = start_server().await;
    let config = client_config(&api_url);
    let rest = RestClient::new(&api_url, config.request_timeout).unwrap();
    let session = create_session(&rest).await;

    let (agent, mut agent_events) =
        open(&config, &rest, &session.id, "agent-1", ParticipantRole::Agent).await;
    let (customer, _customer_events) =
        open(&config, &rest, &session.id, "cust-1", ParticipantRole::Customer).await;
    wait_joined(&agent).await;
    wait_joined(&customer).await;

    customer.keystroke().unwrap();
    customer.keystroke().unwrap();

    wait_for(&mut agent_events, |e| {
        matches!(
            e,
            ViewEvent::TypingChanged {
                role: ParticipantRole::Customer,
                is_typing: true
            }
        )
    })
    .await;
    assert!(agent.snapshot().await.unwrap().counterpart_typing);

    wait_for(&mut agent_events, |e| {
        matches!(
            e,
            ViewEvent::TypingChanged {
                role: ParticipantRole::Customer,
                is_typing: false
            }
        )
    })
    .await;
    assert!(!agent.snapshot().await.unwrap().counterpart_typing);

    agent.shutdown().await;
    customer.shutdown().await;
}

#[tokio::test]
async fn test_leaving_while_typing_clears_counterpart_indicator() {
    let api_url = start_server().await;
    let mut config = client_config(&api_url);
    // Long enough that only the teardown can clear the indicator
    config.typing_idle_timeout = Duration::from_secs(30);
    let rest = RestClient::new(&api_url, config.request_timeout).unwrap();
    let session = create_session(&rest).await;

    let (agent, mut agent_events) =
        open(&config, &rest, &session.id, "agent-1", ParticipantRole::Agent).await;
    let (customer, _customer_events) =
        open(&config, &rest, &session.id, "cust-1", ParticipantRole::Customer).await;
    wait_joined(&agent).await;
    wait_joined(&customer).await;

    customer.keystroke().unwrap();
    wait_for(&mut agent_events, |e| {
        matches!(
            e,
            ViewEvent::TypingChanged {
                role: ParticipantRole::Customer,
                is_typing: true
            }
        )
    })
    .await;

    customer.shutdown().await;

    wait_for(&mut agent_events, |e| {
        matches!(
            e,
            ViewEvent::TypingChanged {
                role: ParticipantRole::Customer,
                is_typing: false
            }
        )
    })
    .await;
    assert!(!agent.snapshot().await.unwrap().counterpart_typing);
    wait_for_status(&agent, |s| !s.customer_connected).await;

    agent.shutdown().await;
}

#[tokio::test]
async fn test_close_propagates_and_blocks_sends() {
    let api_url = start_server().await;
    let config = client_config(&api_url);
    let rest = RestClient::new(&api_url, config.request_timeout).unwrap();
    let session = create_session(&rest).await;

    let (agent, _agent_events) =
        open(&config, &rest, &session.id, "agent-1", ParticipantRole::Agent).await;
    let (customer, mut customer_events) =
        open(&config, &rest, &session.id, "cust-1", ParticipantRole::Customer).await;
    wait_joined(&agent).await;
    wait_joined(&customer).await;
    wait_for(&mut customer_events, |e| {
        matches!(e, ViewEvent::SessionStatusChanged(SessionStatus::Active))
    })
    .await;

    agent.close_session(Some("resolved".into())).await.unwrap();
    assert_eq!(agent.snapshot().await.unwrap().status, SessionStatus::Closed);

    let system = wait_for(&mut customer_events, |e| {
        matches!(e, ViewEvent::MessageAppended(m) if m.sender_type == SenderType::System)
    })
    .await;
    if let ViewEvent::MessageAppended(message) = system {
        assert_eq!(message.message, "Session closed: resolved");
    }
    wait_for(&mut customer_events, |e| {
        matches!(e, ViewEvent::SessionStatusChanged(SessionStatus::Closed))
    })
    .await;

    let result = customer.send_message("one more thing").await;
    assert!(matches!(result, Err(ClientError::SessionClosed)));
    assert_eq!(rest.get_messages(&session.id).await.unwrap().len(), 1);

    agent.shutdown().await;
    customer.shutdown().await;
}

#[tokio::test]
async fn test_presence_heartbeat_round_trip() {
    let api_url = start_server().await;
    let rest = RestClient::new(&api_url, Duration::from_secs(5)).unwrap();

    rest.heartbeat("agent-1", PresenceStatus::Away).await.unwrap();
    let present = rest.list_presence().await.unwrap();
    assert_eq!(present.len(), 1);
    assert_eq!(present[0].agent_id, "agent-1");
    assert_eq!(present[0].status, PresenceStatus::Away);

    rest.set_offline("agent-1").await.unwrap();
    assert!(rest.list_presence().await.unwrap().is_empty());
}
