//! Terminal chat over one support session
//!
//! Usage:
//!   desk-chat <session_id> <participant_id> <customer|agent|admin>
//!
//! Lines typed on stdin are sent as messages. Commands:
//!   /close [reason]            close the session
//!   /status online|busy|away   set agent presence
//!   /offline                   go offline (agents)
//!   /quit                      leave
//!
//! Reads `SUPPORTDESK_API_URL` (and the other client settings) from the
//! environment or a `.env` file.

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context};
use supportdesk_client::{
    ClientConfig, ClientError, FilePresenceStore, HeartbeatConfig, HeartbeatErrorCallback,
    HeartbeatService, Participant, RestClient, SessionView, ViewEvent,
};
use supportdesk_shared::{ParticipantRole, PresenceStatus, UserRole};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    let (Some(session_id), Some(participant_id), Some(role)) = (args.next(), args.next(), args.next())
    else {
        bail!("usage: desk-chat <session_id> <participant_id> <customer|agent|admin>");
    };
    let user_role: UserRole = role.parse().context("invalid role")?;
    let participant_role = match user_role {
        UserRole::Customer => ParticipantRole::Customer,
        UserRole::Agent | UserRole::Admin => ParticipantRole::Agent,
    };

    let config = ClientConfig::from_env().context("failed to load client configuration")?;
    let rest = RestClient::new(&config.api_url, config.request_timeout)?;

    let on_error: HeartbeatErrorCallback = Arc::new(|e: &ClientError| {
        eprintln!("! presence heartbeat failed: {}", e);
    });
    let heartbeat = HeartbeatService::start(
        HeartbeatConfig {
            agent_id: participant_id.clone(),
            role: user_role,
            enabled: true,
            interval: config.heartbeat_interval,
        },
        Arc::new(rest.clone()),
        Arc::new(FilePresenceStore::new(&config.presence_file)),
        Some(on_error),
    )
    .await;

    let participant = Participant {
        id: participant_id,
        role: participant_role,
    };
    let (view, mut events) = SessionView::open(&config, rest, participant, &session_id)
        .await
        .with_context(|| format!("failed to open session {}", session_id))?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
            match name {
                "quit" => break,
                "close" => {
                    let reason = (!rest.trim().is_empty()).then(|| rest.trim().to_string());
                    if let Err(e) = view.close_session(reason).await {
                        eprintln!("! close failed: {}", e);
                    }
                }
                "status" => match (&heartbeat, rest.trim().parse::<PresenceStatus>()) {
                    (Some(heartbeat), Ok(status)) => {
                        if let Err(e) = heartbeat.set_status(status).await {
                            eprintln!("! could not save status: {}", e);
                        }
                    }
                    (None, _) => eprintln!("! presence is only available to agents"),
                    (_, Err(e)) => eprintln!("! {}", e),
                },
                "offline" => match &heartbeat {
                    Some(heartbeat) => {
                        if let Err(e) = heartbeat.go_offline().await {
                            eprintln!("! offline failed: {}", e);
                        }
                    }
                    None => eprintln!("! presence is only available to agents"),
                },
                other => eprintln!("! unknown command /{}", other),
            }
            continue;
        }

        view.keystroke()?;
        match view.send_message(line).await {
            Ok(_) => {}
            Err(ClientError::SessionClosed) => eprintln!("! session is closed"),
            Err(e) => eprintln!("! send failed: {}", e),
        }
    }

    view.shutdown().await;
    if let Some(heartbeat) = heartbeat {
        heartbeat.shutdown().await;
    }
    printer.abort();
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn print_event(event: &ViewEvent) {
    match event {
        ViewEvent::MessageAppended(message) => {
            println!("[{}] {}", message.sender_type, message.message);
        }
        ViewEvent::ScrollToNewest => {}
        ViewEvent::SessionStatusChanged(status) => println!("* session is now {}", status),
        ViewEvent::TypingChanged { role, is_typing } => {
            if *is_typing {
                println!("* {} is typing...", role);
            } else {
                println!("* {} stopped typing", role);
            }
        }
        ViewEvent::ConnectionChanged { connected } => {
            if *connected {
                println!("* connected");
            } else {
                println!("* connection lost, reconnecting");
            }
        }
        ViewEvent::ConnectionStatus(status) => println!(
            "* customers online: {}, agents online: {}",
            status.customer_connections, status.agent_connections
        ),
        ViewEvent::Error(message) => eprintln!("! {}", message),
        ViewEvent::DraftRestored(text) => eprintln!("! not sent: {}", text),
    }
}
