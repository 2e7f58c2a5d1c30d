//! Host and join commands: run one engine and chat over its channel.
//!
//! Lines read from stdin are sent as `chat` messages. Incoming messages and
//! state changes are printed. Ctrl-C leaves the session cleanly.

use anyhow::{Context, Result};
use link_client::{LinkConfig, LinkHandle, LinkOptions, WebRtcFactory};
use link_core::LinkState;
use link_mailbox::{spawn_janitor, Mailbox};
use link_types::{Role, SessionId};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::open_mailbox;

/// Message kind used for chat lines.
const CHAT: &str = "chat";

/// Run the host or join command.
pub async fn run(config: &LinkConfig, session: &str, role: Role) -> Result<()> {
    let session_id = SessionId::new(session).context("Invalid session id")?;
    let mailbox: Arc<dyn Mailbox> = Arc::new(open_mailbox(config).await?);
    let factory = Arc::new(WebRtcFactory::new(config.ice.clone()));

    let janitor = (role == Role::Host).then(|| spawn_janitor(mailbox.clone(), config.janitor.clone()));

    let options = LinkOptions::new(session_id, role).with_timings(config.timing.to_timings());
    let (link, mut messages) = LinkHandle::spawn(options, mailbox, factory);
    println!("{} {} as {}", role, link.session_id(), link.local_id());

    let mut states = link.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    link.connect()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, leaving session");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                print_state(&state);
            }
            Some(message) = messages.recv() => {
                match message.payload.as_str() {
                    Some(text) if message.kind == CHAT => println!("< {text}"),
                    _ => println!("< [{}] {}", message.kind, message.payload),
                }
            }
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) if !line.trim().is_empty() => {
                    if !link.send(CHAT, &line).await? {
                        println!("(not connected, message dropped)");
                    }
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    link.cleanup(true).await?;
    if let Some(janitor) = janitor {
        janitor.abort();
    }
    println!("left {}", link.session_id());
    Ok(())
}

fn print_state(state: &LinkState) {
    let mut line = format!("[{}]", state.status);
    if state.reconnect_attempts > 0 {
        line.push_str(&format!(" attempt {}", state.reconnect_attempts));
    }
    if state.connected_peers > 0 {
        line.push_str(&format!(" peers {}", state.connected_peers));
    }
    if let Some(error) = &state.error {
        line.push_str(&format!(" ({error})"));
    }
    println!("{line}");
}
