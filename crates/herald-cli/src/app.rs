//! Wires connection, registry and store for one subject and follows it
//! until interrupted.

use crate::config::HeraldConfig;
use anyhow::{Context, Result};
use herald_core::{HttpNotificationApi, NotificationSnapshot, NotificationStore};
use herald_transport::{
    ConnectionState, SubscriptionRegistry, TransportConnection, WebSocketDialer,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Number of notifications printed per render.
const LIST_LIMIT: usize = 10;

/// A line typed on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Refresh,
    /// Mark the n-th listed notification read (1-based).
    MarkRead(usize),
    MarkAllRead,
    Connect,
    Quit,
    Help,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match words.next()? {
            "r" | "refresh" => Command::Refresh,
            "m" | "read" => Command::MarkRead(words.next()?.parse().ok().filter(|n| *n > 0)?),
            "a" | "all" => Command::MarkAllRead,
            "c" | "connect" => Command::Connect,
            "q" | "quit" => Command::Quit,
            "h" | "help" | "?" => Command::Help,
            _ => return None,
        };
        Some(command)
    }
}

const HELP: &str = "commands: r(efresh) | m <n> (mark read) | a(ll read) | c(onnect) | q(uit)";

/// Run the client until Ctrl-C or `quit`.
///
/// # Errors
///
/// Returns an error if no subject ID is available or the REST client cannot
/// be built.
pub async fn run(config: HeraldConfig) -> Result<()> {
    let credentials = config.credentials();
    let subject_id = credentials
        .subject_id()
        .context("No subject ID configured (identity.subject_id or HERALD_SUBJECT_ID)")?;

    let connection = TransportConnection::new(
        config.connection_config(),
        Arc::new(WebSocketDialer::new(config.websocket_config())),
        Arc::clone(&credentials),
    );
    let registry = SubscriptionRegistry::new(connection.clone());
    let api = HttpNotificationApi::new(&config.server.api_base_url, credentials)
        .context("Failed to create REST client")?;
    let store = NotificationStore::new(Arc::new(api), registry);

    if let Err(e) = store.initialize(&subject_id).await {
        warn!(error = %e, "Initial pull incomplete, continuing with live updates");
    }
    connection.connect();

    let mut snapshots = store.watch();
    let mut states = connection.state_changes();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    render(&snapshots.borrow_and_update());
    println!("{HELP}");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                render(&snapshots.borrow_and_update());
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                info!(?state, "Link state");
                if state == ConnectionState::Failed {
                    warn!("Reconnect attempts exhausted, type 'c' to retry");
                }
            }
            line = lines.next_line(), if stdin_open => {
                let Ok(Some(line)) = line else {
                    // Keep following pushes until Ctrl-C.
                    stdin_open = false;
                    continue;
                };
                match Command::parse(&line) {
                    Some(Command::Quit) => break,
                    Some(command) => execute(&store, &connection, command).await,
                    None if line.trim().is_empty() => {}
                    None => println!("{HELP}"),
                }
            }
        }
    }

    store.shutdown();
    connection.disconnect().await;
    Ok(())
}

async fn execute(store: &Arc<NotificationStore>, connection: &TransportConnection, command: Command) {
    let result = match command {
        Command::Refresh => store.refresh().await,
        Command::MarkRead(n) => {
            let item = store.snapshot().notifications.get(n - 1).cloned();
            match item {
                Some(item) => store.mark_read(&item).await.map(|_| ()),
                None => {
                    println!("no notification #{n}");
                    Ok(())
                }
            }
        }
        Command::MarkAllRead => store.mark_all_read().await.map(|_| ()),
        Command::Connect => {
            connection.connect();
            Ok(())
        }
        Command::Help | Command::Quit => {
            println!("{HELP}");
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(error = %e, "Command failed");
    }
}

fn render(snapshot: &NotificationSnapshot) {
    println!("-- {} unread --", snapshot.unread_count);
    for (i, n) in snapshot.notifications.iter().take(LIST_LIMIT).enumerate() {
        let marker = if n.is_read { ' ' } else { '*' };
        println!(
            "{marker} {:>2}. [{}] {} ({})",
            i + 1,
            n.created_at.format("%Y-%m-%d %H:%M"),
            n.title,
            n.content
        );
    }
    let hidden = snapshot.notifications.len().saturating_sub(LIST_LIMIT);
    if hidden > 0 {
        println!("   ... {hidden} more");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("r"), Some(Command::Refresh));
        assert_eq!(Command::parse("  read 3 "), Some(Command::MarkRead(3)));
        assert_eq!(Command::parse("a"), Some(Command::MarkAllRead));
        assert_eq!(Command::parse("connect"), Some(Command::Connect));
        assert_eq!(Command::parse("q"), Some(Command::Quit));
        assert_eq!(Command::parse("?"), Some(Command::Help));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("m"), None);
        assert_eq!(Command::parse("m 0"), None);
        assert_eq!(Command::parse("m two"), None);
        assert_eq!(Command::parse("delete 1"), None);
    }
}
