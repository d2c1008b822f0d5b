//! Command handlers

pub mod config;
pub mod flags;
pub mod overrides;
pub mod projects;
pub mod watch;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;

use toolbar_core::{Config, ConnectionStatus, RemoteStateClient, SyncEngine, ToolbarSyncState};

/// Build a client from config
pub fn client(config: &Config) -> Result<RemoteStateClient> {
    RemoteStateClient::with_timeout(&config.base_url, config.client_timeout())
        .context("Failed to create dev server client")
}

/// Start an engine against the configured dev server
pub async fn connect(config: &Config) -> Result<SyncEngine> {
    let engine = SyncEngine::new(client(config)?);
    engine.start(config.engine_options()).await?;
    Ok(engine)
}

/// Wait until the first poll for the current project has finished
///
/// Fails with the recorded error if that poll failed.
pub async fn first_sync(engine: &SyncEngine) -> Result<ToolbarSyncState> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = engine.store().subscribe(move |state| {
        let _ = tx.send(state.clone());
    });

    while let Some(state) = rx.recv().await {
        if state.is_loading {
            continue;
        }
        match state.connection_status {
            ConnectionStatus::Connected => return Ok(state),
            ConnectionStatus::Error => {
                bail!(state.error.unwrap_or_else(|| "Dev server sync failed".to_string()))
            }
            ConnectionStatus::Disconnected => {}
        }
    }

    bail!("Sync stopped before the first poll completed")
}

/// Parse a command-line value as JSON, falling back to a plain string
pub fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("\"quoted\""), json!("quoted"));
        assert_eq!(parse_value("{\"a\": 1}"), json!({"a": 1}));
        assert_eq!(parse_value("blue"), json!("blue"));
        assert_eq!(parse_value(""), json!(""));
    }
}
