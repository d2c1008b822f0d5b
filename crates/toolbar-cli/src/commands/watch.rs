//! Watch command handler

use std::sync::Mutex;

use anyhow::{Context, Result};

use toolbar_core::{Config, ConnectionStatus, ToolbarSyncState};

use crate::output::Output;

/// Fields that make a state change worth printing
#[derive(Debug, PartialEq, Eq)]
struct Summary {
    status: ConnectionStatus,
    is_loading: bool,
    error: Option<String>,
    project: Option<String>,
    flags: usize,
    overrides: usize,
}

impl Summary {
    fn of(state: &ToolbarSyncState) -> Self {
        Self {
            status: state.connection_status,
            is_loading: state.is_loading,
            error: state.error.clone(),
            project: state.current_project_key.clone(),
            flags: state.flags.len(),
            overrides: state.override_count(),
        }
    }
}

/// Keep syncing until Ctrl-C, printing each visible change
pub async fn run(config: &Config, output: &Output) -> Result<()> {
    let engine = super::connect(config).await?;

    let printer = *output;
    let last = Mutex::new(None);
    let subscription = engine.store().subscribe(move |state| {
        let summary = Summary::of(state);
        let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
        if last.as_ref() != Some(&summary) {
            printer.print_state_change(state);
            *last = Some(summary);
        }
    });

    output.warn("Watching dev server, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    subscription.unsubscribe();
    engine.shutdown();
    Ok(())
}
