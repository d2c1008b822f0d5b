//! Override command handlers

use anyhow::Result;

use toolbar_core::{Config, ToolbarSyncState};

use crate::output::Output;

/// Override a flag's value
pub async fn set(config: &Config, flag: &str, raw_value: &str, output: &Output) -> Result<()> {
    let engine = super::connect(config).await?;
    let result = async {
        let state = super::first_sync(&engine).await?;
        if !state.flags.contains_key(flag) {
            output.warn(&format!("Flag '{}' is not in the current project", flag));
        }
        engine.set_override(flag, super::parse_value(raw_value)).await?;
        Ok::<_, anyhow::Error>(engine.store().get_state())
    }
    .await;
    engine.shutdown();

    let state = result?;
    match state.flags.get(flag) {
        Some(updated) => output.success(&format!("{} = {}", flag, updated.current_value)),
        None => output.success(&format!("{} = {}", flag, raw_value)),
    }
    Ok(())
}

/// Remove a flag's override
pub async fn clear(config: &Config, flag: &str, output: &Output) -> Result<()> {
    let engine = super::connect(config).await?;
    let result = async {
        let before = super::first_sync(&engine).await?;
        engine.clear_override(flag).await?;
        Ok::<_, anyhow::Error>((before, engine.store().get_state()))
    }
    .await;
    engine.shutdown();

    let (before, after) = result?;
    match describe_clear(flag, &before, &after) {
        Some(message) => output.success(&message),
        None => output.message(&format!("No override on {}", flag)),
    }
    Ok(())
}

/// Describe a clear, or `None` when the flag had no override to remove
fn describe_clear(flag: &str, before: &ToolbarSyncState, after: &ToolbarSyncState) -> Option<String> {
    if before.flags.get(flag).is_some_and(|f| !f.is_overridden) {
        return None;
    }
    Some(match after.flags.get(flag) {
        Some(restored) => format!("Cleared override on {} (now {})", flag, restored.current_value),
        None => format!("Cleared override on {}", flag),
    })
}

/// Remove every override shown for the project
pub async fn clear_all(config: &Config, output: &Output) -> Result<()> {
    let engine = super::connect(config).await?;
    let result = async {
        super::first_sync(&engine).await?;
        Ok::<_, anyhow::Error>(engine.clear_all_overrides().await)
    }
    .await;
    engine.shutdown();

    match result? {
        Ok(cleared) if cleared.is_empty() => output.message("No overrides to clear."),
        Ok(cleared) => output.success(&format!("Cleared {} override(s)", cleared.len())),
        Err(err) => {
            if !err.cleared.is_empty() {
                output.message(&format!("Cleared: {}", err.cleared.join(", ")));
            }
            for failure in &err.failures {
                output.warn(&failure.to_string());
            }
            return Err(err.into());
        }
    }
    Ok(())
}
