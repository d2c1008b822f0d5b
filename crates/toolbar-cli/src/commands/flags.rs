//! Flags command handler

use anyhow::Result;

use toolbar_core::Config;

use crate::output::Output;

/// Sync once and print the merged flags
pub async fn list(config: &Config, only_overridden: bool, output: &Output) -> Result<()> {
    let engine = super::connect(config).await?;
    let state = super::first_sync(&engine).await;
    engine.shutdown();
    let state = state?;

    let flags: Vec<_> = state
        .flags
        .values()
        .filter(|flag| !only_overridden || flag.is_overridden)
        .collect();
    output.print_flags(&flags);
    Ok(())
}
