//! Projects command handler

use anyhow::Result;

use toolbar_core::{Config, DevServerApi};

use crate::output::Output;

/// List projects on the dev server
pub async fn list(config: &Config, output: &Output) -> Result<()> {
    let client = super::client(config)?;
    let projects = client.list_projects().await?;
    output.print_projects(&projects, config.project_key.as_deref());
    Ok(())
}
