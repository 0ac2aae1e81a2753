//! `batchd init` — write a scaffold config.

use std::path::Path;

use anyhow::{Context, bail};
use tracing::info;

use batch_core::GridConfig;

pub fn write_scaffold(output: &Path, target: &str, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        bail!(
            "{} already exists (pass --force to overwrite)",
            output.display()
        );
    }

    let config = GridConfig::scaffold(target);
    config.validate()?;
    let content = config.to_toml_string()?;
    std::fs::write(output, content)
        .with_context(|| format!("writing {}", output.display()))?;

    info!(path = %output.display(), target, nodes = config.nodes.len(), "scaffold written");
    Ok(())
}
