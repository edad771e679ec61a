//! VM options file

use std::path::Path;

use anyhow::Context;
use we_engine::VmOptions;

/// Options from `path` (defaults when absent), with command-line overrides applied
pub fn load_options(path: Option<&Path>, stack_size: Option<usize>) -> anyhow::Result<VmOptions> {
    let mut options = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            toml::from_str::<VmOptions>(&text)
                .with_context(|| format!("Invalid config: {}", path.display()))?
        }
        None => VmOptions::default(),
    };
    if let Some(size) = stack_size {
        options.stack_size = size;
    }
    tracing::debug!(?options, "vm options");
    Ok(options)
}
