use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use shared::config::Config;

/// Serializes the default configuration as `format` ("yaml" or "json").
///
/// # Errors
/// Returns an error if the format is unsupported or serialization fails.
pub fn render_config(format: &str) -> Result<String> {
    let config = Config::with_defaults();
    let rendered = match format {
        "yaml" => serde_yml::to_string(&config)?,
        "json" => serde_json::to_string_pretty(&config)?,
        _ => bail!("Unsupported format. Use 'yaml' or 'json'."),
    };
    Ok(rendered)
}

/// Prints the default configuration, or writes it to `output`.
///
/// # Errors
/// Returns an error if the format is unsupported or writing the file fails.
pub fn generate_config(format: &str, output: Option<&Path>) -> Result<()> {
    let rendered = render_config(format)?;
    match output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Configuration file '{}' generated successfully.", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
