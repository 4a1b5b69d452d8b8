use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// A `keywords-file` in the `[scan]` section is resolved relative to the
/// configuration file and its keywords are appended to the inline list.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&content)?;

    if let Some(scan) = config.scan.as_mut() {
        if let Some(file) = &scan.keywords_file {
            let resolved = match path.parent() {
                Some(dir) if file.is_relative() => dir.join(file),
                _ => file.clone(),
            };
            let extra = read_keywords_file(&resolved)?;
            tracing::debug!("Loaded {} keywords from {}", extra.len(), resolved.display());
            scan.keywords.extend(extra);
        }
    }

    validate(&config)?;

    Ok(config)
}

/// Reads one keyword per line, skipping blanks and `#` comments
fn read_keywords_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Stored in every checkpoint so a resumed run can tell whether the
/// configuration changed underneath it.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
