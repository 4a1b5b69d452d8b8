use crate::client::RepoRef;
use crate::config::types::{
    CheckpointConfig, ClientConfig, Config, ExpandConfig, RateConfig, ScanConfig, WalkConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_client_config(&config.client)?;
    validate_rate_config(&config.rate)?;
    validate_checkpoint_config(&config.checkpoint)?;

    let mut keys: Vec<&str> = Vec::new();
    if let Some(scan) = &config.scan {
        validate_scan_config(scan)?;
        keys.push(&scan.key);
    }
    if let Some(expand) = &config.expand {
        validate_expand_config(expand)?;
        keys.push(&expand.key);
    }
    if let Some(walk) = &config.walk {
        validate_walk_config(walk)?;
        keys.push(&walk.key);
    }

    for (i, key) in keys.iter().enumerate() {
        if keys[..i].contains(key) {
            return Err(ConfigError::Validation(format!(
                "checkpoint key '{}' is used by more than one job",
                key
            )));
        }
    }

    Ok(())
}

/// Validates client configuration
fn validate_client_config(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;
    validate_email(&config.contact_email)?;

    for (name, value) in [
        ("hn_base_url", &config.hn_base_url),
        ("github_endpoint", &config.github_endpoint),
    ] {
        let url = Url::parse(value)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {}: {}", name, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "{} must use http or https, got '{}'",
                name, value
            )));
        }
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.github_token_env.is_empty() {
        return Err(ConfigError::Validation(
            "github_token_env cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates retry policy
fn validate_rate_config(config: &RateConfig) -> Result<(), ConfigError> {
    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be >= 1, got {}",
            config.max_retries
        )));
    }

    if config.max_backoff_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "max_backoff_ms ({}) must be >= backoff_base_ms ({})",
            config.max_backoff_ms, config.backoff_base_ms
        )));
    }

    Ok(())
}

fn validate_checkpoint_config(config: &CheckpointConfig) -> Result<(), ConfigError> {
    if config.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint path cannot be empty".to_string(),
        ));
    }

    if config.save_interval < 1 {
        return Err(ConfigError::Validation(
            "save_interval must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_scan_config(config: &ScanConfig) -> Result<(), ConfigError> {
    validate_key(&config.key)?;

    if config.stride < 1 {
        return Err(ConfigError::Validation("stride must be >= 1".to_string()));
    }

    if config.end_id <= config.start_id {
        return Err(ConfigError::Validation(format!(
            "end_id ({}) must be greater than start_id ({})",
            config.end_id, config.start_id
        )));
    }

    if config.keywords.is_empty() {
        return Err(ConfigError::Validation(
            "scan needs at least one keyword (keywords or keywords-file)".to_string(),
        ));
    }

    if let Some(blank) = config.keywords.iter().position(|k| k.trim().is_empty()) {
        return Err(ConfigError::InvalidKeyword(format!(
            "keyword #{} is blank",
            blank + 1
        )));
    }

    Ok(())
}

fn validate_expand_config(config: &ExpandConfig) -> Result<(), ConfigError> {
    validate_key(&config.key)?;
    validate_key(&config.source_key)?;

    if config.key == config.source_key {
        return Err(ConfigError::Validation(format!(
            "expand key '{}' must differ from its source-key",
            config.key
        )));
    }

    if config.max_children < 1 {
        return Err(ConfigError::Validation(
            "max_children must be >= 1".to_string(),
        ));
    }

    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    Ok(())
}

fn validate_walk_config(config: &WalkConfig) -> Result<(), ConfigError> {
    validate_key(&config.key)?;

    if config.repositories.is_empty() {
        return Err(ConfigError::Validation(
            "walk needs at least one repository".to_string(),
        ));
    }

    for repo in &config.repositories {
        RepoRef::parse(repo)?;
    }

    let (from, until) = config.month_range()?;
    if from > until {
        return Err(ConfigError::Validation(format!(
            "walk range is empty: from {} is after until {}",
            config.from, config.until
        )));
    }

    if config.metrics.is_empty() {
        return Err(ConfigError::Validation(
            "walk needs at least one metric".to_string(),
        ));
    }

    if config.page_size < 1 || config.page_size > 100 {
        return Err(ConfigError::Validation(format!(
            "page_size must be between 1 and 100, got {}",
            config.page_size
        )));
    }

    Ok(())
}

/// Checkpoint keys double as file names
fn validate_key(key: &str) -> Result<(), ConfigError> {
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || key.starts_with('.')
    {
        return Err(ConfigError::Validation(format!(
            "checkpoint key '{}' must be non-empty and use only [A-Za-z0-9._-]",
            key
        )));
    }
    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let (local, domain) = email.split_once('@').ok_or_else(|| {
        ConfigError::Validation(format!("Invalid email format: '{}'", email))
    })?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
