//! Configuration validation

use crate::{AppConfig, ConfigError, Result};
use std::collections::HashSet;
use std::net::SocketAddr;

/// Largest chunk the reconciliation job accepts
const MAX_CHUNK_SIZE: usize = 1000;

/// Longest renewal look-ahead, ten years
const MAX_HORIZON_DAYS: u32 = 3650;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration, reporting every bad field
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.database.url.trim().is_empty() {
        errors.push(ValidationError::new("database.url", "database URL is required"));
    }

    // Reconciliation
    let reconciliation = &config.reconciliation;
    if reconciliation.horizon_days > MAX_HORIZON_DAYS {
        errors.push(ValidationError::new(
            "reconciliation.horizon_days",
            format!("must be at most {MAX_HORIZON_DAYS}"),
        ));
    }

    if reconciliation.chunk_size == 0 || reconciliation.chunk_size > MAX_CHUNK_SIZE {
        errors.push(ValidationError::new(
            "reconciliation.chunk_size",
            format!("must be between 1 and {MAX_CHUNK_SIZE}"),
        ));
    }

    if reconciliation.max_records == 0 {
        errors.push(ValidationError::new(
            "reconciliation.max_records",
            "must be greater than 0",
        ));
    }

    if reconciliation.provider_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "reconciliation.provider_timeout_ms",
            "must be greater than 0",
        ));
    }

    if reconciliation.job_name.trim().is_empty() {
        errors.push(ValidationError::new(
            "reconciliation.job_name",
            "job name is required",
        ));
    }

    if reconciliation.run_stale_after_secs <= 0 {
        errors.push(ValidationError::new(
            "reconciliation.run_stale_after_secs",
            "must be greater than 0",
        ));
    }

    // Provider
    if let Err(e) = validate_url(&config.provider.base_url) {
        errors.push(ValidationError::new("provider.base_url", e));
    }

    if config.provider.timeout_ms == 0 {
        errors.push(ValidationError::new(
            "provider.timeout_ms",
            "must be greater than 0",
        ));
    }

    for (tenant_id, secret) in &config.provider.credentials {
        if secret.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("provider.credentials.{tenant_id}"),
                "credential must not be blank",
            ));
        }
    }

    // Tenants
    let mut seen = HashSet::new();
    for (idx, tenant_id) in config.tenants.iter().enumerate() {
        if tenant_id.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("tenants[{idx}]"),
                "tenant id must not be blank",
            ));
        } else if !seen.insert(tenant_id) {
            errors.push(ValidationError::new(
                format!("tenants[{idx}]"),
                format!("duplicate tenant id '{tenant_id}'"),
            ));
        }
    }

    // Scheduler
    if config.scheduler.enabled {
        if let Err(e) = validate_cron(&config.scheduler.cron) {
            errors.push(ValidationError::new("scheduler.cron", e));
        }
    }

    // Server
    if config.server.bind.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind",
            format!("'{}' is not a socket address", config.server.bind),
        ));
    }

    // Logging
    if let Err(e) = validate_log_level(&config.logging.level) {
        errors.push(e);
    }

    if !matches!(
        config.logging.format.to_lowercase().as_str(),
        "pretty" | "text" | "json"
    ) {
        errors.push(ValidationError::new(
            "logging.format",
            "must be one of: pretty, text, json",
        ));
    }

    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

/// Validate a URL
pub fn validate_url(url: &str) -> std::result::Result<(), String> {
    if url.is_empty() {
        return Err("URL cannot be empty".to_string());
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err("URL must start with http:// or https://".to_string());
    }

    Ok(())
}

/// Shape check for a six or seven field cron expression
pub fn validate_cron(expression: &str) -> std::result::Result<(), String> {
    let fields = expression.split_whitespace().count();
    if !(6..=7).contains(&fields) {
        return Err(format!(
            "expected 6 or 7 fields (seconds first), found {fields}"
        ));
    }
    Ok(())
}

/// Validate log level. Accepts a bare level or a full filter directive.
fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    let bare = level.split(',').next().unwrap_or_default();
    if bare.contains('=') {
        return Ok(());
    }
    match bare.trim().to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => Ok(()),
        _ => Err(ValidationError::new(
            "logging.level",
            format!("invalid log level: {level}"),
        )),
    }
}
