use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

fn invalid(var: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason: reason.to_string(),
    }
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so it can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e))
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("LEADSCOUT_ENV", "development"))?;

    let bind_addr = or_default("LEADSCOUT_BIND_ADDR", "0.0.0.0:3000")
        .parse::<SocketAddr>()
        .map_err(|e| invalid("LEADSCOUT_BIND_ADDR", e))?;
    let log_level = or_default("LEADSCOUT_LOG_LEVEL", "info");

    let db_max_connections = parse_u32("LEADSCOUT_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("LEADSCOUT_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("LEADSCOUT_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let connector_timeout_secs = parse_u64("LEADSCOUT_CONNECTOR_TIMEOUT_SECS", "30")?;
    let connector_user_agent = or_default(
        "LEADSCOUT_CONNECTOR_USER_AGENT",
        "leadscout/0.1 (lead-monitoring)",
    );
    let connector_base_url = optional("LEADSCOUT_CONNECTOR_BASE_URL");
    let connector_token = optional("LEADSCOUT_CONNECTOR_TOKEN");

    let scan_cron = or_default("LEADSCOUT_SCAN_CRON", "0 */15 * * * *");
    let scan_slot_minutes =
        scan_slot_minutes(&scan_cron, optional("LEADSCOUT_SCAN_SLOT_MINUTES").as_deref())?;
    let scan_max_concurrent_monitors =
        parse_usize("LEADSCOUT_SCAN_MAX_CONCURRENT_MONITORS", "32")?.max(1);

    let stagger_jitter_ratio = or_default("LEADSCOUT_STAGGER_JITTER_RATIO", "0.1")
        .parse::<f64>()
        .map_err(|e| invalid("LEADSCOUT_STAGGER_JITTER_RATIO", e))?;
    if !(0.0..=1.0).contains(&stagger_jitter_ratio) {
        return Err(invalid(
            "LEADSCOUT_STAGGER_JITTER_RATIO",
            "must be between 0.0 and 1.0",
        ));
    }

    let analysis_batch_threshold = parse_usize("LEADSCOUT_ANALYSIS_BATCH_THRESHOLD", "50")?;

    let webhook_timeout_secs = parse_u64("LEADSCOUT_WEBHOOK_TIMEOUT_SECS", "10")?;
    let webhook_max_attempts = parse_u32("LEADSCOUT_WEBHOOK_MAX_ATTEMPTS", "5")?;
    if webhook_max_attempts == 0 {
        return Err(invalid("LEADSCOUT_WEBHOOK_MAX_ATTEMPTS", "must be at least 1"));
    }
    let webhook_retention_days = parse_u32("LEADSCOUT_WEBHOOK_RETENTION_DAYS", "30")?;
    let webhook_sweep_cron = or_default("LEADSCOUT_WEBHOOK_SWEEP_CRON", "0 * * * * *");

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        connector_timeout_secs,
        connector_user_agent,
        connector_base_url,
        connector_token,
        scan_cron,
        scan_slot_minutes,
        scan_max_concurrent_monitors,
        stagger_jitter_ratio,
        analysis_batch_threshold,
        webhook_timeout_secs,
        webhook_max_attempts,
        webhook_retention_days,
        webhook_sweep_cron,
    })
}

/// Fixed interval in minutes between firings of a six or seven field cron
/// expression, or `None` when the firings are not evenly spaced.
///
/// Recognises a fixed seconds field with `*`, `*/N` or a fixed minute, and
/// `*` or `*/H` hours under a fixed minute. Every other field must be `*`
/// or `?`.
#[must_use]
pub fn cron_interval_minutes(expr: &str) -> Option<u32> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if !(6..=7).contains(&fields.len()) {
        return None;
    }
    fields[0].parse::<u32>().ok().filter(|s| *s < 60)?;
    if !fields[3..].iter().all(|f| matches!(*f, "*" | "?")) {
        return None;
    }

    let step = |field: &str, period: u32| -> Option<u32> {
        match field {
            "*" => Some(1),
            f => f
                .strip_prefix("*/")
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0 && period % n == 0),
        }
    };

    match (fields[1], fields[2]) {
        (minute, "*") if minute.parse::<u32>().is_err() => step(minute, 60),
        (minute, hour) if minute.parse::<u32>().is_ok_and(|m| m < 60) => {
            step(hour, 24).map(|h| h * 60)
        }
        _ => None,
    }
}

/// Slot length for stage memoization. Two scan firings must never share a
/// slot, so an explicit slot may not exceed the cron interval; without one
/// the interval itself is used.
fn scan_slot_minutes(cron: &str, explicit: Option<&str>) -> Result<u32, ConfigError> {
    const VAR: &str = "LEADSCOUT_SCAN_SLOT_MINUTES";
    let interval = cron_interval_minutes(cron);
    let slot = match (explicit, interval) {
        (Some(raw), _) => raw.parse::<u32>().map_err(|e| invalid(VAR, e))?,
        (None, Some(interval)) => interval,
        (None, None) => {
            return Err(invalid(
                VAR,
                format!("required because LEADSCOUT_SCAN_CRON '{cron}' has no fixed interval"),
            ))
        }
    };
    if slot == 0 {
        return Err(invalid(VAR, "must be at least 1"));
    }
    if let Some(interval) = interval.filter(|i| slot > *i) {
        return Err(invalid(
            VAR,
            format!("{slot} minutes is longer than the {interval} minute scan interval"),
        ));
    }
    Ok(slot)
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "production" => Ok(Environment::Production),
        "test" => Ok(Environment::Test),
        other => Err(invalid(
            "LEADSCOUT_ENV",
            format!("unknown environment '{other}'"),
        )),
    }
}
