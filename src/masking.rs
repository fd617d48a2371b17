//! Credential rendering for the `config` subcommand and for log lines.
//!
//! Database passwords only leave the process through these helpers, so
//! `--show-secrets` is the single switch that reveals them.

use secrecy::{ExposeSecret, SecretString};

/// Password column of `AppConfig::summary`. Shows the credential only when
/// the operator passed `--show-secrets`.
pub fn format_secret(password: &SecretString, reveal: bool) -> String {
    if !reveal {
        return "[REDACTED]".to_string();
    }
    password.expose_secret().to_string()
}

/// Like [`format_secret`], for the sandbox credential that may be absent
/// (degraded mode).
pub fn format_optional_secret(password: Option<&SecretString>, reveal: bool) -> String {
    password.map_or_else(
        || "(not set)".to_string(),
        |password| format_secret(password, reveal),
    )
}

/// Identify a pool's connection target for logs. Never includes a password.
pub fn describe_target(host: &str, port: u16, database: &str, user: &str) -> String {
    format!("{user}@{host}:{port}/{database}")
}
