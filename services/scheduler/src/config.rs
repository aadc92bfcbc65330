//! Configuration for the scheduler.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use fleet_reconcile::DEFAULT_RECONCILE_INTERVAL;

/// What `StartApp` does when the application already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartConflictPolicy {
    /// Fail the start with `AppAlreadyExists`.
    #[default]
    Reject,

    /// Persist the new definition as a new version and scale up to it.
    Overwrite,
}

impl FromStr for StartConflictPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "overwrite" => Ok(Self::Overwrite),
            other => anyhow::bail!("unknown start conflict policy '{other}'"),
        }
    }
}

impl fmt::Display for StartConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reject => f.write_str("reject"),
            Self::Overwrite => f.write_str("overwrite"),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Capacity of the scheduler's command mailbox.
    pub mailbox_size: usize,

    /// Interval of the periodic reconciliation worker. `None` disables it.
    pub reconcile_interval: Option<Duration>,

    /// Upper bound on waiting for an application lock. `None` waits forever.
    pub lock_wait_timeout: Option<Duration>,

    /// Upper bound on waiting for a command response, applied by handles.
    pub command_timeout: Option<Duration>,

    pub start_conflict: StartConflictPolicy,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mailbox_size: 256,
            reconcile_interval: Some(DEFAULT_RECONCILE_INTERVAL),
            lock_wait_timeout: None,
            command_timeout: None,
            start_conflict: StartConflictPolicy::Reject,
            log_level: "info".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let mailbox_size = match lookup("FLEET_MAILBOX_SIZE") {
            Some(raw) => {
                let size: usize = parse(&raw, "FLEET_MAILBOX_SIZE")?;
                anyhow::ensure!(size > 0, "FLEET_MAILBOX_SIZE must be positive");
                size
            }
            None => defaults.mailbox_size,
        };

        // 0 disables the worker
        let reconcile_interval = match lookup("FLEET_RECONCILE_INTERVAL_SECS") {
            Some(raw) => match parse::<u64>(&raw, "FLEET_RECONCILE_INTERVAL_SECS")? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => defaults.reconcile_interval,
        };

        let lock_wait_timeout = lookup("FLEET_LOCK_WAIT_TIMEOUT_SECS")
            .map(|raw| parse_secs(&raw, "FLEET_LOCK_WAIT_TIMEOUT_SECS"))
            .transpose()?;

        let command_timeout = lookup("FLEET_COMMAND_TIMEOUT_SECS")
            .map(|raw| parse_secs(&raw, "FLEET_COMMAND_TIMEOUT_SECS"))
            .transpose()?;

        let start_conflict = lookup("FLEET_START_CONFLICT")
            .map(|raw| {
                raw.parse::<StartConflictPolicy>()
                    .context("invalid FLEET_START_CONFLICT")
            })
            .transpose()?
            .unwrap_or(defaults.start_conflict);

        let log_level = lookup("FLEET_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            mailbox_size,
            reconcile_interval,
            lock_wait_timeout,
            command_timeout,
            start_conflict,
            log_level,
        })
    }
}

fn parse<T>(raw: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("invalid {key}: '{raw}'"))
}

fn parse_secs(raw: &str, key: &str) -> Result<Duration> {
    let secs: u64 = parse(raw, key)?;
    anyhow::ensure!(secs > 0, "{key} must be positive");
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.mailbox_size, 256);
        assert_eq!(config.reconcile_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.lock_wait_timeout, None);
        assert_eq!(config.command_timeout, None);
        assert_eq!(config.start_conflict, StartConflictPolicy::Reject);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            ("FLEET_MAILBOX_SIZE", "16"),
            ("FLEET_RECONCILE_INTERVAL_SECS", "0"),
            ("FLEET_LOCK_WAIT_TIMEOUT_SECS", "5"),
            ("FLEET_COMMAND_TIMEOUT_SECS", "60"),
            ("FLEET_START_CONFLICT", "Overwrite"),
            ("FLEET_LOG_LEVEL", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.mailbox_size, 16);
        assert_eq!(config.reconcile_interval, None);
        assert_eq!(config.lock_wait_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.command_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.start_conflict, StartConflictPolicy::Overwrite);
        assert_eq!(config.log_level, "debug");
    }

    #[rstest]
    #[case("FLEET_MAILBOX_SIZE", "0")]
    #[case("FLEET_MAILBOX_SIZE", "lots")]
    #[case("FLEET_RECONCILE_INTERVAL_SECS", "-1")]
    #[case("FLEET_LOCK_WAIT_TIMEOUT_SECS", "0")]
    #[case("FLEET_COMMAND_TIMEOUT_SECS", "soon")]
    #[case("FLEET_START_CONFLICT", "merge")]
    fn test_invalid_values_are_errors(#[case] key: &str, #[case] value: &str) {
        assert!(SchedulerConfig::from_lookup(lookup(&[(key, value)])).is_err());
    }
}
