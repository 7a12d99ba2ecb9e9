//! Process configuration loaded from environment variables.
//!
//! All fields have defaults suitable for local development; production
//! deployments override via environment. Broker backend choice lives here
//! and only here — business logic never branches on backend identity.

use std::str::FromStr;
use std::time::Duration;

use crate::broker::ReconnectPolicy;

/// Which durable broker backend the process talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    /// Redis Streams consumer-group backend (explicit ack).
    Streams,
    /// Redis sorted-set backend (priority + visibility timeout).
    Sorted,
}

impl FromStr for BrokerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "streams" => Ok(Self::Streams),
            "sorted" => Ok(Self::Sorted),
            other => Err(format!(
                "unknown broker backend \"{other}\" (expected \"streams\" or \"sorted\")"
            )),
        }
    }
}

/// Orchestration configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Broker connection string (default `redis://127.0.0.1:6379`).
    pub broker_url: String,
    /// Broker backend (default `streams`).
    pub backend: BrokerBackend,
    /// Relay side-channel connection string (defaults to `broker_url`).
    pub relay_url: String,
    /// Relay fan-out channel name.
    pub relay_channel: String,
    /// Pending-message ceiling before the gate sheds load.
    pub max_pending: u64,
    /// Concurrent handler executions per worker process.
    pub concurrency: usize,
    /// Entries fetched per broker read on the streams backend.
    pub prefetch: usize,
    /// Visibility timeout / redelivery threshold for claimed messages.
    pub visibility: Duration,
    /// How long a job may sit in `queued` before the reconciliation sweep
    /// re-publishes it.
    pub requeue_stale_after: Duration,
    /// Backoff for transient broker connect failures.
    pub reconnect: ReconnectPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            broker_url: "redis://127.0.0.1:6379".to_string(),
            backend: BrokerBackend::Streams,
            relay_url: "redis://127.0.0.1:6379".to_string(),
            relay_channel: "inspecta:relay".to_string(),
            max_pending: 100,
            concurrency: 2,
            prefetch: 2,
            visibility: Duration::from_secs(60),
            requeue_stale_after: Duration::from_secs(300),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env var                 | Default                   |
    /// |-------------------------|---------------------------|
    /// | `BROKER_URL`            | `redis://127.0.0.1:6379`  |
    /// | `BROKER_BACKEND`        | `streams`                 |
    /// | `RELAY_URL`             | value of `BROKER_URL`     |
    /// | `RELAY_CHANNEL`         | `inspecta:relay`          |
    /// | `MAX_PENDING_JOBS`      | `100`                     |
    /// | `WORKER_CONCURRENCY`    | `2`                       |
    /// | `BROKER_PREFETCH`       | `2`                       |
    /// | `VISIBILITY_SECS`       | `60`                      |
    /// | `REQUEUE_STALE_SECS`    | `300`                     |
    /// | `RECONNECT_ATTEMPTS`    | `10`                      |
    /// | `RECONNECT_BASE_MS`     | `500`                     |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let broker_url =
            std::env::var("BROKER_URL").unwrap_or_else(|_| defaults.broker_url.clone());
        let backend = std::env::var("BROKER_BACKEND")
            .map(|s| {
                BrokerBackend::from_str(&s).expect("BROKER_BACKEND must be streams or sorted")
            })
            .unwrap_or(defaults.backend);
        let relay_url = std::env::var("RELAY_URL").unwrap_or_else(|_| broker_url.clone());
        let relay_channel =
            std::env::var("RELAY_CHANNEL").unwrap_or_else(|_| defaults.relay_channel.clone());

        Self {
            max_pending: env_parse("MAX_PENDING_JOBS", defaults.max_pending),
            concurrency: env_parse("WORKER_CONCURRENCY", defaults.concurrency),
            prefetch: env_parse("BROKER_PREFETCH", defaults.prefetch),
            visibility: Duration::from_secs(env_parse("VISIBILITY_SECS", 60)),
            requeue_stale_after: Duration::from_secs(env_parse("REQUEUE_STALE_SECS", 300)),
            reconnect: ReconnectPolicy {
                max_attempts: env_parse("RECONNECT_ATTEMPTS", defaults.reconnect.max_attempts),
                base_delay: Duration::from_millis(env_parse("RECONNECT_BASE_MS", 500)),
                ..defaults.reconnect.clone()
            },
            broker_url,
            backend,
            relay_url,
            relay_channel,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Debug,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{key} must parse: {e:?}")),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!(
            BrokerBackend::from_str("Streams").unwrap(),
            BrokerBackend::Streams
        );
        assert_eq!(
            BrokerBackend::from_str("SORTED").unwrap(),
            BrokerBackend::Sorted
        );
        assert!(BrokerBackend::from_str("rabbit").is_err());
    }

    #[test]
    fn defaults_are_sane() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.max_pending, 100);
        assert_eq!(config.backend, BrokerBackend::Streams);
    }
}
