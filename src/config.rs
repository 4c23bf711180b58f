//! Configuration for the arbitrage detection service.
//!
//! Every key resolves through the same chain: secret store first, then the
//! process environment, then a hardcoded default. Keys that are required
//! and have no default abort startup; nothing is re-read after
//! `AppConfig::resolve` returns.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::vault::VaultClient;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required config key {key}")]
    MissingKey { key: &'static str },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error(
        "SPREAD_THRESHOLD is not set and past deployments disagree on a default \
         (0.01 vs 0.02); set it explicitly"
    )]
    SpreadThresholdUnset,
}

/// Cached key/value lookup backing every typed getter.
///
/// The secret map is fetched once at startup; an unreachable secret store
/// degrades to environment-only resolution with a warning instead of
/// failing the process. Empty values count as unset.
pub struct ConfigSource {
    secrets: HashMap<String, String>,
}

impl ConfigSource {
    pub async fn load() -> Self {
        let secrets = match VaultClient::from_env() {
            Some(client) => match client.fetch_secrets().await {
                Ok(map) => {
                    info!(keys = map.len(), "configuration secrets loaded from vault");
                    map
                }
                Err(err) => {
                    warn!(error = %err, "vault unreachable; using environment configuration only");
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };

        Self { secrets }
    }

    /// Resolution source with a fixed secret map; used by tests to avoid
    /// touching the process environment.
    pub fn from_map(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.secrets
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .filter(|v| !v.is_empty())
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn require(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::MissingKey { key })
    }
}

/// Queue backend selector, decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    RabbitMq,
    Sqs,
}

impl FromStr for QueueKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rabbitmq" => Ok(Self::RabbitMq),
            "sqs" => Ok(Self::Sqs),
            other => Err(ConfigError::InvalidValue {
                key: "QUEUE_TYPE",
                value: other.to_string(),
                reason: "expected \"rabbitmq\" or \"sqs\"".to_string(),
            }),
        }
    }
}

/// Where produced signals go. `Log` suppresses queue delivery entirely;
/// any value other than `log` publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Queue,
    Log,
}

impl OutputMode {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("log") {
            Self::Log
        } else {
            Self::Queue
        }
    }
}

#[derive(Debug, Clone)]
pub struct RabbitMqConfig {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub user: String,
    pub password: String,

    /// Durable topic exchange the consume queue binds to and signals are
    /// published through.
    pub exchange: String,
    pub queue: String,

    /// Binding pattern for the consume queue (topic wildcard by default).
    pub bind_key: String,

    /// Routing key for outbound signal publishes; deliberately distinct
    /// from `bind_key` so a deployment can fan signals out without
    /// re-consuming them.
    pub routing_key: String,

    /// Optional dead-letter queue. When set, rejects without requeue are
    /// routed there instead of being discarded by the broker.
    pub dead_letter_queue: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SqsConfig {
    pub queue_url: String,
    pub region: String,

    /// How long to pause after a polling failure before the next
    /// long-poll attempt.
    pub poll_error_delay: Duration,
}

/// Backend configuration, tagged by the startup selector so backend-type
/// conditionals stay out of the consumer loop.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    RabbitMq(RabbitMqConfig),
    Sqs(SqsConfig),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BackendConfig,

    /// Number of most recent data points the spread is computed over.
    pub lookback: usize,

    /// Minimum average absolute spread that produces a signal (inclusive).
    /// Required: two historical defaults exist (0.01 and 0.02) and the
    /// choice between them belongs to the operator.
    pub spread_threshold: f64,

    pub output_mode: OutputMode,
}

impl AppConfig {
    pub async fn load() -> Result<Self, ConfigError> {
        Self::resolve(&ConfigSource::load().await)
    }

    pub fn resolve(source: &ConfigSource) -> Result<Self, ConfigError> {
        let kind: QueueKind = source.get_or("QUEUE_TYPE", "rabbitmq").parse()?;

        let backend = match kind {
            QueueKind::RabbitMq => BackendConfig::RabbitMq(RabbitMqConfig {
                host: source.get_or("RABBITMQ_HOST", "localhost"),
                port: parse_key(source, "RABBITMQ_PORT", "5672")?,
                vhost: source.get_or("RABBITMQ_VHOST", "/"),
                user: source.get_or("RABBITMQ_USER", "guest"),
                password: source.get_or("RABBITMQ_PASS", "guest"),
                exchange: source.get_or("RABBITMQ_EXCHANGE", "stock_arbitrage"),
                queue: source.get_or("RABBITMQ_QUEUE", "arbitrage_queue"),
                bind_key: source.get_or("RABBITMQ_BIND_KEY", "#"),
                routing_key: source.get_or("RABBITMQ_ROUTING_KEY", "arbitrage_opportunity"),
                dead_letter_queue: source.get("RABBITMQ_DLQ"),
            }),
            QueueKind::Sqs => BackendConfig::Sqs(SqsConfig {
                queue_url: source.require("SQS_QUEUE_URL")?,
                region: source.get_or("SQS_REGION", "us-east-1"),
                poll_error_delay: Duration::from_secs(parse_key(
                    source,
                    "POLLING_INTERVAL",
                    "5",
                )?),
            }),
        };

        let spread_threshold = match source.get("SPREAD_THRESHOLD") {
            Some(raw) => raw
                .parse::<f64>()
                .map_err(|err| ConfigError::InvalidValue {
                    key: "SPREAD_THRESHOLD",
                    value: raw.clone(),
                    reason: err.to_string(),
                })?,
            None => return Err(ConfigError::SpreadThresholdUnset),
        };

        Ok(Self {
            backend,
            lookback: parse_key(source, "LOOKBACK_PERIOD", "30")?,
            spread_threshold,
            output_mode: OutputMode::parse(&source.get_or("OUTPUT_MODE", "queue")),
        })
    }
}

fn parse_key<T>(source: &ConfigSource, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = source.get_or(key, default);
    raw.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value: raw.clone(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> ConfigSource {
        ConfigSource::from_map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn rabbitmq_defaults_resolve() {
        let cfg = AppConfig::resolve(&source(&[("SPREAD_THRESHOLD", "0.01")]))
            .expect("default rabbitmq config resolves");

        let BackendConfig::RabbitMq(mq) = cfg.backend else {
            panic!("expected the rabbitmq variant");
        };
        assert_eq!(mq.host, "localhost");
        assert_eq!(mq.port, 5672);
        assert_eq!(mq.vhost, "/");
        assert_eq!(mq.exchange, "stock_arbitrage");
        assert_eq!(mq.queue, "arbitrage_queue");
        assert_eq!(mq.bind_key, "#");
        assert_eq!(mq.routing_key, "arbitrage_opportunity");
        assert_eq!(mq.dead_letter_queue, None);
        assert_eq!(cfg.lookback, 30);
        assert_eq!(cfg.spread_threshold, 0.01);
        assert_eq!(cfg.output_mode, OutputMode::Queue);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg = AppConfig::resolve(&source(&[
            ("SPREAD_THRESHOLD", "0.02"),
            ("LOOKBACK_PERIOD", "5"),
            ("RABBITMQ_HOST", "mq.internal"),
            ("RABBITMQ_PORT", "5673"),
            ("RABBITMQ_DLQ", "arbitrage_dead_letter"),
            ("OUTPUT_MODE", "log"),
        ]))
        .expect("overridden config resolves");

        let BackendConfig::RabbitMq(mq) = cfg.backend else {
            panic!("expected the rabbitmq variant");
        };
        assert_eq!(mq.host, "mq.internal");
        assert_eq!(mq.port, 5673);
        assert_eq!(
            mq.dead_letter_queue.as_deref(),
            Some("arbitrage_dead_letter")
        );
        assert_eq!(cfg.lookback, 5);
        assert_eq!(cfg.spread_threshold, 0.02);
        assert_eq!(cfg.output_mode, OutputMode::Log);
    }

    #[test]
    fn sqs_requires_queue_url() {
        let err = AppConfig::resolve(&source(&[
            ("QUEUE_TYPE", "sqs"),
            ("SPREAD_THRESHOLD", "0.01"),
        ]))
        .expect_err("missing queue url must fail startup");

        assert!(matches!(
            err,
            ConfigError::MissingKey {
                key: "SQS_QUEUE_URL"
            }
        ));
    }

    #[test]
    fn sqs_variant_resolves() {
        let cfg = AppConfig::resolve(&source(&[
            ("QUEUE_TYPE", "SQS"),
            ("SQS_QUEUE_URL", "https://sqs.us-east-1.amazonaws.com/1/arb"),
            ("POLLING_INTERVAL", "2"),
            ("SPREAD_THRESHOLD", "0.015"),
        ]))
        .expect("sqs config resolves");

        let BackendConfig::Sqs(sqs) = cfg.backend else {
            panic!("expected the sqs variant");
        };
        assert_eq!(sqs.region, "us-east-1");
        assert_eq!(sqs.poll_error_delay, Duration::from_secs(2));
    }

    #[test]
    fn unset_spread_threshold_surfaces_both_candidates() {
        let err = AppConfig::resolve(&source(&[])).expect_err("threshold must be explicit");

        assert!(matches!(err, ConfigError::SpreadThresholdUnset));
        let message = err.to_string();
        assert!(message.contains("0.01") && message.contains("0.02"));
    }

    #[test]
    fn unknown_queue_type_is_fatal() {
        let err = AppConfig::resolve(&source(&[
            ("QUEUE_TYPE", "kafka"),
            ("SPREAD_THRESHOLD", "0.01"),
        ]))
        .expect_err("unknown selector must fail startup");

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "QUEUE_TYPE",
                ..
            }
        ));
    }

    #[test]
    fn unparseable_number_is_fatal() {
        let err = AppConfig::resolve(&source(&[
            ("SPREAD_THRESHOLD", "0.01"),
            ("LOOKBACK_PERIOD", "thirty"),
        ]))
        .expect_err("non-numeric lookback must fail startup");

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "LOOKBACK_PERIOD",
                ..
            }
        ));
    }

    #[test]
    fn empty_values_count_as_unset() {
        let src = source(&[("RABBITMQ_HOST", ""), ("SPREAD_THRESHOLD", "0.01")]);
        let cfg = AppConfig::resolve(&src).expect("empty host falls back to default");

        let BackendConfig::RabbitMq(mq) = cfg.backend else {
            panic!("expected the rabbitmq variant");
        };
        assert_eq!(mq.host, "localhost");
    }

    #[test]
    fn output_mode_parsing_is_lenient() {
        assert_eq!(OutputMode::parse("log"), OutputMode::Log);
        assert_eq!(OutputMode::parse("LOG"), OutputMode::Log);
        assert_eq!(OutputMode::parse("queue"), OutputMode::Queue);
        assert_eq!(OutputMode::parse("anything-else"), OutputMode::Queue);
    }
}
