//! Ingestor Configuration Settings
//!
//! Configuration types for the ingestor, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::services::ResolverSettings;
use crate::domain::universe::StrikeWindow;
use crate::infrastructure::schwab::RestConfig;
use crate::infrastructure::schwab::rest::DEFAULT_BASE_URL;
use crate::infrastructure::streamer::{
    ConstantBackoff, ExponentialBackoff, ExponentialConfig, KeepaliveConfig, RetryPolicy,
    SessionConfig, SupervisorConfig,
};

/// Underlying and contract window settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnderlyingSettings {
    /// Chain query symbol.
    pub symbol: String,
    /// Option root for synthesized contracts.
    pub option_root: String,
    /// Quote symbols tried in order for the reference price.
    pub price_aliases: Vec<String>,
    /// Reference price when none can be fetched.
    pub default_price: Decimal,
    /// Distance between listed strikes.
    pub strike_increment: Decimal,
    /// Distance from the centre strike to either edge.
    pub strike_half_width: Decimal,
    /// Strikes requested from the chain endpoint.
    pub chain_strike_count: u32,
}

impl Default for UnderlyingSettings {
    fn default() -> Self {
        let window = StrikeWindow::default();
        Self {
            symbol: "$SPX".to_string(),
            option_root: "SPXW".to_string(),
            price_aliases: vec!["$SPX".to_string(), "$SPX.X".to_string(), "SPX".to_string()],
            default_price: Decimal::from(5440),
            strike_increment: window.increment,
            strike_half_width: window.half_width,
            chain_strike_count: 31,
        }
    }
}

/// Venue API access.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSettings {
    /// REST base URL.
    pub api_base_url: String,
    /// File holding the current access token.
    pub token_file: Option<PathBuf>,
    /// Fixed access token, preferred over the file.
    pub access_token: Option<String>,
}

impl std::fmt::Debug for CredentialSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSettings")
            .field("api_base_url", &self.api_base_url)
            .field("token_file", &self.token_file)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Streaming session timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Interval between QOS keep-alives.
    pub keepalive_interval: Duration,
    /// Inbound silence that faults the session.
    pub read_timeout: Duration,
    /// Time allowed for the LOGIN response.
    pub login_timeout: Duration,
    /// Time allowed for each write.
    pub write_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            keepalive_interval: session.keepalive.interval,
            read_timeout: session.keepalive.read_timeout,
            login_timeout: session.login_timeout,
            write_timeout: session.write_timeout,
        }
    }
}

/// Backoff strategy between session attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// Fixed delay.
    #[default]
    Constant,
    /// Doubling delay with jitter.
    Exponential,
}

impl RetryStrategy {
    /// Parse strategy from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "exponential" => Self::Exponential,
            _ => Self::Constant,
        }
    }

    /// Strategy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::Exponential => "exponential",
        }
    }
}

/// Supervisor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Time between universe refreshes.
    pub poll_interval: Duration,
    /// Backoff strategy.
    pub retry: RetryStrategy,
    /// Constant delay, or the initial delay for exponential backoff.
    pub retry_delay: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            retry: RetryStrategy::Constant,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Quote storage settings.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// `PostgreSQL` URL; `None` keeps quotes in memory.
    pub url: Option<String>,
    /// Pool size.
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("url", &self.url.as_ref().map(|_| "[REDACTED]"))
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { metrics_port: 9090 }
    }
}

/// Complete ingestor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestorConfig {
    /// Underlying and window.
    pub underlying: UnderlyingSettings,
    /// Venue access.
    pub credentials: CredentialSettings,
    /// Session timeouts.
    pub stream: StreamSettings,
    /// Supervisor loop.
    pub supervisor: SupervisorSettings,
    /// Quote storage.
    pub database: DatabaseSettings,
    /// Exposed ports.
    pub server: ServerSettings,
}

impl IngestorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if no access token source is configured or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if no access token source is configured, a value
    /// cannot be parsed, or a duration is zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let token_file = env.non_empty("SCHWAB_TOKEN_FILE").map(PathBuf::from);
        let access_token = env.non_empty("SCHWAB_ACCESS_TOKEN");
        if token_file.is_none() && access_token.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "SCHWAB_TOKEN_FILE or SCHWAB_ACCESS_TOKEN".to_string(),
            ));
        }

        let defaults = UnderlyingSettings::default();
        let underlying = UnderlyingSettings {
            symbol: env.string("ODTE_UNDERLYING_SYMBOL", defaults.symbol),
            option_root: env.string("ODTE_OPTION_ROOT", defaults.option_root),
            price_aliases: env
                .non_empty("ODTE_PRICE_ALIASES")
                .map_or(defaults.price_aliases, |v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                }),
            default_price: env.parse("ODTE_DEFAULT_PRICE", defaults.default_price)?,
            strike_increment: env.parse("ODTE_STRIKE_INCREMENT", defaults.strike_increment)?,
            strike_half_width: env.parse("ODTE_STRIKE_HALF_WIDTH", defaults.strike_half_width)?,
            chain_strike_count: env.parse("ODTE_CHAIN_STRIKE_COUNT", defaults.chain_strike_count)?,
        };

        if underlying.strike_increment <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue {
                key: "ODTE_STRIKE_INCREMENT".to_string(),
                value: underlying.strike_increment.to_string(),
            });
        }

        let credentials = CredentialSettings {
            api_base_url: env.string("SCHWAB_API_BASE_URL", DEFAULT_BASE_URL.to_string()),
            token_file,
            access_token,
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            keepalive_interval: env
                .secs("ODTE_KEEPALIVE_INTERVAL_SECS", defaults.keepalive_interval)?,
            read_timeout: env.secs("ODTE_READ_TIMEOUT_SECS", defaults.read_timeout)?,
            login_timeout: env.secs("ODTE_LOGIN_TIMEOUT_SECS", defaults.login_timeout)?,
            write_timeout: env.secs("ODTE_WRITE_TIMEOUT_SECS", defaults.write_timeout)?,
        };

        let defaults = SupervisorSettings::default();
        let supervisor = SupervisorSettings {
            poll_interval: env.secs("ODTE_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            retry: env
                .non_empty("ODTE_RETRY_STRATEGY")
                .map_or(defaults.retry, |v| RetryStrategy::from_str_case_insensitive(&v)),
            retry_delay: env.secs("ODTE_RETRY_DELAY_SECS", defaults.retry_delay)?,
        };

        let database = DatabaseSettings {
            url: env.non_empty("DATABASE_URL"),
            max_connections: env.parse(
                "ODTE_DATABASE_MAX_CONNECTIONS",
                DatabaseSettings::default().max_connections,
            )?,
        };

        let server = ServerSettings {
            metrics_port: env.parse("ODTE_METRICS_PORT", ServerSettings::default().metrics_port)?,
        };

        Ok(Self {
            underlying,
            credentials,
            stream,
            supervisor,
            database,
            server,
        })
    }

    /// Resolver settings derived from the underlying section.
    #[must_use]
    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            option_root: self.underlying.option_root.clone(),
            window: StrikeWindow::new(
                self.underlying.strike_increment,
                self.underlying.strike_half_width,
            ),
            default_price: self.underlying.default_price,
        }
    }

    /// REST client settings.
    #[must_use]
    pub fn rest_config(&self) -> RestConfig {
        RestConfig {
            base_url: self.credentials.api_base_url.clone(),
            underlying_symbol: self.underlying.symbol.clone(),
            price_aliases: self.underlying.price_aliases.clone(),
            chain_strike_count: self.underlying.chain_strike_count,
            ..RestConfig::default()
        }
    }

    /// Supervisor settings including session timeouts.
    #[must_use]
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: self.supervisor.poll_interval,
            session: SessionConfig {
                login_timeout: self.stream.login_timeout,
                write_timeout: self.stream.write_timeout,
                keepalive: KeepaliveConfig {
                    interval: self.stream.keepalive_interval,
                    read_timeout: self.stream.read_timeout,
                    ..KeepaliveConfig::default()
                },
                ..SessionConfig::default()
            },
            trading_date: None,
        }
    }

    /// Retry policy for the configured strategy.
    #[must_use]
    pub fn retry_policy(&self) -> Box<dyn RetryPolicy> {
        match self.supervisor.retry {
            RetryStrategy::Constant => Box::new(ConstantBackoff::new(self.supervisor.retry_delay)),
            RetryStrategy::Exponential => Box::new(ExponentialBackoff::new(ExponentialConfig {
                initial_delay: self.supervisor.retry_delay,
                ..ExponentialConfig::default()
            })),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn non_empty(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.non_empty(key).unwrap_or(default)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.non_empty(key).map_or(Ok(default), |value| {
            value.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            })
        })
    }

    /// Whole seconds. Zero is rejected; every duration here is an interval
    /// or timeout.
    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.parse(key, default.as_secs())? {
            0 => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: "0".to_string(),
            }),
            secs => Ok(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn config(pairs: &[(&str, &str)]) -> Result<IngestorConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        IngestorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_with_token_file() {
        let config = config(&[("SCHWAB_TOKEN_FILE", "/tmp/token.json")]).unwrap();

        assert_eq!(config.underlying, UnderlyingSettings::default());
        assert_eq!(config.stream, StreamSettings::default());
        assert_eq!(config.supervisor, SupervisorSettings::default());
        assert_eq!(config.database.url, None);
        assert_eq!(config.server.metrics_port, 9090);
        assert_eq!(config.credentials.api_base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn token_source_is_required() {
        assert!(matches!(
            config(&[]),
            Err(ConfigError::MissingEnvVar(_))
        ));
        assert!(config(&[("SCHWAB_ACCESS_TOKEN", "abc")]).is_ok());
        assert!(matches!(
            config(&[("SCHWAB_ACCESS_TOKEN", "  ")]),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("SCHWAB_ACCESS_TOKEN", "abc"),
            ("ODTE_PRICE_ALIASES", "$NDX, NDX"),
            ("ODTE_OPTION_ROOT", "NDXP"),
            ("ODTE_DEFAULT_PRICE", "19500.5"),
            ("ODTE_STRIKE_INCREMENT", "10"),
            ("ODTE_READ_TIMEOUT_SECS", "120"),
            ("ODTE_RETRY_STRATEGY", "Exponential"),
            ("DATABASE_URL", "postgres://localhost/odte"),
            ("ODTE_METRICS_PORT", "0"),
        ])
        .unwrap();

        assert_eq!(config.underlying.price_aliases, vec!["$NDX", "NDX"]);
        assert_eq!(config.underlying.default_price, Decimal::new(195_005, 1));
        assert_eq!(config.resolver_settings().option_root, "NDXP");
        assert_eq!(config.resolver_settings().window.increment, Decimal::from(10));
        assert_eq!(
            config.supervisor_config().session.keepalive.read_timeout,
            Duration::from_secs(120)
        );
        assert_eq!(config.supervisor.retry, RetryStrategy::Exponential);
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/odte"));
        assert_eq!(config.server.metrics_port, 0);
    }

    #[test_case("ODTE_POLL_INTERVAL_SECS", "soon" ; "non numeric duration")]
    #[test_case("ODTE_DEFAULT_PRICE", "high" ; "non numeric price")]
    #[test_case("ODTE_STRIKE_INCREMENT", "0" ; "zero increment")]
    #[test_case("ODTE_METRICS_PORT", "70000" ; "port out of range")]
    #[test_case("ODTE_KEEPALIVE_INTERVAL_SECS", "0" ; "zero keepalive interval")]
    #[test_case("ODTE_POLL_INTERVAL_SECS", "0" ; "zero poll interval")]
    #[test_case("ODTE_READ_TIMEOUT_SECS", "0" ; "zero read timeout")]
    #[test_case("ODTE_RETRY_DELAY_SECS", "0" ; "zero retry delay")]
    fn invalid_values_are_rejected(key: &str, value: &str) {
        let result = config(&[("SCHWAB_ACCESS_TOKEN", "abc"), (key, value)]);
        assert!(matches!(result, Err(ConfigError::InvalidValue { key: k, .. }) if k == key));
    }

    #[test]
    fn retry_strategy_parsing() {
        assert_eq!(
            RetryStrategy::from_str_case_insensitive("EXPONENTIAL"),
            RetryStrategy::Exponential
        );
        assert_eq!(
            RetryStrategy::from_str_case_insensitive("constant"),
            RetryStrategy::Constant
        );
        assert_eq!(
            RetryStrategy::from_str_case_insensitive("unknown"),
            RetryStrategy::Constant
        );
    }

    #[test]
    fn constant_policy_uses_configured_delay() {
        let config = config(&[
            ("SCHWAB_ACCESS_TOKEN", "abc"),
            ("ODTE_RETRY_DELAY_SECS", "7"),
        ])
        .unwrap();
        let mut policy = config.retry_policy();
        assert_eq!(policy.next_delay(), Duration::from_secs(7));
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let config = config(&[
            ("SCHWAB_ACCESS_TOKEN", "token-secret"),
            ("DATABASE_URL", "postgres://user:pw@db/odte"),
        ])
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("token-secret"));
        assert!(!debug.contains("pw@db"));
        assert!(debug.contains("[REDACTED]"));
    }
}
