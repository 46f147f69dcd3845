use std::{str::FromStr, time::Duration};

use craftprobe::{DnsUpstream, ProbeConfig};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("`{key}` is not valid: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("`DNS_UPSTREAM` must be one of system, cloudflare, google; got {0:?}")]
    UnknownUpstream(String),
}

/// Server settings, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub cache_ttl: Duration,
    pub probe: ProbeConfig,
}

impl Config {
    /// Reads the process environment.
    ///
    /// # Errors
    /// When a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = ProbeConfig::default();
        let millis = |key: &'static str, default: Duration| {
            parse(&get, key).map(|ms| ms.map_or(default, Duration::from_millis))
        };

        let dns_upstream = match get("DNS_UPSTREAM") {
            None => defaults.dns_upstream,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "system" => DnsUpstream::System,
                "cloudflare" => DnsUpstream::Cloudflare,
                "google" => DnsUpstream::Google,
                _ => return Err(ConfigError::UnknownUpstream(value)),
            },
        };

        let probe = ProbeConfig {
            tcp_timeout: millis("TCP_TIMEOUT_MS", defaults.tcp_timeout)?,
            query_timeout: millis("QUERY_TIMEOUT_MS", defaults.query_timeout)?,
            query_enabled: parse(&get, "QUERY_ENABLED")?.unwrap_or(defaults.query_enabled),
            bedrock_timeout: millis("BEDROCK_TIMEOUT_MS", defaults.bedrock_timeout)?,
            bedrock_tries: parse(&get, "BEDROCK_TRIES")?.unwrap_or(defaults.bedrock_tries),
            dns_timeout: millis("DNS_TIMEOUT_MS", defaults.dns_timeout)?,
            lookup_timeout: millis("LOOKUP_TIMEOUT_MS", defaults.lookup_timeout)?,
            dns_upstream,
            ..defaults
        };

        Ok(Self {
            port: parse(&get, "PORT")?.unwrap_or(DEFAULT_PORT),
            cache_ttl: parse(&get, "CACHE_TTL_SECS")?.map_or(DEFAULT_CACHE_TTL, Duration::from_secs),
            probe,
        })
    }
}

fn parse<T: FromStr>(
    get: impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    get(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value })
        })
        .transpose()
}
