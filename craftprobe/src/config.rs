use std::time::Duration;

/// Which DNS servers the resolver asks.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DnsUpstream {
    /// The host's resolver configuration, falling back to Cloudflare if it cannot be read.
    #[default]
    System,
    Cloudflare,
    Google,
}

/// Timeouts and switches for a probe. Built once and handed to [`crate::Prober`].
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    /// Bound on the TCP connect and on each read or write of the status exchange.
    pub tcp_timeout: Duration,
    /// Bound on the whole best-effort query exchange.
    pub query_timeout: Duration,
    pub query_enabled: bool,
    /// Bound on the Bedrock ping, retries included.
    pub bedrock_timeout: Duration,
    /// The amount of times to send the ping packet, in case of packet loss.
    pub bedrock_tries: usize,
    /// The amount of time to wait in-between sending ping packets.
    pub bedrock_retry_interval: Duration,
    /// Bound on each DNS lookup.
    pub dns_timeout: Duration,
    /// Bound on one whole lookup: DNS plus every protocol attempt.
    pub lookup_timeout: Duration,
    pub dns_upstream: DnsUpstream,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            tcp_timeout: Duration::from_secs(4),
            query_timeout: Duration::from_secs(1),
            query_enabled: true,
            bedrock_timeout: Duration::from_secs(4),
            bedrock_tries: 3,
            bedrock_retry_interval: Duration::from_millis(250),
            dns_timeout: Duration::from_secs(2),
            lookup_timeout: Duration::from_secs(5),
            dns_upstream: DnsUpstream::System,
        }
    }
}
