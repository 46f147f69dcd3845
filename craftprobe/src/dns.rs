//! Endpoint discovery: `_minecraft._tcp` SRV lookup with an A-record fallback.

use std::{
    cmp::Reverse,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use hickory_resolver::{
    TokioResolver,
    config::ResolverConfig,
    name_server::TokioConnectionProvider,
    proto::rr::{Name, RData},
};
use tokio::time::timeout;

use crate::{
    Error,
    config::{DnsUpstream, ProbeConfig},
    model::{DnsRecord, Endpoint},
};

/// The outcome of resolving a hostname: every record seen, and the endpoint to probe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resolution {
    pub records: Vec<DnsRecord>,
    pub endpoint: Endpoint,
}

/// A DNS resolver shared by every probe. Holds no per-request state.
pub struct Resolver {
    inner: TokioResolver,
    timeout: Duration,
}

impl Resolver {
    #[must_use]
    pub fn new(config: &ProbeConfig) -> Self {
        let mut builder = match config.dns_upstream {
            DnsUpstream::System => TokioResolver::builder_tokio().unwrap_or_else(|e| {
                warn!(error = %e, "could not read system resolver config, using cloudflare");
                TokioResolver::builder_with_config(
                    ResolverConfig::cloudflare(),
                    TokioConnectionProvider::default(),
                )
            }),
            DnsUpstream::Cloudflare => TokioResolver::builder_with_config(
                ResolverConfig::cloudflare(),
                TokioConnectionProvider::default(),
            ),
            DnsUpstream::Google => TokioResolver::builder_with_config(
                ResolverConfig::google(),
                TokioConnectionProvider::default(),
            ),
        };
        let opts = builder.options_mut();
        opts.cache_size = 64;
        opts.attempts = 2;
        opts.timeout = config.dns_timeout;
        Self {
            inner: builder.build(),
            timeout: config.dns_timeout,
        }
    }

    /// Resolves a Java server, preferring the `_minecraft._tcp` SRV record.
    ///
    /// Never fails: on any DNS error the hostname itself becomes the endpoint
    /// with no resolved address, and connecting performs its own lookup.
    pub async fn resolve(&self, hostname: &str, port: u16) -> Resolution {
        if let Some(literal) = ip_literal(hostname, port) {
            return literal;
        }

        let mut records = self.srv_records(hostname).await;
        let selected = select_srv(&records).and_then(|record| match record {
            DnsRecord::Srv { target, port, .. } => Some((target.clone(), *port)),
            DnsRecord::A { .. } => None,
        });

        if let Some((target, srv_port)) = selected {
            let addresses = self.a_records(&target).await;
            let resolved_ip = first_address(&addresses);
            debug!(hostname, %target, port = srv_port, ?resolved_ip, "using SRV record");
            records.extend(addresses);
            return Resolution {
                records,
                endpoint: Endpoint {
                    host: target,
                    resolved_ip,
                    port: srv_port,
                },
            };
        }

        let mut resolution = self.resolve_address(hostname, port).await;
        records.append(&mut resolution.records);
        resolution.records = records;
        resolution
    }

    /// Resolves A records only. Used for Bedrock, which has no SRV convention.
    pub async fn resolve_address(&self, hostname: &str, port: u16) -> Resolution {
        if let Some(literal) = ip_literal(hostname, port) {
            return literal;
        }
        let records = self.a_records(hostname).await;
        let resolved_ip = first_address(&records);
        if resolved_ip.is_none() {
            debug!(hostname, "no A records, leaving resolution to connect");
        }
        Resolution {
            endpoint: Endpoint {
                host: hostname.to_string(),
                resolved_ip,
                port,
            },
            records,
        }
    }

    async fn srv_records(&self, hostname: &str) -> Vec<DnsRecord> {
        let name = format!("_minecraft._tcp.{hostname}");
        match timeout(self.timeout, self.inner.srv_lookup(name.as_str())).await {
            Ok(Ok(lookup)) => lookup
                .as_lookup()
                .record_iter()
                .filter_map(|record| match record.data() {
                    RData::SRV(srv) => Some(DnsRecord::Srv {
                        name: trim_root(record.name()),
                        ttl: record.ttl(),
                        priority: srv.priority(),
                        weight: srv.weight(),
                        port: srv.port(),
                        target: trim_root(srv.target()),
                    }),
                    _ => None,
                })
                .collect(),
            Ok(Err(e)) => {
                trace!(%name, error = %e, "no SRV records");
                Vec::new()
            }
            Err(_) => {
                debug!(%name, "SRV lookup timed out");
                Vec::new()
            }
        }
    }

    async fn a_records(&self, hostname: &str) -> Vec<DnsRecord> {
        match timeout(self.timeout, self.inner.ipv4_lookup(hostname)).await {
            Ok(Ok(lookup)) => lookup
                .as_lookup()
                .record_iter()
                .filter_map(|record| match record.data() {
                    RData::A(a) => Some(DnsRecord::A {
                        name: trim_root(record.name()),
                        ttl: record.ttl(),
                        address: a.0,
                    }),
                    _ => None,
                })
                .collect(),
            Ok(Err(e)) => {
                debug!(hostname, error = %e, "A lookup failed");
                Vec::new()
            }
            Err(_) => {
                debug!(hostname, "A lookup timed out");
                Vec::new()
            }
        }
    }
}

/// Picks the SRV record to probe: lowest priority, then highest weight.
///
/// Ties on both keep the first record in answer order.
#[must_use]
pub fn select_srv(records: &[DnsRecord]) -> Option<&DnsRecord> {
    records
        .iter()
        .filter(|record| matches!(record, DnsRecord::Srv { .. }))
        .min_by_key(|record| match record {
            DnsRecord::Srv {
                priority, weight, ..
            } => (*priority, Reverse(*weight)),
            DnsRecord::A { .. } => (u16::MAX, Reverse(0)),
        })
}

/// The socket address to dial for `endpoint`, doing a system lookup if DNS
/// resolution earlier found no address.
///
/// # Errors
/// [`Error::HostUnreachable`] if the host cannot be resolved.
pub async fn socket_addr(endpoint: &Endpoint) -> Result<SocketAddr, Error> {
    if let Some(ip) = endpoint.resolved_ip {
        return Ok(SocketAddr::new(ip, endpoint.port));
    }
    tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|_| Error::HostUnreachable(endpoint.host.clone()))?
        .next()
        .ok_or_else(|| Error::HostUnreachable(endpoint.host.clone()))
}

fn ip_literal(hostname: &str, port: u16) -> Option<Resolution> {
    let ip: IpAddr = hostname
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()?;
    Some(Resolution {
        records: Vec::new(),
        endpoint: Endpoint {
            host: hostname.to_string(),
            resolved_ip: Some(ip),
            port,
        },
    })
}

fn first_address(records: &[DnsRecord]) -> Option<IpAddr> {
    records.iter().find_map(|record| match record {
        DnsRecord::A { address, .. } => Some(IpAddr::V4(*address)),
        DnsRecord::Srv { .. } => None,
    })
}

fn trim_root(name: &Name) -> String {
    name.to_utf8().trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srv(priority: u16, weight: u16, target: &str) -> DnsRecord {
        DnsRecord::Srv {
            name: "_minecraft._tcp.example.org".into(),
            ttl: 300,
            priority,
            weight,
            port: 25565,
            target: target.into(),
        }
    }

    fn target(record: Option<&DnsRecord>) -> Option<&str> {
        match record? {
            DnsRecord::Srv { target, .. } => Some(target),
            DnsRecord::A { .. } => None,
        }
    }

    #[test]
    fn selects_lowest_priority() {
        let records = [srv(10, 5, "a"), srv(5, 1, "b")];
        assert_eq!(target(select_srv(&records)), Some("b"));
    }

    #[test]
    fn breaks_priority_ties_by_highest_weight() {
        let records = [srv(5, 1, "light"), srv(5, 60, "heavy"), srv(7, 100, "later")];
        assert_eq!(target(select_srv(&records)), Some("heavy"));
    }

    #[test]
    fn full_ties_keep_answer_order() {
        let records = [srv(1, 1, "first"), srv(1, 1, "second")];
        assert_eq!(target(select_srv(&records)), Some("first"));
    }

    #[test]
    fn ignores_address_records() {
        let records = [DnsRecord::A {
            name: "example.org".into(),
            ttl: 60,
            address: [10, 0, 0, 1].into(),
        }];
        assert!(select_srv(&records).is_none());
    }

    #[test]
    fn ip_literals_skip_dns() {
        let resolution = ip_literal("127.0.0.1", 25565).unwrap();
        assert!(resolution.records.is_empty());
        assert_eq!(resolution.endpoint.resolved_ip, Some([127, 0, 0, 1].into()));
        assert!(ip_literal("[::1]", 19132).is_some());
        assert!(ip_literal("play.example.org", 25565).is_none());
    }

    #[test]
    fn root_dot_is_trimmed() {
        let name = Name::from_ascii("mc.example.org.").unwrap();
        assert_eq!(trim_root(&name), "mc.example.org");
    }

    #[tokio::test]
    async fn socket_addr_uses_resolved_ip() {
        let endpoint = Endpoint {
            host: "whatever.invalid".into(),
            resolved_ip: Some([192, 0, 2, 7].into()),
            port: 25570,
        };
        assert_eq!(
            socket_addr(&endpoint).await.unwrap(),
            "192.0.2.7:25570".parse().unwrap()
        );
    }
}
