use std::future::Future;

use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{Instant, timeout},
};

use crate::{
    Error,
    bedrock::Bedrock,
    config::ProbeConfig,
    dns::Resolver,
    java::Java,
    model::{BedrockStatus, Endpoint, JavaStatus, Platform, ProbeRequest, QueryExtras, ServerStatus},
    ping::AsyncPingable,
    query::Query,
};

/// Headroom left before the lookup deadline for returning a decoded status.
const STATUS_HEADROOM: Duration = Duration::from_millis(100);

/// Something that turns a [`ProbeRequest`] into a [`ServerStatus`].
///
/// Implementations must be safe to call concurrently for different requests.
pub trait StatusProbe: Send + Sync {
    fn probe(
        &self,
        request: &ProbeRequest,
    ) -> impl Future<Output = Result<ServerStatus, Error>> + Send;
}

/// Runs DNS resolution and the protocol probes for one lookup.
///
/// Holds no per-request state; share one instance across all requests.
pub struct Prober {
    config: ProbeConfig,
    resolver: Resolver,
}

impl Prober {
    #[must_use]
    pub fn new(config: ProbeConfig) -> Self {
        let resolver = Resolver::new(&config);
        Self { config, resolver }
    }

    #[must_use]
    pub const fn config(&self) -> &ProbeConfig {
        &self.config
    }

    #[must_use]
    pub const fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Probes the server described by `request`.
    ///
    /// # Errors
    /// Only ever [`Error::ResourceNotFound`]; the underlying cause is logged.
    pub async fn probe(&self, request: &ProbeRequest) -> Result<ServerStatus, Error> {
        let deadline = Instant::now() + self.config.lookup_timeout;
        let outcome = match timeout(self.config.lookup_timeout, self.run(request, deadline)).await {
            Ok(outcome) => outcome,
            Err(elapsed) => Err(elapsed.into()),
        };
        match outcome {
            Ok(status) => {
                debug!(
                    platform = %request.platform,
                    hostname = %request.hostname,
                    online = status.players().online,
                    "probe succeeded"
                );
                Ok(status)
            }
            Err(e) => {
                warn!(
                    platform = %request.platform,
                    hostname = %request.hostname,
                    port = ?request.port,
                    error = %e,
                    "probe failed"
                );
                Err(Error::ResourceNotFound)
            }
        }
    }

    async fn run(&self, request: &ProbeRequest, deadline: Instant) -> Result<ServerStatus, Error> {
        match request.platform {
            Platform::Java => self
                .probe_java(request, deadline)
                .await
                .map(ServerStatus::Java),
            Platform::Bedrock => self.probe_bedrock(request).await.map(ServerStatus::Bedrock),
        }
    }

    async fn probe_java(&self, request: &ProbeRequest, deadline: Instant) -> Result<JavaStatus, Error> {
        let endpoint = self
            .resolver
            .resolve(&request.hostname, request.effective_port())
            .await
            .endpoint;

        let query = self.config.query_enabled.then(|| {
            QueryTask::spawn(Query {
                endpoint: query_endpoint(&endpoint, request),
                timeout: self.config.query_timeout,
            })
        });

        let (_, mut status) = Java {
            endpoint,
            timeout: self.config.tcp_timeout,
        }
        .ping_before(deadline.checked_sub(STATUS_HEADROOM).unwrap_or(deadline))
        .await?;

        if let Some(task) = query {
            status.query = task.join(&request.hostname).await;
        }
        Ok(status)
    }

    async fn probe_bedrock(&self, request: &ProbeRequest) -> Result<BedrockStatus, Error> {
        let endpoint = self
            .resolver
            .resolve_address(&request.hostname, request.effective_port())
            .await
            .endpoint;
        let (_, status) = Bedrock {
            endpoint,
            timeout: self.config.bedrock_timeout,
            tries: self.config.bedrock_tries,
            wait_to_try: self.config.bedrock_retry_interval,
        }
        .ping()
        .await?;
        Ok(status)
    }
}

impl StatusProbe for Prober {
    fn probe(
        &self,
        request: &ProbeRequest,
    ) -> impl Future<Output = Result<ServerStatus, Error>> + Send {
        Self::probe(self, request)
    }
}

/// Where to send the query for a resolved Java endpoint.
///
/// The query answers on the port the user asked for, even when SRV moved the
/// game port elsewhere; the host and address follow the SRV target.
fn query_endpoint(resolved: &Endpoint, request: &ProbeRequest) -> Endpoint {
    Endpoint {
        port: request.effective_port(),
        ..resolved.clone()
    }
}

/// A best-effort query running beside the status probe. Aborted when dropped.
struct QueryTask(JoinHandle<Result<(u64, QueryExtras), Error>>);

impl QueryTask {
    fn spawn(query: Query) -> Self {
        Self(tokio::spawn(query.ping()))
    }

    /// Waits for the query; its own timeout bounds the wait. Failures are dropped.
    async fn join(mut self, hostname: &str) -> Option<QueryExtras> {
        match (&mut self.0).await {
            Ok(Ok((_, extras))) => Some(extras),
            Ok(Err(e)) => {
                debug!(hostname, error = %e, "query unavailable");
                None
            }
            Err(e) => {
                debug!(hostname, error = %e, "query task did not complete");
                None
            }
        }
    }
}

impl Drop for QueryTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    #[test]
    fn query_keeps_the_requested_port_behind_srv() {
        let target_ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
        let resolved = Endpoint {
            host: "node1.example.org".into(),
            resolved_ip: Some(target_ip),
            port: 25570,
        };

        let defaulted = ProbeRequest::new(Platform::Java, "example.org", None);
        let endpoint = query_endpoint(&resolved, &defaulted);
        assert_eq!(endpoint.port, 25565);
        assert_eq!(endpoint.host, "node1.example.org");
        assert_eq!(endpoint.resolved_ip, Some(target_ip));

        let explicit = ProbeRequest::new(Platform::Java, "example.org", Some(25600));
        assert_eq!(query_endpoint(&resolved, &explicit).port, 25600);
    }

    #[test]
    fn query_follows_a_plain_endpoint() {
        let resolved = Endpoint {
            host: "127.0.0.1".into(),
            resolved_ip: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port: 30000,
        };
        let request = ProbeRequest::new(Platform::Java, "127.0.0.1", Some(30000));
        assert_eq!(query_endpoint(&resolved, &request), resolved);
    }
}
