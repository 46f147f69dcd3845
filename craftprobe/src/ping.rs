use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use tokio::net::UdpSocket;

use crate::Error;

/// Represents a pingable entity.
pub trait AsyncPingable {
    /// The type of response that is expected in reply to the ping.
    type Response;

    /// Ping the entity, gathering the latency and response.
    fn ping(self)
    -> impl std::future::Future<Output = Result<(u64, Self::Response), Error>> + Send;
}

/// Retrieve the status of a single protocol endpoint using an `AsyncPingable` configuration.
///
/// Returns `(latency_ms, response)`. No DNS is performed beyond what the
/// configuration's endpoint requires; use [`crate::Prober`] for full lookups.
///
/// # Examples
///
/// ```no_run
/// # async {
/// use std::time::Duration;
/// use craftprobe::{Endpoint, Java};
///
/// let (latency, status) = craftprobe::get_status(Java {
///     endpoint: Endpoint {
///         host: "127.0.0.1".into(),
///         resolved_ip: Some([127, 0, 0, 1].into()),
///         port: 25565,
///     },
///     timeout: Duration::from_secs(3),
/// }).await?;
/// # Ok::<(), craftprobe::Error>(())
/// # };
/// ```
///
/// # Errors
/// If the server status cannot be received
pub async fn get_status<P: AsyncPingable + Send>(pingable: P) -> Result<(u64, P::Response), Error> {
    pingable.ping().await
}

/// Binds an ephemeral UDP socket of the right family and connects it to `addr`,
/// so only datagrams from the target are received.
pub(crate) async fn connect_udp(addr: SocketAddr) -> Result<UdpSocket, Error> {
    let local = match addr {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await?;
    Ok(socket)
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
