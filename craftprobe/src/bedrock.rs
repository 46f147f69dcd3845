//! Implementation of the `RakNet` ping/pong protocol.
//! [Raknet: Unconnected Ping](https://wiki.vg/Raknet_Protocol#Unconnected_Ping)

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::time::timeout;

use crate::{
    Error, dns,
    model::{BedrockEdition, BedrockStatus, Endpoint, PlayerCounts},
    ping::{AsyncPingable, connect_udp, millis},
};

/// Raknets default `OFFLINE_MESSAGE_DATA_ID`.
/// See more: [Raknet: Data Types](https://wiki.vg/Raknet_Protocol#Data_types)
pub const OFFLINE_MESSAGE_DATA_ID: &[u8] = &[
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];

/// The default port of a Raknet Bedrock Server.
pub const DEFAULT_PORT: u16 = 19132;

const UNCONNECTED_PING: u8 = 0x01;
const UNCONNECTED_PONG: u8 = 0x1c;

/// Markers that open the semicolon-separated payload.
///
/// Locating the payload by its edition token skips the pong's fixed fields and
/// string length prefix. A server that sends some other edition name is not
/// recognised.
const EDITION_TOKENS: [&str; 2] = ["MCPE;", "MCEE;"];

/// Configuration for pinging a Bedrock server.
///
/// # Examples
///
/// ```
/// use craftprobe::{Bedrock, Endpoint};
/// use std::time::Duration;
///
/// let bedrock_config = Bedrock {
///     endpoint: Endpoint {
///         host: "play.nethergames.org".to_string(),
///         resolved_ip: None,
///         port: 19132,
///     },
///     timeout: Duration::from_secs(10),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Bedrock {
    pub endpoint: Endpoint,
    /// Bound on the whole exchange, retries included.
    pub timeout: Duration,
    /// The amount of times to try to send the ping packet.
    ///
    /// In case of packet loss an attempt can be made to send more than a single ping.
    pub tries: usize,
    /// The amount of time to wait in-between sending ping packets.
    pub wait_to_try: Duration,
}

impl Default for Bedrock {
    fn default() -> Self {
        Self {
            endpoint: Endpoint {
                host: String::new(),
                resolved_ip: None,
                port: DEFAULT_PORT,
            },
            timeout: Duration::from_secs(4),
            tries: 3,
            wait_to_try: Duration::from_millis(250),
        }
    }
}

impl AsyncPingable for Bedrock {
    type Response = BedrockStatus;

    async fn ping(self) -> Result<(u64, BedrockStatus), Error> {
        timeout(self.timeout, self.exchange()).await?
    }
}

impl Bedrock {
    async fn exchange(&self) -> Result<(u64, BedrockStatus), Error> {
        let addr = dns::socket_addr(&self.endpoint).await?;
        let socket = connect_udp(addr).await?;
        let mut buf = vec![0; 4096];
        let tries = self.tries.max(1);

        // A late pong may answer an earlier ping, so latency counts from the first one.
        let first_sent = Instant::now();
        let mut attempt = 0;
        let len = loop {
            attempt += 1;
            socket.send(&unconnected_ping(sent_timestamp())).await?;
            if attempt >= tries {
                break socket.recv(&mut buf).await?;
            }
            if let Ok(received) = timeout(self.wait_to_try, socket.recv(&mut buf)).await {
                break received?;
            }
            trace!(host = %self.endpoint.host, attempt, "no pong yet, pinging again");
        };
        let latency = millis(first_sent.elapsed());

        let mut status = parse_pong(&buf[..len])?;
        status.latency_ms = latency;
        Ok((latency, status))
    }
}

#[allow(clippy::cast_possible_wrap)]
fn sent_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| millis(d) as i64)
}

/// Unconnected ping: id, timestamp, offline message magic, client GUID.
fn unconnected_ping(timestamp: i64) -> Vec<u8> {
    let mut packet = Vec::with_capacity(33);
    packet.push(UNCONNECTED_PING);
    packet.extend_from_slice(&timestamp.to_be_bytes());
    packet.extend_from_slice(OFFLINE_MESSAGE_DATA_ID);
    packet.extend_from_slice(&0i64.to_be_bytes());
    packet
}

/// Validates the pong id byte and decodes the status text that follows.
fn parse_pong(packet: &[u8]) -> Result<BedrockStatus, Error> {
    match packet.first() {
        Some(&UNCONNECTED_PONG) => {}
        Some(&id) => {
            return Err(Error::InvalidServerResponse(format!(
                "expected unconnected pong, got packet {id:#04x}"
            )));
        }
        None => return Err(Error::InvalidServerResponse("empty pong".into())),
    }
    let text = String::from_utf8_lossy(&packet[1..]);
    let start = EDITION_TOKENS
        .iter()
        .filter_map(|token| text.find(*token))
        .min()
        .ok_or_else(|| Error::InvalidServerResponse("pong carries no edition marker".into()))?;
    extract(text[start..].trim()).ok_or_else(|| {
        Error::InvalidServerResponse("pong payload is missing the MOTD".into())
    })
}

/// Extracts information from the semicolon-separated payload.
///
/// Edition (MCPE or MCEE for Education Edition)
/// MOTD line 1
/// Protocol Version
/// Version Name
/// Player Count
/// Max Player Count
/// Server Unique ID
/// MOTD line 2
/// Game mode
/// Game mode (numeric)
/// Port (IPv4)
/// Port (IPv6)
///
/// Edition and the first MOTD line are required; anything after may be
/// missing and defaults to empty or zero.
fn extract(payload: &str) -> Option<BedrockStatus> {
    let mut parts = payload.split(';');
    let edition = BedrockEdition::from(parts.next()?);
    let motd = parts.next()?.to_string();

    let mut next = || parts.next().unwrap_or_default();
    let protocol = next().parse().unwrap_or_default();
    let version = next().to_string();
    let online = next().parse().unwrap_or_default();
    let max = next().parse().unwrap_or_default();
    let server_id = next().to_string();
    let world_name = next().to_string();
    let game_mode = next().to_string();
    let game_mode_id = next().parse().unwrap_or_default();
    let port_v4 = next().parse().ok();
    let port_v6 = next().parse().ok();

    Some(BedrockStatus {
        edition,
        motd,
        protocol,
        version,
        players: PlayerCounts {
            online,
            max,
            sample: Vec::new(),
        },
        server_id,
        world_name,
        game_mode,
        game_mode_id,
        port_v4,
        port_v6,
        latency_ms: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong(payload: &str) -> Vec<u8> {
        let mut packet = vec![UNCONNECTED_PONG];
        packet.extend_from_slice(&1_700_000_000_000i64.to_be_bytes());
        packet.extend_from_slice(&0x1234_5678_9abc_def0_u64.to_be_bytes());
        packet.extend_from_slice(OFFLINE_MESSAGE_DATA_ID);
        packet.extend_from_slice(&u16::try_from(payload.len()).unwrap().to_be_bytes());
        packet.extend_from_slice(payload.as_bytes());
        packet
    }

    #[test]
    fn extracts_every_field() {
        let status = parse_pong(&pong(
            "MCPE;Hello World;762;1.20.50;5;20;12345;World;Survival;1;19132;19133;",
        ))
        .unwrap();
        assert_eq!(status.edition, BedrockEdition::PocketEdition);
        assert_eq!(status.motd, "Hello World");
        assert_eq!(status.protocol, 762);
        assert_eq!(status.version, "1.20.50");
        assert_eq!(status.players.online, 5);
        assert_eq!(status.players.max, 20);
        assert_eq!(status.server_id, "12345");
        assert_eq!(status.world_name, "World");
        assert_eq!(status.game_mode, "Survival");
        assert_eq!(status.game_mode_id, 1);
        assert_eq!(status.port_v4, Some(19132));
        assert_eq!(status.port_v6, Some(19133));
    }

    #[test]
    fn finds_payload_after_leading_bytes() {
        let text = "\u{7}junkMCPE;Hello World;762;1.20.50;5;20;12345;World;Survival;1;19132;19133";
        let status = parse_pong(&pong(text)).unwrap();
        assert_eq!(status.motd, "Hello World");
        assert_eq!(status.players.online, 5);
    }

    #[test]
    fn trailing_fields_default() {
        let status = parse_pong(&pong("MCEE;Classroom;560;1.19.0")).unwrap();
        assert_eq!(status.edition, BedrockEdition::EducationEdition);
        assert_eq!(status.motd, "Classroom");
        assert_eq!(status.protocol, 560);
        assert_eq!(status.players, PlayerCounts::default());
        assert_eq!(status.server_id, "");
        assert_eq!(status.port_v4, None);
    }

    #[test]
    fn rejects_wrong_packet_and_missing_marker() {
        let mut wrong_id = pong("MCPE;x;1;1;1;1");
        wrong_id[0] = 0x1d;
        assert!(matches!(
            parse_pong(&wrong_id),
            Err(Error::InvalidServerResponse(_))
        ));
        assert!(matches!(
            parse_pong(&pong("nothing here")),
            Err(Error::InvalidServerResponse(_))
        ));
        assert!(matches!(parse_pong(&[]), Err(Error::InvalidServerResponse(_))));
    }

    #[test]
    fn ping_layout() {
        let packet = unconnected_ping(5);
        assert_eq!(packet.len(), 33);
        assert_eq!(packet[0], UNCONNECTED_PING);
        assert_eq!(&packet[1..9], &5i64.to_be_bytes());
        assert_eq!(&packet[9..25], OFFLINE_MESSAGE_DATA_ID);
        assert_eq!(&packet[25..], &[0; 8]);
    }
}
