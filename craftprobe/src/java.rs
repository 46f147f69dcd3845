//! Implementation of the Java Minecraft status protocol.
//! [Server List Ping](https://wiki.vg/Server_List_Ping)

use std::{
    net::SocketAddr,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use serde::Deserialize;
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    time::{self, timeout, timeout_at},
};

use crate::{
    Error,
    codec::{decode_string, decode_varint, read_frame, write_frame, write_string, write_varint},
    dns,
    model::{Endpoint, ForgeMod, JavaStatus, PlayerCounts, PlayerSample, ProtocolVersion},
    ping::{AsyncPingable, millis},
};

/// The default port of a Java server.
pub const DEFAULT_PORT: u16 = 25565;

/// Status queries are accepted regardless of the client's protocol version.
const HANDSHAKE_PROTOCOL_VERSION: i32 = -1;
const NEXT_STATE_STATUS: i32 = 1;
/// Longest wait for the optional pong once the status is in hand.
const PONG_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for pinging a Java server.
///
/// # Examples
///
/// ```
/// use craftprobe::{Endpoint, Java};
/// use std::time::Duration;
///
/// let java_config = Java {
///     endpoint: Endpoint {
///         host: "mc.hypixel.net".to_string(),
///         resolved_ip: None,
///         port: 25565,
///     },
///     timeout: Duration::from_secs(4),
/// };
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Java {
    /// Where to connect. `host` is also sent in the handshake.
    pub endpoint: Endpoint,
    /// Bound on the connect and on every read and write.
    pub timeout: Duration,
}

impl AsyncPingable for Java {
    type Response = JavaStatus;

    async fn ping(self) -> Result<(u64, JavaStatus), Error> {
        self.exchange(None).await
    }
}

impl Java {
    /// Pings like [`AsyncPingable::ping`], but stops waiting for the optional
    /// pong at `deadline`. The status is kept and the latency falls back to the
    /// status round trip.
    ///
    /// # Errors
    /// If the status cannot be received.
    pub async fn ping_before(self, deadline: time::Instant) -> Result<(u64, JavaStatus), Error> {
        self.exchange(Some(deadline)).await
    }

    async fn exchange(&self, deadline: Option<time::Instant>) -> Result<(u64, JavaStatus), Error> {
        let addr = timeout(self.timeout, dns::socket_addr(&self.endpoint)).await??;
        let mut conn = Connection::connect(addr, self.timeout).await?;

        conn.send_packet(Serverbound::Handshake {
            version: HANDSHAKE_PROTOCOL_VERSION,
            host: &self.endpoint.host,
            port: self.endpoint.port,
            next_state: NEXT_STATE_STATUS,
        })
        .await?;

        let requested = Instant::now();
        conn.send_packet(Serverbound::StatusRequest).await?;
        let Clientbound::StatusResponse { json } = conn.read_packet().await? else {
            return Err(Error::InvalidServerResponse(
                "expected a status response".into(),
            ));
        };
        let status_rtt = requested.elapsed();

        let mut status = parse_status(&json)?;
        let pong_by = time::Instant::now() + self.timeout.min(PONG_TIMEOUT);
        let pong_by = deadline.map_or(pong_by, |deadline| deadline.min(pong_by));
        status.latency_ms = match timeout_at(pong_by, conn.measure_latency()).await {
            Ok(Ok(latency)) => latency,
            Ok(Err(e)) => {
                debug!(host = %self.endpoint.host, error = %e, "no pong, using status round trip");
                millis(status_rtt)
            }
            Err(_) => {
                debug!(host = %self.endpoint.host, "pong too late, using status round trip");
                millis(status_rtt)
            }
        };
        Ok((status.latency_ms, status))
    }
}

/// Packets the client sends.
#[derive(Debug)]
enum Serverbound<'a> {
    Handshake {
        version: i32,
        host: &'a str,
        port: u16,
        next_state: i32,
    },
    StatusRequest,
    Ping {
        payload: u64,
    },
}

impl Serverbound<'_> {
    fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            Self::Handshake {
                version,
                host,
                port,
                next_state,
            } => {
                write_varint(&mut body, 0x00);
                write_varint(&mut body, *version);
                write_string(&mut body, host);
                body.extend_from_slice(&port.to_be_bytes());
                write_varint(&mut body, *next_state);
            }
            Self::StatusRequest => write_varint(&mut body, 0x00),
            Self::Ping { payload } => {
                write_varint(&mut body, 0x01);
                body.extend_from_slice(&payload.to_be_bytes());
            }
        }
        let mut frame = Vec::with_capacity(body.len() + 5);
        write_frame(&mut frame, &body);
        frame
    }
}

/// Packets the server sends.
#[derive(Debug)]
enum Clientbound {
    StatusResponse { json: String },
    Pong { payload: u64 },
}

impl Clientbound {
    fn decode(frame: &[u8]) -> Result<Self, Error> {
        let mut body = frame;
        match decode_varint(&mut body)? {
            0x00 => Ok(Self::StatusResponse {
                json: decode_string(&mut body)?,
            }),
            0x01 => {
                let bytes: [u8; 8] = body
                    .get(..8)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(Error::TruncatedFrame)?;
                Ok(Self::Pong {
                    payload: u64::from_be_bytes(bytes),
                })
            }
            id => Err(Error::InvalidServerResponse(format!(
                "unexpected packet id {id:#04x}"
            ))),
        }
    }
}

/// One status connection. The socket closes when this is dropped, on every path.
struct Connection {
    stream: TcpStream,
    timeout: Duration,
}

impl Connection {
    async fn connect(addr: SocketAddr, limit: Duration) -> Result<Self, Error> {
        let stream = timeout(limit, TcpStream::connect(addr)).await??;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            timeout: limit,
        })
    }

    async fn send_packet(&mut self, packet: Serverbound<'_>) -> Result<(), Error> {
        let frame = packet.encode();
        timeout(self.timeout, self.stream.write_all(&frame)).await??;
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Clientbound, Error> {
        let frame = timeout(self.timeout, read_frame(&mut self.stream)).await??;
        Clientbound::decode(&frame)
    }

    /// Sends a ping and waits for the echo, returning the round trip in milliseconds.
    async fn measure_latency(&mut self) -> Result<u64, Error> {
        let payload = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, millis);
        let sent = Instant::now();
        self.send_packet(Serverbound::Ping { payload }).await?;
        match self.read_packet().await? {
            Clientbound::Pong { payload: echoed } if echoed == payload => Ok(millis(sent.elapsed())),
            Clientbound::Pong { .. } => Err(Error::InvalidServerResponse(
                "pong payload does not match ping".into(),
            )),
            Clientbound::StatusResponse { .. } => Err(Error::InvalidServerResponse(
                "expected a pong".into(),
            )),
        }
    }
}

/// The status response as servers send it.
#[derive(Deserialize)]
struct RawStatus {
    version: RawVersion,
    players: RawPlayers,
    #[serde(default)]
    description: Option<Chat>,
    favicon: Option<String>,
    modinfo: Option<ModInfo>,
    #[serde(rename = "enforcesSecureChat")]
    enforces_secure_chat: Option<bool>,
}

#[derive(Deserialize)]
struct RawVersion {
    name: String,
    protocol: i32,
}

#[derive(Deserialize)]
struct RawPlayers {
    max: i64,
    online: i64,
    sample: Option<Vec<RawPlayer>>,
}

#[derive(Deserialize)]
struct RawPlayer {
    name: String,
    id: String,
}

#[derive(Deserialize)]
struct ModInfo {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "modList", default)]
    mod_list: Vec<ForgeModMetadata>,
}

#[derive(Deserialize)]
struct ForgeModMetadata {
    modid: String,
    version: String,
}

/// A chat component, reduced to its text.
#[derive(Deserialize)]
#[serde(untagged)]
enum Chat {
    String(String),
    List(Vec<Chat>),
    Component {
        #[serde(default)]
        text: String,
        #[serde(default)]
        extra: Vec<Chat>,
    },
}

impl Chat {
    fn write_text(&self, out: &mut String) {
        match self {
            Self::String(s) => out.push_str(s),
            Self::List(parts) => parts.iter().for_each(|part| part.write_text(out)),
            Self::Component { text, extra } => {
                out.push_str(text);
                extra.iter().for_each(|part| part.write_text(out));
            }
        }
    }
}

/// Decodes the status JSON. `version` and `players` are mandatory; latency is left at zero.
fn parse_status(json: &str) -> Result<JavaStatus, Error> {
    let raw: RawStatus = serde_json::from_str(json)?;

    let mut motd = String::new();
    if let Some(description) = &raw.description {
        description.write_text(&mut motd);
    }

    let mods = raw
        .modinfo
        .filter(|info| info.kind == "FML")
        .map(|info| {
            info.mod_list
                .into_iter()
                .map(|m| ForgeMod {
                    id: m.modid,
                    version: m.version,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(JavaStatus {
        motd,
        favicon: raw.favicon,
        version: ProtocolVersion {
            name: raw.version.name,
            protocol: raw.version.protocol,
        },
        players: PlayerCounts {
            online: raw.players.online,
            max: raw.players.max,
            sample: raw
                .players
                .sample
                .unwrap_or_default()
                .into_iter()
                .map(|p| PlayerSample {
                    name: p.name,
                    id: p.id,
                })
                .collect(),
        },
        enforces_secure_chat: raw.enforces_secure_chat,
        mods,
        latency_ms: 0,
        query: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_encoding() {
        let frame = Serverbound::Handshake {
            version: -1,
            host: "localhost",
            port: 25565,
            next_state: 1,
        }
        .encode();
        let mut expected = vec![0x00, 0xff, 0xff, 0xff, 0xff, 0x0f, 9];
        expected.extend_from_slice(b"localhost");
        expected.extend_from_slice(&[0x63, 0xdd, 0x01]);
        let mut framed = vec![u8::try_from(expected.len()).unwrap()];
        framed.extend(expected);
        assert_eq!(frame, framed);
    }

    #[test]
    fn status_request_is_a_bare_packet_id() {
        assert_eq!(Serverbound::StatusRequest.encode(), [0x01, 0x00]);
    }

    #[test]
    fn decodes_pong() {
        let mut frame = vec![0x01];
        frame.extend_from_slice(&42u64.to_be_bytes());
        assert!(matches!(
            Clientbound::decode(&frame),
            Ok(Clientbound::Pong { payload: 42 })
        ));
        assert!(matches!(
            Clientbound::decode(&[0x01, 0, 0]),
            Err(Error::TruncatedFrame)
        ));
        assert!(matches!(
            Clientbound::decode(&[0x05]),
            Err(Error::InvalidServerResponse(_))
        ));
    }

    #[test]
    fn parses_full_status() {
        let status = parse_status(
            r#"{
                "version": {"name": "Paper 1.20.4", "protocol": 765},
                "players": {"max": 100, "online": 2, "sample": [
                    {"name": "alice", "id": "4566e69f-c907-48ee-8d71-d7ba5aa00d20"}
                ]},
                "description": {"text": "Hello ", "extra": [{"text": "World"}, "!"]},
                "favicon": "data:image/png;base64,AAAA",
                "enforcesSecureChat": true
            }"#,
        )
        .unwrap();
        assert_eq!(status.motd, "Hello World!");
        assert_eq!(status.version.protocol, 765);
        assert_eq!(status.players.online, 2);
        assert_eq!(status.players.max, 100);
        assert_eq!(status.players.sample[0].name, "alice");
        assert_eq!(status.favicon.as_deref(), Some("data:image/png;base64,AAAA"));
        assert_eq!(status.enforces_secure_chat, Some(true));
        assert!(status.query.is_none());
    }

    #[test]
    fn plain_string_description_and_forge_mods() {
        let status = parse_status(
            r#"{
                "version": {"name": "1.12.2", "protocol": 340},
                "players": {"max": 20, "online": 0},
                "description": "A Forge server",
                "modinfo": {"type": "FML", "modList": [{"modid": "forge", "version": "14.23"}]}
            }"#,
        )
        .unwrap();
        assert_eq!(status.motd, "A Forge server");
        assert_eq!(
            status.mods,
            [ForgeMod {
                id: "forge".into(),
                version: "14.23".into()
            }]
        );
        assert!(status.players.sample.is_empty());
    }

    #[test]
    fn missing_description_is_empty_motd() {
        let status = parse_status(
            r#"{"version": {"name": "x", "protocol": 1}, "players": {"max": 1, "online": 0}}"#,
        )
        .unwrap();
        assert_eq!(status.motd, "");
    }

    #[test]
    fn malformed_json_is_invalid_response() {
        assert!(matches!(
            parse_status("{\"version\": "),
            Err(Error::InvalidServerResponse(_))
        ));
        assert!(matches!(
            parse_status(r#"{"players": {"max": 1, "online": 0}}"#),
            Err(Error::InvalidServerResponse(_))
        ));
    }
}
