//! Protocol-agnostic values produced by DNS resolution and the probers.
//!
//! All of these are immutable snapshots once returned, safe to share and cache.

use std::{collections::BTreeMap, fmt, net::IpAddr};

use serde::{Serialize, Serializer};

/// The edition of Minecraft a server speaks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Java,
    Bedrock,
}

impl Platform {
    /// The port a server of this platform listens on when none is given.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Java => crate::java::DEFAULT_PORT,
            Self::Bedrock => crate::bedrock::DEFAULT_PORT,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Java => f.write_str("java"),
            Self::Bedrock => f.write_str("bedrock"),
        }
    }
}

/// One inbound lookup. Hostname and port are expected to be validated by the caller.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ProbeRequest {
    pub platform: Platform,
    pub hostname: String,
    pub port: Option<u16>,
}

impl ProbeRequest {
    #[must_use]
    pub fn new(platform: Platform, hostname: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            platform,
            hostname: hostname.into(),
            port,
        }
    }

    /// The requested port, or the platform default.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.platform.default_port())
    }
}

/// Where a server was found to live.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub resolved_ip: Option<IpAddr>,
    pub port: u16,
}

/// A DNS record seen while resolving an endpoint.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum DnsRecord {
    A {
        name: String,
        ttl: u32,
        address: std::net::Ipv4Addr,
    },
    Srv {
        name: String,
        ttl: u32,
        priority: u16,
        weight: u16,
        port: u16,
        /// Never carries the trailing root dot.
        target: String,
    },
}

impl DnsRecord {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::A { name, .. } | Self::Srv { name, .. } => name,
        }
    }

    #[must_use]
    pub const fn ttl(&self) -> u32 {
        match self {
            Self::A { ttl, .. } | Self::Srv { ttl, .. } => *ttl,
        }
    }
}

/// Information about the server's version
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ProtocolVersion {
    /// The version name, in practice a free-form string.
    pub name: String,
    /// See [Protocol Version Numbers](https://wiki.vg/Protocol_version_numbers)
    pub protocol: i32,
}

/// An online player of the server.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PlayerSample {
    pub name: String,
    pub id: String,
}

/// The stats for players on the server.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PlayerCounts {
    pub online: i64,
    pub max: i64,
    /// In practice servers often don't send this or use it for advertising.
    pub sample: Vec<PlayerSample>,
}

/// A Forge mod advertised in the status response.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ForgeMod {
    pub id: String,
    pub version: String,
}

/// Extra metadata from the UDP query protocol.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct QueryExtras {
    pub map: String,
    /// The server brand in front of the plugin list (e.g. `CraftBukkit on Bukkit 1.20`).
    pub software: Option<String>,
    pub plugins: BTreeMap<String, String>,
    pub players: Vec<String>,
    /// Every key/value pair the server sent.
    pub raw: BTreeMap<String, String>,
}

/// Status of a Java Edition server.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct JavaStatus {
    pub motd: String,
    /// The server icon, a `data:image/png;base64,` URI.
    pub favicon: Option<String>,
    pub version: ProtocolVersion,
    pub players: PlayerCounts,
    pub enforces_secure_chat: Option<bool>,
    pub mods: Vec<ForgeMod>,
    pub latency_ms: u64,
    /// Only present when the query protocol answered in time.
    pub query: Option<QueryExtras>,
}

/// Represents the edition of a bedrock server.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum BedrockEdition {
    PocketEdition,
    EducationEdition,
    /// An unknown edition string.
    Other(String),
}

impl fmt::Display for BedrockEdition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PocketEdition => f.write_str("MCPE"),
            Self::EducationEdition => f.write_str("MCEE"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

impl From<&str> for BedrockEdition {
    fn from(edition: &str) -> Self {
        match edition.to_ascii_lowercase().as_str() {
            "mcpe" => Self::PocketEdition,
            "mcee" => Self::EducationEdition,
            _ => Self::Other(edition.to_string()),
        }
    }
}

impl Serialize for BedrockEdition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Status of a Bedrock Edition server, from the unconnected pong.
///
/// See More: [Raknet: Unconnected Pong](https://wiki.vg/Raknet_Protocol#Unconnected_Pong)
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BedrockStatus {
    pub edition: BedrockEdition,
    /// The first MOTD line, the only one clients display.
    pub motd: String,
    pub protocol: i32,
    pub version: String,
    pub players: PlayerCounts,
    pub server_id: String,
    /// The second MOTD line. Often the world name or the server software.
    pub world_name: String,
    pub game_mode: String,
    pub game_mode_id: i64,
    pub port_v4: Option<u16>,
    pub port_v6: Option<u16>,
    pub latency_ms: u64,
}

/// A decoded server status, by platform.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum ServerStatus {
    Java(JavaStatus),
    Bedrock(BedrockStatus),
}

impl ServerStatus {
    #[must_use]
    pub const fn platform(&self) -> Platform {
        match self {
            Self::Java(_) => Platform::Java,
            Self::Bedrock(_) => Platform::Bedrock,
        }
    }

    #[must_use]
    pub fn motd(&self) -> &str {
        match self {
            Self::Java(java) => &java.motd,
            Self::Bedrock(bedrock) => &bedrock.motd,
        }
    }

    #[must_use]
    pub const fn players(&self) -> &PlayerCounts {
        match self {
            Self::Java(java) => &java.players,
            Self::Bedrock(bedrock) => &bedrock.players,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_port_defaults_per_platform() {
        assert_eq!(
            ProbeRequest::new(Platform::Java, "a.example", None).effective_port(),
            25565
        );
        assert_eq!(
            ProbeRequest::new(Platform::Bedrock, "a.example", None).effective_port(),
            19132
        );
        assert_eq!(
            ProbeRequest::new(Platform::Bedrock, "a.example", Some(1)).effective_port(),
            1
        );
    }

    #[test]
    fn edition_from_token() {
        assert_eq!(BedrockEdition::from("MCPE"), BedrockEdition::PocketEdition);
        assert_eq!(BedrockEdition::from("mcee"), BedrockEdition::EducationEdition);
        assert_eq!(
            BedrockEdition::from("Other"),
            BedrockEdition::Other("Other".into())
        );
    }

    #[test]
    fn status_serializes_with_platform_tag() {
        let status = ServerStatus::Java(JavaStatus {
            motd: "hi".into(),
            favicon: None,
            version: ProtocolVersion {
                name: "1.21".into(),
                protocol: 767,
            },
            players: PlayerCounts::default(),
            enforces_secure_chat: None,
            mods: Vec::new(),
            latency_ms: 3,
            query: None,
        });
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["platform"], "java");
        assert_eq!(json["version"]["protocol"], 767);
    }
}
