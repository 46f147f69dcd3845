#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
//! `craftprobe` fetches live status from Minecraft servers. It can collect
//! the MOTD, player counts and sample, version, favicon, and (when the server
//! exposes the legacy query protocol) the map and plugin list.
//!
//! Three wire protocols are spoken:
//! - the Java Edition TCP status protocol ([`Java`]),
//! - the Java Edition UDP query protocol ([`Query`]),
//! - the Bedrock Edition RakNet unconnected ping ([`Bedrock`]).
//!
//! Hostnames are resolved through `_minecraft._tcp` SRV records where they
//! exist. The main API surface is [`Prober::probe`], usually wrapped in a
//! [`CachedProber`] so identical concurrent lookups share one network probe.

#[macro_use]
extern crate tracing;

pub mod cache;
pub mod codec;
pub mod config;
pub mod dns;
pub mod model;

mod bedrock;
mod java;
mod orchestrator;
mod ping;
mod query;

pub use bedrock::{Bedrock, DEFAULT_PORT as BEDROCK_DEFAULT_PORT, OFFLINE_MESSAGE_DATA_ID};
pub use cache::{CacheKey, CachedProber, MemoryCache, StatusCache};
pub use config::{DnsUpstream, ProbeConfig};
pub use dns::{Resolution, Resolver};
pub use java::{DEFAULT_PORT as JAVA_DEFAULT_PORT, Java};
pub use model::{
    BedrockEdition, BedrockStatus, DnsRecord, Endpoint, ForgeMod, JavaStatus, Platform,
    PlayerCounts, PlayerSample, ProbeRequest, ProtocolVersion, QueryExtras, ServerStatus,
};
pub use orchestrator::{Prober, StatusProbe};
pub use ping::{AsyncPingable, get_status};
pub use query::{Query, parse_full_stat, parse_kv_section, parse_plugins};

/// Errors that can occur while probing a server.
///
/// Everything except [`Error::ResourceNotFound`] is an internal diagnostic:
/// [`Prober::probe`] logs the specific kind and reports `ResourceNotFound`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection to the server failed: {0}")]
    ConnectionFailed(#[from] std::io::Error),
    #[error("the server did not respond in time")]
    ProbeTimedOut,
    #[error("VarInt did not terminate within five bytes")]
    MalformedVarInt,
    #[error("the stream ended before the frame was complete")]
    TruncatedFrame,
    #[error("the server sent an invalid response: {0}")]
    InvalidServerResponse(String),
    #[error("could not resolve the host `{0}`")]
    HostUnreachable(String),
    #[error("no status could be obtained for the server")]
    ResourceNotFound,
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::ProbeTimedOut
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidServerResponse(format!("status JSON: {e}"))
    }
}
