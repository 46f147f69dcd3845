//! Implementation of the legacy UDP query protocol (GameSpy 4 style).
//! [Query](https://wiki.vg/Query)
//!
//! Two round trips: a handshake that yields a challenge token, then a full
//! stat request answered with key/value pairs and the online player names.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use tokio::time::timeout;

use crate::{
    Error, dns,
    model::{Endpoint, QueryExtras},
    ping::{AsyncPingable, connect_udp, millis},
};

const MAGIC: [u8; 2] = [0xfe, 0xfd];
const TYPE_HANDSHAKE: u8 = 0x09;
const TYPE_STAT: u8 = 0x00;
/// Servers only honour the low four bits of each session id byte.
const SESSION_ID_MASK: i32 = 0x0f0f_0f0f;
/// Packet type, session id, then the constant `splitnum\0\x80\0` padding.
const STAT_HEADER_LEN: usize = 1 + 4 + 11;
/// Separates the key/value section from the player names.
const PLAYER_SECTION_MARKER: &[u8] = b"\x01player_\x00";

/// Configuration for querying a Java server's query port.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Query {
    /// The query endpoint. Its port is the query port, not the game port.
    pub endpoint: Endpoint,
    /// Bound on the whole exchange, both round trips included.
    pub timeout: Duration,
}

impl AsyncPingable for Query {
    type Response = QueryExtras;

    async fn ping(self) -> Result<(u64, QueryExtras), Error> {
        timeout(self.timeout, self.exchange()).await?
    }
}

impl Query {
    async fn exchange(&self) -> Result<(u64, QueryExtras), Error> {
        let addr = dns::socket_addr(&self.endpoint).await?;
        let socket = connect_udp(addr).await?;
        let session_id = rand::random::<i32>() & SESSION_ID_MASK;
        let mut buf = vec![0; usize::from(u16::MAX)];

        let started = Instant::now();
        socket.send(&handshake_request(session_id)).await?;
        let len = socket.recv(&mut buf).await?;
        let token = parse_challenge(&buf[..len], session_id)?;

        socket.send(&full_stat_request(session_id, token)).await?;
        let len = socket.recv(&mut buf).await?;
        let latency = millis(started.elapsed());

        let body = stat_body(&buf[..len], session_id)?;
        Ok((latency, parse_full_stat(body)))
    }
}

fn handshake_request(session_id: i32) -> Vec<u8> {
    let mut packet = Vec::with_capacity(7);
    packet.extend_from_slice(&MAGIC);
    packet.push(TYPE_HANDSHAKE);
    packet.extend_from_slice(&session_id.to_be_bytes());
    packet
}

fn full_stat_request(session_id: i32, token: u32) -> Vec<u8> {
    let mut packet = Vec::with_capacity(15);
    packet.extend_from_slice(&MAGIC);
    packet.push(TYPE_STAT);
    packet.extend_from_slice(&session_id.to_be_bytes());
    packet.extend_from_slice(&token.to_be_bytes());
    packet.extend_from_slice(&[0; 4]);
    packet
}

fn check_header(response: &[u8], kind: u8, session_id: i32) -> Result<(), Error> {
    let Some((&got, rest)) = response.split_first() else {
        return Err(Error::InvalidServerResponse("empty query response".into()));
    };
    if got != kind {
        return Err(Error::InvalidServerResponse(format!(
            "query response type {got:#04x}, expected {kind:#04x}"
        )));
    }
    let echoed = rest
        .get(..4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(i32::from_be_bytes)
        .ok_or_else(|| Error::InvalidServerResponse("query response too short".into()))?;
    if echoed != session_id {
        return Err(Error::InvalidServerResponse(
            "query response for another session".into(),
        ));
    }
    Ok(())
}

/// Reads the challenge token: signed ASCII digits, NUL-terminated, after the header.
fn parse_challenge(response: &[u8], session_id: i32) -> Result<u32, Error> {
    check_header(response, TYPE_HANDSHAKE, session_id)?;
    let digits = &response[5..];
    let (start, end) = trim_nul(digits);
    let text = std::str::from_utf8(&digits[start..end])
        .map_err(|_| Error::InvalidServerResponse("challenge token is not ASCII".into()))?;
    let token: i64 = text
        .trim()
        .parse()
        .map_err(|_| Error::InvalidServerResponse(format!("bad challenge token {text:?}")))?;
    // The token travels as its low 32 bits.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let token = token as u32;
    Ok(token)
}

fn stat_body(response: &[u8], session_id: i32) -> Result<&[u8], Error> {
    if response.len() < STAT_HEADER_LEN {
        return Err(Error::InvalidServerResponse(
            "full stat response too short".into(),
        ));
    }
    check_header(response, TYPE_STAT, session_id)?;
    Ok(&response[STAT_HEADER_LEN..])
}

/// Returns the `[start, end)` range of `buf` left after trimming NUL padding on both sides.
#[must_use]
pub(crate) fn trim_nul(buf: &[u8]) -> (usize, usize) {
    let Some(start) = buf.iter().position(|&b| b != 0) else {
        return (buf.len(), buf.len());
    };
    let end = buf.iter().rposition(|&b| b != 0).map_or(start, |i| i + 1);
    (start, end)
}

/// Splits `buf[start..end]` on NUL bytes into `[start, end)` ranges of `buf`.
///
/// Adjacent NULs yield empty runs, so empty values keep their place.
#[must_use]
pub(crate) fn split_nul(buf: &[u8], start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    if start >= end {
        return runs;
    }
    let mut run_start = start;
    for (i, &b) in buf[start..end].iter().enumerate() {
        if b == 0 {
            runs.push((run_start, start + i));
            run_start = start + i + 1;
        }
    }
    runs.push((run_start, end));
    runs
}

/// Parses a `key\0value\0...\0\0` section into a map.
///
/// Trimming the padding also strips the empty value of a final key, so a
/// trailing key without a value maps to the empty string.
#[must_use]
pub fn parse_kv_section(section: &[u8]) -> BTreeMap<String, String> {
    let (start, end) = trim_nul(section);
    let text = |(s, e): (usize, usize)| String::from_utf8_lossy(&section[s..e]).into_owned();
    split_nul(section, start, end)
        .chunks(2)
        .map(|pair| (text(pair[0]), pair.get(1).copied().map(text).unwrap_or_default()))
        .collect()
}

/// Splits a `plugins` value of the form `Brand: name version; name version`.
///
/// Returns the brand and a name → version map. Entries that are not exactly
/// two whitespace-separated tokens are skipped.
#[must_use]
pub fn parse_plugins(value: &str) -> (Option<String>, BTreeMap<String, String>) {
    let value = value.trim();
    if value.is_empty() {
        return (None, BTreeMap::new());
    }
    let Some((software, list)) = value.split_once(": ") else {
        return (Some(value.to_string()), BTreeMap::new());
    };
    let plugins = list
        .split("; ")
        .filter_map(|entry| {
            let mut tokens = entry.split_whitespace();
            match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(name), Some(version), None) => Some((name.to_string(), version.to_string())),
                _ => {
                    trace!(entry, "skipping malformed plugin entry");
                    None
                }
            }
        })
        .collect();
    (Some(software.to_string()), plugins)
}

/// Parses a full stat body (everything after the 16-byte header).
#[must_use]
pub fn parse_full_stat(body: &[u8]) -> QueryExtras {
    let (kv, players) = match find(body, PLAYER_SECTION_MARKER) {
        Some(at) => (&body[..at], &body[at + PLAYER_SECTION_MARKER.len()..]),
        None => (body, &[][..]),
    };

    let raw = parse_kv_section(kv);
    let (software, plugins) = raw
        .get("plugins")
        .map(|value| parse_plugins(value))
        .unwrap_or_default();

    let (start, end) = trim_nul(players);
    let players = split_nul(players, start, end)
        .into_iter()
        .filter(|(s, e)| s < e)
        .map(|(s, e)| String::from_utf8_lossy(&players[s..e]).into_owned())
        .collect();

    QueryExtras {
        map: raw.get("map").cloned().unwrap_or_default(),
        software,
        plugins,
        players,
        raw,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
