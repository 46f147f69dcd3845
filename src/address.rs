use std::net::{IpAddr, Ipv6Addr};

use craftprobe::{Platform, ProbeRequest};

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("`{0}` is not a valid hostname")]
    BadHostname(String),
    #[error("`{0}` is not a valid port")]
    BadPort(String),
}

/// Parses `host`, `host:port`, `[v6]` or `[v6]:port` into a request for `platform`.
pub fn parse(platform: Platform, address: &str) -> Result<ProbeRequest, AddressError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(AddressError::Empty);
    }
    let (host, port) = split_host_port(address)?;
    let port = port.map(parse_port).transpose()?;

    if host.parse::<IpAddr>().is_err() && !is_hostname(host) {
        return Err(AddressError::BadHostname(host.to_string()));
    }
    Ok(ProbeRequest::new(platform, host, port))
}

fn split_host_port(address: &str) -> Result<(&str, Option<&str>), AddressError> {
    if let Some(rest) = address.strip_prefix('[') {
        let bad = || AddressError::BadHostname(address.to_string());
        let (host, rest) = rest.split_once(']').ok_or_else(bad)?;
        host.parse::<Ipv6Addr>().map_err(|_| bad())?;
        return match rest {
            "" => Ok((host, None)),
            _ => Ok((host, Some(rest.strip_prefix(':').ok_or_else(bad)?))),
        };
    }
    // A bare IPv6 literal has several colons and no port.
    if address.parse::<Ipv6Addr>().is_ok() {
        return Ok((address, None));
    }
    Ok(match address.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (address, None),
    })
}

fn parse_port(port: &str) -> Result<u16, AddressError> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(AddressError::BadPort(port.to_string())),
        Ok(port) => Ok(port),
    }
}

fn is_hostname(host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    !host.is_empty()
        && host.len() <= MAX_HOSTNAME_LEN
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= MAX_LABEL_LEN
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        })
}
