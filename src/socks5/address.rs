//! The SOCKS5 address block (RFC 1928 `ATYP`/`DST.ADDR`/`DST.PORT`), carried
//! verbatim as the first application bytes on every upstream tunnel.

use crate::util::{BridgeError, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// The exact byte block a SOCKS5 client sends to name its destination:
/// `ATYP || ADDR || PORT`. Forwarded unmodified to the upstream tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    raw: Vec<u8>,
    display: String,
}

impl TargetAddress {
    pub fn from_ipv4(ip: Ipv4Addr, port: u16) -> Self {
        let mut raw = Vec::with_capacity(7);
        raw.push(ATYP_IPV4);
        raw.extend_from_slice(&ip.octets());
        raw.extend_from_slice(&port.to_be_bytes());
        Self {
            raw,
            display: format!("{ip}:{port}"),
        }
    }

    pub fn from_ipv6(ip: Ipv6Addr, port: u16) -> Self {
        let mut raw = Vec::with_capacity(19);
        raw.push(ATYP_IPV6);
        raw.extend_from_slice(&ip.octets());
        raw.extend_from_slice(&port.to_be_bytes());
        Self {
            raw,
            display: format!("[{ip}]:{port}"),
        }
    }

    pub fn from_domain(domain: &str, port: u16) -> Result<Self> {
        let bytes = domain.as_bytes();
        if bytes.is_empty() || bytes.len() > 255 {
            return Err(BridgeError::Protocol("domain name too long".into()));
        }
        let mut raw = Vec::with_capacity(2 + bytes.len() + 2);
        raw.push(ATYP_DOMAIN);
        raw.push(bytes.len() as u8);
        raw.extend_from_slice(bytes);
        raw.extend_from_slice(&port.to_be_bytes());
        Ok(Self {
            raw,
            display: format!("{domain}:{port}"),
        })
    }

    /// Build the address block for a host that may be a literal IP or a
    /// domain name, as the HTTP front-end must when it only has a string
    /// host from a `Host:` header or `CONNECT` target.
    pub fn from_host(host: &str, port: u16) -> Result<Self> {
        let trimmed = host.trim_matches(['[', ']']);
        if let Ok(ip) = trimmed.parse::<IpAddr>() {
            return Ok(match ip {
                IpAddr::V4(v4) => Self::from_ipv4(v4, port),
                IpAddr::V6(v6) => Self::from_ipv6(v6, port),
            });
        }
        Self::from_domain(host, port)
    }

    /// Parse an address block already fully buffered in memory (the
    /// `ATYP..PORT` slice a SOCKS5 request carries), e.g. once the front-end
    /// has read the request's computed total length in one shot.
    pub async fn from_raw_block(block: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(block);
        Self::read_from(&mut cursor).await
    }

    /// Read one address block from an async source, returning the parsed
    /// block. Errors with [`BridgeError::UnsupportedAddrType`] on an
    /// unrecognized type byte.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut atyp_buf = [0u8; 1];
        reader.read_exact(&mut atyp_buf).await?;
        let atyp = atyp_buf[0];

        match atyp {
            ATYP_IPV4 => {
                let mut body = [0u8; 6];
                reader.read_exact(&mut body).await?;
                let ip = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
                let port = u16::from_be_bytes([body[4], body[5]]);
                Ok(Self::from_ipv4(ip, port))
            }
            ATYP_IPV6 => {
                let mut body = [0u8; 18];
                reader.read_exact(&mut body).await?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&body[..16]);
                let ip = Ipv6Addr::from(octets);
                let port = u16::from_be_bytes([body[16], body[17]]);
                Ok(Self::from_ipv6(ip, port))
            }
            ATYP_DOMAIN => {
                let mut len_buf = [0u8; 1];
                reader.read_exact(&mut len_buf).await?;
                let len = len_buf[0] as usize;
                if len == 0 {
                    return Err(BridgeError::Protocol("empty domain name".into()));
                }
                let mut rest = vec![0u8; len + 2];
                reader.read_exact(&mut rest).await?;
                let domain = std::str::from_utf8(&rest[..len])
                    .map_err(|e| BridgeError::Protocol(format!("invalid domain name: {e}")))?;
                let port = u16::from_be_bytes([rest[len], rest[len + 1]]);
                Self::from_domain(domain, port)
            }
            other => Err(BridgeError::UnsupportedAddrType(other)),
        }
    }

    /// The exact bytes to forward as the upstream's first application data.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// A human-readable `host:port` rendering for logs.
    pub fn display(&self) -> &str {
        &self.display
    }
}
