//! SOCKS5 Header Codec
//!
//! Buffer-level parsing and packing, separate from any socket I/O: the
//! relay reads whatever one segment carries and hands the bytes here.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::protocol::constants::*;
use crate::protocol::types::{Socks5Reply, Socks5Request, TargetAddr};

/// Parse a SOCKS5 command header from the start of `buf`.
///
/// Returns the request and the number of bytes it occupies, or `None` if
/// the version or reserved byte is wrong, the address type is unknown, or
/// the buffer is shorter than the address-type-dependent minimum (10 for
/// IPv4, 22 for IPv6, `5 + domain_length + 2` for domain names).
pub fn parse_header(buf: &[u8]) -> Option<(Socks5Request, usize)> {
    if buf.len() < 5 {
        return None;
    }
    if buf[0] != SOCKS5_VERSION || buf[2] != SOCKS5_RESERVED {
        return None;
    }

    let command = buf[1];
    match buf[3] {
        SOCKS5_ATYP_IPV4 => {
            if buf.len() < 10 {
                return None;
            }
            let octets: [u8; 4] = buf[4..8].try_into().ok()?;
            let port = u16::from_be_bytes([buf[8], buf[9]]);
            Some((
                Socks5Request {
                    command,
                    addr: TargetAddr::Ipv4(Ipv4Addr::from(octets)),
                    port,
                },
                10,
            ))
        }
        SOCKS5_ATYP_IPV6 => {
            if buf.len() < 22 {
                return None;
            }
            let octets: [u8; 16] = buf[4..20].try_into().ok()?;
            let port = u16::from_be_bytes([buf[20], buf[21]]);
            Some((
                Socks5Request {
                    command,
                    addr: TargetAddr::Ipv6(Ipv6Addr::from(octets)),
                    port,
                },
                22,
            ))
        }
        SOCKS5_ATYP_DOMAIN => {
            let domain_len = buf[4] as usize;
            let total = 5 + domain_len + 2;
            if buf.len() < total {
                return None;
            }
            let domain = String::from_utf8(buf[5..5 + domain_len].to_vec()).ok()?;
            let port = u16::from_be_bytes([buf[5 + domain_len], buf[6 + domain_len]]);
            Some((
                Socks5Request {
                    command,
                    addr: TargetAddr::Domain(domain),
                    port,
                },
                total,
            ))
        }
        _ => None,
    }
}

/// Render a SOCKS5 reply: version, reply code, reserved, address type,
/// the address bytes and a big-endian port.
pub fn pack_response(reply: &Socks5Reply) -> Vec<u8> {
    let mut resp = Vec::with_capacity(22);
    resp.push(SOCKS5_VERSION);
    resp.push(reply.reply_code);
    resp.push(SOCKS5_RESERVED);
    resp.push(reply.bind_addr.address_type());

    match &reply.bind_addr {
        TargetAddr::Ipv4(ip) => resp.extend_from_slice(&ip.octets()),
        TargetAddr::Ipv6(ip) => resp.extend_from_slice(&ip.octets()),
        TargetAddr::Domain(domain) => {
            resp.push(domain.len() as u8);
            resp.extend_from_slice(domain.as_bytes());
        }
    }

    resp.extend_from_slice(&reply.bind_port.to_be_bytes());
    resp
}
