//! SOCKS5 Protocol Types

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::protocol::constants::*;

/// Target address forms supported by SOCKS5.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl TargetAddr {
    /// ATYP code for this address.
    pub fn address_type(&self) -> u8 {
        match self {
            TargetAddr::Ipv4(_) => SOCKS5_ATYP_IPV4,
            TargetAddr::Ipv6(_) => SOCKS5_ATYP_IPV6,
            TargetAddr::Domain(_) => SOCKS5_ATYP_DOMAIN,
        }
    }

    /// Create from a socket address (port carried separately).
    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => TargetAddr::Ipv4(*v4.ip()),
            SocketAddr::V6(v6) => TargetAddr::Ipv6(*v6.ip()),
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(ip) => ip.fmt(f),
            TargetAddr::Ipv6(ip) => ip.fmt(f),
            TargetAddr::Domain(domain) => domain.fmt(f),
        }
    }
}

/// Parsed SOCKS5 command request. Constructed fresh per parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socks5Request {
    pub command: u8,
    pub addr: TargetAddr,
    pub port: u16,
}

/// SOCKS5 reply to a command request.
#[derive(Debug, Clone)]
pub struct Socks5Reply {
    pub reply_code: u8,
    pub bind_addr: TargetAddr,
    pub bind_port: u16,
}

impl Socks5Reply {
    /// Success reply advertising the given bound address.
    pub fn success(bind_addr: TargetAddr, bind_port: u16) -> Self {
        Self {
            reply_code: SOCKS5_REPLY_SUCCESS,
            bind_addr,
            bind_port,
        }
    }

    /// Error reply with a zeroed IPv4 bind address.
    pub fn error(reply_code: u8) -> Self {
        Self {
            reply_code,
            bind_addr: TargetAddr::Ipv4(Ipv4Addr::UNSPECIFIED),
            bind_port: 0,
        }
    }
}
