//! SOCKS5 Protocol
//!
//! Header codec and value types for the RFC 1928 subset the relay speaks.

pub mod codec;
pub mod constants;
pub mod types;

pub use codec::{pack_response, parse_header};
pub use constants::*;
pub use types::{Socks5Reply, Socks5Request, TargetAddr};
