//! Network address codec.
//!
//! An address is a nested tag stream of exactly three fields, in order:
//! ```text
//! ADDR_TYPE (1 byte ordinal) │ ADDR_BITS (1 byte) │ ADDR_PAYLOAD (6 | 4 | 16 bytes)
//! ```
//! Only the bytes of the actual variant go on the wire, so an IPv4 address
//! does not pay for IPv6 storage.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::Bytes;

use super::stream::{Tag, TagReader, TagWriter};
use crate::error::{IpcError, Result};

/// Tag of the variant ordinal.
pub const ADDR_TYPE: Tag = 1;
/// Tag of the prefix length.
pub const ADDR_BITS: Tag = 2;
/// Tag of the raw address bytes.
pub const ADDR_PAYLOAD: Tag = 3;

/// Variant ordinals on the wire.
pub mod kind {
    /// Link-layer (Ethernet) address.
    pub const ETHERNET: u8 = 1;
    /// IPv4 address.
    pub const IPV4: u8 = 2;
    /// IPv6 address.
    pub const IPV6: u8 = 3;
}

/// Ethernet address length.
pub const ETH_ADDR_LEN: usize = 6;
/// IPv4 address length.
pub const IPV4_ADDR_LEN: usize = 4;
/// IPv6 address length.
pub const IPV6_ADDR_LEN: usize = 16;

/// A link-layer or network-layer address with a prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// Link-layer address.
    Ethernet {
        /// MAC address bytes.
        addr: [u8; ETH_ADDR_LEN],
        /// Prefix length in bits.
        bits: u8,
    },
    /// IPv4 address.
    Ipv4 {
        /// Address bytes in network order.
        addr: [u8; IPV4_ADDR_LEN],
        /// Prefix length in bits.
        bits: u8,
    },
    /// IPv6 address.
    Ipv6 {
        /// Address bytes in network order.
        addr: [u8; IPV6_ADDR_LEN],
        /// Prefix length in bits.
        bits: u8,
    },
}

impl Address {
    /// Ethernet address with a full 48-bit prefix.
    pub fn ethernet(addr: [u8; ETH_ADDR_LEN]) -> Self {
        Address::Ethernet { addr, bits: 48 }
    }

    /// Wire ordinal of the variant.
    pub fn kind(&self) -> u8 {
        match self {
            Address::Ethernet { .. } => kind::ETHERNET,
            Address::Ipv4 { .. } => kind::IPV4,
            Address::Ipv6 { .. } => kind::IPV6,
        }
    }

    /// Prefix length in bits.
    pub fn bits(&self) -> u8 {
        match *self {
            Address::Ethernet { bits, .. } | Address::Ipv4 { bits, .. } | Address::Ipv6 { bits, .. } => {
                bits
            }
        }
    }

    /// Raw address bytes.
    pub fn octets(&self) -> &[u8] {
        match self {
            Address::Ethernet { addr, .. } => addr,
            Address::Ipv4 { addr, .. } => addr,
            Address::Ipv6 { addr, .. } => addr,
        }
    }

    /// Full prefix length of the variant.
    fn full_bits(&self) -> u8 {
        (self.octets().len() * 8) as u8
    }

    /// Encode into a standalone tag stream.
    pub fn encode(&self) -> Bytes {
        let mut writer = TagWriter::with_capacity(8 + IPV6_ADDR_LEN);
        encode_address(self, &mut writer);
        writer.freeze()
    }

    /// IP address of an IPv4 or IPv6 variant.
    pub fn ip(&self) -> Option<IpAddr> {
        match *self {
            Address::Ipv4 { addr, .. } => Some(IpAddr::V4(Ipv4Addr::from(addr))),
            Address::Ipv6 { addr, .. } => Some(IpAddr::V6(Ipv6Addr::from(addr))),
            Address::Ethernet { .. } => None,
        }
    }
}

impl Default for Address {
    /// Unspecified IPv4 address with an empty prefix (`0.0.0.0/0`).
    fn default() -> Self {
        Address::Ipv4 {
            addr: [0; IPV4_ADDR_LEN],
            bits: 0,
        }
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address::Ipv4 {
            addr: ip.octets(),
            bits: 32,
        }
    }
}

impl From<Ipv6Addr> for Address {
    fn from(ip: Ipv6Addr) -> Self {
        Address::Ipv6 {
            addr: ip.octets(),
            bits: 128,
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => v4.into(),
            IpAddr::V6(v6) => v6.into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ethernet { addr, .. } => {
                let [a, b, c, d, e, g] = addr;
                write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)?;
            }
            Address::Ipv4 { addr, .. } => write!(f, "{}", Ipv4Addr::from(*addr))?,
            Address::Ipv6 { addr, .. } => write!(f, "{}", Ipv6Addr::from(*addr))?,
        }
        if self.bits() != self.full_bits() {
            write!(f, "/{}", self.bits())?;
        }
        Ok(())
    }
}

/// Append the three address fields to `writer`.
pub fn encode_address(addr: &Address, writer: &mut TagWriter) {
    writer.put_u8(ADDR_TYPE, addr.kind());
    writer.put_u8(ADDR_BITS, addr.bits());
    writer.put_fixed(ADDR_PAYLOAD, addr.octets());
}

/// Decode an address from a complete nested stream.
///
/// The payload width must match the variant named by the type field; the
/// stream must hold nothing after the payload.
pub fn decode_address(buf: &[u8]) -> Result<Address> {
    let mut reader = TagReader::new(buf);
    let kind = reader.expect(ADDR_TYPE)?.u8()?;
    let bits = reader.expect(ADDR_BITS)?.u8()?;
    let payload = reader.expect(ADDR_PAYLOAD)?;

    let addr = match kind {
        kind::ETHERNET => Address::Ethernet {
            addr: payload.fixed()?,
            bits,
        },
        kind::IPV4 => Address::Ipv4 {
            addr: payload.fixed()?,
            bits,
        },
        kind::IPV6 => Address::Ipv6 {
            addr: payload.fixed()?,
            bits,
        },
        other => {
            return Err(IpcError::malformed(format!(
                "unknown address type {}",
                other
            )))
        }
    };

    if !reader.is_empty() {
        return Err(IpcError::malformed(format!(
            "{} trailing bytes after address payload",
            reader.remaining()
        )));
    }
    Ok(addr)
}
