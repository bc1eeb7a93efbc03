use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::Error;

pub(crate) const BRIDGE_PREFIX: &str = "br_";
pub(crate) const GRE_PREFIX: &str = "gre_";
const GRE_SEPARATOR: &str = "##";

/// A tenant subnet, encoded into kernel link aliases via [`Subnet::encode`].
///
/// Identity is the CIDR itself; the encoding only exists because `/` is not
/// a legal alias character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet(Ipv4Net);

impl Subnet {
    pub fn new(net: Ipv4Net) -> Self {
        Subnet(net)
    }

    pub fn net(&self) -> Ipv4Net {
        self.0
    }

    /// `10.0.0.0/24` -> `10.0.0.0+24`, legal as a kernel alias substring.
    pub fn encode(&self) -> String {
        format!("{}+{}", self.0.addr(), self.0.prefix_len())
    }

    /// Inverse of [`Subnet::encode`].
    pub fn decode(s: &str) -> Result<Self, Error> {
        let (addr, prefix) = s
            .split_once('+')
            .ok_or_else(|| Error::InvalidArgument(format!("malformed subnet encoding: {}", s)))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("malformed subnet address: {}", addr)))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("malformed subnet prefix: {}", prefix)))?;
        let net = Ipv4Net::new(addr, prefix)
            .map_err(|e| Error::InvalidArgument(format!("invalid subnet: {}", e)))?;
        Ok(Subnet(net))
    }

    pub fn bridge_alias(&self) -> String {
        format!("{}{}", BRIDGE_PREFIX, self.encode())
    }

    pub fn gre_alias(&self, remote: Ipv4Addr) -> String {
        format!("{}{}{}{}", GRE_PREFIX, self.encode(), GRE_SEPARATOR, remote)
    }

    /// Parses `gre_<encoded-subnet>##<remote-ip>` back into its parts.
    pub fn parse_gre_alias(alias: &str) -> Result<(Self, Ipv4Addr), Error> {
        let rest = alias.strip_prefix(GRE_PREFIX).ok_or_else(|| {
            Error::InvalidArgument(format!("not a gre alias: {}", alias))
        })?;
        let (encoded, remote) = rest.split_once(GRE_SEPARATOR).ok_or_else(|| {
            Error::InvalidArgument(format!("malformed gre alias: {}", alias))
        })?;
        let subnet = Subnet::decode(encoded)?;
        let remote: Ipv4Addr = remote
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("malformed remote ip: {}", remote)))?;
        Ok((subnet, remote))
    }

    pub fn bridge_alias_from(bridge_alias: &str) -> Result<Self, Error> {
        let encoded = bridge_alias.strip_prefix(BRIDGE_PREFIX).ok_or_else(|| {
            Error::InvalidArgument(format!("not a bridge alias: {}", bridge_alias))
        })?;
        Subnet::decode(encoded)
    }
}
