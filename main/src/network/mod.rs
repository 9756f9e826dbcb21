pub mod memory;
pub mod os;

use futures_util::future::BoxFuture;
use mockall::automock;
use std::fmt::Display;
use std::fmt::Formatter;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;

/// Transport and address family a candidate is gathered for.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum NetworkType {
    Udp4,
    Udp6,
    Tcp4,
    Tcp6,
}

impl NetworkType {
    pub fn is_udp(self) -> bool {
        matches!(self, Self::Udp4 | Self::Udp6)
    }

    pub fn is_tcp(self) -> bool {
        !self.is_udp()
    }

    pub fn is_ipv4(self) -> bool {
        matches!(self, Self::Udp4 | Self::Tcp4)
    }

    pub fn is_ipv6(self) -> bool {
        !self.is_ipv4()
    }

    /// Whether an address of this family can serve this network type.
    pub fn supports(self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(_) => self.is_ipv4(),
            IpAddr::V6(_) => self.is_ipv6(),
        }
    }
}

impl Display for NetworkType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Udp4 => "udp4",
            Self::Udp6 => "udp6",
            Self::Tcp4 => "tcp4",
            Self::Tcp6 => "tcp6",
        };
        f.write_str(name)
    }
}

impl FromStr for NetworkType {
    type Err = UnknownNetworkTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp4" => Ok(Self::Udp4),
            "udp6" => Ok(Self::Udp6),
            "tcp4" => Ok(Self::Tcp4),
            "tcp6" => Ok(Self::Tcp6),
            _ => Err(UnknownNetworkTypeError(s.into())),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown network type `{0}`")]
pub struct UnknownNetworkTypeError(String);

/// A network interface as reported by a [`NetworkProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    pub name: String,
    pub index: u32,
    pub up: bool,
    pub addresses: Vec<IpAddr>,
}

impl LocalInterface {
    /// An interface counts as loopback when every address on it is a loopback address.
    pub fn is_loopback(&self) -> bool {
        !self.addresses.is_empty() && self.addresses.iter().all(IpAddr::is_loopback)
    }
}

/// A bound UDP socket handed out by a [`NetworkProvider`].
///
/// Dropping the connection releases the underlying port.
pub trait UdpConn: Send + Sync {
    fn local_addr(&self) -> std::io::Result<SocketAddr>;

    fn send_to<'a>(
        &'a self,
        data: &'a [u8],
        target: SocketAddr,
    ) -> BoxFuture<'a, std::io::Result<usize>>;

    fn recv_from<'a>(
        &'a self,
        buffer: &'a mut [u8],
    ) -> BoxFuture<'a, std::io::Result<(usize, SocketAddr)>>;
}

/// The only boundary between candidate gathering and the operating system.
#[automock]
pub trait NetworkProvider {
    fn interfaces(&self) -> BoxFuture<'static, std::io::Result<Vec<LocalInterface>>>;
    fn bind_udp(
        &self,
        address: SocketAddr,
    ) -> BoxFuture<'static, std::io::Result<Box<dyn UdpConn>>>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn network_type_families() {
        assert!(NetworkType::Udp4.supports("10.0.0.1".parse().unwrap()));
        assert!(!NetworkType::Udp4.supports("::2".parse().unwrap()));
        assert!(NetworkType::Tcp6.supports("::2".parse().unwrap()));
        assert!(NetworkType::Tcp6.is_tcp());
        assert!(NetworkType::Udp6.is_udp());
    }

    #[test]
    fn parse_network_type() {
        assert_eq!("UDP4".parse(), Ok(NetworkType::Udp4));
        assert_eq!(NetworkType::Tcp6.to_string(), "tcp6");
        assert_eq!(
            "sctp".parse::<NetworkType>(),
            Err(UnknownNetworkTypeError("sctp".into()))
        );
    }

    #[test]
    fn loopback_interface() {
        let mut interface = LocalInterface {
            name: "lo".into(),
            index: 1,
            up: true,
            addresses: vec!["127.0.0.1".parse().unwrap(), "::1".parse().unwrap()],
        };
        assert!(interface.is_loopback());

        interface.addresses.push("10.0.0.1".parse().unwrap());
        assert!(!interface.is_loopback());

        interface.addresses.clear();
        assert!(!interface.is_loopback());
    }
}
