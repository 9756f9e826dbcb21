//! In-process network with static interfaces.
//!
//! Useful for exercising candidate gathering against an exact topology, e.g. a host behind
//! a 1:1 NAT whose addresses cannot be bound on the machine running the tests.

use super::LocalInterface;
use super::NetworkProvider;
use super::UdpConn;
use crate::config::DEFAULT_LOG_TARGET;
use futures_channel::mpsc::UnboundedReceiver;
use futures_channel::mpsc::UnboundedSender;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

const EPHEMERAL_PORT_MIN: u16 = 49152;

type Datagram = (Vec<u8>, SocketAddr);

#[derive(Clone)]
pub struct MemoryNetwork {
    interfaces: Vec<LocalInterface>,
    ports: Arc<Mutex<PortTable>>,
}

struct PortTable {
    bound: HashMap<SocketAddr, UnboundedSender<Datagram>>,
    next_ephemeral: u16,
}

impl MemoryNetwork {
    /// Creates a network with only a loopback interface `lo`.
    pub fn new() -> Self {
        let loopback = LocalInterface {
            name: "lo".into(),
            index: 1,
            up: true,
            addresses: vec![Ipv4Addr::LOCALHOST.into()],
        };
        Self {
            interfaces: vec![loopback],
            ports: Arc::new(Mutex::new(PortTable {
                bound: Default::default(),
                next_ephemeral: EPHEMERAL_PORT_MIN,
            })),
        }
    }

    pub fn with_interface(
        mut self,
        name: impl Into<String>,
        addresses: impl IntoIterator<Item = IpAddr>,
    ) -> Self {
        let index = self.interfaces.len() as u32 + 1;
        self.interfaces.push(LocalInterface {
            name: name.into(),
            index,
            up: true,
            addresses: addresses.into_iter().collect(),
        });
        self
    }

    /// Marks an interface as administratively down.
    pub fn with_interface_down(mut self, name: &str) -> Self {
        self.interfaces
            .iter_mut()
            .filter(|i| i.name == name)
            .for_each(|i| i.up = false);
        self
    }

    /// Number of sockets currently bound on this network.
    pub fn bound_socket_count(&self) -> usize {
        lock(&self.ports).bound.len()
    }

    fn is_local_ip(&self, ip: IpAddr) -> bool {
        ip.is_unspecified()
            || self
                .interfaces
                .iter()
                .any(|i| i.up && i.addresses.contains(&ip))
    }

    fn bind(&self, address: SocketAddr) -> std::io::Result<MemoryConn> {
        if !self.is_local_ip(address.ip()) {
            return Err(std::io::Error::new(
                ErrorKind::AddrNotAvailable,
                format!("{} is not assigned to any interface", address.ip()),
            ));
        }

        let mut ports = lock(&self.ports);
        let local_addr = if address.port() == 0 {
            ports.allocate_ephemeral(address.ip())?
        } else if ports.bound.contains_key(&address) {
            return Err(std::io::Error::new(
                ErrorKind::AddrInUse,
                format!("{} is already bound", address),
            ));
        } else {
            address
        };

        let (sender, inbox) = futures_channel::mpsc::unbounded();
        ports.bound.insert(local_addr, sender);
        Ok(MemoryConn {
            local_addr,
            ports: self.ports.clone(),
            inbox: tokio::sync::Mutex::new(inbox),
        })
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl PortTable {
    fn allocate_ephemeral(&mut self, ip: IpAddr) -> std::io::Result<SocketAddr> {
        let range_size = usize::from(u16::MAX - EPHEMERAL_PORT_MIN) + 1;
        for _ in 0..range_size {
            let candidate = SocketAddr::new(ip, self.next_ephemeral);
            self.next_ephemeral = if self.next_ephemeral == u16::MAX {
                EPHEMERAL_PORT_MIN
            } else {
                self.next_ephemeral + 1
            };
            if !self.bound.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(std::io::Error::new(
            ErrorKind::AddrInUse,
            format!("No ephemeral port left on {}", ip),
        ))
    }

    fn route(&self, target: SocketAddr) -> Option<&UnboundedSender<Datagram>> {
        let wildcard = match target.ip() {
            IpAddr::V4(_) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), target.port()),
            IpAddr::V6(_) => SocketAddr::new(std::net::Ipv6Addr::UNSPECIFIED.into(), target.port()),
        };
        self.bound
            .get(&target)
            .or_else(|| self.bound.get(&wildcard))
    }
}

impl NetworkProvider for MemoryNetwork {
    fn interfaces(&self) -> BoxFuture<'static, std::io::Result<Vec<LocalInterface>>> {
        let interfaces = self.interfaces.clone();
        async move { Ok(interfaces) }.boxed()
    }

    fn bind_udp(
        &self,
        address: SocketAddr,
    ) -> BoxFuture<'static, std::io::Result<Box<dyn UdpConn>>> {
        let result = self
            .bind(address)
            .map(|conn| Box::new(conn) as Box<dyn UdpConn>);
        async move { result }.boxed()
    }
}

pub struct MemoryConn {
    local_addr: SocketAddr,
    ports: Arc<Mutex<PortTable>>,
    inbox: tokio::sync::Mutex<UnboundedReceiver<Datagram>>,
}

impl UdpConn for MemoryConn {
    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn send_to<'a>(
        &'a self,
        data: &'a [u8],
        target: SocketAddr,
    ) -> BoxFuture<'a, std::io::Result<usize>> {
        let ports = lock(&self.ports);
        match ports.route(target) {
            Some(destination) => {
                // A receiver that went away is indistinguishable from packet loss.
                let _ = destination.unbounded_send((data.to_vec(), self.local_addr));
            }
            None => log::trace!(
                target: DEFAULT_LOG_TARGET,
                "No socket bound at {}, dropping datagram",
                target
            ),
        }
        async move { Ok(data.len()) }.boxed()
    }

    fn recv_from<'a>(
        &'a self,
        buffer: &'a mut [u8],
    ) -> BoxFuture<'a, std::io::Result<(usize, SocketAddr)>> {
        async move {
            let (data, source) = self
                .inbox
                .lock()
                .await
                .next()
                .await
                .ok_or_else(|| std::io::Error::from(ErrorKind::NotConnected))?;
            let size = data.len().min(buffer.len());
            buffer[..size].copy_from_slice(&data[..size]);
            Ok((size, source))
        }
        .boxed()
    }
}

impl Drop for MemoryConn {
    fn drop(&mut self) {
        lock(&self.ports).bound.remove(&self.local_addr);
    }
}

fn lock(ports: &Mutex<PortTable>) -> MutexGuard<'_, PortTable> {
    ports.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod test {
    use super::*;

    fn network() -> MemoryNetwork {
        MemoryNetwork::new().with_interface("eth0", ["1.2.3.1".parse().unwrap()])
    }

    #[tokio::test]
    async fn ephemeral_bind() {
        let network = network();

        // When
        let conn = network.bind_udp("1.2.3.1:0".parse().unwrap()).await.unwrap();

        // Then
        let local_addr = conn.local_addr().unwrap();
        assert_eq!(local_addr.ip().to_string(), "1.2.3.1");
        assert!(local_addr.port() >= EPHEMERAL_PORT_MIN);
        assert_eq!(network.bound_socket_count(), 1);

        drop(conn);
        assert_eq!(network.bound_socket_count(), 0);
    }

    #[tokio::test]
    async fn port_in_use() {
        let network = network();
        let address = "1.2.3.1:5000".parse().unwrap();
        let _conn = network.bind_udp(address).await.unwrap();

        // When
        let e = network.bind_udp(address).await.err().unwrap();

        // Then
        assert_eq!(e.kind(), ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn foreign_address() {
        let e = network()
            .bind_udp("10.9.9.9:0".parse().unwrap())
            .await
            .err()
            .unwrap();
        assert_eq!(e.kind(), ErrorKind::AddrNotAvailable);
    }

    #[tokio::test]
    async fn deliver_datagram() {
        let network = network();
        let sender = network.bind_udp("1.2.3.1:1000".parse().unwrap()).await.unwrap();
        let receiver = network.bind_udp("1.2.3.1:2000".parse().unwrap()).await.unwrap();

        // When
        sender
            .send_to(&[1, 2, 3], receiver.local_addr().unwrap())
            .await
            .unwrap();
        let mut buffer = [0; 16];
        let (size, source) = receiver.recv_from(&mut buffer).await.unwrap();

        // Then
        assert_eq!(&buffer[..size], &[1, 2, 3]);
        assert_eq!(source, sender.local_addr().unwrap());
    }
}
