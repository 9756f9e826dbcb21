use crate::network::NetworkProvider;
use crate::network::NetworkType;
use crate::network::UdpConn;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Binds UDP sockets within an inclusive port range.
pub struct PortRangeAllocator {
    provider: Arc<dyn NetworkProvider + Send + Sync>,
    log_target: Arc<str>,
}

impl PortRangeAllocator {
    pub fn new(provider: Arc<dyn NetworkProvider + Send + Sync>, log_target: Arc<str>) -> Self {
        Self {
            provider,
            log_target,
        }
    }

    /// Binds a socket at `local_ip` on a port in `port_min..=port_max`.
    ///
    /// `0..=0` lets the provider pick an ephemeral port. Ports are tried in ascending order
    /// and the first successful bind wins; once the range is exhausted the last bind error
    /// is returned.
    pub async fn listen_udp(
        &self,
        port_min: u16,
        port_max: u16,
        network_type: NetworkType,
        local_ip: IpAddr,
    ) -> Result<Box<dyn UdpConn>, ListenError> {
        if !network_type.is_udp() || !network_type.supports(local_ip) {
            return Err(ListenError::NetworkTypeMismatch {
                network_type,
                ip: local_ip,
            });
        }
        if port_min == 0 && port_max == 0 {
            return self.bind(SocketAddr::new(local_ip, 0)).await;
        }
        if port_min > port_max {
            return Err(ListenError::PortRange {
                min: port_min,
                max: port_max,
            });
        }

        let mut last_error = None;
        for port in port_min.max(1)..=port_max {
            match self.bind(SocketAddr::new(local_ip, port)).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    log::trace!(target: &*self.log_target, "{}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(ListenError::PortRange {
            min: port_min,
            max: port_max,
        }))
    }

    async fn bind(&self, address: SocketAddr) -> Result<Box<dyn UdpConn>, ListenError> {
        self.provider
            .bind_udp(address)
            .await
            .map_err(|e| ListenError::Bind {
                address,
                source: Arc::new(e),
            })
    }
}

#[derive(Error, Debug, Clone)]
pub enum ListenError {
    #[error("Invalid port range {min}-{max}")]
    PortRange { min: u16, max: u16 },

    #[error("Failed to bind a UDP socket at {address}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Cannot listen on {ip} for network type {network_type}")]
    NetworkTypeMismatch { network_type: NetworkType, ip: IpAddr },
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::network::memory::MemoryNetwork;
    use crate::network::MockNetworkProvider;
    use futures_util::FutureExt;
    use mockall::predicate::eq;
    use std::io::ErrorKind;

    const LOCAL_IP: &str = "1.2.3.1";

    fn allocator(provider: impl NetworkProvider + Send + Sync + 'static) -> PortRangeAllocator {
        PortRangeAllocator::new(Arc::new(provider), "test".into())
    }

    fn network() -> MemoryNetwork {
        MemoryNetwork::new().with_interface("eth0", [LOCAL_IP.parse().unwrap()])
    }

    #[tokio::test]
    async fn ephemeral_port() {
        crate::test::init();
        let allocator = allocator(network());

        // When
        let conn = allocator
            .listen_udp(0, 0, NetworkType::Udp4, LOCAL_IP.parse().unwrap())
            .await
            .unwrap();

        // Then
        let local_addr = conn.local_addr().unwrap();
        assert_eq!(local_addr.ip().to_string(), LOCAL_IP);
        assert_ne!(local_addr.port(), 0);
    }

    #[tokio::test]
    async fn inverted_range_never_binds() {
        let mut provider = MockNetworkProvider::new();
        provider.expect_bind_udp().never();

        // When
        let e = allocator(provider)
            .listen_udp(5000, 4999, NetworkType::Udp4, LOCAL_IP.parse().unwrap())
            .await
            .err()
            .unwrap();

        // Then
        if let ListenError::PortRange { min: 5000, max: 4999 } = e {
        } else {
            panic!("Expecting `PortRange`, got {:?}", e);
        }
    }

    #[tokio::test]
    async fn exact_port() {
        let conn = allocator(network())
            .listen_udp(5000, 5000, NetworkType::Udp4, LOCAL_IP.parse().unwrap())
            .await
            .unwrap();
        assert_eq!(conn.local_addr().unwrap().port(), 5000);
    }

    #[tokio::test]
    async fn exact_port_taken() {
        let network = network();
        let _occupant = network
            .bind_udp(format!("{}:5000", LOCAL_IP).parse().unwrap())
            .await
            .unwrap();

        // When
        let e = allocator(network)
            .listen_udp(5000, 5000, NetworkType::Udp4, LOCAL_IP.parse().unwrap())
            .await
            .err()
            .unwrap();

        // Then
        if let ListenError::Bind { address, source } = e {
            assert_eq!(address.port(), 5000);
            assert_eq!(source.kind(), ErrorKind::AddrInUse);
        } else {
            panic!("Expecting `Bind`, got {:?}", e);
        }
    }

    #[tokio::test]
    async fn scan_range_until_free_port() {
        let network = network();
        let _first = network
            .bind_udp(format!("{}:5000", LOCAL_IP).parse().unwrap())
            .await
            .unwrap();
        let _second = network
            .bind_udp(format!("{}:5001", LOCAL_IP).parse().unwrap())
            .await
            .unwrap();

        // When
        let conn = allocator(network)
            .listen_udp(5000, 5010, NetworkType::Udp4, LOCAL_IP.parse().unwrap())
            .await
            .unwrap();

        // Then
        assert_eq!(conn.local_addr().unwrap().port(), 5002);
    }

    #[tokio::test]
    async fn exhausted_range_returns_last_error() {
        let ip: IpAddr = LOCAL_IP.parse().unwrap();
        let mut provider = MockNetworkProvider::new();
        provider
            .expect_bind_udp()
            .with(eq(SocketAddr::new(ip, 7000)))
            .return_once(|_| async { Err(std::io::Error::from(ErrorKind::AddrInUse)) }.boxed());
        provider
            .expect_bind_udp()
            .with(eq(SocketAddr::new(ip, 7001)))
            .return_once(|_| async { Err(std::io::Error::from(ErrorKind::PermissionDenied)) }.boxed());

        // When
        let e = allocator(provider)
            .listen_udp(7000, 7001, NetworkType::Udp4, ip)
            .await
            .err()
            .unwrap();

        // Then
        if let ListenError::Bind { address, source } = e {
            assert_eq!(address.port(), 7001);
            assert_eq!(source.kind(), ErrorKind::PermissionDenied);
        } else {
            panic!("Expecting `Bind`, got {:?}", e);
        }
    }

    #[tokio::test]
    async fn zero_minimum_starts_at_one() {
        let ip: IpAddr = LOCAL_IP.parse().unwrap();
        let mut provider = MockNetworkProvider::new();
        provider
            .expect_bind_udp()
            .with(eq(SocketAddr::new(ip, 1)))
            .return_once(|address| {
                let network = network();
                async move { network.bind_udp(address).await }.boxed()
            });

        // When
        let conn = allocator(provider)
            .listen_udp(0, 10, NetworkType::Udp4, ip)
            .await
            .unwrap();

        // Then
        assert_eq!(conn.local_addr().unwrap().port(), 1);
    }

    #[tokio::test]
    async fn network_type_mismatch() {
        let allocator = allocator(network());
        let ip = LOCAL_IP.parse().unwrap();

        for network_type in [NetworkType::Udp6, NetworkType::Tcp4] {
            let e = allocator
                .listen_udp(0, 0, network_type, ip)
                .await
                .err()
                .unwrap();
            assert!(matches!(e, ListenError::NetworkTypeMismatch { .. }));
        }
    }
}
