mod linux;
mod windows;

use self::linux::IpRoute2InterfaceScanner;
use self::windows::PowerShellInterfaceScanner;
use super::LocalInterface;
use super::NetworkProvider;
use super::UdpConn;
use crate::config::DEFAULT_LOG_TARGET;
use crate::process::ProcessError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use futures_util::StreamExt;
use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;

/// Network of the host operating system.
pub struct OsNetwork {
    scanner: Box<dyn InterfaceScanner + Send + Sync>,
    log_target: Arc<str>,
}

impl OsNetwork {
    /// Picks the first interface scanner supported by the current operating system.
    pub async fn detect() -> Self {
        Self::detect_with_log_target(DEFAULT_LOG_TARGET).await
    }

    /// Same as [`OsNetwork::detect`], logging on `log_target`.
    pub async fn detect_with_log_target(log_target: &str) -> Self {
        let log_target: Arc<str> = log_target.into();
        let scanners: Vec<Box<dyn InterfaceScanner + Send + Sync>> = vec![
            Box::new(PowerShellInterfaceScanner::new(log_target.clone())),
            Box::new(IpRoute2InterfaceScanner::new(log_target.clone())),
        ];
        let mut supported_scanners = futures_util::stream::iter(scanners)
            .filter(|s| s.supports_current_operating_system())
            .boxed();
        let scanner: Box<dyn InterfaceScanner + Send + Sync> =
            if let Some(scanner) = supported_scanners.next().await {
                scanner
            } else {
                log::info!(
                    target: &*log_target,
                    "Unsupported operating system, no network interface will be scanned."
                );
                Box::new(DummyInterfaceScanner)
            };
        Self {
            scanner,
            log_target,
        }
    }

    pub fn with_scanner(scanner: Box<dyn InterfaceScanner + Send + Sync>) -> Self {
        Self {
            scanner,
            log_target: DEFAULT_LOG_TARGET.into(),
        }
    }

    pub fn log_target(&self) -> &str {
        &self.log_target
    }
}

impl NetworkProvider for OsNetwork {
    fn interfaces(&self) -> BoxFuture<'static, std::io::Result<Vec<LocalInterface>>> {
        self.scanner
            .scan()
            .map(|r| r.map_err(std::io::Error::other))
            .boxed()
    }

    fn bind_udp(
        &self,
        address: SocketAddr,
    ) -> BoxFuture<'static, std::io::Result<Box<dyn UdpConn>>> {
        let log_target = self.log_target.clone();
        async move {
            let socket = UdpSocket::bind(address).await?;
            log::debug!(target: &*log_target, "Bound UDP socket at {}", socket.local_addr()?);
            Ok(Box::new(TokioUdpConn(socket)) as Box<dyn UdpConn>)
        }
        .boxed()
    }
}

struct TokioUdpConn(UdpSocket);

impl UdpConn for TokioUdpConn {
    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.0.local_addr()
    }

    fn send_to<'a>(
        &'a self,
        data: &'a [u8],
        target: SocketAddr,
    ) -> BoxFuture<'a, std::io::Result<usize>> {
        self.0.send_to(data, target).boxed()
    }

    fn recv_from<'a>(
        &'a self,
        buffer: &'a mut [u8],
    ) -> BoxFuture<'a, std::io::Result<(usize, SocketAddr)>> {
        self.0.recv_from(buffer).boxed()
    }
}

#[derive(Error, Debug)]
pub enum InterfaceScanError {
    #[error("Failed in running an external command")]
    ChildProcess(#[from] ProcessError),

    #[error("Failed to parse the CSV output of a child process")]
    ParseCsv(#[from] csv::Error),

    #[error("Failed to parse the JSON output of a child process")]
    ParseJson(#[from] serde_json::Error),
}

#[automock]
pub trait InterfaceScanner {
    fn supports_current_operating_system(&self) -> BoxFuture<'static, bool>;
    fn scan(&self) -> BoxFuture<'static, Result<Vec<LocalInterface>, InterfaceScanError>>;
}

struct DummyInterfaceScanner;

impl InterfaceScanner for DummyInterfaceScanner {
    fn supports_current_operating_system(&self) -> BoxFuture<'static, bool> {
        async { true }.boxed()
    }

    fn scan(&self) -> BoxFuture<'static, Result<Vec<LocalInterface>, InterfaceScanError>> {
        async { Ok(vec![]) }.boxed()
    }
}
