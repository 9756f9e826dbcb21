use crate::id::IdGenerator;
use crate::nat::Nat1To1CandidateType;
use crate::network::NetworkType;
use crate::network::UdpConn;
use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::hash::Hash;
use std::hash::Hasher;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

const COMPONENT_RTP: u16 = 1;
const MAX_LOCAL_PREFERENCE: u32 = 65535;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum CandidateKind {
    Host,
    ServerReflexive {
        /// Local address and port behind the NAT.
        related_address: SocketAddr,
    },
}

impl CandidateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::ServerReflexive { .. } => "srflx",
        }
    }

    /// RFC 8445 section 5.1.2.2.
    pub fn type_preference(&self) -> u32 {
        match self {
            Self::Host => 126,
            Self::ServerReflexive { .. } => 100,
        }
    }

    pub fn related_address(&self) -> Option<SocketAddr> {
        match self {
            Self::Host => None,
            Self::ServerReflexive { related_address } => Some(*related_address),
        }
    }
}

/// A UDP socket shared by every candidate gathered on it.
///
/// The bound address stays readable after [`SocketHandle::close`]; I/O does not.
pub struct SocketHandle {
    local_addr: SocketAddr,
    conn: Mutex<Option<Arc<dyn UdpConn>>>,
}

impl SocketHandle {
    pub fn new(conn: Box<dyn UdpConn>) -> std::io::Result<Self> {
        Ok(Self {
            local_addr: conn.local_addr()?,
            conn: Mutex::new(Some(conn.into())),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Releases the socket. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> std::io::Result<usize> {
        self.open_conn()?.send_to(data, target).await
    }

    pub async fn recv_from(&self, buffer: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.open_conn()?.recv_from(buffer).await
    }

    fn open_conn(&self) -> std::io::Result<Arc<dyn UdpConn>> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotConnected, "Socket is closed"))
    }
}

impl Debug for SocketHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A local candidate. Immutable once built.
#[derive(Debug, Clone)]
pub struct Candidate {
    id: String,
    foundation: String,
    priority: u32,
    component: u16,
    network_type: NetworkType,
    address: IpAddr,
    port: u16,
    kind: CandidateKind,
    socket: Arc<SocketHandle>,
}

impl Candidate {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn foundation(&self) -> &str {
        &self.foundation
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn component(&self) -> u16 {
        self.component
    }

    pub fn network_type(&self) -> NetworkType {
        self.network_type
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_address(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn kind(&self) -> CandidateKind {
        self.kind
    }

    pub fn related_address(&self) -> Option<SocketAddr> {
        self.kind.related_address()
    }

    pub fn socket(&self) -> &Arc<SocketHandle> {
        &self.socket
    }
}

impl Display for Candidate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.kind.as_str(),
            self.network_type,
            self.socket_address()
        )?;
        if let Some(related_address) = self.related_address() {
            write!(f, " raddr {}", related_address)?;
        }
        Ok(())
    }
}

/// Builds candidates out of freshly bound sockets.
pub struct CandidateFactory {
    id_generator: Box<dyn IdGenerator + Send + Sync>,
}

impl CandidateFactory {
    pub fn new(id_generator: Box<dyn IdGenerator + Send + Sync>) -> Self {
        Self { id_generator }
    }

    /// Without `external`, yields a single host candidate at the bound address.
    ///
    /// With `external` the 1:1 NAT rule applies: either one host candidate advertising the
    /// external IP, or a host candidate plus a server-reflexive one sharing the socket.
    pub fn build(
        &self,
        network_type: NetworkType,
        conn: Box<dyn UdpConn>,
        external: Option<(IpAddr, Nat1To1CandidateType)>,
    ) -> std::io::Result<Vec<Candidate>> {
        let socket = Arc::new(SocketHandle::new(conn)?);
        let local_addr = socket.local_addr();
        let candidates = match external {
            None => vec![self.new_candidate(
                network_type,
                local_addr.ip(),
                CandidateKind::Host,
                &socket,
            )],
            Some((external_ip, Nat1To1CandidateType::Host)) => vec![self.new_candidate(
                network_type,
                external_ip,
                CandidateKind::Host,
                &socket,
            )],
            Some((external_ip, Nat1To1CandidateType::ServerReflexive)) => vec![
                self.new_candidate(network_type, local_addr.ip(), CandidateKind::Host, &socket),
                self.new_candidate(
                    network_type,
                    external_ip,
                    CandidateKind::ServerReflexive {
                        related_address: local_addr,
                    },
                    &socket,
                ),
            ],
        };
        Ok(candidates)
    }

    fn new_candidate(
        &self,
        network_type: NetworkType,
        address: IpAddr,
        kind: CandidateKind,
        socket: &Arc<SocketHandle>,
    ) -> Candidate {
        Candidate {
            id: self.id_generator.generate(),
            foundation: foundation(kind, socket.local_addr().ip(), network_type),
            priority: priority(kind, COMPONENT_RTP),
            component: COMPONENT_RTP,
            network_type,
            address,
            port: socket.local_addr().port(),
            kind,
            socket: socket.clone(),
        }
    }
}

/// Candidates sharing type, base IP and transport share a foundation.
fn foundation(kind: CandidateKind, base_ip: IpAddr, network_type: NetworkType) -> String {
    let mut hasher = DefaultHasher::new();
    kind.as_str().hash(&mut hasher);
    base_ip.hash(&mut hasher);
    network_type.hash(&mut hasher);
    format!("{:08x}", hasher.finish() as u32)
}

/// Priority = 2^24 * type preference + 2^8 * local preference + (256 - component ID)
fn priority(kind: CandidateKind, component: u16) -> u32 {
    (1 << 24) * kind.type_preference() + (1 << 8) * MAX_LOCAL_PREFERENCE + (256 - u32::from(component))
}
