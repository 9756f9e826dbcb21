use crate::nat::Nat1To1CandidateType;
use crate::nat::Nat1To1ConfigError;
use crate::nat::Nat1To1Translator;
use crate::network::NetworkProvider;
use crate::network::NetworkType;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_LOG_TARGET: &str = "icegather";

/// Decides by interface name whether its addresses may be gathered.
pub type InterfaceFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct AgentConfig {
    /// Empty means UDP over both IPv4 and IPv6.
    pub network_types: BTreeSet<NetworkType>,
    pub network: Arc<dyn NetworkProvider + Send + Sync>,
    pub interface_filter: Option<InterfaceFilter>,

    /// Each entry is `external` or `external/local`.
    pub nat_1to1_ips: Vec<String>,
    pub nat_1to1_candidate_type: Nat1To1CandidateType,

    /// Inclusive. `0` and `0` let the network pick ephemeral ports.
    pub port_min: u16,
    pub port_max: u16,

    pub trickle: bool,

    /// Target of every log record emitted by the agent.
    pub log_target: String,
}

impl AgentConfig {
    pub fn new(network: Arc<dyn NetworkProvider + Send + Sync>) -> Self {
        Self {
            network_types: Default::default(),
            network,
            interface_filter: None,
            nat_1to1_ips: vec![],
            nat_1to1_candidate_type: Default::default(),
            port_min: 0,
            port_max: 0,
            trickle: false,
            log_target: DEFAULT_LOG_TARGET.into(),
        }
    }

    pub(crate) fn effective_network_types(&self) -> Vec<NetworkType> {
        if self.network_types.is_empty() {
            vec![NetworkType::Udp4, NetworkType::Udp6]
        } else {
            self.network_types.iter().copied().collect()
        }
    }

    pub(crate) fn validate(&self) -> Result<Nat1To1Translator, ConfigError> {
        if self.port_min > self.port_max {
            return Err(ConfigError::InvalidPortRange {
                min: self.port_min,
                max: self.port_max,
            });
        }
        Nat1To1Translator::new(&self.nat_1to1_ips, self.nat_1to1_candidate_type)
            .map_err(Into::into)
    }
}

impl Debug for AgentConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("network_types", &self.network_types)
            .field("interface_filter", &self.interface_filter.is_some())
            .field("nat_1to1_ips", &self.nat_1to1_ips)
            .field("nat_1to1_candidate_type", &self.nat_1to1_candidate_type)
            .field("port_min", &self.port_min)
            .field("port_max", &self.port_max)
            .field("trickle", &self.trickle)
            .field("log_target", &self.log_target)
            .finish_non_exhaustive()
    }
}

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Invalid port range {min}-{max}")]
    InvalidPortRange { min: u16, max: u16 },

    #[error("Invalid 1:1 NAT configuration")]
    Nat1To1(#[from] Nat1To1ConfigError),
}
