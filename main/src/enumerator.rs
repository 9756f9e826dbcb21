use crate::config::InterfaceFilter;
use crate::network::NetworkProvider;
use crate::network::NetworkType;
use std::net::IpAddr;
use std::sync::Arc;

/// Lists the local addresses candidates can be gathered on.
pub struct InterfaceEnumerator {
    provider: Arc<dyn NetworkProvider + Send + Sync>,
    interface_filter: Option<InterfaceFilter>,
    log_target: Arc<str>,
}

impl InterfaceEnumerator {
    pub fn new(
        provider: Arc<dyn NetworkProvider + Send + Sync>,
        interface_filter: Option<InterfaceFilter>,
        log_target: Arc<str>,
    ) -> Self {
        Self {
            provider,
            interface_filter,
            log_target,
        }
    }

    /// Addresses able to serve at least one of `network_types`, in provider order.
    ///
    /// Loopback, unspecified and IPv6 link-local addresses are left out, and so is every
    /// address of a down, loopback or filtered-out interface.
    pub async fn local_addresses(
        &self,
        network_types: &[NetworkType],
    ) -> std::io::Result<Vec<IpAddr>> {
        let interfaces = self.provider.interfaces().await?;
        let mut addresses: Vec<IpAddr> = vec![];
        for interface in interfaces {
            if !interface.up || interface.is_loopback() {
                continue;
            }
            if let Some(filter) = &self.interface_filter {
                if !filter(&interface.name) {
                    log::debug!(
                        target: &*self.log_target,
                        "Interface {} excluded by filter",
                        interface.name
                    );
                    continue;
                }
            }
            for ip in interface.addresses {
                if !is_usable(ip) || addresses.contains(&ip) {
                    continue;
                }
                if network_types.iter().any(|t| t.supports(ip)) {
                    addresses.push(ip);
                }
            }
        }
        log::debug!(target: &*self.log_target, "Local addresses: {:?}", addresses);
        Ok(addresses)
    }
}

fn is_usable(ip: IpAddr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return false;
    }
    match ip {
        IpAddr::V4(_) => true,
        IpAddr::V6(ipv6) => (ipv6.segments()[0] & 0xFFC0) != 0xFE80,
    }
}
