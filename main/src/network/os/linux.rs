use super::InterfaceScanError;
use super::InterfaceScanner;
use crate::network::LocalInterface;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;

pub struct IpRoute2InterfaceScanner {
    log_target: Arc<str>,
}

impl IpRoute2InterfaceScanner {
    pub fn new(log_target: Arc<str>) -> Self {
        Self { log_target }
    }

    async fn scan(log_target: Arc<str>) -> Result<Vec<LocalInterface>, InterfaceScanError> {
        let ip_addresses = crate::process::run("ip", &["-json", "address"]).await?;
        Self::parse_output(&ip_addresses, &log_target).map_err(Into::into)
    }

    fn parse_output(
        ip_address_output: &[u8],
        log_target: &str,
    ) -> Result<Vec<LocalInterface>, serde_json::Error> {
        let links: Vec<Link> = serde_json::from_slice(ip_address_output)?;
        links
            .iter()
            .for_each(|l| log::debug!(target: log_target, "Scanned IP link: {:?}", l));

        let interfaces: Vec<_> = links.into_iter().map(Into::into).collect();
        interfaces
            .iter()
            .for_each(|i| log::info!(target: log_target, "Network interface: {:?}", i));
        Ok(interfaces)
    }
}

impl InterfaceScanner for IpRoute2InterfaceScanner {
    fn supports_current_operating_system(&self) -> BoxFuture<'static, bool> {
        crate::process::probe("ip", &["-Version"], self.log_target.clone()).boxed()
    }

    fn scan(&self) -> BoxFuture<'static, Result<Vec<LocalInterface>, InterfaceScanError>> {
        Self::scan(self.log_target.clone()).boxed()
    }
}

#[derive(Deserialize, Debug)]
struct Link {
    ifindex: u32,
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    addr_info: Vec<AddressInfo>,
}

#[derive(Deserialize, Debug)]
struct AddressInfo {
    local: Option<IpAddr>,
}

impl From<Link> for LocalInterface {
    fn from(value: Link) -> Self {
        Self {
            up: value.flags.iter().any(|f| f == "UP"),
            addresses: value.addr_info.into_iter().filter_map(|a| a.local).collect(),
            name: value.ifname,
            index: value.ifindex,
        }
    }
}
