use super::InterfaceScanError;
use super::InterfaceScanner;
use crate::network::LocalInterface;
use csv::Reader;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;

pub struct PowerShellInterfaceScanner {
    log_target: Arc<str>,
}

impl PowerShellInterfaceScanner {
    pub fn new(log_target: Arc<str>) -> Self {
        Self { log_target }
    }

    async fn scan(log_target: Arc<str>) -> Result<Vec<LocalInterface>, InterfaceScanError> {
        let stdout = crate::process::eval(
            "pwsh",
            &["-Command", "-"],
            include_bytes!("./Print-NetIpAddresses.ps1"),
        )
        .await?;
        Self::parse_output(&stdout, &log_target).map_err(Into::into)
    }

    fn parse_output(output: &[u8], log_target: &str) -> Result<Vec<LocalInterface>, csv::Error> {
        let addresses = Reader::from_reader(output)
            .deserialize()
            .collect::<Result<Vec<NetIpAddress>, _>>()?;
        addresses
            .iter()
            .for_each(|a| log::debug!(target: log_target, "Scanned IP address: {:?}", a));

        // Rows come one per address, grouped here by interface in first-seen order.
        let mut interfaces: Vec<LocalInterface> = vec![];
        for address in addresses {
            let Some(ip) = address.ip() else {
                log::debug!(
                    target: log_target,
                    "Ignoring unparsable IP address `{}`",
                    address.IPAddress
                );
                continue;
            };
            match interfaces
                .iter_mut()
                .find(|i| i.index == address.InterfaceIndex)
            {
                Some(interface) => interface.addresses.push(ip),
                None => interfaces.push(LocalInterface {
                    name: address.InterfaceAlias,
                    index: address.InterfaceIndex,
                    up: true,
                    addresses: vec![ip],
                }),
            }
        }
        interfaces
            .iter()
            .for_each(|i| log::info!(target: log_target, "Network interface: {:?}", i));

        Ok(interfaces)
    }
}

impl InterfaceScanner for PowerShellInterfaceScanner {
    fn supports_current_operating_system(&self) -> BoxFuture<'static, bool> {
        crate::process::probe(
            "pwsh",
            &["-Command", "Get-Command Get-NetIPAddress"],
            self.log_target.clone(),
        )
        .boxed()
    }

    fn scan(&self) -> BoxFuture<'static, Result<Vec<LocalInterface>, InterfaceScanError>> {
        Self::scan(self.log_target.clone()).boxed()
    }
}

#[derive(Deserialize, Debug)]
#[allow(non_snake_case)]
struct NetIpAddress {
    InterfaceIndex: u32,
    InterfaceAlias: String,
    IPAddress: String,
}

impl NetIpAddress {
    /// Link-local addresses carry a zone suffix such as `%12`.
    fn ip(&self) -> Option<IpAddr> {
        let without_zone = self.IPAddress.split('%').next()?;
        without_zone.parse().ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn scan() {
        crate::test::init();

        let scanner = PowerShellInterfaceScanner::new("test".into());

        if !scanner.supports_current_operating_system().await {
            println!("PowerShell networking cmdlets do not exist, skipping.");
            return;
        }

        scanner.scan().await.unwrap();
    }

    #[test]
    fn parse_output() {
        let output = r#"
"InterfaceIndex","InterfaceAlias","IPAddress"
"12","Ethernet","fe80::1:abcd%12"
"1","Loopback Pseudo-Interface 1","::1"
"12","Ethernet","10.0.0.1"
"1","Loopback Pseudo-Interface 1","127.0.0.1"
"7","Wi-Fi","not-an-ip"
        "#
        .trim();
        let expected_interfaces = vec![
            LocalInterface {
                name: "Ethernet".into(),
                index: 12,
                up: true,
                addresses: vec![
                    "fe80::1:abcd".parse().unwrap(),
                    "10.0.0.1".parse().unwrap(),
                ],
            },
            LocalInterface {
                name: "Loopback Pseudo-Interface 1".into(),
                index: 1,
                up: true,
                addresses: vec!["::1".parse().unwrap(), "127.0.0.1".parse().unwrap()],
            },
        ];

        // When
        let actual_interfaces =
            PowerShellInterfaceScanner::parse_output(output.as_bytes(), "test").unwrap();

        // Then
        assert_eq!(actual_interfaces, expected_interfaces);
    }
}
