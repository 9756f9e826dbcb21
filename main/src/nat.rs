//! Static 1:1 NAT address translation.
//!
//! Each configured entry is either `external` or `external/local`. Entries with an explicit
//! local IP form a fixed pair. Entries without one are paired with the remaining local
//! addresses of the same family in ascending address order, so the outcome does not depend
//! on the order in which the operating system reports its interfaces.

use std::collections::HashMap;
use std::collections::HashSet;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// How an externally mapped address is advertised.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum Nat1To1CandidateType {
    /// The external address replaces the local one in a host candidate.
    #[default]
    Host,

    /// A server-reflexive candidate carries the external address next to the host candidate.
    ServerReflexive,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Nat1To1Mapping {
    pub external: IpAddr,
    pub local: Option<IpAddr>,
}

impl FromStr for Nat1To1Mapping {
    type Err = Nat1To1ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Nat1To1ConfigError::InvalidEntry(s.into());
        let mut parts = s.trim().split('/');
        let external = parts
            .next()
            .and_then(|p| p.parse::<IpAddr>().ok())
            .ok_or_else(invalid)?;
        let local = parts
            .next()
            .map(|p| p.parse::<IpAddr>().map_err(|_| invalid()))
            .transpose()?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        if local.is_some_and(|l| l.is_ipv4() != external.is_ipv4()) {
            return Err(Nat1To1ConfigError::AddressFamilyMismatch(s.into()));
        }
        Ok(Self { external, local })
    }
}

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum Nat1To1ConfigError {
    #[error("Invalid 1:1 NAT entry `{0}`")]
    InvalidEntry(String),

    #[error("1:1 NAT entry `{0}` mixes IPv4 and IPv6")]
    AddressFamilyMismatch(String),

    #[error("External IP {0} appears in more than one 1:1 NAT entry")]
    DuplicateExternalIp(IpAddr),

    #[error("Local IP {0} appears in more than one 1:1 NAT entry")]
    DuplicateLocalIp(IpAddr),
}

#[derive(Debug, Default, Clone)]
pub struct Nat1To1Translator {
    mappings: Vec<Nat1To1Mapping>,
    candidate_type: Nat1To1CandidateType,
}

impl Nat1To1Translator {
    pub fn new<I>(entries: I, candidate_type: Nat1To1CandidateType) -> Result<Self, Nat1To1ConfigError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mappings = entries
            .into_iter()
            .map(|e| e.as_ref().parse())
            .collect::<Result<Vec<Nat1To1Mapping>, _>>()?;

        let mut external_ips = HashSet::new();
        let mut local_ips = HashSet::new();
        for mapping in mappings.iter() {
            if !external_ips.insert(mapping.external) {
                return Err(Nat1To1ConfigError::DuplicateExternalIp(mapping.external));
            }
            if let Some(local) = mapping.local {
                if !local_ips.insert(local) {
                    return Err(Nat1To1ConfigError::DuplicateLocalIp(local));
                }
            }
        }

        Ok(Self {
            mappings,
            candidate_type,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.mappings.is_empty()
    }

    pub fn candidate_type(&self) -> Nat1To1CandidateType {
        self.candidate_type
    }

    /// Pairs every mapping with one of `local_ips`. Each external IP is used at most once.
    pub fn resolve(&self, local_ips: &[IpAddr], log_target: &str) -> ExternalIpMap {
        let mut local_to_external = HashMap::new();

        for mapping in self.mappings.iter() {
            let Some(local) = mapping.local else {
                continue;
            };
            if local_ips.contains(&local) {
                local_to_external.insert(local, mapping.external);
            } else {
                log::warn!(
                    target: log_target,
                    "1:1 NAT maps {} to {}, but no such local address was found",
                    mapping.external,
                    local
                );
            }
        }

        let mut unmapped_locals: Vec<_> = local_ips
            .iter()
            .copied()
            .filter(|ip| !local_to_external.contains_key(ip))
            .collect();
        unmapped_locals.sort();
        unmapped_locals.dedup();

        for mapping in self.mappings.iter().filter(|m| m.local.is_none()) {
            let position = unmapped_locals
                .iter()
                .position(|ip| ip.is_ipv4() == mapping.external.is_ipv4());
            match position {
                Some(i) => {
                    let local = unmapped_locals.remove(i);
                    log::debug!(
                        target: log_target,
                        "1:1 NAT pairs {} with local address {}",
                        mapping.external,
                        local
                    );
                    local_to_external.insert(local, mapping.external);
                }
                None => log::warn!(
                    target: log_target,
                    "1:1 NAT external IP {} has no local address left to pair with",
                    mapping.external
                ),
            }
        }

        ExternalIpMap(local_to_external)
    }
}

/// Local IP to external IP, as resolved for one gathering pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExternalIpMap(HashMap<IpAddr, IpAddr>);

impl ExternalIpMap {
    pub fn external_ip(&self, local: IpAddr) -> Option<IpAddr> {
        self.0.get(&local).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn parse_entries() {
        assert_eq!(
            "1.2.3.4".parse(),
            Ok(Nat1To1Mapping {
                external: ip("1.2.3.4"),
                local: None
            })
        );
        assert_eq!(
            "1.2.3.4/10.0.0.1".parse(),
            Ok(Nat1To1Mapping {
                external: ip("1.2.3.4"),
                local: Some(ip("10.0.0.1"))
            })
        );
    }

    #[test]
    fn reject_malformed_entries() {
        for entry in ["", "1.2.3", "1.2.3.4/", "1.2.3.4/10.0.0.1/10.0.0.2", "host/10.0.0.1"] {
            assert_eq!(
                entry.parse::<Nat1To1Mapping>(),
                Err(Nat1To1ConfigError::InvalidEntry(entry.into())),
                "`{}` must be rejected",
                entry
            );
        }
        assert_eq!(
            "1.2.3.4/fd00::1".parse::<Nat1To1Mapping>(),
            Err(Nat1To1ConfigError::AddressFamilyMismatch(
                "1.2.3.4/fd00::1".into()
            ))
        );
    }

    #[test]
    fn reject_duplicates() {
        let e = Nat1To1Translator::new(["1.2.3.4", "1.2.3.4/10.0.0.1"], Default::default())
            .unwrap_err();
        assert_eq!(e, Nat1To1ConfigError::DuplicateExternalIp(ip("1.2.3.4")));

        let e = Nat1To1Translator::new(
            ["1.2.3.4/10.0.0.1", "1.2.3.5/10.0.0.1"],
            Default::default(),
        )
        .unwrap_err();
        assert_eq!(e, Nat1To1ConfigError::DuplicateLocalIp(ip("10.0.0.1")));
    }

    #[test]
    fn explicit_pairs() {
        let translator = Nat1To1Translator::new(
            ["1.2.3.4/10.0.0.1", "1.2.3.5/10.0.0.2", "1.2.3.6/10.0.0.9"],
            Default::default(),
        )
        .unwrap();

        // When
        let map = translator.resolve(&[ip("10.0.0.2"), ip("10.0.0.1")], "test");

        // Then
        assert_eq!(map.len(), 2);
        assert_eq!(map.external_ip(ip("10.0.0.1")), Some(ip("1.2.3.4")));
        assert_eq!(map.external_ip(ip("10.0.0.2")), Some(ip("1.2.3.5")));
        assert_eq!(map.external_ip(ip("10.0.0.9")), None);
    }

    #[test]
    fn unbound_entries_follow_address_order() {
        let translator = Nat1To1Translator::new(
            ["1.2.3.4", "1.2.3.5/10.0.0.2", "1.2.3.6", "1.2.3.7"],
            Default::default(),
        )
        .unwrap();

        // When
        let map = translator.resolve(
            &[ip("10.0.0.3"), ip("fd00::1"), ip("10.0.0.2"), ip("10.0.0.1")],
            "test",
        );

        // Then
        assert_eq!(map.len(), 3);
        assert_eq!(map.external_ip(ip("10.0.0.1")), Some(ip("1.2.3.4")));
        assert_eq!(map.external_ip(ip("10.0.0.2")), Some(ip("1.2.3.5")));
        assert_eq!(map.external_ip(ip("10.0.0.3")), Some(ip("1.2.3.6")));
        assert_eq!(map.external_ip(ip("fd00::1")), None);
    }

    #[test]
    fn unbound_entries_respect_address_family() {
        let translator =
            Nat1To1Translator::new(["2001:db8::1", "1.2.3.4"], Default::default()).unwrap();

        // When
        let map = translator.resolve(&[ip("10.0.0.1"), ip("fd00::1")], "test");

        // Then
        assert_eq!(map.external_ip(ip("10.0.0.1")), Some(ip("1.2.3.4")));
        assert_eq!(map.external_ip(ip("fd00::1")), Some(ip("2001:db8::1")));
    }

    #[test]
    fn disabled_without_entries() {
        let translator =
            Nat1To1Translator::new(Vec::<String>::new(), Nat1To1CandidateType::ServerReflexive)
                .unwrap();
        assert!(!translator.is_enabled());
        assert!(translator.resolve(&[ip("10.0.0.1")], "test").is_empty());
    }
}
