//! Host-only subnets a devbox VM may live on, and the picker choosing one.
//!
//! Each allowed `/24` maps to exactly one host address (`.1`), one guest
//! address (`.11`) and one domain. The table is fixed; its order is the
//! only priority the picker knows.

use std::net::Ipv4Addr;

use crate::error::DevboxError;
use crate::network::{InterfaceUsage, NetworkInterface, NetworkProbe};

pub const ALLOWED_SUBNETS: &[&str] = &[
    "192.168.11.0",
    "192.168.22.0",
    "192.168.33.0",
    "192.168.44.0",
    "192.168.55.0",
    "192.168.66.0",
    "192.168.77.0",
    "192.168.88.0",
    "192.168.99.0",
];

pub const DOMAIN_SUFFIX: &str = "devbox.io";

const HOST_OCTET: u8 = 1;
const GUEST_OCTET: u8 = 11;

// ── allow-list lookups ───────────────────────────────────

fn invalid(address: &str) -> DevboxError {
    DevboxError::InvalidAddress {
        address: address.to_string(),
    }
}

fn parse(address: &str) -> Result<Ipv4Addr, DevboxError> {
    address.trim().parse().map_err(|_| invalid(address))
}

fn with_last_octet(ip: Ipv4Addr, last: u8) -> Ipv4Addr {
    let [a, b, c, _] = ip.octets();
    Ipv4Addr::new(a, b, c, last)
}

/// Position of an allowed subnet in the table.
fn subnet_index(subnet: &str) -> Result<usize, DevboxError> {
    let net = parse(subnet)?;
    ALLOWED_SUBNETS
        .iter()
        .position(|s| s.parse::<Ipv4Addr>().is_ok_and(|s| s == net))
        .ok_or_else(|| invalid(subnet))
}

fn domain_for_index(index: usize) -> String {
    if index == 0 {
        format!("local.{DOMAIN_SUFFIX}")
    } else {
        format!("local{}.{DOMAIN_SUFFIX}", index + 1)
    }
}

/// Guest address of an allowed subnet: `192.168.11.0` → `192.168.11.11`.
pub fn ip_for_subnet(subnet: &str) -> Result<String, DevboxError> {
    subnet_index(subnet)?;
    Ok(with_last_octet(parse(subnet)?, GUEST_OCTET).to_string())
}

/// Host-side address of an allowed subnet: `192.168.11.0` → `192.168.11.1`.
pub fn gateway_for_subnet(subnet: &str) -> Result<String, DevboxError> {
    subnet_index(subnet)?;
    Ok(with_last_octet(parse(subnet)?, HOST_OCTET).to_string())
}

/// Allowed subnet containing any address of its `/24`.
pub fn subnet_for_ip(ip: &str) -> Result<String, DevboxError> {
    let net = with_last_octet(parse(ip)?, 0).to_string();
    subnet_index(&net).map_err(|_| invalid(ip))?;
    Ok(net)
}

/// Domain served by a guest address. Only the `.11` address has one.
pub fn domain_for_ip(ip: &str) -> Result<String, DevboxError> {
    let addr = parse(ip)?;
    if addr.octets()[3] != GUEST_OCTET {
        return Err(invalid(ip));
    }
    let subnet = subnet_for_ip(ip)?;
    Ok(domain_for_index(subnet_index(&subnet)?))
}

pub fn subnet_for_domain(domain: &str) -> Result<String, DevboxError> {
    let wanted = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    (0..ALLOWED_SUBNETS.len())
        .find(|&i| domain_for_index(i) == wanted)
        .map(|i| ALLOWED_SUBNETS[i].to_string())
        .ok_or_else(|| invalid(domain))
}

// ── Picker ───────────────────────────────────────────────

/// Outcome of a selection: the host-only interface to use (existing or to
/// be created) and what the guest will be reachable as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub subnet: String,
    pub interface: NetworkInterface,
    pub vm_ip: String,
    pub vm_domain: String,
}

impl NetworkConfig {
    fn for_subnet(subnet: &str, interface: NetworkInterface) -> Result<Self, DevboxError> {
        let vm_ip = ip_for_subnet(subnet)?;
        let vm_domain = domain_for_ip(&vm_ip)?;
        Ok(Self {
            subnet: subnet.to_string(),
            interface,
            vm_ip,
            vm_domain,
        })
    }
}

pub struct Picker<'a, N: NetworkProbe + ?Sized, U: InterfaceUsage + ?Sized> {
    network: &'a N,
    usage: &'a U,
    subnets: &'a [&'a str],
}

impl<'a, N: NetworkProbe + ?Sized, U: InterfaceUsage + ?Sized> Picker<'a, N, U> {
    pub fn new(network: &'a N, usage: &'a U) -> Self {
        Self {
            network,
            usage,
            subnets: ALLOWED_SUBNETS,
        }
    }

    /// Scan a different candidate list (still checked against the allow-list).
    pub fn with_subnets(mut self, subnets: &'a [&'a str]) -> Self {
        self.subnets = subnets;
        self
    }

    /// Pick a host-only network for a new VM.
    ///
    /// `reusable` are host-only interfaces this tool may take over. A pinned
    /// `ip` or `domain` bypasses the scan and never looks at live interfaces.
    pub async fn select_available_interface(
        &self,
        reusable: &[NetworkInterface],
        ip: Option<&str>,
        domain: Option<&str>,
    ) -> Result<NetworkConfig, DevboxError> {
        let pinned = match (ip, domain) {
            (Some(ip), Some(domain)) => {
                let by_ip = subnet_for_ip(ip)?;
                let by_domain = subnet_for_domain(domain)?;
                if by_ip != by_domain {
                    return Err(DevboxError::Validation {
                        message: format!("{ip} and {domain} belong to different networks"),
                    });
                }
                Some(by_ip)
            }
            (Some(ip), None) => Some(subnet_for_ip(ip)?),
            (None, Some(domain)) => Some(subnet_for_domain(domain)?),
            (None, None) => None,
        };

        match pinned {
            Some(subnet) => {
                let gateway = gateway_for_subnet(&subnet)?;
                let interface = reusable
                    .iter()
                    .find(|i| i.ip == gateway)
                    .cloned()
                    .unwrap_or_else(|| NetworkInterface::planned(&gateway));
                NetworkConfig::for_subnet(&subnet, interface)
            }
            None => self.scan(reusable).await,
        }
    }

    async fn scan(&self, reusable: &[NetworkInterface]) -> Result<NetworkConfig, DevboxError> {
        let live = self.network.interfaces().await?;

        for subnet in self.subnets {
            let gateway = gateway_for_subnet(subnet)?;

            let squatted = live
                .iter()
                .any(|l| l.ip == gateway && !reusable.iter().any(|r| same_adapter(l, r)));
            if squatted {
                tracing::debug!(subnet, "subnet occupied by a foreign interface");
                continue;
            }

            let matching: Vec<&NetworkInterface> =
                reusable.iter().filter(|r| r.ip == gateway).collect();
            match matching.as_slice() {
                [] => return NetworkConfig::for_subnet(subnet, NetworkInterface::planned(gateway)),
                [only] => {
                    if self.usage.is_interface_in_use(&only.name).await? {
                        tracing::debug!(subnet, interface = %only.name, "interface in use");
                        continue;
                    }
                    return NetworkConfig::for_subnet(subnet, (*only).clone());
                }
                many => {
                    tracing::warn!(
                        subnet,
                        count = many.len(),
                        "several host-only interfaces share this address, skipping"
                    );
                }
            }
        }

        Err(DevboxError::AllSubnetsTaken)
    }
}

fn same_adapter(live: &NetworkInterface, reusable: &NetworkInterface) -> bool {
    if !live.hardware_address.is_empty() && !reusable.hardware_address.is_empty() {
        live.hardware_address.eq_ignore_ascii_case(&reusable.hardware_address)
    } else {
        live.name == reusable.name
    }
}
