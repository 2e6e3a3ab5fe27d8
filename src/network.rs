//! Host network interfaces as seen by the address picker.
//!
//! `HostNetwork` lists every IPv4 interface on the host so the picker can
//! tell whether some adapter it does not own already sits on a subnet.

use async_trait::async_trait;
use pnet::datalink;
use pnet::ipnetwork::IpNetwork;

use crate::error::DevboxError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub ip: String,
    pub hardware_address: String,
    /// False for an interface the picker proposes but nobody has created yet.
    pub exists: bool,
}

impl NetworkInterface {
    /// An interface that still has to be created with the given host IP.
    pub fn planned(ip: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            ip: ip.into(),
            hardware_address: String::new(),
            exists: false,
        }
    }
}

#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Every live interface on the host that carries an IPv4 address.
    async fn interfaces(&self) -> Result<Vec<NetworkInterface>, DevboxError>;
}

#[async_trait]
pub trait InterfaceUsage: Send + Sync {
    /// Whether a running VM is attached to the named host-only interface.
    async fn is_interface_in_use(&self, name: &str) -> Result<bool, DevboxError>;
}

// ── HostNetwork ──────────────────────────────────────────

/// Reads the host's interfaces through `pnet`.
pub struct HostNetwork;

#[async_trait]
impl NetworkProbe for HostNetwork {
    async fn interfaces(&self) -> Result<Vec<NetworkInterface>, DevboxError> {
        let found = tokio::task::spawn_blocking(datalink::interfaces)
            .await
            .map_err(|e| DevboxError::Transport {
                context: "listing host interfaces".into(),
                message: e.to_string(),
            })?;
        let interfaces: Vec<NetworkInterface> = found.iter().flat_map(ipv4_entries).collect();
        tracing::debug!(count = interfaces.len(), "host IPv4 interfaces");
        Ok(interfaces)
    }
}

/// One entry per IPv4 address of `iface`.
pub fn ipv4_entries(iface: &datalink::NetworkInterface) -> Vec<NetworkInterface> {
    let mac = iface.mac.map(|m| m.to_string()).unwrap_or_default();
    iface
        .ips
        .iter()
        .filter_map(|net| match net {
            IpNetwork::V4(v4) => Some(NetworkInterface {
                name: iface.name.clone(),
                ip: v4.ip().to_string(),
                hardware_address: mac.clone(),
                exists: true,
            }),
            IpNetwork::V6(_) => None,
        })
        .collect()
}
