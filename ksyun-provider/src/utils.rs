//! Utility functions for value normalization and address arithmetic

use std::net::Ipv4Addr;

/// Normalize region value (e.g., "ksyun.Region.cn_beijing_6" -> "cn-beijing-6")
pub fn normalize_region(s: &str) -> String {
    let region_part = if s.contains('.') {
        s.split('.').next_back().unwrap_or(s)
    } else {
        s
    };
    region_part.replace('_', "-")
}

/// Normalize availability zone value (e.g., "cn_beijing_6a" -> "cn-beijing-6a")
pub fn normalize_availability_zone(s: &str) -> String {
    normalize_region(s)
}

/// Network and broadcast addresses of a CIDR block
pub fn network_range(cidr: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let (ip, prefix) = cidr.split_once('/')?;
    let ip: Ipv4Addr = ip.parse().ok()?;
    let prefix: u32 = prefix.parse().ok()?;
    if prefix > 32 {
        return None;
    }
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    let network = u32::from(ip) & mask;
    let broadcast = network | !mask;
    Some((Ipv4Addr::from(network), Ipv4Addr::from(broadcast)))
}

/// Gateway and DHCP range derived from a subnet CIDR block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetAddresses {
    pub gateway_ip: Ipv4Addr,
    pub dhcp_ip_from: Ipv4Addr,
    pub dhcp_ip_to: Ipv4Addr,
}

/// First usable address as gateway, the next one up to the last usable one
/// as DHCP range. `None` when the block is too small to hold all three.
pub fn subnet_addresses(cidr: &str) -> Option<SubnetAddresses> {
    let (network, broadcast) = network_range(cidr)?;
    let (network, broadcast) = (u32::from(network), u32::from(broadcast));
    let dhcp_ip_from = network.checked_add(2)?;
    let dhcp_ip_to = broadcast.checked_sub(1)?;
    if dhcp_ip_from > dhcp_ip_to {
        return None;
    }
    Some(SubnetAddresses {
        gateway_ip: Ipv4Addr::from(network + 1),
        dhcp_ip_from: Ipv4Addr::from(dhcp_ip_from),
        dhcp_ip_to: Ipv4Addr::from(dhcp_ip_to),
    })
}
