//! Machine id discovery from the host's private IPv4 address.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use crate::idgen::FlakeError;

/// Routable address used only to make the kernel pick an outbound interface.
/// Nothing is ever sent to it.
const PROBE_TARGET: &str = "8.8.8.8:80";

/// 10/8, 172.16/12, 192.168/16 and link-local 169.254/16.
pub fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    a == 10
        || (a == 172 && (16..32).contains(&b))
        || (a == 192 && b == 168)
        || (a == 169 && b == 254)
}

/// First private IPv4 address in `addrs`.
pub fn private_ipv4(addrs: &[IpAddr]) -> Option<Ipv4Addr> {
    addrs.iter().find_map(|addr| match addr {
        IpAddr::V4(v4) if is_private_ipv4(*v4) => Some(*v4),
        _ => None,
    })
}

/// Lower 16 bits of the first private IPv4 address in `addrs`.
pub fn lower_16_bit_private_ip(addrs: &[IpAddr]) -> Result<u16, FlakeError> {
    let ip = private_ipv4(addrs).ok_or(FlakeError::NoPrivateAddress)?;
    let [_, _, c, d] = ip.octets();
    Ok(u16::from(c) << 8 | u16::from(d))
}

/// Local IPv4 candidates: the outbound address first, then every address
/// assigned to an interface.
pub fn interface_addrs() -> Vec<IpAddr> {
    merge_addrs(outbound_addr(), listed_addrs())
}

fn merge_addrs(outbound: Option<IpAddr>, listed: Vec<IpAddr>) -> Vec<IpAddr> {
    let mut addrs: Vec<IpAddr> = outbound.into_iter().collect();
    for addr in listed {
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }
    addrs
}

/// Address the kernel would pick for outbound traffic, if there is a route.
fn outbound_addr() -> Option<IpAddr> {
    let probe = UdpSocket::bind("0.0.0.0:0").and_then(|socket| {
        socket.connect(PROBE_TARGET)?;
        socket.local_addr()
    });

    match probe {
        Ok(local) => Some(local.ip()),
        Err(e) => {
            tracing::debug!(error = %e, "Outbound interface probe failed");
            None
        }
    }
}

#[cfg(unix)]
fn listed_addrs() -> Vec<IpAddr> {
    match nix::ifaddrs::getifaddrs() {
        Ok(ifaddrs) => ifaddrs
            .filter_map(|ifaddr| {
                let sin = ifaddr.address?.as_sockaddr_in().copied()?;
                Some(IpAddr::V4(*std::net::SocketAddrV4::from(sin).ip()))
            })
            .collect(),
        Err(e) => {
            tracing::debug!(error = %e, "Listing interface addresses failed");
            Vec::new()
        }
    }
}

#[cfg(not(unix))]
fn listed_addrs() -> Vec<IpAddr> {
    Vec::new()
}

/// Machine id derived from this host's private address.
pub fn default_machine_id() -> Result<u32, FlakeError> {
    lower_16_bit_private_ip(&interface_addrs()).map(u32::from)
}
