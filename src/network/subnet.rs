use if_addrs::IfAddr;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// Local IPv4 address and the /24 broadcast address derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetAddress {
    local: Ipv4Addr,
    broadcast: Ipv4Addr,
}

impl SubnetAddress {
    /// Assumes a /24 and sets the host octet to 255.
    pub fn from_local(local: Ipv4Addr) -> Self {
        let [a, b, c, _] = local.octets();
        Self {
            local,
            broadcast: Ipv4Addr::new(a, b, c, 255),
        }
    }

    pub fn loopback() -> Self {
        Self::from_local(Ipv4Addr::LOCALHOST)
    }

    pub fn local(&self) -> Ipv4Addr {
        self.local
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        self.broadcast
    }

    pub fn is_loopback(&self) -> bool {
        self.local.is_loopback()
    }

    /// Looks up the local IPv4 interface the receiver is most likely on.
    ///
    /// Among usable addresses, broadcast-capable physical links come first,
    /// then other broadcast-capable links (bridges, containers), then
    /// point-to-point links such as VPNs. Ties keep the OS ordering.
    /// Returns `None` when every interface is down or loopback.
    pub fn detect() -> Option<Self> {
        let interfaces = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!("Cannot list network interfaces: {}", e);
                return None;
            }
        };

        let candidates = interfaces
            .iter()
            .filter(|iface| !iface.is_loopback())
            .filter_map(|iface| match &iface.addr {
                IfAddr::V4(v4) => Some(Candidate {
                    name: &iface.name,
                    ip: v4.ip,
                    has_broadcast: v4.broadcast.is_some(),
                }),
                _ => None,
            });

        let chosen = pick(candidates)?;
        debug!(interface = %chosen.name, ip = %chosen.ip, "local address");
        Some(Self::from_local(chosen.ip))
    }

    /// Like [`detect`](Self::detect) but falls back to loopback.
    ///
    /// The flag is true when the fallback was taken.
    pub fn detect_or_loopback() -> (Self, bool) {
        match Self::detect() {
            Some(subnet) => (subnet, false),
            None => (Self::loopback(), true),
        }
    }
}

struct Candidate<'a> {
    name: &'a str,
    ip: Ipv4Addr,
    has_broadcast: bool,
}

/// Interface name prefixes of bridges, container links and VM host adapters.
const VIRTUAL_PREFIXES: &[&str] = &[
    "docker", "br-", "veth", "virbr", "vmnet", "vboxnet", "tun", "tap",
];

fn rank(candidate: &Candidate<'_>) -> u8 {
    let is_virtual = VIRTUAL_PREFIXES
        .iter()
        .any(|prefix| candidate.name.starts_with(prefix));
    match (candidate.has_broadcast, is_virtual) {
        (true, false) => 0,
        (true, true) => 1,
        (false, _) => 2,
    }
}

fn pick<'a>(candidates: impl Iterator<Item = Candidate<'a>>) -> Option<Candidate<'a>> {
    candidates
        .filter(|candidate| is_usable(candidate.ip))
        .min_by_key(rank)
}

fn is_usable(ip: Ipv4Addr) -> bool {
    !(ip.is_unspecified() || ip.is_loopback() || ip.is_link_local())
}

impl fmt::Display for SubnetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (broadcast {})", self.local, self.broadcast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_replaces_host_octet() {
        let subnet = SubnetAddress::from_local(Ipv4Addr::new(192, 168, 10, 37));
        assert_eq!(subnet.local(), Ipv4Addr::new(192, 168, 10, 37));
        assert_eq!(subnet.broadcast(), Ipv4Addr::new(192, 168, 10, 255));
        assert!(!subnet.is_loopback());
    }

    #[test]
    fn loopback_fallback() {
        let subnet = SubnetAddress::loopback();
        assert!(subnet.is_loopback());
        assert_eq!(subnet.broadcast(), Ipv4Addr::new(127, 0, 0, 255));
    }

    #[test]
    fn link_local_is_not_usable() {
        assert!(!is_usable(Ipv4Addr::new(169, 254, 3, 4)));
        assert!(!is_usable(Ipv4Addr::UNSPECIFIED));
        assert!(is_usable(Ipv4Addr::new(10, 0, 0, 2)));
    }

    fn candidate(name: &str, ip: [u8; 4], has_broadcast: bool) -> Candidate<'_> {
        Candidate {
            name,
            ip: Ipv4Addr::from(ip),
            has_broadcast,
        }
    }

    #[test]
    fn prefers_physical_broadcast_link() {
        let chosen = pick(
            [
                candidate("wg0", [10, 8, 0, 2], false),
                candidate("docker0", [172, 17, 0, 1], true),
                candidate("wlan0", [192, 168, 10, 37], true),
                candidate("eth1", [192, 168, 20, 5], true),
            ]
            .into_iter(),
        )
        .unwrap();
        assert_eq!(chosen.name, "wlan0");
        assert_eq!(
            SubnetAddress::from_local(chosen.ip).broadcast(),
            Ipv4Addr::new(192, 168, 10, 255)
        );
    }

    #[test]
    fn falls_back_to_bridges_then_point_to_point() {
        let chosen = pick(
            [
                candidate("tun0", [10, 8, 0, 2], false),
                candidate("docker0", [172, 17, 0, 1], true),
            ]
            .into_iter(),
        )
        .unwrap();
        assert_eq!(chosen.name, "docker0");

        let chosen = pick([candidate("tun0", [10, 8, 0, 2], false)].into_iter()).unwrap();
        assert_eq!(chosen.name, "tun0");
    }

    #[test]
    fn unusable_addresses_are_skipped() {
        let chosen = pick(
            [
                candidate("eth0", [169, 254, 1, 1], true),
                candidate("eth1", [0, 0, 0, 0], true),
            ]
            .into_iter(),
        );
        assert!(chosen.is_none());
    }

    #[test]
    fn detect_never_returns_loopback() {
        if let Some(subnet) = SubnetAddress::detect() {
            assert!(!subnet.is_loopback());
            assert_eq!(subnet.broadcast().octets()[3], 255);
        }
        let (subnet, fell_back) = SubnetAddress::detect_or_loopback();
        assert_eq!(fell_back, subnet.is_loopback());
    }
}
