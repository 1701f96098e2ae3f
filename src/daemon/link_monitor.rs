// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Link and address tracking
//!
//! `LinkMonitor` snapshots the system's interfaces through
//! `pnet::datalink::interfaces()` and turns the difference between two
//! snapshots into `LinkEvent`s. `LinkTable` is the engine's view of the links,
//! kept current by applying those events.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv6Addr};

use crate::protocols::is_link_local;

/// Linux interface flags (from if.h)
pub mod interface_flags {
    pub const IFF_UP: u32 = 0x1;
    pub const IFF_RUNNING: u32 = 0x40;
    pub const IFF_MULTICAST: u32 = 0x1000;
}

/// One network interface as the engine sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub ifindex: u32,
    pub name: String,
    /// Administratively up with carrier (IFF_UP and IFF_RUNNING)
    pub up: bool,
    /// Can join ALL-PIM-ROUTERS
    pub multicast: bool,
    /// Connected IPv6 addresses, in the order the system reports them
    pub addresses: Vec<Ipv6Addr>,
}

impl Link {
    pub fn new(ifindex: u32, name: &str, up: bool, addresses: Vec<Ipv6Addr>) -> Self {
        Self {
            ifindex,
            name: name.to_string(),
            up,
            multicast: true,
            addresses,
        }
    }

    /// First connected link-local address
    pub fn link_local_address(&self) -> Option<Ipv6Addr> {
        self.addresses.iter().copied().find(is_link_local)
    }

    pub fn from_pnet(iface: &pnet::datalink::NetworkInterface) -> Self {
        use interface_flags::*;
        let addresses = iface
            .ips
            .iter()
            .filter_map(|net| match net.ip() {
                IpAddr::V6(v6) => Some(v6),
                IpAddr::V4(_) => None,
            })
            .collect();
        Self {
            ifindex: iface.index,
            name: iface.name.clone(),
            up: (iface.flags & (IFF_UP | IFF_RUNNING)) == (IFF_UP | IFF_RUNNING),
            multicast: iface.flags & IFF_MULTICAST != 0,
            addresses,
        }
    }
}

/// Link or address notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Added(Link),
    Deleted(u32),
    StateChanged { ifindex: u32, up: bool },
    AddressAdded { ifindex: u32, address: Ipv6Addr },
    AddressRemoved { ifindex: u32, address: Ipv6Addr },
}

impl LinkEvent {
    pub fn ifindex(&self) -> u32 {
        match self {
            LinkEvent::Added(link) => link.ifindex,
            LinkEvent::Deleted(ifindex)
            | LinkEvent::StateChanged { ifindex, .. }
            | LinkEvent::AddressAdded { ifindex, .. }
            | LinkEvent::AddressRemoved { ifindex, .. } => *ifindex,
        }
    }
}

/// Known links keyed by ifindex
#[derive(Debug, Default, Clone)]
pub struct LinkTable {
    links: BTreeMap<u32, Link>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ifindex: u32) -> Option<&Link> {
        self.links.get(&ifindex)
    }

    pub fn by_name(&self, name: &str) -> Option<&Link> {
        self.links.values().find(|link| link.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Update the table. Returns false for events about unknown links.
    pub fn apply(&mut self, event: &LinkEvent) -> bool {
        match event {
            LinkEvent::Added(link) => {
                self.links.insert(link.ifindex, link.clone());
                true
            }
            LinkEvent::Deleted(ifindex) => self.links.remove(ifindex).is_some(),
            LinkEvent::StateChanged { ifindex, up } => match self.links.get_mut(ifindex) {
                Some(link) => {
                    link.up = *up;
                    true
                }
                None => false,
            },
            LinkEvent::AddressAdded { ifindex, address } => match self.links.get_mut(ifindex) {
                Some(link) => {
                    if !link.addresses.contains(address) {
                        link.addresses.push(*address);
                    }
                    true
                }
                None => false,
            },
            LinkEvent::AddressRemoved { ifindex, address } => match self.links.get_mut(ifindex) {
                Some(link) => {
                    link.addresses.retain(|a| a != address);
                    true
                }
                None => false,
            },
        }
    }
}

/// Current interfaces of the host
pub fn scan_links() -> Vec<Link> {
    pnet::datalink::interfaces()
        .iter()
        .map(Link::from_pnet)
        .collect()
}

/// Polls the system link list and reports what changed since the last poll
#[derive(Debug, Default)]
pub struct LinkMonitor {
    known: BTreeMap<u32, Link>,
}

impl LinkMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll(&mut self) -> Vec<LinkEvent> {
        self.diff(scan_links())
    }

    /// Compare `current` with the previous snapshot and remember it
    ///
    /// Deletions come first, then additions, then per-link state and address
    /// changes.
    pub fn diff(&mut self, current: Vec<Link>) -> Vec<LinkEvent> {
        let current: BTreeMap<u32, Link> = current.into_iter().map(|l| (l.ifindex, l)).collect();
        let mut events = Vec::new();

        for ifindex in self.known.keys() {
            if !current.contains_key(ifindex) {
                events.push(LinkEvent::Deleted(*ifindex));
            }
        }

        for (ifindex, link) in &current {
            let Some(old) = self.known.get(ifindex) else {
                events.push(LinkEvent::Added(link.clone()));
                continue;
            };

            if old.up != link.up {
                events.push(LinkEvent::StateChanged {
                    ifindex: *ifindex,
                    up: link.up,
                });
            }
            for address in &old.addresses {
                if !link.addresses.contains(address) {
                    events.push(LinkEvent::AddressRemoved {
                        ifindex: *ifindex,
                        address: *address,
                    });
                }
            }
            for address in &link.addresses {
                if !old.addresses.contains(address) {
                    events.push(LinkEvent::AddressAdded {
                        ifindex: *ifindex,
                        address: *address,
                    });
                }
            }
        }

        self.known = current;
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_link_local_address_skips_global() {
        let link = Link::new(2, "eth0", true, vec![addr("2001:db8::1"), addr("fe80::1")]);
        assert_eq!(link.link_local_address(), Some(addr("fe80::1")));

        let link = Link::new(2, "eth0", true, vec![addr("2001:db8::1")]);
        assert_eq!(link.link_local_address(), None);
    }

    #[test]
    fn test_first_poll_reports_all_links_added() {
        let mut monitor = LinkMonitor::new();
        let events = monitor.diff(vec![
            Link::new(1, "lo", true, vec![]),
            Link::new(2, "eth0", true, vec![addr("fe80::1")]),
        ]);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], LinkEvent::Added(l) if l.name == "lo"));
        assert!(monitor.diff(vec![
            Link::new(1, "lo", true, vec![]),
            Link::new(2, "eth0", true, vec![addr("fe80::1")]),
        ])
        .is_empty());
    }

    #[test]
    fn test_diff_reports_changes() {
        let mut monitor = LinkMonitor::new();
        monitor.diff(vec![
            Link::new(2, "eth0", true, vec![addr("fe80::1")]),
            Link::new(3, "eth1", true, vec![]),
        ]);

        let events = monitor.diff(vec![Link::new(
            2,
            "eth0",
            false,
            vec![addr("fe80::2")],
        )]);
        assert_eq!(
            events,
            vec![
                LinkEvent::Deleted(3),
                LinkEvent::StateChanged {
                    ifindex: 2,
                    up: false
                },
                LinkEvent::AddressRemoved {
                    ifindex: 2,
                    address: addr("fe80::1")
                },
                LinkEvent::AddressAdded {
                    ifindex: 2,
                    address: addr("fe80::2")
                },
            ]
        );
    }

    fn pnet_iface(index: u32, flags: u32) -> pnet::datalink::NetworkInterface {
        pnet::datalink::NetworkInterface {
            name: "eth0".to_string(),
            description: String::new(),
            index,
            mac: None,
            ips: vec![],
            flags,
        }
    }

    #[test]
    fn test_from_pnet_requires_carrier() {
        use interface_flags::*;
        let link = Link::from_pnet(&pnet_iface(2, IFF_UP | IFF_RUNNING | IFF_MULTICAST));
        assert!(link.up);
        assert!(link.multicast);

        // Administratively up but no carrier
        let link = Link::from_pnet(&pnet_iface(2, IFF_UP | IFF_MULTICAST));
        assert!(!link.up);

        let link = Link::from_pnet(&pnet_iface(2, IFF_RUNNING));
        assert!(!link.up);
        assert!(!link.multicast);
    }

    #[test]
    fn test_diff_reports_lost_carrier() {
        use interface_flags::*;
        let mut monitor = LinkMonitor::new();
        let with_carrier = Link::from_pnet(&pnet_iface(2, IFF_UP | IFF_RUNNING | IFF_MULTICAST));
        let without_carrier = Link::from_pnet(&pnet_iface(2, IFF_UP | IFF_MULTICAST));
        monitor.diff(vec![with_carrier.clone()]);

        let events = monitor.diff(vec![without_carrier]);
        assert_eq!(
            events,
            vec![LinkEvent::StateChanged {
                ifindex: 2,
                up: false
            }]
        );

        let events = monitor.diff(vec![with_carrier]);
        assert_eq!(
            events,
            vec![LinkEvent::StateChanged {
                ifindex: 2,
                up: true
            }]
        );
    }

    #[test]
    fn test_link_table_apply() {
        let mut table = LinkTable::new();
        assert!(table.apply(&LinkEvent::Added(Link::new(2, "eth0", true, vec![]))));
        assert!(table.apply(&LinkEvent::AddressAdded {
            ifindex: 2,
            address: addr("fe80::1")
        }));
        assert_eq!(table.by_name("eth0").unwrap().link_local_address(), Some(addr("fe80::1")));

        assert!(table.apply(&LinkEvent::StateChanged {
            ifindex: 2,
            up: false
        }));
        assert!(!table.get(2).unwrap().up);

        assert!(table.apply(&LinkEvent::AddressRemoved {
            ifindex: 2,
            address: addr("fe80::1")
        }));
        assert!(table.get(2).unwrap().addresses.is_empty());

        assert!(!table.apply(&LinkEvent::StateChanged {
            ifindex: 9,
            up: true
        }));
        assert!(table.apply(&LinkEvent::Deleted(2)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_scan_links_does_not_panic() {
        for link in scan_links() {
            assert!(!link.name.is_empty());
        }
    }
}
