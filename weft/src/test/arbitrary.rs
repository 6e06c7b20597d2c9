//! `Arbitrary` instances and generation helpers for property tests.
use std::collections::HashSet;
use std::hash::Hash;
use std::ops::RangeBounds;

use nonempty::NonEmpty;
use qcheck::Arbitrary;

use crate::config::PortEntry;
use crate::peer::{Address, HostName, NodeName, PeerInfo, TrustDomain};
use crate::route::{Endpoint, NodePath, Protocol, Route};

/// Generate a single arbitrary value with the given generator size.
pub fn gen<T: Arbitrary>(size: usize) -> T {
    let mut g = qcheck::Gen::new(size);

    T::arbitrary(&mut g)
}

/// Generate a set of arbitrary values.
pub fn set<T: Eq + Hash + Arbitrary>(range: impl RangeBounds<usize>) -> HashSet<T> {
    let size = fastrand::usize(range);
    let mut set = HashSet::with_capacity(size);
    let mut g = qcheck::Gen::new(size);

    while set.len() < size {
        set.insert(T::arbitrary(&mut g));
    }
    set
}

/// Generate a vector of arbitrary values.
pub fn vec<T: Arbitrary>(size: usize) -> Vec<T> {
    let mut g = qcheck::Gen::new(size);

    (0..size).map(|_| T::arbitrary(&mut g)).collect()
}

fn label(g: &mut qcheck::Gen) -> String {
    let len = usize::arbitrary(g) % 8 + 1;
    (0..len)
        .map(|_| char::from(*g.choose(b"abcdefghijklmnopqrstuvwxyz0123456789").unwrap()))
        .collect()
}

impl Arbitrary for NodeName {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        let labels = usize::arbitrary(g) % 3 + 1;
        let name = (0..labels)
            .map(|_| label(g))
            .collect::<Vec<_>>()
            .join(".");

        name.parse().expect("generated node names are valid")
    }
}

impl Arbitrary for TrustDomain {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        label(g).parse().expect("generated trust domains are valid")
    }
}

impl Arbitrary for Protocol {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        *g.choose(&[Protocol::Http, Protocol::Graphql, Protocol::Grpc])
            .unwrap()
    }
}

impl Arbitrary for Endpoint {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        Endpoint::new(
            (*g.choose(&["http", "https"]).unwrap()).to_owned(),
            label(g),
            u16::arbitrary(g).max(1),
        )
    }
}

impl Arbitrary for Route {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        Route {
            name: label(g),
            protocol: Protocol::arbitrary(g),
            endpoint: Endpoint::arbitrary(g),
            region: bool::arbitrary(g).then(|| label(g)),
            tags: if bool::arbitrary(g) {
                vec![label(g)]
            } else {
                vec![]
            },
        }
    }
}

impl Arbitrary for NodePath {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        let len = usize::arbitrary(g) % 4;
        (0..len).map(|_| NodeName::arbitrary(g)).collect()
    }
}

impl Arbitrary for HostName {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        if bool::arbitrary(g) {
            HostName::Ip(std::net::IpAddr::V4(std::net::Ipv4Addr::from(
                u32::arbitrary(g),
            )))
        } else {
            HostName::Dns(label(g))
        }
    }
}

impl Arbitrary for Address {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        Address::new(HostName::arbitrary(g), u16::arbitrary(g).max(1))
    }
}

impl Arbitrary for PeerInfo {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        let mut domains = NonEmpty::new(TrustDomain::arbitrary(g));
        if bool::arbitrary(g) {
            domains.push(TrustDomain::arbitrary(g));
        }
        PeerInfo {
            name: NodeName::arbitrary(g),
            endpoint: Address::arbitrary(g),
            domains,
            peer_token: bool::arbitrary(g).then(|| label(g)),
        }
    }
}

impl Arbitrary for PortEntry {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        let start = u16::arbitrary(g).max(1);
        if bool::arbitrary(g) {
            PortEntry::Single(start)
        } else {
            let end = start.saturating_add(u16::arbitrary(g) % 64);
            PortEntry::Range(start, end)
        }
    }
}
