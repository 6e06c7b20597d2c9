//! `Arbitrary` instances for protocol messages.
use qcheck::Arbitrary;

use weft::peer::{NodeName, TrustDomain};
use weft::route::{NodePath, Route};

pub use weft::test::arbitrary::*;

use crate::service::message::{Capability, Close, Message, Open, RouteUpdate, Update};
use crate::wire::message::MessageType;

impl Arbitrary for Capability {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        if bool::arbitrary(g) {
            Capability::version()
        } else {
            let mut data: Vec<u8> = Arbitrary::arbitrary(g);
            data.truncate(16);

            Capability {
                tag: u16::arbitrary(g) | 1,
                data,
            }
        }
    }
}

impl Arbitrary for Open {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        let mut domains = vec![TrustDomain::arbitrary(g)];
        if bool::arbitrary(g) {
            domains.push(TrustDomain::arbitrary(g));
        }
        Open {
            node: NodeName::arbitrary(g),
            domains,
            hold_time: u16::arbitrary(g),
            token: bool::arbitrary(g).then(|| String::from("s3cr3t")),
            capabilities: {
                let mut caps: Vec<Capability> = Arbitrary::arbitrary(g);
                caps.truncate(4);
                caps
            },
        }
    }
}

impl Arbitrary for RouteUpdate {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        if bool::arbitrary(g) {
            RouteUpdate::Add {
                route: Route::arbitrary(g),
                node_path: NodePath::arbitrary(g),
            }
        } else {
            RouteUpdate::Remove {
                name: Route::arbitrary(g).name,
            }
        }
    }
}

impl Arbitrary for Message {
    fn arbitrary(g: &mut qcheck::Gen) -> Self {
        let type_id = g
            .choose(&[
                MessageType::Open,
                MessageType::Update,
                MessageType::Keepalive,
                MessageType::Close,
            ])
            .unwrap();

        match type_id {
            MessageType::Open => Message::Open(Open::arbitrary(g)),
            MessageType::Update => {
                let mut updates: Vec<RouteUpdate> = Arbitrary::arbitrary(g);
                updates.truncate(8);

                Message::Update(Update { updates })
            }
            MessageType::Keepalive => Message::Keepalive,
            MessageType::Close => Message::Close(Close {
                reason: bool::arbitrary(g).then(|| String::from("going away")),
            }),
            _ => unreachable!(),
        }
    }
}
