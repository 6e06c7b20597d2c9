use std::io;

use weft::peer::{NodeName, TrustDomain};
use weft::route::{Endpoint, NodePath, Protocol, Route};

use crate::service::message::{Capability, Close, Message, Open, RouteUpdate, Update};
use crate::wire;
use crate::wire::{Decode, Encode, Framed};

/// Message type.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Open = 0,
    Update = 2,
    Keepalive = 4,
    Close = 6,
    DiscoveryRequest = 8,
    DiscoveryResponse = 10,
}

impl From<MessageType> for u16 {
    fn from(other: MessageType) -> Self {
        other as u16
    }
}

impl TryFrom<u16> for MessageType {
    type Error = u16;

    fn try_from(other: u16) -> Result<Self, Self::Error> {
        match other {
            0 => Ok(MessageType::Open),
            2 => Ok(MessageType::Update),
            4 => Ok(MessageType::Keepalive),
            6 => Ok(MessageType::Close),
            8 => Ok(MessageType::DiscoveryRequest),
            10 => Ok(MessageType::DiscoveryResponse),
            _ => Err(other),
        }
    }
}

impl Encode for NodeName {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.as_str().encode(writer)
    }
}

impl Decode for NodeName {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let name = String::decode(reader)?;
        name.parse().map_err(wire::Error::from)
    }
}

impl Encode for TrustDomain {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.as_str().encode(writer)
    }
}

impl Decode for TrustDomain {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let domain = String::decode(reader)?;
        domain.parse().map_err(wire::Error::from)
    }
}

impl Encode for Endpoint {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.to_string().encode(writer)
    }
}

impl Decode for Endpoint {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let endpoint = String::decode(reader)?;
        endpoint.parse().map_err(wire::Error::from)
    }
}

impl Encode for Protocol {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let tag: u8 = match self {
            Self::Http => 0,
            Self::Graphql => 1,
            Self::Grpc => 2,
        };
        tag.encode(writer)
    }
}

impl Decode for Protocol {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        match u8::decode(reader)? {
            0 => Ok(Self::Http),
            1 => Ok(Self::Graphql),
            2 => Ok(Self::Grpc),
            other => Err(wire::Error::UnknownProtocol(other)),
        }
    }
}

impl Encode for Route {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut n = 0;

        n += self.name.encode(writer)?;
        n += self.protocol.encode(writer)?;
        n += self.endpoint.encode(writer)?;
        n += self.region.encode(writer)?;
        n += self.tags.encode(writer)?;

        Ok(n)
    }
}

impl Decode for Route {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let name = String::decode(reader)?;
        let protocol = Protocol::decode(reader)?;
        let endpoint = Endpoint::decode(reader)?;
        let region = Option::<String>::decode(reader)?;
        let tags = Vec::<String>::decode(reader)?;

        Ok(Self {
            name,
            protocol,
            endpoint,
            region,
            tags,
        })
    }
}

impl Encode for NodePath {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut n = (self.len() as wire::Size).encode(writer)?;

        for name in self.iter() {
            n += name.encode(writer)?;
        }
        Ok(n)
    }
}

impl Decode for NodePath {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        Vec::<NodeName>::decode(reader).map(Self::from)
    }
}

impl Encode for Capability {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut n = self.tag.encode(writer)?;

        n += (self.data.len() as wire::Size).encode(writer)?;
        writer.write_all(&self.data)?;

        Ok(n + self.data.len())
    }
}

impl Decode for Capability {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let tag = u16::decode(reader)?;
        let len = wire::Size::decode(reader)? as usize;
        let mut data = vec![0; len];

        reader.read_exact(&mut data)?;

        Ok(Self { tag, data })
    }
}

impl Encode for Open {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut n = 0;

        n += self.node.encode(writer)?;
        n += self.domains.encode(writer)?;
        n += self.hold_time.encode(writer)?;
        n += self.token.encode(writer)?;
        n += self.capabilities.encode(writer)?;

        Ok(n)
    }
}

impl Decode for Open {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let node = NodeName::decode(reader)?;
        let domains = Vec::<TrustDomain>::decode(reader)?;
        let hold_time = u16::decode(reader)?;
        let token = Option::<String>::decode(reader)?;
        let capabilities = Vec::<Capability>::decode(reader)?;

        Ok(Self {
            node,
            domains,
            hold_time,
            token,
            capabilities,
        })
    }
}

/// Update action tag.
const UPDATE_ADD: u8 = 0;
/// Withdraw action tag.
const UPDATE_REMOVE: u8 = 1;

impl Encode for RouteUpdate {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        // Each entry is length-prefixed so decoders can skip fields appended
        // by newer protocol revisions.
        let mut record = Vec::new();

        match self {
            Self::Add { route, node_path } => {
                UPDATE_ADD.encode(&mut record)?;
                route.encode(&mut record)?;
                node_path.encode(&mut record)?;
            }
            Self::Remove { name } => {
                UPDATE_REMOVE.encode(&mut record)?;
                name.encode(&mut record)?;
            }
        }
        let n = (record.len() as wire::Size).encode(writer)?;
        writer.write_all(&record)?;

        Ok(n + record.len())
    }
}

impl Decode for RouteUpdate {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let len = wire::Size::decode(reader)? as usize;
        let mut record = vec![0; len];

        reader.read_exact(&mut record)?;

        let mut cursor = io::Cursor::new(record.as_slice());
        match u8::decode(&mut cursor)? {
            UPDATE_ADD => {
                let route = Route::decode(&mut cursor)?;
                let node_path = NodePath::decode(&mut cursor)?;

                // Trailing record bytes are unknown optional fields.
                Ok(Self::Add { route, node_path })
            }
            UPDATE_REMOVE => {
                let name = String::decode(&mut cursor)?;

                Ok(Self::Remove { name })
            }
            other => Err(wire::Error::UnknownUpdateAction(other)),
        }
    }
}

impl Encode for Update {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.updates.encode(writer)
    }
}

impl Decode for Update {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let updates = Vec::<RouteUpdate>::decode(reader)?;

        Ok(Self { updates })
    }
}

impl Encode for Close {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.reason.encode(writer)
    }
}

impl Decode for Close {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let reason = Option::<String>::decode(reader)?;

        Ok(Self { reason })
    }
}

impl Message {
    pub fn type_id(&self) -> u16 {
        match self {
            Self::Open { .. } => MessageType::Open,
            Self::Update { .. } => MessageType::Update,
            Self::Keepalive => MessageType::Keepalive,
            Self::Close { .. } => MessageType::Close,
        }
        .into()
    }
}

impl Framed for Message {
    fn frame_type(&self) -> u16 {
        self.type_id()
    }

    fn frame_payload(&self) -> Vec<u8> {
        match self {
            Self::Open(open) => wire::serialize(open),
            Self::Update(update) => wire::serialize(update),
            Self::Keepalive => Vec::new(),
            Self::Close(close) => wire::serialize(close),
        }
    }

    fn from_frame(frame_type: u16, payload: &[u8]) -> Result<Self, wire::Error> {
        let mut cursor = io::Cursor::new(payload);

        // Nb. Trailing payload bytes are deliberately not rejected here:
        // they are unknown optional fields from a newer protocol revision.
        match MessageType::try_from(frame_type) {
            Ok(MessageType::Open) => Ok(Self::Open(Open::decode(&mut cursor)?)),
            Ok(MessageType::Update) => Ok(Self::Update(Update::decode(&mut cursor)?)),
            Ok(MessageType::Keepalive) => Ok(Self::Keepalive),
            Ok(MessageType::Close) => Ok(Self::Close(Close::decode(&mut cursor)?)),
            Ok(other) => Err(wire::Error::UnknownMessageType(other.into())),
            Err(other) => Err(wire::Error::UnknownMessageType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use qcheck_macros::quickcheck;

    use crate::test::arbitrary;
    use crate::wire::{read_frame, write_frame};

    fn frame_round_trip(message: &Message) -> Message {
        let mut buf = Vec::new();
        write_frame(&mut buf, message).unwrap();

        let mut cursor = io::Cursor::new(buf);
        read_frame(&mut cursor).unwrap()
    }

    #[quickcheck]
    fn prop_message_encode_decode(message: Message) {
        assert_eq!(frame_round_trip(&message), message);
    }

    #[quickcheck]
    fn prop_route_encode_decode(route: Route) {
        assert_eq!(
            wire::deserialize::<Route>(&wire::serialize(&route)).unwrap(),
            route
        );
    }

    #[quickcheck]
    fn prop_node_path_encode_decode(path: NodePath) {
        assert_eq!(
            wire::deserialize::<NodePath>(&wire::serialize(&path)).unwrap(),
            path
        );
    }

    #[test]
    fn test_keepalive_is_empty() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Message::Keepalive).unwrap();

        assert_eq!(buf, vec![0, 4, 0, 0]);
    }

    #[test]
    fn test_unknown_message_type() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Message::Keepalive).unwrap();
        buf[1] = 42;

        let mut cursor = io::Cursor::new(buf);
        let err = read_frame::<_, Message>(&mut cursor).unwrap_err();
        assert!(matches!(err, wire::Error::UnknownMessageType(42)));
    }

    #[test]
    fn test_unknown_trailing_fields_ignored() {
        // A newer node appends an extra field to CLOSE; we must still decode.
        let close = Message::close("going away");
        let frame_type = close.type_id();
        let mut payload = close.frame_payload();
        payload.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let decoded = Message::from_frame(frame_type, &payload).unwrap();
        assert_eq!(decoded, close);
    }

    #[test]
    fn test_update_entry_trailing_fields_ignored() {
        // Unknown bytes inside a length-prefixed update record are skipped.
        let route = arbitrary::gen::<Route>(1);
        let update = RouteUpdate::Add {
            route,
            node_path: NodePath::empty(),
        };

        let mut record = Vec::new();
        match &update {
            RouteUpdate::Add { route, node_path } => {
                0u8.encode(&mut record).unwrap();
                route.encode(&mut record).unwrap();
                node_path.encode(&mut record).unwrap();
                record.extend_from_slice(b"future");
            }
            _ => unreachable!(),
        }
        let mut buf = Vec::new();
        (record.len() as wire::Size).encode(&mut buf).unwrap();
        buf.extend_from_slice(&record);

        let decoded = wire::deserialize::<RouteUpdate>(&buf).unwrap();
        assert_eq!(decoded, update);
    }

    #[test]
    fn test_open_version_capability() {
        let open = Message::open(
            arbitrary::gen::<NodeName>(1),
            [arbitrary::gen::<TrustDomain>(1)],
            180,
            Some("s3cr3t".to_owned()),
        );
        let Message::Open(open) = frame_round_trip(&open) else {
            panic!("expected OPEN");
        };
        assert_eq!(open.version(), Some(crate::PROTOCOL_VERSION));
    }
}
