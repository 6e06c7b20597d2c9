//! xDS: snapshot types and the discovery protocol spoken with the
//! data-plane proxy.
//!
//! The server implements the aggregated discovery pattern over the same
//! framed stream transport as the peering protocol: the proxy subscribes to
//! resource types and is pushed versioned resource sets as snapshots change.
pub mod cache;
pub mod server;

use std::io;
use std::{fmt, net};

use crate::wire;
use crate::wire::message::MessageType;
use crate::wire::{Decode, Encode, Framed};

/// Resource types served over the discovery stream. Clusters are always
/// flushed before listeners, so a listener never references a cluster the
/// proxy has not seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceType {
    /// Upstream clusters (CDS).
    Cluster,
    /// Listeners (LDS). Route configuration is embedded here.
    Listener,
}

impl ResourceType {
    /// All resource types, in flush order.
    pub const ALL: [ResourceType; 2] = [ResourceType::Cluster, ResourceType::Listener];
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => write!(f, "cluster"),
            Self::Listener => write!(f, "listener"),
        }
    }
}

impl Encode for ResourceType {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let tag: u8 = match self {
            Self::Cluster => 0,
            Self::Listener => 1,
        };
        tag.encode(writer)
    }
}

impl Decode for ResourceType {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        match u8::decode(reader)? {
            0 => Ok(Self::Cluster),
            1 => Ok(Self::Listener),
            other => Err(wire::Error::UnknownResourceType(other)),
        }
    }
}

/// A named upstream the proxy forwards matched traffic to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub name: String,
    pub address: String,
    pub port: u16,
}

impl Encode for Cluster {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut n = 0;

        n += self.name.encode(writer)?;
        n += self.address.encode(writer)?;
        n += self.port.encode(writer)?;

        Ok(n)
    }
}

impl Decode for Cluster {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let name = String::decode(reader)?;
        let address = String::decode(reader)?;
        let port = u16::decode(reader)?;

        Ok(Self {
            name,
            address,
            port,
        })
    }
}

/// A bound address and port on the proxy accepting client connections,
/// forwarding to an upstream cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub name: String,
    pub bind_address: net::IpAddr,
    pub port: u16,
    pub upstream_cluster: String,
}

impl Encode for Listener {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut n = 0;

        n += self.name.encode(writer)?;
        n += self.bind_address.to_string().encode(writer)?;
        n += self.port.encode(writer)?;
        n += self.upstream_cluster.encode(writer)?;

        Ok(n)
    }
}

impl Decode for Listener {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let name = String::decode(reader)?;
        let bind_address = String::decode(reader)?
            .parse()
            .map_err(|_| wire::Error::UnexpectedBytes)?;
        let port = u16::decode(reader)?;
        let upstream_cluster = String::decode(reader)?;

        Ok(Self {
            name,
            bind_address,
            port,
            upstream_cluster,
        })
    }
}

/// A versioned bundle of proxy configuration. Only the latest snapshot is
/// ever advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Monotonically increasing decimal string; lexicographic and numeric
    /// orders agree for realistic magnitudes.
    pub version: String,
    pub listeners: Vec<Listener>,
    pub clusters: Vec<Cluster>,
}

impl Snapshot {
    /// The snapshot's resources of the given type, as opaque bytes.
    pub fn resources(&self, typ: ResourceType) -> Vec<Vec<u8>> {
        match typ {
            ResourceType::Cluster => self.clusters.iter().map(wire::serialize).collect(),
            ResourceType::Listener => self.listeners.iter().map(wire::serialize).collect(),
        }
    }
}

/// Request sent by the proxy: a subscription, an ACK, or a NACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub type_url: ResourceType,
    /// Version the proxy has applied, or empty on first subscription.
    pub version_info: String,
    /// Nonce of the response being acknowledged, or empty.
    pub response_nonce: String,
    /// Present when the proxy rejected the previous response.
    pub error_detail: Option<String>,
}

/// Response pushed by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponse {
    pub type_url: ResourceType,
    pub version_info: String,
    /// Fresh opaque string; the proxy echoes it back in its ACK.
    pub nonce: String,
    /// Wire-encoded resources. What was encoded is what decodes back.
    pub resources: Vec<Vec<u8>>,
}

fn encode_bytes<W: io::Write + ?Sized>(bytes: &[u8], writer: &mut W) -> Result<usize, io::Error> {
    let n = (bytes.len() as wire::Size).encode(writer)?;
    writer.write_all(bytes)?;

    Ok(n + bytes.len())
}

fn decode_bytes<R: io::Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>, wire::Error> {
    let len = wire::Size::decode(reader)? as usize;
    let mut bytes = vec![0; len];

    reader.read_exact(&mut bytes)?;

    Ok(bytes)
}

impl Encode for DiscoveryRequest {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut n = 0;

        n += self.type_url.encode(writer)?;
        n += self.version_info.encode(writer)?;
        n += self.response_nonce.encode(writer)?;
        n += self.error_detail.encode(writer)?;

        Ok(n)
    }
}

impl Decode for DiscoveryRequest {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let type_url = ResourceType::decode(reader)?;
        let version_info = String::decode(reader)?;
        let response_nonce = String::decode(reader)?;
        let error_detail = Option::<String>::decode(reader)?;

        Ok(Self {
            type_url,
            version_info,
            response_nonce,
            error_detail,
        })
    }
}

impl Encode for DiscoveryResponse {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut n = 0;

        n += self.type_url.encode(writer)?;
        n += self.version_info.encode(writer)?;
        n += self.nonce.encode(writer)?;
        n += (self.resources.len() as wire::Size).encode(writer)?;
        for resource in &self.resources {
            n += encode_bytes(resource, writer)?;
        }
        Ok(n)
    }
}

impl Decode for DiscoveryResponse {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let type_url = ResourceType::decode(reader)?;
        let version_info = String::decode(reader)?;
        let nonce = String::decode(reader)?;
        let count = wire::Size::decode(reader)? as usize;
        let mut resources = Vec::with_capacity(count.min(1024));

        for _ in 0..count {
            resources.push(decode_bytes(reader)?);
        }
        Ok(Self {
            type_url,
            version_info,
            nonce,
            resources,
        })
    }
}

impl Framed for DiscoveryRequest {
    fn frame_type(&self) -> u16 {
        MessageType::DiscoveryRequest.into()
    }

    fn frame_payload(&self) -> Vec<u8> {
        wire::serialize(self)
    }

    fn from_frame(frame_type: u16, payload: &[u8]) -> Result<Self, wire::Error> {
        if frame_type != u16::from(MessageType::DiscoveryRequest) {
            return Err(wire::Error::UnknownMessageType(frame_type));
        }
        let mut cursor = io::Cursor::new(payload);
        Self::decode(&mut cursor)
    }
}

impl Framed for DiscoveryResponse {
    fn frame_type(&self) -> u16 {
        MessageType::DiscoveryResponse.into()
    }

    fn frame_payload(&self) -> Vec<u8> {
        wire::serialize(self)
    }

    fn from_frame(frame_type: u16, payload: &[u8]) -> Result<Self, wire::Error> {
        if frame_type != u16::from(MessageType::DiscoveryResponse) {
            return Err(wire::Error::UnknownMessageType(frame_type));
        }
        let mut cursor = io::Cursor::new(payload);
        Self::decode(&mut cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_round_trip() {
        let cluster = Cluster {
            name: "billing".to_owned(),
            address: "10.0.0.5".to_owned(),
            port: 8080,
        };
        let bytes = wire::serialize(&cluster);
        assert_eq!(wire::deserialize::<Cluster>(&bytes).unwrap(), cluster);

        let listener = Listener {
            name: "billing".to_owned(),
            bind_address: "0.0.0.0".parse().unwrap(),
            port: 20000,
            upstream_cluster: "billing".to_owned(),
        };
        let bytes = wire::serialize(&listener);
        assert_eq!(wire::deserialize::<Listener>(&bytes).unwrap(), listener);
    }

    #[test]
    fn test_snapshot_resources_round_trip() {
        let snapshot = Snapshot {
            version: "1".to_owned(),
            listeners: vec![Listener {
                name: "billing".to_owned(),
                bind_address: "0.0.0.0".parse().unwrap(),
                port: 20000,
                upstream_cluster: "billing".to_owned(),
            }],
            clusters: vec![Cluster {
                name: "billing".to_owned(),
                address: "10.0.0.5".to_owned(),
                port: 8080,
            }],
        };
        for bytes in snapshot.resources(ResourceType::Cluster) {
            assert_eq!(
                wire::deserialize::<Cluster>(&bytes).unwrap(),
                snapshot.clusters[0]
            );
        }
        for bytes in snapshot.resources(ResourceType::Listener) {
            assert_eq!(
                wire::deserialize::<Listener>(&bytes).unwrap(),
                snapshot.listeners[0]
            );
        }
    }

    #[test]
    fn test_discovery_round_trip() {
        let request = DiscoveryRequest {
            type_url: ResourceType::Cluster,
            version_info: "3".to_owned(),
            response_nonce: "abcd".to_owned(),
            error_detail: None,
        };
        let mut buf = Vec::new();
        crate::wire::write_frame(&mut buf, &request).unwrap();
        let decoded: DiscoveryRequest =
            crate::wire::read_frame(&mut io::Cursor::new(buf)).unwrap();
        assert_eq!(decoded, request);

        let response = DiscoveryResponse {
            type_url: ResourceType::Listener,
            version_info: "3".to_owned(),
            nonce: "efgh".to_owned(),
            resources: vec![vec![1, 2, 3], vec![]],
        };
        let mut buf = Vec::new();
        crate::wire::write_frame(&mut buf, &response).unwrap();
        let decoded: DiscoveryResponse =
            crate::wire::read_frame(&mut io::Cursor::new(buf)).unwrap();
        assert_eq!(decoded, response);
    }
}
