//! The aggregated discovery server.
//!
//! One stream per proxy connection. Stream logic lives in [`StreamState`],
//! which is pure with respect to I/O: the socket shell feeds it requests and
//! snapshot-change signals, and writes out whatever responses it produces.
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{io, net};

use crossbeam_channel as chan;
use log::*;

use crate::runtime::thread;
use crate::wire;
use crate::xds::cache::Cache;
use crate::xds::{DiscoveryRequest, DiscoveryResponse, ResourceType, Snapshot};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("wire error: {0}")]
    Wire(#[from] wire::Error),
}

/// Per-stream subscription, version and nonce bookkeeping.
#[derive(Debug)]
pub struct StreamState {
    subscriptions: BTreeSet<ResourceType>,
    last_sent_version: BTreeMap<ResourceType, String>,
    last_nonce: BTreeMap<ResourceType, String>,
    rng: fastrand::Rng,
}

impl StreamState {
    pub fn new(rng: fastrand::Rng) -> Self {
        Self {
            subscriptions: BTreeSet::new(),
            last_sent_version: BTreeMap::new(),
            last_nonce: BTreeMap::new(),
            rng,
        }
    }

    /// Handle an inbound request. Returns the response to send, if the
    /// request warrants one.
    pub fn request(
        &mut self,
        req: DiscoveryRequest,
        snapshot: Option<&Snapshot>,
    ) -> Option<DiscoveryResponse> {
        let typ = req.type_url;

        if self.subscriptions.insert(typ) {
            debug!(target: "xds", "Stream subscribed to `{typ}`");
        }
        // An ACK or NACK carries the nonce of the response it refers to.
        // Anything else is stale and ignored.
        if !req.response_nonce.is_empty()
            && self.last_nonce.get(&typ).map(String::as_str) != Some(req.response_nonce.as_str())
        {
            debug!(target: "xds", "Ignoring request with stale nonce for `{typ}`");
            return None;
        }
        if let Some(detail) = &req.error_detail {
            warn!(target: "xds", "Proxy rejected `{typ}` version {}: {detail}", req.version_info);
            return None;
        }
        let snapshot = snapshot?;

        // The proxy is up to date; nothing to push until the next snapshot.
        if req.version_info == snapshot.version {
            return None;
        }
        Some(self.response(typ, snapshot))
    }

    /// Push the given snapshot to every subscribed resource type that has
    /// not seen it yet. Clusters are flushed before listeners.
    pub fn advance(&mut self, snapshot: &Snapshot) -> Vec<DiscoveryResponse> {
        let due: Vec<ResourceType> = ResourceType::ALL
            .into_iter()
            .filter(|typ| self.subscriptions.contains(typ))
            .filter(|typ| self.last_sent_version.get(typ) != Some(&snapshot.version))
            .collect();
        due.into_iter()
            .map(|typ| self.response(typ, snapshot))
            .collect()
    }

    fn response(&mut self, typ: ResourceType, snapshot: &Snapshot) -> DiscoveryResponse {
        let nonce = format!("{:016x}", self.rng.u64(..));

        self.last_sent_version
            .insert(typ, snapshot.version.clone());
        self.last_nonce.insert(typ, nonce.clone());

        DiscoveryResponse {
            type_url: typ,
            version_info: snapshot.version.clone(),
            nonce,
            resources: snapshot.resources(typ),
        }
    }
}

/// The discovery server: accepts proxy connections and runs one stream per
/// connection until the peer disconnects or the node shuts down.
pub struct Server {
    listener: TcpListener,
    local_addr: net::SocketAddr,
    cache: Arc<Cache>,
    closing: Arc<AtomicBool>,
}

impl Server {
    /// Bind the discovery server to the given address.
    pub fn bind(addr: net::SocketAddr, cache: Arc<Cache>) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            cache,
            closing: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }

    /// A handle that unblocks [`Server::run`] when triggered.
    pub fn closer(&self) -> Closer {
        Closer {
            addr: self.local_addr,
            closing: self.closing.clone(),
        }
    }

    /// Accept and serve streams until closed.
    pub fn run(self) {
        info!(target: "xds", "Discovery server listening on {}..", self.local_addr);

        for incoming in self.listener.incoming() {
            if self.closing.load(Ordering::SeqCst) {
                break;
            }
            match incoming {
                Ok(stream) => {
                    let cache = self.cache.clone();
                    let peer = stream
                        .peer_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| String::from("?"));

                    thread::spawn(format!("xds {peer}"), move || {
                        debug!(target: "xds", "Stream accepted from {peer}");

                        if let Err(e) = serve(stream, cache) {
                            // Stream errors are non-fatal; the proxy will
                            // reconnect.
                            debug!(target: "xds", "Stream from {peer} ended: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!(target: "xds", "Failed to accept incoming connection: {e}");
                }
            }
        }
        debug!(target: "xds", "Discovery server shutting down..");
    }
}

/// Unblocks a running [`Server`].
#[derive(Clone)]
pub struct Closer {
    addr: net::SocketAddr,
    closing: Arc<AtomicBool>,
}

impl Closer {
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        // Wake the accept loop so it observes the flag.
        TcpStream::connect(self.addr).ok();
    }
}

/// Serve a single discovery stream.
fn serve(stream: TcpStream, cache: Arc<Cache>) -> Result<(), Error> {
    let notify = cache.subscribe();
    let mut writer = BufWriter::new(stream.try_clone()?);
    let mut state = StreamState::new(fastrand::Rng::new());

    // Decode requests on a separate task; this one selects between inbound
    // requests and snapshot-change signals.
    let (requests_send, requests) = chan::bounded::<DiscoveryRequest>(16);
    let reader = thread::spawn("xds reader".to_owned(), move || {
        let mut reader = BufReader::new(stream);

        loop {
            match wire::read_frame::<_, DiscoveryRequest>(&mut reader) {
                Ok(request) => {
                    if requests_send.send(request).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    if !e.is_eof() {
                        debug!(target: "xds", "Stream read error: {e}");
                    }
                    break;
                }
            }
        }
    });

    loop {
        chan::select! {
            recv(requests) -> request => {
                let Ok(request) = request else {
                    // Proxy closed the stream.
                    break;
                };
                trace!(target: "xds", "Received {request:?}");

                let snapshot = cache.latest();
                if let Some(response) = state.request(request, snapshot.as_deref()) {
                    send(&mut writer, &response)?;
                }
            }
            recv(notify) -> signal => {
                if signal.is_err() {
                    // Cache closed: the node is shutting down.
                    break;
                }
                if let Some(snapshot) = cache.latest() {
                    for response in state.advance(&snapshot) {
                        send(&mut writer, &response)?;
                    }
                }
            }
        }
    }
    // No stream state is retained past this point.
    drop(writer);
    reader.join().ok();

    Ok(())
}

fn send(writer: &mut BufWriter<TcpStream>, response: &DiscoveryResponse) -> Result<(), Error> {
    trace!(
        target: "xds",
        "Sending `{}` version {} ({} resources)",
        response.type_url,
        response.version_info,
        response.resources.len()
    );
    wire::write_frame(writer, response)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::{Cluster, Listener};

    fn snapshot(version: &str, routes: &[&str]) -> Snapshot {
        Snapshot {
            version: version.to_owned(),
            listeners: routes
                .iter()
                .enumerate()
                .map(|(i, name)| Listener {
                    name: (*name).to_owned(),
                    bind_address: "0.0.0.0".parse().unwrap(),
                    port: 20000 + i as u16,
                    upstream_cluster: (*name).to_owned(),
                })
                .collect(),
            clusters: routes
                .iter()
                .map(|name| Cluster {
                    name: (*name).to_owned(),
                    address: "10.0.0.1".to_owned(),
                    port: 8080,
                })
                .collect(),
        }
    }

    fn subscribe(typ: ResourceType) -> DiscoveryRequest {
        DiscoveryRequest {
            type_url: typ,
            version_info: String::new(),
            response_nonce: String::new(),
            error_detail: None,
        }
    }

    fn ack(response: &DiscoveryResponse) -> DiscoveryRequest {
        DiscoveryRequest {
            type_url: response.type_url,
            version_info: response.version_info.clone(),
            response_nonce: response.nonce.clone(),
            error_detail: None,
        }
    }

    #[test]
    fn test_subscribe_then_push_ordering() {
        let mut state = StreamState::new(fastrand::Rng::with_seed(1));
        let v1 = snapshot("1", &["billing"]);

        // Subscribing with a snapshot available yields an immediate
        // response, per type, in request order.
        let r1 = state
            .request(subscribe(ResourceType::Cluster), Some(&v1))
            .expect("cluster response");
        assert_eq!(r1.version_info, "1");
        assert_eq!(r1.resources.len(), 1);

        let r2 = state
            .request(subscribe(ResourceType::Listener), Some(&v1))
            .expect("listener response");
        assert_eq!(r2.version_info, "1");
        assert_eq!(r2.resources.len(), 1);

        // ACKs produce nothing.
        assert_eq!(state.request(ack(&r1), Some(&v1)), None);
        assert_eq!(state.request(ack(&r2), Some(&v1)), None);

        // A new snapshot pushes clusters first, then listeners.
        let v2 = snapshot("2", &["billing", "checkout"]);
        let pushed = state.advance(&v2);

        assert_eq!(pushed.len(), 2);
        assert_eq!(pushed[0].type_url, ResourceType::Cluster);
        assert_eq!(pushed[0].version_info, "2");
        assert_eq!(pushed[0].resources.len(), 2);
        assert_eq!(pushed[1].type_url, ResourceType::Listener);
        assert_eq!(pushed[1].version_info, "2");
        assert_eq!(pushed[1].resources.len(), 2);

        // Advancing again with the same snapshot is a no-op.
        assert!(state.advance(&v2).is_empty());
    }

    #[test]
    fn test_subscription_before_first_snapshot() {
        let mut state = StreamState::new(fastrand::Rng::with_seed(2));

        assert_eq!(state.request(subscribe(ResourceType::Cluster), None), None);

        // Once a snapshot appears, the subscription is served.
        let v1 = snapshot("1", &["billing"]);
        let pushed = state.advance(&v1);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].type_url, ResourceType::Cluster);
    }

    #[test]
    fn test_stale_nonce_ignored() {
        let mut state = StreamState::new(fastrand::Rng::with_seed(3));
        let v1 = snapshot("1", &["billing"]);

        let r1 = state
            .request(subscribe(ResourceType::Cluster), Some(&v1))
            .expect("response");

        // An ACK with the wrong nonce is dropped, even if its version is
        // behind the current snapshot.
        let v2 = snapshot("2", &["billing", "checkout"]);
        let stale = DiscoveryRequest {
            type_url: ResourceType::Cluster,
            version_info: "0".to_owned(),
            response_nonce: "bogus".to_owned(),
            error_detail: None,
        };
        assert_eq!(state.request(stale, Some(&v2)), None);

        // A correctly-nonced request behind the current version is served.
        let catchup = DiscoveryRequest {
            type_url: ResourceType::Cluster,
            version_info: r1.version_info.clone(),
            response_nonce: r1.nonce.clone(),
            error_detail: None,
        };
        let r2 = state.request(catchup, Some(&v2)).expect("response");
        assert_eq!(r2.version_info, "2");
    }

    #[test]
    fn test_nack_is_not_resent() {
        let mut state = StreamState::new(fastrand::Rng::with_seed(4));
        let v1 = snapshot("1", &["billing"]);

        let r1 = state
            .request(subscribe(ResourceType::Cluster), Some(&v1))
            .expect("response");

        let mut nack = ack(&r1);
        nack.version_info = String::new();
        nack.error_detail = Some("invalid listener".to_owned());

        assert_eq!(state.request(nack, Some(&v1)), None);
    }

    #[test]
    fn test_unsubscribed_type_not_pushed() {
        let mut state = StreamState::new(fastrand::Rng::with_seed(5));
        let v1 = snapshot("1", &["billing"]);

        state.request(subscribe(ResourceType::Cluster), Some(&v1));

        let v2 = snapshot("2", &["billing", "checkout"]);
        let pushed = state.advance(&v2);
        assert_eq!(pushed.len(), 1, "only the subscribed type is pushed");
        assert_eq!(pushed[0].type_url, ResourceType::Cluster);
    }
}
