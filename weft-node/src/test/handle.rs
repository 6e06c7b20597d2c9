//! Mock node handle used to exercise the control socket.
use std::sync::{Arc, Mutex};

use crossbeam_channel as chan;
use nonempty::NonEmpty;

use weft::config::{Config, PortEntry};
use weft::node::{ConnectionStatus, Event, PeerRecord, RouteList, Status};
use weft::peer::{NodeName, PeerInfo};
use weft::route::Route;

use crate::runtime::HandleError;
use crate::service::events::Emitter;

#[derive(Clone)]
pub struct Handle {
    pub peers: Arc<Mutex<Vec<PeerInfo>>>,
    pub routes: Arc<Mutex<Vec<Route>>>,
    pub emitter: Emitter<Event>,
}

impl Default for Handle {
    fn default() -> Self {
        Self {
            peers: Arc::new(Mutex::new(Vec::new())),
            routes: Arc::new(Mutex::new(Vec::new())),
            emitter: Emitter::new(),
        }
    }
}

impl Handle {
    fn node_name() -> NodeName {
        "test.example.com".parse().expect("valid node name")
    }
}

impl weft::node::Handle for Handle {
    type Error = HandleError;

    fn is_running(&self) -> bool {
        true
    }

    fn add_peer(&mut self, peer: PeerInfo) -> Result<bool, HandleError> {
        self.peers.lock().expect("lock").push(peer);
        Ok(true)
    }

    fn delete_peer(&mut self, name: NodeName) -> Result<bool, HandleError> {
        let mut peers = self.peers.lock().expect("lock");
        let len = peers.len();
        peers.retain(|p| p.name != name);

        Ok(peers.len() < len)
    }

    fn peers(&self) -> Result<Vec<PeerRecord>, HandleError> {
        Ok(self
            .peers
            .lock()
            .expect("lock")
            .iter()
            .map(|info| PeerRecord {
                info: info.clone(),
                connection_status: ConnectionStatus::Disconnected,
                hold_time: None,
                last_received: None,
                last_sent: None,
                backoff_until: None,
            })
            .collect())
    }

    fn add_route(&mut self, route: Route) -> Result<bool, HandleError> {
        self.routes.lock().expect("lock").push(route);
        Ok(true)
    }

    fn delete_route(&mut self, name: String) -> Result<bool, HandleError> {
        let mut routes = self.routes.lock().expect("lock");
        let len = routes.len();
        routes.retain(|r| r.name != name);

        Ok(routes.len() < len)
    }

    fn routes(&self) -> Result<RouteList, HandleError> {
        Ok(RouteList {
            local: self.routes.lock().expect("lock").clone(),
            internal: vec![],
        })
    }

    fn status(&self) -> Result<Status, HandleError> {
        Ok(Status {
            node_name: Self::node_name(),
            started_at: 0,
            peers: self.peers.lock().expect("lock").len(),
            connected: 0,
            local_routes: self.routes.lock().expect("lock").len(),
            learned_routes: 0,
            snapshot_version: None,
        })
    }

    fn config(&self) -> Result<Config, HandleError> {
        Ok(Config {
            node_name: Self::node_name(),
            domains: NonEmpty::new("global".parse().expect("valid domain")),
            hold_time: weft::config::DEFAULT_HOLD_TIME,
            port_range: NonEmpty::new(PortEntry::Range(20000, 20100)),
            listen: vec![],
            xds_bind_address: std::net::Ipv4Addr::LOCALHOST.into(),
            xds_port: weft::config::DEFAULT_XDS_PORT,
            listener_bind: std::net::Ipv4Addr::UNSPECIFIED.into(),
            keepalive_tick: weft::config::DEFAULT_KEEPALIVE_TICK,
            peers: self.peers.lock().expect("lock").clone(),
        })
    }

    fn subscribe(&self) -> Result<chan::Receiver<Event>, HandleError> {
        Ok(self.emitter.subscribe())
    }

    fn shutdown(self) -> Result<(), HandleError> {
        Ok(())
    }
}
