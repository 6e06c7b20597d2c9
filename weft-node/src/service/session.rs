//! Peer session state.
use localtime::{LocalDuration, LocalTime};

use weft::node::ConnectionStatus;
use weft::peer::NodeName;

/// Base reconnection delay for outbound sessions.
pub const MIN_RECONNECTION_DELTA: LocalDuration = LocalDuration::from_secs(1);
/// Cap on the reconnection delay.
pub const MAX_RECONNECTION_DELTA: LocalDuration = LocalDuration::from_secs(60);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("wrong protocol version `{0}`")]
    WrongVersion(u32),
    #[error("expected OPEN from `{expected}`, got `{actual}`")]
    WrongPeer { expected: NodeName, actual: NodeName },
    #[error("peer token mismatch")]
    TokenMismatch,
    #[error("no trust domain in common")]
    NoSharedDomain,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("unexpected message during handshake")]
    Misbehavior,
    #[error("peer timed out")]
    Timeout,
    #[error("connection to self")]
    SelfConnection,
    #[error("connection collision")]
    Collision,
}

/// Connection link direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Link {
    /// We dialed.
    Outbound,
    /// The peer dialed us.
    Inbound,
}

impl Link {
    pub fn is_outbound(&self) -> bool {
        matches!(self, Self::Outbound)
    }

    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::Inbound)
    }
}

#[derive(Debug, Clone)]
pub enum State {
    /// Outbound dial in progress.
    Connecting { since: LocalTime },
    /// OPEN sent on an outbound link; waiting for the peer's OPEN.
    OpenSent { since: LocalTime },
    /// Valid OPEN received and answered on an inbound link; waiting for the
    /// peer's confirming KEEPALIVE. Carries the negotiated hold time.
    OpenConfirm { hold_time: u64, since: LocalTime },
    /// Session is established; routes are exchanged.
    Established { since: LocalTime },
    /// Not connected. Outbound sessions carry the next dial attempt time.
    Disconnected {
        since: LocalTime,
        retry_at: Option<LocalTime>,
    },
}

/// A peer session. Each configured peer has one.
#[derive(Debug, Clone)]
pub struct Session {
    /// Peer name.
    pub name: NodeName,
    /// Connection direction.
    pub link: Link,
    /// Session state.
    pub state: State,

    /// Connection attempts since the last established session.
    attempts: usize,

    /// Source of entropy for backoff jitter.
    rng: fastrand::Rng,
}

impl Session {
    /// New session for a peer we are about to dial.
    pub fn connecting(name: NodeName, since: LocalTime, rng: fastrand::Rng) -> Self {
        Self {
            name,
            link: Link::Outbound,
            state: State::Connecting { since },
            attempts: 1,
            rng,
        }
    }

    /// New session for a peer that dialed us and sent a valid OPEN.
    pub fn inbound(name: NodeName, hold_time: u64, since: LocalTime, rng: fastrand::Rng) -> Self {
        Self {
            name,
            link: Link::Inbound,
            state: State::OpenConfirm { hold_time, since },
            attempts: 0,
            rng,
        }
    }

    /// New idle session for a freshly configured peer.
    pub fn idle(name: NodeName, since: LocalTime, rng: fastrand::Rng) -> Self {
        Self {
            name,
            link: Link::Outbound,
            state: State::Disconnected {
                since,
                retry_at: Some(since),
            },
            attempts: 0,
            rng,
        }
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self.state,
            State::Connecting { .. } | State::OpenSent { .. } | State::OpenConfirm { .. }
        )
    }

    /// When the ongoing dial or handshake started, if one is in progress.
    pub fn handshake_since(&self) -> Option<LocalTime> {
        match self.state {
            State::Connecting { since }
            | State::OpenSent { since }
            | State::OpenConfirm { since, .. } => Some(since),
            _ => None,
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, State::Established { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.state, State::Disconnected { .. })
    }

    /// The session state, reduced to its externally visible status.
    pub fn connection_status(&self) -> ConnectionStatus {
        match self.state {
            State::Established { .. } => ConnectionStatus::Connected,
            State::Connecting { .. } | State::OpenSent { .. } | State::OpenConfirm { .. } => {
                ConnectionStatus::Connecting
            }
            State::Disconnected { .. } => ConnectionStatus::Disconnected,
        }
    }

    /// Next dial attempt, while disconnected.
    pub fn retry_at(&self) -> Option<LocalTime> {
        match self.state {
            State::Disconnected { retry_at, .. } => retry_at,
            _ => None,
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn attempted(&mut self) {
        self.attempts += 1;
    }

    /// Transition after our OPEN was written on an outbound link.
    pub fn to_open_sent(&mut self, since: LocalTime) {
        debug_assert!(matches!(self.state, State::Connecting { .. }));
        self.state = State::OpenSent { since };
    }

    /// Transition to established, resetting the attempt counter.
    pub fn to_established(&mut self, since: LocalTime) {
        self.attempts = 0;
        self.state = State::Established { since };
    }

    /// Transition to disconnected, scheduling the next outbound dial.
    pub fn to_disconnected(&mut self, since: LocalTime) {
        let retry_at = self.link.is_outbound().then(|| since + self.backoff());
        self.state = State::Disconnected { since, retry_at };
    }

    /// Exponential backoff with jitter: base 1s, doubling per attempt,
    /// capped at 60s, within ±20%.
    fn backoff(&mut self) -> LocalDuration {
        let exponent = self.attempts.min(16) as u32;
        let base = MIN_RECONNECTION_DELTA
            .as_millis()
            .saturating_mul(2u64.saturating_pow(exponent).into());
        let capped = base.min(MAX_RECONNECTION_DELTA.as_millis());
        let jittered = capped * u128::from(self.rng.u64(800..=1200)) / 1000;

        LocalDuration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let name: NodeName = "bob.example.com".parse().unwrap();
        let t0 = LocalTime::from_millis(500);
        let mut session = Session::connecting(name, t0, fastrand::Rng::with_seed(42));
        assert!(session.is_connecting());
        assert_eq!(session.handshake_since(), Some(t0));

        session.to_open_sent(t0);
        assert!(session.is_connecting());

        session.to_established(LocalTime::from_millis(1000));
        assert!(session.is_established());
        assert_eq!(session.attempts(), 0);
        assert_eq!(session.connection_status(), ConnectionStatus::Connected);

        session.to_disconnected(LocalTime::from_millis(2000));
        assert!(session.is_disconnected());
        assert!(session.retry_at().is_some());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let name: NodeName = "bob.example.com".parse().unwrap();
        let since = LocalTime::from_millis(0);
        let mut session = Session::connecting(name, since, fastrand::Rng::with_seed(7));

        let mut last = LocalDuration::from_millis(0);
        for _ in 0..10 {
            session.attempted();
            session.to_disconnected(since);

            let retry = session.retry_at().expect("outbound sessions retry");
            let delay = retry - since;

            // Within the cap, plus 20% jitter.
            assert!(delay.as_millis() <= MAX_RECONNECTION_DELTA.as_millis() * 12 / 10);
            last = delay;
        }
        // After many attempts we are near the cap.
        assert!(last.as_millis() >= MAX_RECONNECTION_DELTA.as_millis() * 8 / 10);
    }
}
