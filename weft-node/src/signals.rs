//! Operating system signal handling.
//!
//! `SIGTERM` and `SIGINT` are converted into [`Signal`] values on a channel
//! the service loop selects on. Receiving one has the same effect as a
//! [`Control::Shutdown`][crate::runtime::Control::Shutdown] input: sessions
//! are closed with a CLOSE frame, discovery streams are cut loose, and the
//! node exits.
use std::sync::Mutex;
use std::{fmt, io};

use crossbeam_channel as chan;

/// A signal that terminates the node.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Signal {
    /// `SIGINT`.
    Interrupt,
    /// `SIGTERM`.
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

impl TryFrom<libc::c_int> for Signal {
    type Error = libc::c_int;

    fn try_from(value: libc::c_int) -> Result<Self, Self::Error> {
        match value {
            libc::SIGINT => Ok(Self::Interrupt),
            libc::SIGTERM => Ok(Self::Terminate),
            other => Err(other),
        }
    }
}

/// Signal notifications are sent via this channel.
static NOTIFY: Mutex<Option<chan::Sender<Signal>>> = Mutex::new(None);

/// Install global handlers for the signals in [`Signal`], with
/// notifications sent to the given channel.
pub fn install(notify: chan::Sender<Signal>) -> io::Result<()> {
    if let Ok(mut channel) = NOTIFY.try_lock() {
        if channel.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "signal handler is already installed",
            ));
        }
        *channel = Some(notify);

        unsafe { _install() }?;
    } else {
        return Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            "unable to install signal handler",
        ));
    }
    Ok(())
}

/// Install the `libc` handlers.
///
/// # Safety
///
/// Calls `libc` functions safely.
unsafe fn _install() -> io::Result<()> {
    for signal in [libc::SIGTERM, libc::SIGINT] {
        if libc::signal(signal, handler as libc::sighandler_t) == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Called by `libc` when a signal is received.
extern "C" fn handler(sig: libc::c_int) {
    let Ok(signal) = Signal::try_from(sig) else {
        return;
    };
    if let Ok(guard) = NOTIFY.try_lock() {
        if let Some(c) = &*guard {
            c.try_send(signal).ok();
        }
    }
}
