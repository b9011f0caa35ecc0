//! Advertising and connection state machine.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::Path;
use crate::{Error, Result};

/// Server lifecycle phase.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Phase {
    /// Not started, or the daemon released the advertisement.
    #[default]
    Idle,
    /// Start is waiting for the daemon.
    Starting,
    /// Start completed.
    Advertising,
    /// Stopped by the application.
    Stopped,
}

/// Observable server state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct State {
    pub phase: Phase,
    /// Whether the advertisement is registered and not released.
    pub advertising: bool,
    /// Whether at least one central is connected.
    pub connected: bool,
}

#[derive(Debug, Default)]
struct Inner {
    phase: Phase,
    advertising: bool,
    advertised: bool,
    devices: BTreeSet<Path>,
    start: Option<CancellationToken>,
}

impl Inner {
    fn state(&self) -> State {
        State {
            phase: self.phase,
            advertising: self.advertising,
            connected: !self.devices.is_empty(),
        }
    }
}

/// Tracks whether the server is advertising and connected. Every transition
/// is published to [`subscribe`](Self::subscribe) receivers.
#[derive(Debug)]
pub struct StateMachine {
    inner: Mutex<Inner>,
    tx: watch::Sender<State>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Creates an idle state machine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            tx: watch::channel(State::default()).0,
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> State {
        self.inner.lock().state()
    }

    /// Returns a receiver of state transitions.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.tx.subscribe()
    }

    /// Returns whether the advertisement is registered and not released.
    #[inline]
    #[must_use]
    pub fn is_advertising(&self) -> bool {
        self.inner.lock().advertising
    }

    /// Returns whether at least one central is connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.inner.lock().devices.is_empty()
    }

    /// Enters the starting phase. The returned token is cancelled by
    /// [`stop`](Self::stop).
    pub(crate) fn begin_start(&self) -> Result<CancellationToken> {
        self.update(|s| {
            if s.advertising || s.phase == Phase::Starting {
                return Err(Error::AlreadyAdvertising);
            }
            let ct = CancellationToken::new();
            s.start = Some(ct.clone());
            s.phase = Phase::Starting;
            Ok(ct)
        })
    }

    /// Completes a start. Fails with [`Error::Cancelled`] if `ct` was
    /// cancelled, in which case the caller must roll back its registrations.
    pub(crate) fn finish_start(&self, ct: &CancellationToken) -> Result<()> {
        self.update(|s| {
            if ct.is_cancelled() {
                return Err(Error::Cancelled);
            }
            s.start = None;
            s.phase = Phase::Advertising;
            s.advertising = true;
            s.advertised = true;
            info!("Advertising started");
            Ok(())
        })
    }

    /// Abandons a failed start.
    pub(crate) fn abort_start(&self, ct: &CancellationToken) {
        self.update(|s| {
            if !ct.is_cancelled() {
                s.start = None;
                s.phase = Phase::Idle;
            }
        });
    }

    /// Stops advertising, cancelling any start in progress, and forgets all
    /// connections. Returns whether the advertisement was registered.
    pub(crate) fn stop(&self) -> bool {
        self.update(|s| {
            if let Some(ct) = s.start.take() {
                debug!("Cancelling start");
                ct.cancel();
            }
            let was = s.advertising;
            s.advertising = false;
            s.advertised = false;
            s.devices.clear();
            s.phase = Phase::Stopped;
            was
        })
    }

    /// Records a connection from `device`. Connections are ignored unless the
    /// server advertised since it was last stopped.
    pub fn on_connect(&self, device: Path) -> bool {
        self.update(|s| {
            if !s.advertised {
                warn!("Ignoring connection from {device} while not advertising");
                return false;
            }
            info!("Connected: {device}");
            s.devices.insert(device)
        })
    }

    /// Records a disconnection of `device`. Advertising is not affected.
    pub fn on_disconnect(&self, device: &Path) -> bool {
        self.update(|s| {
            let known = s.devices.remove(device);
            if known {
                info!("Disconnected: {device}");
            }
            known
        })
    }

    /// Records that the daemon released the advertisement.
    pub fn on_release(&self) {
        self.update(|s| {
            s.advertising = false;
            if s.phase == Phase::Advertising {
                s.phase = Phase::Idle;
            }
        });
    }

    fn update<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut s = self.inner.lock();
        let r = f(&mut s);
        let new = s.state();
        self.tx.send_if_modified(|old| {
            let changed = *old != new;
            *old = new;
            changed
        });
        r
    }
}

#[cfg(test)]
mod tests {
    use matches::assert_matches;

    use super::*;

    fn dev(n: u8) -> Path {
        Path::new(format!("/org/bluez/hci0/dev_{n}")).unwrap()
    }

    #[test]
    fn lifecycle() {
        let sm = StateMachine::new();
        let mut rx = sm.subscribe();
        assert!(!sm.on_connect(dev(1)));
        assert!(!sm.is_connected());

        let ct = sm.begin_start().unwrap();
        assert_eq!(sm.state().phase, Phase::Starting);
        assert_matches!(sm.begin_start(), Err(Error::AlreadyAdvertising));
        sm.finish_start(&ct).unwrap();
        assert!(sm.is_advertising());
        assert_matches!(sm.begin_start(), Err(Error::AlreadyAdvertising));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().phase, Phase::Advertising);

        assert!(sm.on_connect(dev(1)));
        assert!(sm.on_connect(dev(2)));
        assert!(sm.on_disconnect(&dev(1)));
        assert!(sm.is_connected());
        assert!(sm.on_disconnect(&dev(2)));
        assert!(!sm.on_disconnect(&dev(2)));
        assert!(!sm.is_connected());
        assert!(sm.is_advertising());

        assert!(sm.stop());
        assert!(!sm.stop());
        assert_eq!(
            sm.state(),
            State {
                phase: Phase::Stopped,
                advertising: false,
                connected: false,
            }
        );
        assert!(!sm.on_connect(dev(1)));
    }

    #[test]
    fn cancel() {
        let sm = StateMachine::new();
        let ct = sm.begin_start().unwrap();
        assert!(!sm.stop());
        assert!(ct.is_cancelled());
        assert_matches!(sm.finish_start(&ct), Err(Error::Cancelled));
        sm.abort_start(&ct);
        assert_eq!(sm.state().phase, Phase::Stopped);
        assert!(!sm.is_advertising());

        let ct = sm.begin_start().unwrap();
        sm.abort_start(&ct);
        assert_eq!(sm.state().phase, Phase::Idle);
    }

    #[test]
    fn release() {
        let sm = StateMachine::new();
        let ct = sm.begin_start().unwrap();
        sm.finish_start(&ct).unwrap();
        assert!(sm.on_connect(dev(1)));
        sm.on_release();
        assert!(!sm.is_advertising());
        assert!(sm.is_connected());
        assert_eq!(sm.state().phase, Phase::Idle);
        sm.begin_start().unwrap();
    }
}
