//! Recording bus for tests.
//!
//! [`Recorder`] keeps the objects and advertisements registered with it and
//! every signal emitted through it. Individual operations can be made to fail
//! once or to pause until resumed, which allows exercising registration
//! failures and `stop` racing with `start`.

use std::collections::{BTreeMap, HashSet};

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::*;

/// Bus operation kind.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Op {
    RegisterApplication,
    UnregisterApplication,
    RegisterAdvertisement,
    UnregisterAdvertisement,
    EmitSignal,
}

impl Op {
    /// Returns the interface and member of the daemon call.
    #[must_use]
    pub const fn method(self) -> (&'static str, &'static str) {
        match self {
            Self::RegisterApplication => (GATT_MANAGER_IFACE, "RegisterApplication"),
            Self::UnregisterApplication => (GATT_MANAGER_IFACE, "UnregisterApplication"),
            Self::RegisterAdvertisement => (ADV_MANAGER_IFACE, "RegisterAdvertisement"),
            Self::UnregisterAdvertisement => (ADV_MANAGER_IFACE, "UnregisterAdvertisement"),
            Self::EmitSignal => (PROPERTIES_IFACE, "PropertiesChanged"),
        }
    }
}

/// `PropertiesChanged` signal captured by the recorder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Signal {
    pub path: Path,
    pub iface: &'static str,
    pub changed: Props,
}

/// In-memory bus that records every operation.
#[derive(Debug, Default)]
pub struct Recorder {
    log: Mutex<Log>,
    paused: Notify,
    resume: Notify,
}

#[derive(Debug, Default)]
struct Log {
    ops: Vec<Op>,
    apps: BTreeMap<Path, ObjectMap>,
    advs: BTreeMap<Path, Props>,
    signals: Vec<Signal>,
    fail: HashSet<Op>,
    pause: HashSet<Op>,
}

impl Recorder {
    /// Creates an empty recorder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `op` fail with `org.bluez.Error.Failed`.
    pub fn fail_next(&self, op: Op) {
        self.log.lock().fail.insert(op);
    }

    /// Makes the next `op` suspend until [`Self::resume`] is called.
    pub fn pause_next(&self, op: Op) {
        self.log.lock().pause.insert(op);
    }

    /// Returns once a paused operation is suspended.
    pub async fn paused(&self) {
        self.paused.notified().await;
    }

    /// Resumes a paused operation.
    pub fn resume(&self) {
        self.resume.notify_one();
    }

    /// Returns all operations performed so far, including failed ones.
    #[must_use]
    pub fn ops(&self) -> Vec<Op> {
        self.log.lock().ops.clone()
    }

    /// Returns the objects of a registered application.
    #[must_use]
    pub fn application(&self, app: &Path) -> Option<ObjectMap> {
        self.log.lock().apps.get(app).cloned()
    }

    /// Returns the number of registered applications.
    #[must_use]
    pub fn application_count(&self) -> usize {
        self.log.lock().apps.len()
    }

    /// Returns the properties of a registered advertisement.
    #[must_use]
    pub fn advertisement(&self, adv: &Path) -> Option<Props> {
        self.log.lock().advs.get(adv).cloned()
    }

    /// Drops the advertisement at `adv` the way the daemon does before it
    /// calls `Release`. Returns whether the advertisement was registered.
    pub fn release(&self, adv: &Path) -> bool {
        self.log.lock().advs.remove(adv).is_some()
    }

    /// Returns the number of registered advertisements.
    #[must_use]
    pub fn advertisement_count(&self) -> usize {
        self.log.lock().advs.len()
    }

    /// Returns all emitted signals.
    #[must_use]
    pub fn signals(&self) -> Vec<Signal> {
        self.log.lock().signals.clone()
    }

    /// Records `op`, suspending or failing it if requested.
    async fn enter(&self, op: Op) -> BusResult<()> {
        let pause = self.log.lock().pause.remove(&op);
        if pause {
            self.paused.notify_one();
            self.resume.notified().await;
        }
        let mut log = self.log.lock();
        log.ops.push(op);
        if log.fail.remove(&op) {
            let (iface, member) = op.method();
            return Err(BusError::new(ReqError::Failed.name(), format!("{iface}.{member} failed")));
        }
        Ok(())
    }
}

fn exists(what: &Path) -> BusError {
    BusError::new("org.bluez.Error.AlreadyExists", format!("{what} already exists"))
}

fn missing(what: &Path) -> BusError {
    BusError::new("org.bluez.Error.DoesNotExist", format!("{what} does not exist"))
}

impl Bus for Recorder {
    async fn register_application(
        &self,
        _: &Path,
        app: &Path,
        objects: &ObjectMap,
    ) -> BusResult<()> {
        self.enter(Op::RegisterApplication).await?;
        let mut log = self.log.lock();
        if log.apps.contains_key(app) {
            return Err(exists(app));
        }
        log.apps.insert(app.clone(), objects.clone());
        Ok(())
    }

    async fn unregister_application(&self, _: &Path, app: &Path) -> BusResult<()> {
        self.enter(Op::UnregisterApplication).await?;
        (self.log.lock().apps.remove(app)).map_or_else(|| Err(missing(app)), |_| Ok(()))
    }

    async fn register_advertisement(&self, _: &Path, adv: &Path, props: &Props) -> BusResult<()> {
        self.enter(Op::RegisterAdvertisement).await?;
        let mut log = self.log.lock();
        if log.advs.contains_key(adv) {
            return Err(exists(adv));
        }
        log.advs.insert(adv.clone(), props.clone());
        Ok(())
    }

    async fn unregister_advertisement(&self, _: &Path, adv: &Path) -> BusResult<()> {
        self.enter(Op::UnregisterAdvertisement).await?;
        (self.log.lock().advs.remove(adv)).map_or_else(|| Err(missing(adv)), |_| Ok(()))
    }

    async fn emit_properties_changed(
        &self,
        path: &Path,
        iface: &'static str,
        changed: &Props,
    ) -> BusResult<()> {
        self.enter(Op::EmitSignal).await?;
        self.log.lock().signals.push(Signal {
            path: path.clone(),
            iface,
            changed: changed.clone(),
        });
        Ok(())
    }
}
