use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::adv::Advertisement;
use crate::att::Perms;
use crate::bus::*;
use crate::gatt::*;
use crate::state::{State, StateMachine};
use crate::{Config, Error, Result, Uuid};

/// GATT server. Owns the application tree, the advertisement, and the
/// advertising state, and routes daemon method calls to them.
///
/// Clones share the same server.
#[derive(Debug)]
pub struct Server<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for Server<B> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Debug)]
struct Inner<B> {
    cfg: Config,
    bus: B,
    adapter: Path,
    app: Application,
    adv: Mutex<Advertisement>,
    sm: StateMachine,
    chars: Mutex<HashMap<Uuid, CharHandle>>,
    /// Set while an advertisement registration is in flight.
    adv_pending: AtomicBool,
    /// Set when a start was dropped while registering the advertisement.
    adv_orphaned: AtomicBool,
}

impl<B: Bus> Server<B> {
    /// Creates a server that talks to the daemon over `bus`.
    pub fn new(bus: B, cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let adapter = cfg.adapter_path()?;
        let base = cfg.base_path()?;
        let adv = Advertisement::new(base.child("advertisement0"), cfg.adv_kind);
        debug!("Created server {:?} at {base}", cfg.name);
        Ok(Self {
            inner: Arc::new(Inner {
                app: Application::new(base, cfg.max_value_len),
                adv: Mutex::new(adv),
                sm: StateMachine::new(),
                chars: Mutex::new(HashMap::new()),
                adv_pending: AtomicBool::new(false),
                adv_orphaned: AtomicBool::new(false),
                cfg,
                bus,
                adapter,
            }),
        })
    }

    /// Returns the server configuration.
    #[inline(always)]
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.cfg
    }

    /// Returns the bus.
    #[inline(always)]
    #[must_use]
    pub fn bus(&self) -> &B {
        &self.inner.bus
    }

    /// Returns the GATT application.
    #[inline(always)]
    #[must_use]
    pub fn application(&self) -> &Application {
        &self.inner.app
    }

    /// Returns exclusive access to the advertisement. Setters fail while the
    /// server is advertising.
    #[inline]
    pub fn advertisement_mut(&self) -> MutexGuard<'_, Advertisement> {
        self.inner.adv.lock()
    }

    /// Adds a primary or secondary service.
    pub fn add_service(&self, uuid: Uuid, primary: bool) -> Result<ServiceHandle> {
        self.inner.app.add_service(uuid, primary)
    }

    /// Adds a characteristic to service `svc`. Characteristic UUIDs must be
    /// unique within the server.
    pub fn add_characteristic(
        &self,
        svc: Uuid,
        uuid: Uuid,
        flags: Flags,
        perms: Perms,
        value: impl AsRef<[u8]>,
    ) -> Result<CharHandle> {
        let i = &*self.inner;
        let mut chars = i.chars.lock();
        if chars.contains_key(&uuid) {
            return Err(Error::Duplicate(uuid));
        }
        let s = (i.app.with(|t| t.service_by_uuid(svc)))
            .ok_or_else(|| Error::NotFound(format!("service {svc}")))?;
        let h = (i.app).add_characteristic(s, uuid, flags, perms, value.as_ref())?;
        chars.insert(uuid, h);
        Ok(h)
    }

    /// Adds a descriptor to characteristic `chr`.
    pub fn add_descriptor(
        &self,
        chr: Uuid,
        uuid: Uuid,
        perms: Perms,
        value: impl AsRef<[u8]>,
    ) -> Result<DescHandle> {
        let h = self.characteristic(chr)?;
        (self.inner.app).add_descriptor(h, uuid, perms, value.as_ref())
    }

    /// Returns the handle of characteristic `uuid`.
    #[must_use]
    pub fn get_characteristic(&self, uuid: Uuid) -> Option<CharHandle> {
        self.inner.chars.lock().get(&uuid).copied()
    }

    /// Sets the read hook of characteristic `chr`.
    pub fn set_read_hook<F>(&self, chr: Uuid, f: F) -> Result<()>
    where
        F: Fn(&ReadReq<'_>) -> IoResult<Vec<u8>> + Send + Sync + 'static,
    {
        let h = self.characteristic(chr)?;
        (self.inner.app).with_mut(|t| t.set_read_hook(h.into(), Some(ReadHook::new(f))))
    }

    /// Sets the write hook of characteristic `chr`.
    pub fn set_write_hook<F>(&self, chr: Uuid, f: F) -> Result<()>
    where
        F: Fn(&mut WriteReq<'_>) -> IoResult<()> + Send + Sync + 'static,
    {
        let h = self.characteristic(chr)?;
        (self.inner.app).with_mut(|t| t.set_write_hook(h.into(), Some(WriteHook::new(f))))
    }

    /// Sets the read hook used by characteristics without their own hook.
    pub fn set_default_read_hook<F>(&self, f: F)
    where
        F: Fn(&ReadReq<'_>) -> IoResult<Vec<u8>> + Send + Sync + 'static,
    {
        (self.inner.app).with_mut(|t| t.set_default_read_hook(Some(ReadHook::new(f))));
    }

    /// Sets the write hook used by characteristics without their own hook.
    pub fn set_default_write_hook<F>(&self, f: F)
    where
        F: Fn(&mut WriteReq<'_>) -> IoResult<()> + Send + Sync + 'static,
    {
        (self.inner.app).with_mut(|t| t.set_default_write_hook(Some(WriteHook::new(f))));
    }

    /// Returns the stored value of characteristic `chr`.
    pub fn value(&self, chr: Uuid) -> Result<Vec<u8>> {
        self.inner.app.value(self.characteristic(chr)?)
    }

    /// Replaces the stored value of characteristic `chr` without notifying.
    pub fn set_value(&self, chr: Uuid, v: impl AsRef<[u8]>) -> Result<()> {
        self.inner.app.set_value(self.characteristic(chr)?, v)
    }

    /// Notifies the subscribed central of the current value of characteristic
    /// `chr` in service `svc`. Returns `false` if no central is subscribed.
    pub async fn update_value(&self, svc: Uuid, chr: Uuid) -> Result<bool> {
        let i = &*self.inner;
        let h = self.characteristic(chr)?;
        let owner = i.app.with(|t| {
            let s = t.characteristic(h)?.service();
            Ok::<_, Error>(t.service(s)?.uuid())
        })?;
        if owner != svc {
            return Err(Error::NotFound(format!("characteristic {chr} in service {svc}")));
        }
        i.app.notify(&i.bus, h).await
    }

    /// Registers the GATT application without advertising.
    pub async fn register(&self) -> Result<()> {
        let i = &*self.inner;
        i.app.register(&i.bus, &i.adapter).await
    }

    /// Unregisters the GATT application.
    pub async fn unregister(&self) {
        let i = &*self.inner;
        i.app.unregister(&i.bus, &i.adapter).await;
    }

    /// Registers the application (if needed) and the advertisement. A
    /// concurrent [`stop`](Self::stop) makes this fail with
    /// [`Error::Cancelled`] after rolling back everything it registered.
    ///
    /// Dropping the returned future abandons the start and returns the server
    /// to [`Phase::Idle`](crate::Phase::Idle). An application it registered
    /// stays registered. An advertisement call that was in flight is undone
    /// by the next `stop` or `start`.
    pub async fn start(&self) -> Result<()> {
        let ct = self.inner.sm.begin_start()?;
        let guard = StartGuard {
            inner: &self.inner,
            ct: &ct,
        };
        let r = self.try_start(&ct).await;
        std::mem::forget(guard);
        if let Err(ref e) = r {
            self.inner.sm.abort_start(&ct);
            warn!("Failed to start advertising: {e}");
        }
        r
    }

    async fn try_start(&self, ct: &CancellationToken) -> Result<()> {
        let i = &*self.inner;
        i.adv.lock().validate()?;
        let own_app = !i.app.is_registered();
        if own_app {
            i.app.register(&i.bus, &i.adapter).await?;
            if ct.is_cancelled() {
                self.rollback(true, false).await;
                return Err(Error::Cancelled);
            }
        }
        let fallback = self.primary_uuids();
        let (path, props) = {
            let mut adv = i.adv.lock();
            adv.lock();
            (adv.path().clone(), adv.properties(&fallback))
        };
        self.drop_orphaned_adv(&path).await;
        debug!("Registering advertisement {path}");
        i.adv_pending.store(true, Ordering::Release);
        let r = (i.bus).register_advertisement(&i.adapter, &path, &props).await;
        i.adv_pending.store(false, Ordering::Release);
        if let Err(e) = r {
            self.rollback(own_app, false).await;
            return Err(Error::Registration(e.to_string()));
        }
        if let Err(e) = i.sm.finish_start(ct) {
            self.rollback(own_app, true).await;
            return Err(e);
        }
        Ok(())
    }

    /// Removes an advertisement whose registration was interrupted, in case
    /// the daemon completed it.
    async fn drop_orphaned_adv(&self, path: &Path) {
        let i = &*self.inner;
        if !i.adv_orphaned.swap(false, Ordering::AcqRel) {
            return;
        }
        match i.bus.unregister_advertisement(&i.adapter, path).await {
            Ok(()) => debug!("Unregistered interrupted advertisement {path}"),
            Err(e) => debug!("Interrupted advertisement {path} was not registered: {e}"),
        }
    }

    async fn rollback(&self, app: bool, adv: bool) {
        let i = &*self.inner;
        let path = {
            let mut a = i.adv.lock();
            a.unlock();
            a.path().clone()
        };
        if adv {
            if let Err(e) = i.bus.unregister_advertisement(&i.adapter, &path).await {
                warn!("Failed to unregister advertisement {path}: {e}");
            }
        }
        if app {
            i.app.unregister(&i.bus, &i.adapter).await;
        }
    }

    /// Stops advertising and unregisters the application. Cancels a start in
    /// progress. Daemon errors are logged and otherwise ignored.
    pub async fn stop(&self) {
        let i = &*self.inner;
        let adv = i.sm.stop();
        i.app.with_mut(Tree::clear_subscriptions);
        let path = {
            let mut a = i.adv.lock();
            a.unlock();
            a.path().clone()
        };
        if adv {
            match i.bus.unregister_advertisement(&i.adapter, &path).await {
                Ok(()) => debug!("Unregistered advertisement {path}"),
                Err(e) => warn!("Failed to unregister advertisement {path}: {e}"),
            }
        } else {
            self.drop_orphaned_adv(&path).await;
        }
        i.app.unregister(&i.bus, &i.adapter).await;
        info!("Server stopped");
    }

    /// Returns whether the server is advertising.
    #[inline]
    #[must_use]
    pub fn is_advertising(&self) -> bool {
        self.inner.sm.is_advertising()
    }

    /// Returns whether a central is connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.sm.is_connected()
    }

    /// Returns the current server state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> State {
        self.inner.sm.state()
    }

    /// Returns a receiver of server state transitions.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.inner.sm.subscribe()
    }

    /// Handles a device connection reported by the daemon.
    pub fn on_connect(&self, device: Path) -> bool {
        self.inner.sm.on_connect(device)
    }

    /// Handles a device disconnection reported by the daemon.
    pub fn on_disconnect(&self, device: &Path) -> bool {
        self.inner.sm.on_disconnect(device)
    }

    /// Handles a method call issued by the daemon. The error is sent back to
    /// the daemon as the error reply.
    pub fn dispatch(&self, call: Call) -> std::result::Result<Reply, ReqError> {
        let method = Method::resolve(&call.iface, &call.member)?;
        trace!("{}.{} on {}", call.iface, call.member, call.path);
        let i = &*self.inner;
        match method {
            Method::GetManagedObjects => {
                if call.path != i.app.path() {
                    return Err(ReqError::UnknownObject);
                }
                Ok(Reply::Objects(i.app.objects()))
            }
            Method::Release => {
                let mut adv = i.adv.lock();
                if call.path != *adv.path() {
                    return Err(ReqError::UnknownObject);
                }
                adv.release();
                drop(adv);
                i.sm.on_release();
                Ok(Reply::Empty)
            }
            Method::Get | Method::GetAll | Method::Set => self.properties(call),
            _ => self.node_call(method, call),
        }
    }

    fn node_call(&self, method: Method, call: Call) -> std::result::Result<Reply, ReqError> {
        let app = &self.inner.app;
        let node = (app.with(|t| t.node(&call.path))).ok_or(ReqError::UnknownObject)?;
        if node.iface() != call.iface {
            return Err(ReqError::UnknownInterface);
        }
        let attr = match node {
            Node::Characteristic(h) => AttrHandle::Characteristic(h),
            Node::Descriptor(h) => AttrHandle::Descriptor(h),
            Node::Service(_) => return Err(ReqError::UnknownMethod),
        };
        let req = |e: Error| e.to_req();
        match (method, attr, call.args) {
            (Method::ReadValue, _, Args::Options(ref o)) => {
                let opts = ReadOptions::decode(o)?;
                app.read(attr, &opts).map(Reply::Bytes).map_err(req)
            }
            (Method::ReadValue, _, Args::None) => {
                (app.read(attr, &ReadOptions::default()))
                    .map(Reply::Bytes)
                    .map_err(req)
            }
            (Method::WriteValue, _, Args::Write(ref v, ref o)) => {
                let opts = WriteOptions::decode(o)?;
                app.write(attr, v, &opts).map(|()| Reply::Empty).map_err(req)
            }
            (Method::StartNotify, AttrHandle::Characteristic(h), _) => {
                app.start_notify(h).map(|()| Reply::Empty).map_err(req)
            }
            (Method::StopNotify, AttrHandle::Characteristic(h), _) => {
                app.stop_notify(h).map(|()| Reply::Empty).map_err(req)
            }
            (Method::Confirm, AttrHandle::Characteristic(_), _) => {
                debug!("Indication confirmed for {}", call.path);
                Ok(Reply::Empty)
            }
            (Method::ReadValue | Method::WriteValue, _, _) => Err(ReqError::InvalidArgs),
            _ => Err(ReqError::UnknownMethod),
        }
    }

    fn properties(&self, call: Call) -> std::result::Result<Reply, ReqError> {
        let i = &*self.inner;
        let (iface, name, value) = match call.args {
            Args::Iface(iface) => (iface, None, None),
            Args::Property(iface, name) => (iface, Some(name), None),
            Args::SetProperty(iface, name, v) => (iface, Some(name), Some(v)),
            _ => return Err(ReqError::InvalidArgs),
        };
        let props = if call.path == *i.adv.lock().path() {
            if iface != ADVERTISEMENT_IFACE {
                return Err(ReqError::UnknownInterface);
            }
            if let (Some(name), Some(v)) = (name.as_deref(), value.as_ref()) {
                return (i.adv.lock().set_property(name, v))
                    .map(|()| Reply::Empty)
                    .map_err(|e| e.to_req());
            }
            let fallback = self.primary_uuids();
            i.adv.lock().properties(&fallback)
        } else if call.path == i.app.path() {
            if iface != OBJECT_MANAGER_IFACE {
                return Err(ReqError::UnknownInterface);
            }
            Props::new()
        } else {
            let node = (i.app.with(|t| t.node(&call.path))).ok_or(ReqError::UnknownObject)?;
            if iface != node.iface() {
                return Err(ReqError::UnknownInterface);
            }
            (i.app.with(|t| t.props(node))).map_err(|e| e.to_req())?
        };
        match (name, value) {
            (None, _) => Ok(Reply::Props(props)),
            (Some(name), None) => {
                (props.get(name.as_str()).cloned())
                    .map(Reply::Value)
                    .ok_or(ReqError::UnknownProperty)
            }
            (Some(name), Some(_)) => Err(if props.contains_key(name.as_str()) {
                ReqError::PropertyReadOnly
            } else {
                ReqError::UnknownProperty
            }),
        }
    }

    fn characteristic(&self, uuid: Uuid) -> Result<CharHandle> {
        (self.get_characteristic(uuid)).ok_or_else(|| Error::NotFound(format!("characteristic {uuid}")))
    }

    fn primary_uuids(&self) -> Vec<Uuid> {
        self.inner.app.with(|t| {
            (t.services())
                .filter_map(|(_, s)| s.is_primary().then_some(s.uuid()))
                .collect()
        })
    }
}

/// Abandons a start whose future is dropped before completing.
struct StartGuard<'a, B> {
    inner: &'a Inner<B>,
    ct: &'a CancellationToken,
}

impl<B> Drop for StartGuard<'_, B> {
    fn drop(&mut self) {
        let i = self.inner;
        warn!("Start interrupted");
        if i.adv_pending.swap(false, Ordering::AcqRel) {
            i.adv_orphaned.store(true, Ordering::Release);
        }
        i.adv.lock().unlock();
        i.sm.abort_start(self.ct);
    }
}

#[cfg(test)]
mod tests;
