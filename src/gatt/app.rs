use std::collections::HashMap;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::att::{Perms, Value};
use crate::bus::*;
use crate::{Error, Result, Uuid};

use super::*;

macro_rules! handle {
    ($($(#[$doc:meta])* $t:ident),* $(,)?) => {$(
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        #[repr(transparent)]
        pub struct $t(u16);

        impl $t {
            #[inline(always)]
            const fn idx(self) -> usize {
                self.0 as usize
            }
        }
    )*};
}

handle! {
    /// Service handle. Handles are indices into the application arena and
    /// are only meaningful for the application that issued them.
    ServiceHandle,
    /// Characteristic handle.
    CharHandle,
    /// Descriptor handle.
    DescHandle,
}

/// Handle of a node that carries a value.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AttrHandle {
    Characteristic(CharHandle),
    Descriptor(DescHandle),
}

impl From<CharHandle> for AttrHandle {
    #[inline(always)]
    fn from(h: CharHandle) -> Self {
        Self::Characteristic(h)
    }
}

impl From<DescHandle> for AttrHandle {
    #[inline(always)]
    fn from(h: DescHandle) -> Self {
        Self::Descriptor(h)
    }
}

/// Object in the application tree.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Node {
    Service(ServiceHandle),
    Characteristic(CharHandle),
    Descriptor(DescHandle),
}

impl Node {
    /// Returns the bus interface implemented by the node.
    #[inline]
    #[must_use]
    pub const fn iface(self) -> &'static str {
        match self {
            Self::Service(_) => SERVICE_IFACE,
            Self::Characteristic(_) => CHARACTERISTIC_IFACE,
            Self::Descriptor(_) => DESCRIPTOR_IFACE,
        }
    }
}

/// GATT service node.
#[derive(Debug)]
pub struct Service {
    uuid: Uuid,
    primary: bool,
    path: Path,
    chars: SmallVec<[CharHandle; 4]>,
}

impl Service {
    /// Returns the service UUID.
    #[inline(always)]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns whether this is a primary service.
    #[inline(always)]
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.primary
    }

    /// Returns the object path.
    #[inline(always)]
    #[must_use]
    pub const fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the service characteristics in definition order.
    #[inline(always)]
    #[must_use]
    pub fn characteristics(&self) -> &[CharHandle] {
        &self.chars
    }
}

/// GATT characteristic node.
#[derive(Debug)]
pub struct Characteristic {
    pub(super) uuid: Uuid,
    pub(super) flags: Flags,
    pub(super) path: Path,
    pub(super) svc: ServiceHandle,
    pub(super) value: Value,
    pub(super) descs: SmallVec<[DescHandle; 2]>,
    pub(super) subscribed: bool,
    pub(super) read: Option<ReadHook>,
    pub(super) write: Option<WriteHook>,
}

impl Characteristic {
    /// Returns the characteristic UUID.
    #[inline(always)]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the characteristic flags.
    #[inline(always)]
    pub const fn flags(&self) -> Flags {
        self.flags
    }

    /// Returns the object path.
    #[inline(always)]
    #[must_use]
    pub const fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the owning service.
    #[inline(always)]
    #[must_use]
    pub const fn service(&self) -> ServiceHandle {
        self.svc
    }

    /// Returns the stored value.
    #[inline(always)]
    #[must_use]
    pub fn value(&self) -> &[u8] {
        self.value.read()
    }

    /// Returns the value permissions.
    #[inline(always)]
    pub const fn perms(&self) -> Perms {
        self.value.perms()
    }

    /// Returns the characteristic descriptors in definition order.
    #[inline(always)]
    #[must_use]
    pub fn descriptors(&self) -> &[DescHandle] {
        &self.descs
    }

    /// Returns whether a central has enabled notifications or indications.
    #[inline(always)]
    #[must_use]
    pub const fn is_subscribed(&self) -> bool {
        self.subscribed
    }
}

/// GATT descriptor node.
#[derive(Debug)]
pub struct Descriptor {
    pub(super) uuid: Uuid,
    pub(super) path: Path,
    pub(super) chr: CharHandle,
    pub(super) value: Value,
    pub(super) read: Option<ReadHook>,
    pub(super) write: Option<WriteHook>,
}

impl Descriptor {
    /// Returns the descriptor UUID.
    #[inline(always)]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the object path.
    #[inline(always)]
    #[must_use]
    pub const fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the owning characteristic.
    #[inline(always)]
    #[must_use]
    pub const fn characteristic(&self) -> CharHandle {
        self.chr
    }

    /// Returns the stored value.
    #[inline(always)]
    #[must_use]
    pub fn value(&self) -> &[u8] {
        self.value.read()
    }
}

/// Registration state of the tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Reg {
    Unregistered,
    Pending,
    Registered,
    /// The registration call was dropped before completing, so the daemon may
    /// or may not hold the application.
    Interrupted,
}

/// Arena holding every node of one GATT application. Children refer to their
/// parents by handle, and every node's object path is fixed when the node is
/// added: `<base>/service<i>/char<j>/desc<k>`, where each index is the
/// position under the parent.
#[derive(Debug)]
pub struct Tree {
    base: Path,
    max_len: usize,
    pub(super) svcs: Vec<Service>,
    pub(super) chars: Vec<Characteristic>,
    pub(super) descs: Vec<Descriptor>,
    paths: HashMap<Path, Node>,
    reg: Reg,
    pub(super) default_read: Option<ReadHook>,
    pub(super) default_write: Option<WriteHook>,
}

impl Tree {
    fn new(base: Path, max_len: usize) -> Self {
        Self {
            base,
            max_len,
            svcs: Vec::new(),
            chars: Vec::new(),
            descs: Vec::new(),
            paths: HashMap::new(),
            reg: Reg::Unregistered,
            default_read: None,
            default_write: None,
        }
    }

    /// Returns the application root path.
    #[inline(always)]
    #[must_use]
    pub const fn path(&self) -> &Path {
        &self.base
    }

    /// Returns whether the tree is registered with the daemon.
    #[inline(always)]
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.reg == Reg::Registered
    }

    /// Returns the service with the specified handle.
    pub fn service(&self, h: ServiceHandle) -> Result<&Service> {
        (self.svcs.get(h.idx())).ok_or_else(|| Error::NotFound(format!("{h:?}")))
    }

    /// Returns the characteristic with the specified handle.
    pub fn characteristic(&self, h: CharHandle) -> Result<&Characteristic> {
        (self.chars.get(h.idx())).ok_or_else(|| Error::NotFound(format!("{h:?}")))
    }

    /// Returns the descriptor with the specified handle.
    pub fn descriptor(&self, h: DescHandle) -> Result<&Descriptor> {
        (self.descs.get(h.idx())).ok_or_else(|| Error::NotFound(format!("{h:?}")))
    }

    pub(super) fn characteristic_mut(&mut self, h: CharHandle) -> Result<&mut Characteristic> {
        (self.chars.get_mut(h.idx())).ok_or_else(|| Error::NotFound(format!("{h:?}")))
    }

    pub(super) fn descriptor_mut(&mut self, h: DescHandle) -> Result<&mut Descriptor> {
        (self.descs.get_mut(h.idx())).ok_or_else(|| Error::NotFound(format!("{h:?}")))
    }

    /// Returns an iterator over all services and their handles.
    #[allow(clippy::cast_possible_truncation)]
    pub fn services(&self) -> impl Iterator<Item = (ServiceHandle, &Service)> {
        (self.svcs.iter().enumerate()).map(|(i, s)| (ServiceHandle(i as u16), s))
    }

    /// Returns the service with the specified UUID.
    #[must_use]
    pub fn service_by_uuid(&self, uuid: Uuid) -> Option<ServiceHandle> {
        self.services().find_map(|(h, s)| (s.uuid == uuid).then_some(h))
    }

    /// Returns the node at `path`.
    #[inline]
    #[must_use]
    pub fn node(&self, path: &Path) -> Option<Node> {
        self.paths.get(path).copied()
    }

    /// Adds a service.
    pub fn add_service(&mut self, uuid: Uuid, primary: bool) -> Result<ServiceHandle> {
        self.check_mutable()?;
        if self.service_by_uuid(uuid).is_some() {
            return Err(Error::Duplicate(uuid));
        }
        let h = next(self.svcs.len(), ServiceHandle)?;
        let path = self.base.child(format_args!("service{}", h.0));
        self.paths.insert(path.clone(), Node::Service(h));
        debug!("Added service {uuid} at {path}");
        self.svcs.push(Service {
            uuid,
            primary,
            path,
            chars: SmallVec::new(),
        });
        Ok(h)
    }

    /// Adds a characteristic with an initial value to service `svc`.
    pub fn add_characteristic(
        &mut self,
        svc: ServiceHandle,
        uuid: Uuid,
        flags: Flags,
        perms: Perms,
        value: &[u8],
    ) -> Result<CharHandle> {
        self.check_mutable()?;
        let s = self.service(svc)?;
        let path = s.path.child(format_args!("char{}", s.chars.len()));
        let mut v = Value::with_limit(perms, self.max_len);
        v.set(value)?;
        let h = next(self.chars.len(), CharHandle)?;
        self.svcs[svc.idx()].chars.push(h);
        self.paths.insert(path.clone(), Node::Characteristic(h));
        debug!("Added characteristic {uuid} {flags:?} at {path}");
        self.chars.push(Characteristic {
            uuid,
            flags,
            path,
            svc,
            value: v,
            descs: SmallVec::new(),
            subscribed: false,
            read: None,
            write: None,
        });
        Ok(h)
    }

    /// Adds a descriptor with an initial value to characteristic `chr`.
    pub fn add_descriptor(
        &mut self,
        chr: CharHandle,
        uuid: Uuid,
        perms: Perms,
        value: &[u8],
    ) -> Result<DescHandle> {
        self.check_mutable()?;
        let c = self.characteristic(chr)?;
        let path = c.path.child(format_args!("desc{}", c.descs.len()));
        let mut v = Value::with_limit(perms, self.max_len);
        v.set(value)?;
        let h = next(self.descs.len(), DescHandle)?;
        self.chars[chr.idx()].descs.push(h);
        self.paths.insert(path.clone(), Node::Descriptor(h));
        debug!("Added descriptor {uuid} at {path}");
        self.descs.push(Descriptor {
            uuid,
            path,
            chr,
            value: v,
            read: None,
            write: None,
        });
        Ok(h)
    }

    /// Installs or removes a read hook.
    pub fn set_read_hook(&mut self, h: AttrHandle, hook: Option<ReadHook>) -> Result<()> {
        match h {
            AttrHandle::Characteristic(h) => self.characteristic_mut(h)?.read = hook,
            AttrHandle::Descriptor(h) => self.descriptor_mut(h)?.read = hook,
        }
        Ok(())
    }

    /// Installs or removes a write hook.
    pub fn set_write_hook(&mut self, h: AttrHandle, hook: Option<WriteHook>) -> Result<()> {
        match h {
            AttrHandle::Characteristic(h) => self.characteristic_mut(h)?.write = hook,
            AttrHandle::Descriptor(h) => self.descriptor_mut(h)?.write = hook,
        }
        Ok(())
    }

    /// Installs or removes the read hook used by characteristics without
    /// their own hook.
    #[inline]
    pub fn set_default_read_hook(&mut self, hook: Option<ReadHook>) {
        self.default_read = hook;
    }

    /// Installs or removes the write hook used by characteristics without
    /// their own hook.
    #[inline]
    pub fn set_default_write_hook(&mut self, hook: Option<WriteHook>) {
        self.default_write = hook;
    }

    /// Returns the properties exported by `node`.
    pub fn props(&self, node: Node) -> Result<Props> {
        let p = match node {
            Node::Service(h) => {
                let s = self.service(h)?;
                Props::from([
                    ("UUID", Variant::from(s.uuid.to_string())),
                    ("Primary", Variant::from(s.primary)),
                    ("Characteristics", Variant::from(self.char_paths(&s.chars))),
                ])
            }
            Node::Characteristic(h) => {
                let c = self.characteristic(h)?;
                Props::from([
                    ("UUID", Variant::from(c.uuid.to_string())),
                    ("Service", Variant::from(self.svcs[c.svc.idx()].path.clone())),
                    ("Flags", Variant::from(c.flags.to_strings())),
                    ("Value", Variant::from(c.value.read().to_vec())),
                    ("Notifying", Variant::from(c.subscribed)),
                    ("WriteAcquired", Variant::from(false)),
                    ("NotifyAcquired", Variant::from(false)),
                    ("Descriptors", Variant::from(self.desc_paths(&c.descs))),
                ])
            }
            Node::Descriptor(h) => {
                let d = self.descriptor(h)?;
                Props::from([
                    ("UUID", Variant::from(d.uuid.to_string())),
                    ("Characteristic", Variant::from(self.chars[d.chr.idx()].path.clone())),
                    ("Flags", Variant::from(d.value.perms().to_flags())),
                    ("Value", Variant::from(d.value.read().to_vec())),
                ])
            }
        };
        Ok(p)
    }

    /// Returns every node with its exported interfaces and properties, as
    /// reported by `GetManagedObjects`.
    #[must_use]
    pub fn objects(&self) -> ObjectMap {
        (self.paths.iter())
            .filter_map(|(path, &node)| {
                let props = self.props(node).ok()?;
                Some((path.clone(), Interfaces::from([(node.iface(), props)])))
            })
            .collect()
    }

    /// Clears all subscriptions.
    pub fn clear_subscriptions(&mut self) {
        for c in self.chars.iter_mut().filter(|c| c.subscribed) {
            debug!("Notifications disabled for {} at {}", c.uuid, c.path);
            c.subscribed = false;
        }
    }

    /// Logs the tree structure.
    pub fn dump(&self) {
        debug!("GATT application {}:", self.base);
        for s in &self.svcs {
            let sec = if s.primary { "" } else { "(Secondary) " };
            debug!("{sec}Service <{}> {}", s.uuid, s.path);
            for c in s.chars.iter().map(|h| &self.chars[h.idx()]) {
                debug!("|__ Characteristic <{}> {:?}", c.uuid, c.flags);
                for d in c.descs.iter().map(|h| &self.descs[h.idx()]) {
                    debug!("|   |__ Descriptor <{}>", d.uuid);
                }
            }
        }
    }

    fn char_paths(&self, hs: &[CharHandle]) -> Vec<Path> {
        (hs.iter()).map(|h| self.chars[h.idx()].path.clone()).collect()
    }

    fn desc_paths(&self, hs: &[DescHandle]) -> Vec<Path> {
        (hs.iter()).map(|h| self.descs[h.idx()].path.clone()).collect()
    }

    fn check_mutable(&self) -> Result<()> {
        match self.reg {
            Reg::Unregistered | Reg::Interrupted => Ok(()),
            Reg::Pending | Reg::Registered => Err(Error::AlreadyRegistered),
        }
    }

    /// Validates the tree and marks registration as in progress. Returns the
    /// objects to submit.
    fn begin_register(&mut self) -> Result<ObjectMap> {
        self.check_mutable()?;
        if self.svcs.is_empty() {
            return Err(Error::Registration("application has no services".to_owned()));
        }
        self.reg = Reg::Pending;
        Ok(self.objects())
    }
}

#[inline]
fn next<T>(n: usize, f: impl FnOnce(u16) -> T) -> Result<T> {
    (u16::try_from(n).map(f)).map_err(|_| Error::InvalidState("too many GATT nodes"))
}

/// GATT application. Owns the node tree and registers it with the daemon as
/// one unit. The tree cannot be modified while it is registered.
#[derive(Debug)]
pub struct Application {
    tree: Mutex<Tree>,
}

impl Application {
    /// Creates an empty application rooted at `base`. Attribute values are
    /// limited to `max_len` bytes.
    #[must_use]
    pub fn new(base: Path, max_len: usize) -> Self {
        Self {
            tree: Mutex::new(Tree::new(base, max_len)),
        }
    }

    /// Calls `f` with shared access to the tree.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&Tree) -> R) -> R {
        f(&self.tree.lock())
    }

    /// Calls `f` with exclusive access to the tree.
    #[inline]
    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut Tree) -> R) -> R {
        f(&mut self.tree.lock())
    }

    /// Returns the application root path.
    #[must_use]
    pub fn path(&self) -> Path {
        self.with(|t| t.base.clone())
    }

    /// Returns whether the tree is registered with the daemon.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.with(Tree::is_registered)
    }

    /// Adds a service. Fails with [`Error::AlreadyRegistered`] while the
    /// application is registered.
    pub fn add_service(&self, uuid: Uuid, primary: bool) -> Result<ServiceHandle> {
        self.with_mut(|t| t.add_service(uuid, primary))
    }

    /// Adds a characteristic to `svc`.
    pub fn add_characteristic(
        &self,
        svc: ServiceHandle,
        uuid: Uuid,
        flags: Flags,
        perms: Perms,
        value: &[u8],
    ) -> Result<CharHandle> {
        self.with_mut(|t| t.add_characteristic(svc, uuid, flags, perms, value))
    }

    /// Adds a descriptor to `chr`.
    pub fn add_descriptor(
        &self,
        chr: CharHandle,
        uuid: Uuid,
        perms: Perms,
        value: &[u8],
    ) -> Result<DescHandle> {
        self.with_mut(|t| t.add_descriptor(chr, uuid, perms, value))
    }

    /// Returns the objects exported by the application.
    #[must_use]
    pub fn objects(&self) -> ObjectMap {
        self.with(Tree::objects)
    }

    /// Registers the whole tree with the daemon. On failure the tree is left
    /// unregistered and unchanged. If the returned future is dropped before
    /// the daemon replies, the tree becomes modifiable again and the next
    /// [`unregister`](Self::unregister) asks the daemon to drop it.
    pub async fn register<B: Bus>(&self, bus: &B, adapter: &Path) -> Result<()> {
        let (path, objects, prev) = self.with_mut(|t| {
            let prev = t.reg;
            Ok::<_, Error>((t.base.clone(), t.begin_register()?, prev))
        })?;
        debug!("Registering GATT application {path} ({} objects)", objects.len());
        let pending = PendingGuard(self);
        let r = bus.register_application(adapter, &path, &objects).await;
        std::mem::forget(pending);
        let mut t = self.tree.lock();
        match r {
            Ok(()) => {
                t.reg = Reg::Registered;
                info!("Registered GATT application {path} on {adapter}");
                t.dump();
                Ok(())
            }
            Err(e) => {
                // The daemon may still hold an interrupted registration.
                t.reg = prev;
                warn!("Failed to register GATT application {path}: {e}");
                Err(Error::Registration(e.to_string()))
            }
        }
    }

    /// Unregisters the tree. Local state is reset even if the daemon reports
    /// an error, which is only logged. Does nothing if the tree is not
    /// registered and no registration was interrupted.
    pub async fn unregister<B: Bus>(&self, bus: &B, adapter: &Path) {
        let (path, prev) = {
            let mut t = self.tree.lock();
            let prev = t.reg;
            if !matches!(prev, Reg::Registered | Reg::Interrupted) {
                return;
            }
            t.reg = Reg::Unregistered;
            t.clear_subscriptions();
            (t.base.clone(), prev)
        };
        match bus.unregister_application(adapter, &path).await {
            Ok(()) => info!("Unregistered GATT application {path}"),
            Err(e) if prev == Reg::Interrupted => {
                debug!("Interrupted GATT application {path} was not registered: {e}");
            }
            Err(e) => warn!("Failed to unregister GATT application {path}: {e}"),
        }
    }
}

/// Marks the registration as interrupted if the [`Application::register`]
/// future is dropped while waiting for the daemon.
struct PendingGuard<'a>(&'a Application);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut t = self.0.tree.lock();
        if t.reg == Reg::Pending {
            warn!("GATT application {} registration interrupted", t.base);
            t.reg = Reg::Interrupted;
        }
    }
}
