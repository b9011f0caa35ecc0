//! Seam to the platform daemon's message bus.
//!
//! The bus transport (connection management and the wire format) is not part
//! of this crate. Implementations of [`Bus`] forward registration requests and
//! signals to the daemon, and deliver the daemon's method calls to
//! [`Server::dispatch`](crate::Server::dispatch) as decoded [`Call`]s.

use std::collections::BTreeMap;
use std::future::Future;

pub use {dispatch::*, path::*, variant::*};

pub mod testing;

mod dispatch;
mod path;
mod variant;

/// GATT application registration interface of an adapter object.
pub const GATT_MANAGER_IFACE: &str = "org.bluez.GattManager1";
/// Advertisement registration interface of an adapter object.
pub const ADV_MANAGER_IFACE: &str = "org.bluez.LEAdvertisingManager1";
/// GATT service object interface.
pub const SERVICE_IFACE: &str = "org.bluez.GattService1";
/// GATT characteristic object interface.
pub const CHARACTERISTIC_IFACE: &str = "org.bluez.GattCharacteristic1";
/// GATT descriptor object interface.
pub const DESCRIPTOR_IFACE: &str = "org.bluez.GattDescriptor1";
/// Advertisement object interface.
pub const ADVERTISEMENT_IFACE: &str = "org.bluez.LEAdvertisement1";
/// Standard object manager interface exported at the application root.
pub const OBJECT_MANAGER_IFACE: &str = "org.freedesktop.DBus.ObjectManager";
/// Standard properties interface exported by every object.
pub const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";

/// Property name to value map of one interface.
pub type Props = BTreeMap<&'static str, Variant>;

/// Interface name to properties map of one object.
pub type Interfaces = BTreeMap<&'static str, Props>;

/// Object path to interfaces map, as returned by `GetManagedObjects`.
pub type ObjectMap = BTreeMap<Path, Interfaces>;

/// Error returned by the bus transport or the daemon.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct BusError {
    name: String,
    message: String,
}

impl BusError {
    /// Creates a new bus error from an error name and message.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Returns the error name (e.g. `org.bluez.Error.Failed`).
    #[inline(always)]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the error message.
    #[inline(always)]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Common bus result type.
pub type BusResult<T> = std::result::Result<T, BusError>;

/// Outbound half of the daemon bus. Every method is a suspension point of the
/// event loop.
pub trait Bus: Send + Sync + 'static {
    /// Exports `objects` and calls `RegisterApplication` on
    /// [`GATT_MANAGER_IFACE`] of `adapter` for the application rooted at
    /// `app`. The daemon either accepts the whole tree or none of it.
    fn register_application(
        &self,
        adapter: &Path,
        app: &Path,
        objects: &ObjectMap,
    ) -> impl Future<Output = BusResult<()>> + Send;

    /// Calls `UnregisterApplication` on [`GATT_MANAGER_IFACE`] and removes
    /// the exported objects.
    fn unregister_application(
        &self,
        adapter: &Path,
        app: &Path,
    ) -> impl Future<Output = BusResult<()>> + Send;

    /// Exports the advertisement object and calls `RegisterAdvertisement` on
    /// [`ADV_MANAGER_IFACE`].
    fn register_advertisement(
        &self,
        adapter: &Path,
        adv: &Path,
        props: &Props,
    ) -> impl Future<Output = BusResult<()>> + Send;

    /// Calls `UnregisterAdvertisement` on [`ADV_MANAGER_IFACE`] and removes
    /// the exported object.
    fn unregister_advertisement(
        &self,
        adapter: &Path,
        adv: &Path,
    ) -> impl Future<Output = BusResult<()>> + Send;

    /// Emits `org.freedesktop.DBus.Properties.PropertiesChanged` for `iface`
    /// on the object at `path`.
    fn emit_properties_changed(
        &self,
        path: &Path,
        iface: &'static str,
        changed: &Props,
    ) -> impl Future<Output = BusResult<()>> + Send;
}

/// Error reply sent to the daemon for a failed request.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ReqError {
    #[default]
    #[error("request failed")]
    Failed,
    #[error("request already in progress")]
    InProgress,
    #[error("invalid value offset")]
    InvalidOffset,
    #[error("invalid value length")]
    InvalidValueLength,
    #[error("request not permitted")]
    NotPermitted,
    #[error("request not authorized")]
    NotAuthorized,
    #[error("request not supported")]
    NotSupported,
    #[error("unknown object")]
    UnknownObject,
    #[error("unknown method")]
    UnknownMethod,
    #[error("unknown interface")]
    UnknownInterface,
    #[error("unknown property")]
    UnknownProperty,
    #[error("property is read-only")]
    PropertyReadOnly,
    #[error("invalid arguments")]
    InvalidArgs,
}

impl ReqError {
    /// Returns the bus error name of the reply.
    #[must_use]
    pub const fn name(self) -> &'static str {
        use ReqError::*;
        match self {
            Failed => "org.bluez.Error.Failed",
            InProgress => "org.bluez.Error.InProgress",
            InvalidOffset => "org.bluez.Error.InvalidOffset",
            InvalidValueLength => "org.bluez.Error.InvalidValueLength",
            NotPermitted => "org.bluez.Error.NotPermitted",
            NotAuthorized => "org.bluez.Error.NotAuthorized",
            NotSupported => "org.bluez.Error.NotSupported",
            UnknownObject => "org.freedesktop.DBus.Error.UnknownObject",
            UnknownMethod => "org.freedesktop.DBus.Error.UnknownMethod",
            UnknownInterface => "org.freedesktop.DBus.Error.UnknownInterface",
            UnknownProperty => "org.freedesktop.DBus.Error.UnknownProperty",
            PropertyReadOnly => "org.freedesktop.DBus.Error.PropertyReadOnly",
            InvalidArgs => "org.freedesktop.DBus.Error.InvalidArgs",
        }
    }
}

impl From<ReqError> for BusError {
    #[inline]
    fn from(e: ReqError) -> Self {
        Self::new(e.name(), e.to_string())
    }
}
