//! Bluetooth LE peripheral (GATT server) library.
//!
//! Applications declare services, characteristics, and descriptors, advertise
//! them, and answer requests from remote centrals. The GATT tree and the
//! advertisement are exposed as objects on the platform Bluetooth daemon's
//! message bus (BlueZ `org.bluez.Gatt*1` and `org.bluez.LEAdvertisement1`
//! interfaces on Linux). The bus transport itself is supplied by the caller
//! through the [`bus::Bus`] trait, and daemon method calls are routed back in
//! through [`Server::dispatch`].
//!
//! All entry points are expected to run on a single cooperative event loop.
//! Read and write hooks execute inline on that loop and must not block.

#![warn(missing_debug_implementations)]
#![warn(non_ascii_idents)]
#![warn(single_use_lifetimes)]
#![warn(unused_crate_dependencies)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_lifetimes)]
#![warn(unused_qualifications)]
#![warn(clippy::nursery)]
#![warn(clippy::pedantic)]
#![allow(clippy::enum_glob_use)]
#![allow(clippy::inline_always)]
#![allow(clippy::module_name_repetitions)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::get_unwrap)]
#![warn(clippy::print_stdout)]
#![warn(clippy::str_to_string)]
#![warn(clippy::todo)]
#![warn(clippy::try_err)]

#[cfg(test)]
use {anyhow as _, matches as _, serde_json as _, tracing_subscriber as _};

pub use {
    adv::{AdvKind, Advertisement},
    att::{Denied, Perms, Value},
    bus::{Bus, BusError, ReqError},
    config::Config,
    gatt::{Application, CharHandle, DescHandle, Flags, ServiceHandle},
    server::Server,
    state::{Phase, State},
    uuid::Uuid,
};

pub mod adv;
pub mod att;
pub mod bus;
mod config;
pub mod gatt;
mod server;
pub mod state;
mod util;
mod uuid;

/// Error type returned by the peripheral API.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("permission denied: {0}")]
    Permission(#[from] Denied),
    #[error("GATT application is registered and cannot be modified")]
    AlreadyRegistered,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("characteristic {0} does not support notifications or indications")]
    UnsupportedOperation(Uuid),
    #[error("registration failed: {0}")]
    Registration(String),
    #[error("already advertising")]
    AlreadyAdvertising,
    #[error("duplicate UUID {0}")]
    Duplicate(Uuid),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid UUID {0:?}")]
    InvalidUuid(String),
    #[error("invalid object path {0:?}")]
    InvalidPath(String),
    #[error("invalid advertisement: {0}")]
    InvalidAdvertisement(String),
    #[error("request rejected with {0}")]
    Rejected(ReqError),
    #[error("start was cancelled by stop")]
    Cancelled,
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl Error {
    /// Returns the error reported to the daemon when this error terminates a
    /// daemon-issued request.
    #[must_use]
    pub fn to_req(&self) -> ReqError {
        match *self {
            Self::Permission(d) => d.to_req(),
            Self::UnsupportedOperation(_) => ReqError::NotSupported,
            Self::InvalidState(_) | Self::AlreadyRegistered => ReqError::NotPermitted,
            Self::Rejected(e) => e,
            Self::NotFound(_) => ReqError::UnknownObject,
            _ => ReqError::Failed,
        }
    }
}

/// Common result type.
pub type Result<T> = std::result::Result<T, Error>;
