use std::fmt::{Debug, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::att::Value;
use crate::bus::{Path, ReadOptions, ReqError, WriteOptions};
use crate::util::name_of;
use crate::Uuid;

/// I/O hook result type. The error is returned to the daemon as the reply to
/// the request that invoked the hook.
pub type IoResult<T> = std::result::Result<T, ReqError>;

type ReadFn = dyn Fn(&ReadReq<'_>) -> IoResult<Vec<u8>> + Send + Sync;
type WriteFn = dyn Fn(&mut WriteReq<'_>) -> IoResult<()> + Send + Sync;

/// Characteristic or descriptor read hook. The returned bytes are sent to the
/// central without replacing the stored value.
#[derive(Clone)]
#[repr(transparent)]
pub struct ReadHook(Arc<ReadFn>);

impl ReadHook {
    /// Creates a read hook from a closure.
    #[inline]
    pub fn new(f: impl Fn(&ReadReq<'_>) -> IoResult<Vec<u8>> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Calls the hook, converting a panic into a `Failed` reply.
    #[inline]
    pub(crate) fn call(&self, req: &ReadReq<'_>) -> IoResult<Vec<u8>> {
        guard(req.uuid, || (self.0)(req))
    }
}

impl Debug for ReadHook {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        (f.debug_tuple(name_of!(ReadHook)).field(&Arc::as_ptr(&self.0))).finish()
    }
}

/// Characteristic or descriptor write hook. The hook owns all mutation of the
/// stored value.
#[derive(Clone)]
#[repr(transparent)]
pub struct WriteHook(Arc<WriteFn>);

impl WriteHook {
    /// Creates a write hook from a closure.
    #[inline]
    pub fn new(f: impl Fn(&mut WriteReq<'_>) -> IoResult<()> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Calls the hook, converting a panic into a `Failed` reply.
    #[inline]
    pub(crate) fn call(&self, req: &mut WriteReq<'_>) -> IoResult<()> {
        let uuid = req.uuid;
        guard(uuid, || (self.0)(req))
    }
}

impl Debug for WriteHook {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        (f.debug_tuple(name_of!(WriteHook)).field(&Arc::as_ptr(&self.0))).finish()
    }
}

fn guard<T>(uuid: Uuid, f: impl FnOnce() -> IoResult<T>) -> IoResult<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        error!("I/O hook for {uuid} panicked");
        Err(ReqError::Failed)
    })
}

/// Read request passed to a [`ReadHook`].
#[derive(Debug)]
pub struct ReadReq<'a> {
    pub(super) uuid: Uuid,
    pub(super) path: &'a Path,
    pub(super) value: &'a [u8],
    pub(super) opts: &'a ReadOptions,
}

impl<'a> ReadReq<'a> {
    /// Returns the attribute UUID.
    #[inline(always)]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the attribute object path.
    #[inline(always)]
    #[must_use]
    pub const fn path(&self) -> &'a Path {
        self.path
    }

    /// Returns the complete stored value.
    #[inline(always)]
    #[must_use]
    pub const fn value(&self) -> &'a [u8] {
        self.value
    }

    /// Returns the requested value offset.
    #[inline(always)]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.opts.offset as _
    }

    /// Returns the request options.
    #[inline(always)]
    #[must_use]
    pub const fn options(&self) -> &'a ReadOptions {
        self.opts
    }

    /// Returns `v` starting at the requested offset.
    #[inline]
    pub fn complete(&self, v: impl AsRef<[u8]>) -> IoResult<Vec<u8>> {
        let v = v.as_ref().get(self.offset()..);
        v.map(<[u8]>::to_vec).ok_or(ReqError::InvalidOffset)
    }
}

/// Write request passed to a [`WriteHook`].
#[derive(Debug)]
pub struct WriteReq<'a> {
    pub(super) uuid: Uuid,
    pub(super) path: &'a Path,
    pub(super) data: &'a [u8],
    pub(super) value: &'a mut Value,
    pub(super) opts: &'a WriteOptions,
}

impl<'a> WriteReq<'a> {
    /// Returns the attribute UUID.
    #[inline(always)]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the attribute object path.
    #[inline(always)]
    #[must_use]
    pub const fn path(&self) -> &'a Path {
        self.path
    }

    /// Returns the bytes written by the central.
    #[inline(always)]
    #[must_use]
    pub const fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns the requested value offset.
    #[inline(always)]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.opts.offset as _
    }

    /// Returns the request options.
    #[inline(always)]
    #[must_use]
    pub const fn options(&self) -> &'a WriteOptions {
        self.opts
    }

    /// Returns the stored value.
    #[inline(always)]
    #[must_use]
    pub fn current(&self) -> &[u8] {
        self.value.read()
    }

    /// Replaces the stored value with `v`.
    #[inline]
    pub fn set(&mut self, v: impl AsRef<[u8]>) -> IoResult<()> {
        self.value.set(v).map_err(|e| e.to_req())
    }

    /// Stores the written bytes at the requested offset, subject to the
    /// value's permissions and length limit.
    #[inline]
    pub fn accept(&mut self) -> IoResult<()> {
        (self.value)
            .write_at(self.offset(), self.data)
            .map_err(|e| e.to_req())
    }
}

impl AsRef<[u8]> for WriteReq<'_> {
    #[inline(always)]
    fn as_ref(&self) -> &[u8] {
        self.data
    }
}
