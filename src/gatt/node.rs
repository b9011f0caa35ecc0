use tracing::{debug, warn};

use crate::att::{Denied, Value};
use crate::bus::*;
use crate::{Error, Result, Uuid};

use super::*;

impl Tree {
    /// Reads the value of a characteristic or descriptor on behalf of a
    /// central. The read hook, if any, produces the reply.
    pub(crate) fn read(&self, h: AttrHandle, opts: &ReadOptions) -> Result<Vec<u8>> {
        match h {
            AttrHandle::Characteristic(h) => {
                let c = self.characteristic(h)?;
                if !c.flags.can_read() {
                    return Err(denied("read", &c.path, Denied::NotReadable));
                }
                let hook = c.read.as_ref().or(self.default_read.as_ref());
                read_value(c.uuid, &c.path, &c.value, hook, opts)
            }
            AttrHandle::Descriptor(h) => {
                let d = self.descriptor(h)?;
                read_value(d.uuid, &d.path, &d.value, d.read.as_ref(), opts)
            }
        }
    }

    /// Writes the value of a characteristic or descriptor on behalf of a
    /// central. The write hook, if any, owns the update.
    pub(crate) fn write(&mut self, h: AttrHandle, data: &[u8], opts: &WriteOptions) -> Result<()> {
        let default = self.default_write.clone();
        match h {
            AttrHandle::Characteristic(h) => {
                let c = self.characteristic_mut(h)?;
                if !c.flags.can_write() {
                    return Err(denied("write", &c.path, Denied::NotWritable));
                }
                let hook = c.write.as_ref().or(default.as_ref());
                write_value(c.uuid, &c.path, &mut c.value, hook, data, opts)
            }
            AttrHandle::Descriptor(h) => {
                let d = self.descriptor_mut(h)?;
                write_value(d.uuid, &d.path, &mut d.value, d.write.as_ref(), data, opts)
            }
        }
    }

    /// Enables notifications. Returns whether the subscription state changed.
    pub(crate) fn start_notify(&mut self, h: CharHandle) -> Result<bool> {
        let c = self.notifiable(h)?;
        if c.subscribed {
            return Ok(false);
        }
        c.subscribed = true;
        debug!("Notifications enabled for {} at {}", c.uuid, c.path);
        Ok(true)
    }

    /// Disables notifications. Returns whether the subscription state changed.
    pub(crate) fn stop_notify(&mut self, h: CharHandle) -> Result<bool> {
        let c = self.notifiable(h)?;
        if !c.subscribed {
            return Ok(false);
        }
        c.subscribed = false;
        debug!("Notifications disabled for {} at {}", c.uuid, c.path);
        Ok(true)
    }

    /// Returns the path and current value to publish for a notification, or
    /// [`None`] if no central is subscribed.
    pub(crate) fn notification(&self, h: CharHandle) -> Result<Option<(Path, Vec<u8>)>> {
        let c = self.characteristic(h)?;
        if !c.subscribed {
            debug!("Notification for {} dropped (not subscribed)", c.uuid);
            return Ok(None);
        }
        Ok(Some((c.path.clone(), c.value.read().to_vec())))
    }

    /// Returns the stored value without permission checks.
    pub(crate) fn value(&self, h: AttrHandle) -> Result<Vec<u8>> {
        Ok(match h {
            AttrHandle::Characteristic(h) => self.characteristic(h)?.value.read().to_vec(),
            AttrHandle::Descriptor(h) => self.descriptor(h)?.value.read().to_vec(),
        })
    }

    /// Replaces the stored value without permission checks.
    pub(crate) fn set_value(&mut self, h: AttrHandle, v: &[u8]) -> Result<()> {
        let value = match h {
            AttrHandle::Characteristic(h) => &mut self.characteristic_mut(h)?.value,
            AttrHandle::Descriptor(h) => &mut self.descriptor_mut(h)?.value,
        };
        Ok(value.set(v)?)
    }

    fn notifiable(&mut self, h: CharHandle) -> Result<&mut Characteristic> {
        let c = self.characteristic_mut(h)?;
        if c.flags.can_notify() {
            Ok(c)
        } else {
            warn!("Characteristic {} does not support notifications", c.uuid);
            Err(Error::UnsupportedOperation(c.uuid))
        }
    }
}

fn read_value(
    uuid: Uuid,
    path: &Path,
    value: &Value,
    hook: Option<&ReadHook>,
    opts: &ReadOptions,
) -> Result<Vec<u8>> {
    value.check_read().map_err(|e| denied("read", path, e))?;
    if let Some(hook) = hook {
        let req = ReadReq {
            uuid,
            path,
            value: value.read(),
            opts,
        };
        return hook.call(&req).map_err(Error::Rejected);
    }
    let off = usize::from(opts.offset);
    match value.read_at(off) {
        Ok(v) => Ok(v.to_vec()),
        Err(e) => Err(denied("read", path, e)),
    }
}

fn write_value(
    uuid: Uuid,
    path: &Path,
    value: &mut Value,
    hook: Option<&WriteHook>,
    data: &[u8],
    opts: &WriteOptions,
) -> Result<()> {
    if !value.perms().is_writable() {
        return Err(denied("write", path, Denied::NotWritable));
    }
    if let Some(max) = opts.max_payload() {
        if data.len() > max {
            let len = data.len();
            return Err(denied("write", path, Denied::TooLong { len, max }));
        }
    }
    if let Some(hook) = hook {
        let mut req = WriteReq {
            uuid,
            path,
            data,
            value,
            opts,
        };
        return hook.call(&mut req).map_err(Error::Rejected);
    }
    let off = usize::from(opts.offset);
    value.write_at(off, data).map_err(|e| denied("write", path, e))
}

#[inline]
fn denied(op: &str, path: &Path, e: Denied) -> Error {
    warn!("Denied {op} of {path} due to {e}");
    Error::Permission(e)
}

impl Application {
    /// Reads a characteristic or descriptor value on behalf of a central.
    pub fn read(&self, h: impl Into<AttrHandle>, opts: &ReadOptions) -> Result<Vec<u8>> {
        let h = h.into();
        self.with(|t| t.read(h, opts))
    }

    /// Writes a characteristic or descriptor value on behalf of a central.
    pub fn write(&self, h: impl Into<AttrHandle>, data: &[u8], opts: &WriteOptions) -> Result<()> {
        let h = h.into();
        self.with_mut(|t| t.write(h, data, opts))
    }

    /// Enables notifications for characteristic `h`. Idempotent.
    pub fn start_notify(&self, h: CharHandle) -> Result<()> {
        self.with_mut(|t| t.start_notify(h)).map(|_| ())
    }

    /// Disables notifications for characteristic `h`. Idempotent.
    pub fn stop_notify(&self, h: CharHandle) -> Result<()> {
        self.with_mut(|t| t.stop_notify(h)).map(|_| ())
    }

    /// Returns whether a central is subscribed to characteristic `h`.
    pub fn is_subscribed(&self, h: CharHandle) -> Result<bool> {
        self.with(|t| Ok(t.characteristic(h)?.subscribed))
    }

    /// Returns the stored value of a characteristic or descriptor.
    pub fn value(&self, h: impl Into<AttrHandle>) -> Result<Vec<u8>> {
        let h = h.into();
        self.with(|t| t.value(h))
    }

    /// Replaces the stored value of a characteristic or descriptor. Access
    /// permissions do not apply to the local application.
    pub fn set_value(&self, h: impl Into<AttrHandle>, v: impl AsRef<[u8]>) -> Result<()> {
        let h = h.into();
        self.with_mut(|t| t.set_value(h, v.as_ref()))
    }

    /// Publishes the current value of characteristic `h` to the subscribed
    /// central. Returns `false` without emitting anything if no central is
    /// subscribed.
    pub async fn notify<B: Bus>(&self, bus: &B, h: CharHandle) -> Result<bool> {
        let Some((path, v)) = self.with(|t| t.notification(h))? else {
            return Ok(false);
        };
        let changed = Props::from([("Value", Variant::Bytes(v))]);
        bus.emit_properties_changed(&path, CHARACTERISTIC_IFACE, &changed)
            .await?;
        Ok(true)
    }
}
