use tracing::trace;

use super::*;

/// Default maximum attribute value length ([Vol 3] Part F, Section 3.2.9).
pub const MAX_VALUE_LEN: usize = 512;

/// Attribute value store. Holds the current value of one characteristic or
/// descriptor together with the permissions that gate remote access. The
/// store never invokes callbacks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Value {
    buf: Vec<u8>,
    perms: Perms,
    max: usize,
}

impl Value {
    /// Creates an empty value with the default length limit.
    #[inline]
    pub const fn new(perms: Perms) -> Self {
        Self::with_limit(perms, MAX_VALUE_LEN)
    }

    /// Creates an empty value that can hold at most `max` bytes.
    #[inline]
    pub const fn with_limit(perms: Perms, max: usize) -> Self {
        Self {
            buf: Vec::new(),
            perms,
            max,
        }
    }

    /// Returns the current value.
    #[inline(always)]
    #[must_use]
    pub fn read(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the access permissions.
    #[inline(always)]
    pub const fn perms(&self) -> Perms {
        self.perms
    }

    /// Returns the maximum value length.
    #[inline(always)]
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.max
    }

    /// Returns an error if remote reads are not permitted.
    #[inline]
    pub const fn check_read(&self) -> Result<(), Denied> {
        if self.perms.is_readable() {
            Ok(())
        } else {
            Err(Denied::NotReadable)
        }
    }

    /// Returns the value starting at `off` for a remote read.
    pub fn read_at(&self, off: usize) -> Result<&[u8], Denied> {
        self.check_read()?;
        (self.buf.get(off..)).ok_or(Denied::InvalidOffset {
            off,
            len: self.buf.len(),
        })
    }

    /// Replaces the value on behalf of a remote writer.
    #[inline]
    pub fn write(&mut self, v: &[u8]) -> Result<(), Denied> {
        self.write_at(0, v)
    }

    /// Writes `v` at offset `off` on behalf of a remote writer. A zero offset
    /// replaces the whole value. A non-zero offset keeps the existing prefix
    /// and replaces everything after it. Values longer than the limit are
    /// rejected rather than truncated.
    pub fn write_at(&mut self, off: usize, v: &[u8]) -> Result<(), Denied> {
        if !self.perms.is_writable() {
            return Err(Denied::NotWritable);
        }
        if off > self.buf.len() {
            return Err(Denied::InvalidOffset {
                off,
                len: self.buf.len(),
            });
        }
        self.check_len(off + v.len())?;
        self.buf.truncate(off);
        self.buf.extend_from_slice(v);
        trace!("Value updated ({} bytes)", self.buf.len());
        Ok(())
    }

    /// Replaces the value on behalf of the local application. Remote
    /// permissions are not checked, but the length limit is.
    pub fn set(&mut self, v: impl AsRef<[u8]>) -> Result<(), Denied> {
        let v = v.as_ref();
        self.check_len(v.len())?;
        self.buf.clear();
        self.buf.extend_from_slice(v);
        Ok(())
    }

    #[inline]
    const fn check_len(&self, len: usize) -> Result<(), Denied> {
        if len > self.max {
            return Err(Denied::TooLong { len, max: self.max });
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Value {
    #[inline(always)]
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read() {
        let mut v = Value::new(Perms::READ_WRITE);
        assert!(v.read().is_empty());
        v.write(&[1, 2, 3]).unwrap();
        assert_eq!(v.read(), &[1, 2, 3]);
        assert_eq!(v.read_at(1).unwrap(), &[2, 3]);
        assert_eq!(v.read_at(3).unwrap(), &[] as &[u8]);
        assert_eq!(
            v.read_at(4),
            Err(Denied::InvalidOffset { off: 4, len: 3 })
        );
        v.write_at(2, &[9, 9]).unwrap();
        assert_eq!(v.read(), &[1, 2, 9, 9]);
        v.write(&[]).unwrap();
        assert!(v.read().is_empty());
    }

    #[test]
    fn permissions() {
        let mut v = Value::new(Perms::READ);
        assert_eq!(v.write(&[1]), Err(Denied::NotWritable));
        assert_eq!(v.write(&[]), Err(Denied::NotWritable));
        v.set([7]).unwrap();
        assert_eq!(v.read_at(0).unwrap(), &[7]);

        let v = Value::new(Perms::WRITE);
        assert_eq!(v.read_at(0), Err(Denied::NotReadable));
        assert!(v.read().is_empty());
    }

    #[test]
    fn limit() {
        let mut v = Value::with_limit(Perms::READ_WRITE, 4);
        v.write(&[0; 4]).unwrap();
        assert_eq!(v.write(&[0; 5]), Err(Denied::TooLong { len: 5, max: 4 }));
        assert_eq!(v.write_at(2, &[1; 3]), Err(Denied::TooLong { len: 5, max: 4 }));
        assert_eq!(v.set([0; 5]), Err(Denied::TooLong { len: 5, max: 4 }));
        assert_eq!(v.read(), &[0; 4]);
        assert_eq!(Value::new(Perms::READ).limit(), MAX_VALUE_LEN);
    }
}
