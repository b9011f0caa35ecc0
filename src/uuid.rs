#![allow(clippy::use_self)]

use std::fmt::{Debug, Display, Formatter};
use std::num::NonZeroU128;
use std::str::FromStr;

use crate::Error;

const SHIFT: u32 = u128::BITS - u32::BITS;
const BASE: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;
const MASK_16: u128 = !((u16::MAX as u128) << SHIFT);
const MASK_32: u128 = !((u32::MAX as u128) << SHIFT);

/// 128-bit service, characteristic, or descriptor UUID
/// ([Vol 3] Part B, Section 2.5.1). Assigned 16- and 32-bit SIG UUIDs are
/// stored in their expanded form.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid(NonZeroU128);

impl Uuid {
    /// Creates a UUID from a `u128`. Returns [`None`] for the nil UUID.
    #[inline]
    #[must_use]
    pub const fn new(v: u128) -> Option<Self> {
        match NonZeroU128::new(v) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Creates a UUID from an assigned 16-bit SIG UUID.
    ///
    /// # Panics
    ///
    /// Panics if `v` is zero.
    #[inline]
    #[must_use]
    pub const fn sig(v: u16) -> Self {
        assert!(v != 0, "16-bit UUID must be non-zero");
        match Self::new((v as u128) << SHIFT | BASE) {
            Some(u) => u,
            None => unreachable!(),
        }
    }

    /// Converts an assigned 16-bit Bluetooth SIG UUID to `u16`.
    #[inline]
    #[must_use]
    pub fn as_u16(self) -> Option<u16> {
        #[allow(clippy::cast_possible_truncation)]
        let v = (self.0.get() >> SHIFT) as u16;
        (self.0.get() & MASK_16 == BASE && v > 0).then_some(v)
    }

    /// Converts an assigned 32-bit Bluetooth SIG UUID to `u32`. This is
    /// mutually exclusive with `as_u16`.
    #[inline]
    #[must_use]
    pub fn as_u32(self) -> Option<u32> {
        #[allow(clippy::cast_possible_truncation)]
        let v = (self.0.get() >> SHIFT) as u32;
        (self.0.get() & MASK_32 == BASE && v > u32::from(u16::MAX)).then_some(v)
    }

    /// Returns the raw 128-bit value.
    #[inline(always)]
    #[must_use]
    pub const fn get(self) -> u128 {
        self.0.get()
    }
}

impl FromStr for Uuid {
    type Err = Error;

    /// Parses the canonical `8-4-4-4-12` form or a 4 or 8 hex digit SIG
    /// short form. Case is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || Error::InvalidUuid(s.to_owned());
        let hex = |v: &str| {
            (!v.is_empty() && v.bytes().all(|b| b.is_ascii_hexdigit()))
                .then(|| u128::from_str_radix(v, 16).ok())
                .flatten()
        };
        let v = match s.len() {
            4 | 8 => hex(s).map(|v| v << SHIFT | BASE),
            36 => {
                let groups: Vec<&str> = s.split('-').collect();
                let lens = groups.iter().map(|g| g.len());
                if !lens.eq([8, 4, 4, 4, 12]) {
                    return Err(err());
                }
                hex(&groups.concat())
            }
            _ => None,
        };
        v.and_then(Self::new).ok_or_else(err)
    }
}

impl TryFrom<&str> for Uuid {
    type Error = Error;

    #[inline]
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Uuid> for u128 {
    #[inline]
    fn from(u: Uuid) -> Self {
        u.0.get()
    }
}

impl Debug for Uuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(v) = self.as_u16() {
            write!(f, "{v:#06X}")
        } else if let Some(v) = self.as_u32() {
            write!(f, "{v:#010X}")
        } else {
            Display::fmt(self, f)
        }
    }
}

/// Lowercase `8-4-4-4-12` form expected by BlueZ.
impl Display for Uuid {
    #[allow(clippy::cast_possible_truncation)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let v = self.0.get();
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            (v & ((1 << 48) - 1)) as u64
        )
    }
}
