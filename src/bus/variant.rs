use std::collections::BTreeMap;

use super::*;

/// Dynamically typed property or option value. Only the types used by the
/// BlueZ GATT and advertising interfaces are represented.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Variant {
    Bool(bool),
    U16(u16),
    Str(String),
    Path(Path),
    Bytes(Vec<u8>),
    StrArray(Vec<String>),
    PathArray(Vec<Path>),
    /// Manufacturer data (`a{qv}`, each value holding `ay`).
    U16Bytes(BTreeMap<u16, Vec<u8>>),
    /// Service data (`a{sv}`, each value holding `ay`).
    StrBytes(BTreeMap<String, Vec<u8>>),
}

impl Variant {
    /// Returns the boolean value.
    #[inline]
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the unsigned 16-bit value.
    #[inline]
    #[must_use]
    pub const fn as_u16(&self) -> Option<u16> {
        match *self {
            Self::U16(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the string value.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the object path value.
    #[inline]
    #[must_use]
    pub const fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Variant {
    #[inline]
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u16> for Variant {
    #[inline]
    fn from(v: u16) -> Self {
        Self::U16(v)
    }
}

impl From<String> for Variant {
    #[inline]
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for Variant {
    #[inline]
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<Path> for Variant {
    #[inline]
    fn from(v: Path) -> Self {
        Self::Path(v)
    }
}

impl From<Vec<u8>> for Variant {
    #[inline]
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<String>> for Variant {
    #[inline]
    fn from(v: Vec<String>) -> Self {
        Self::StrArray(v)
    }
}

impl From<Vec<Path>> for Variant {
    #[inline]
    fn from(v: Vec<Path>) -> Self {
        Self::PathArray(v)
    }
}
