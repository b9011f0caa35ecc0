use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use crate::Error;

/// Bus object path. Elements are non-empty and limited to `[A-Za-z0-9_]`.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Path(String);

impl Path {
    /// Creates a validated object path.
    pub fn new(s: impl Into<String>) -> crate::Result<Self> {
        let s = s.into();
        if Self::is_valid(&s) {
            Ok(Self(s))
        } else {
            Err(Error::InvalidPath(s))
        }
    }

    /// Returns the root path `/`.
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_owned())
    }

    /// Returns the path of child element `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a valid path element.
    #[must_use]
    pub fn child(&self, name: impl Display) -> Self {
        let name = name.to_string();
        assert!(Self::is_element(&name), "invalid path element {name:?}");
        if self.0 == "/" {
            Self(format!("/{name}"))
        } else {
            Self(format!("{}/{name}", self.0))
        }
    }

    /// Returns the path as a string slice.
    #[inline(always)]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Converts an arbitrary name into a valid path element by replacing
    /// invalid characters with `_`.
    #[must_use]
    pub fn sanitize(name: &str) -> String {
        let s: String = (name.chars())
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        if s.is_empty() {
            "_".to_owned()
        } else {
            s
        }
    }

    fn is_valid(s: &str) -> bool {
        s == "/" || (s.strip_prefix('/')).map_or(false, |s| s.split('/').all(Self::is_element))
    }

    fn is_element(s: &str) -> bool {
        !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    }
}

impl FromStr for Path {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Path {
    #[inline(always)]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Debug for Path {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for Path {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid() {
        for s in ["/", "/org", "/org/bluez/hci0", "/a_b/C9"] {
            assert_eq!(Path::new(s).unwrap().as_str(), s);
        }
        for s in ["", "org", "/org/", "//org", "/org//bluez", "/org-x", "/ö"] {
            assert!(matches!(Path::new(s), Err(Error::InvalidPath(_))), "{s}");
        }
    }

    #[test]
    fn child() {
        let root = Path::root();
        let app = root.child("app").child(0);
        assert_eq!(app.as_str(), "/app/0");
        let svc = app.child(format_args!("service{}", 1));
        assert_eq!(svc.as_str(), "/app/0/service1");
        assert_eq!(root.child("x").as_str(), "/x");
    }

    #[test]
    fn sanitize() {
        assert_eq!(Path::sanitize("Test Server-1"), "Test_Server_1");
        assert_eq!(Path::sanitize(""), "_");
    }
}
