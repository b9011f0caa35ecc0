bitflags::bitflags! {
    /// Attribute access permissions. Encryption variants imply the matching
    /// base access when checked by [`Perms::is_readable`] and
    /// [`Perms::is_writable`].
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[must_use]
    #[repr(transparent)]
    pub struct Perms: u8 {
        /// Read access.
        const READ = 1 << 0;
        /// Write access.
        const WRITE = 1 << 1;
        /// Read access over an encrypted link.
        const READ_ENCRYPTED = 1 << 2;
        /// Write access over an encrypted link.
        const WRITE_ENCRYPTED = 1 << 3;

        /// Read/write access.
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Perms {
    /// Returns whether any kind of read access is permitted.
    #[inline]
    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.intersects(Self::READ.union(Self::READ_ENCRYPTED))
    }

    /// Returns whether any kind of write access is permitted.
    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.intersects(Self::WRITE.union(Self::WRITE_ENCRYPTED))
    }

    /// Returns the BlueZ descriptor flag strings for this permission set.
    #[must_use]
    pub fn to_flags(self) -> Vec<String> {
        const NAMES: [(Perms, &str); 4] = [
            (Perms::READ, "read"),
            (Perms::WRITE, "write"),
            (Perms::READ_ENCRYPTED, "encrypt-read"),
            (Perms::WRITE_ENCRYPTED, "encrypt-write"),
        ];
        (NAMES.iter())
            .filter_map(|&(p, name)| self.contains(p).then(|| name.to_owned()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access() {
        assert!(Perms::READ.is_readable());
        assert!(!Perms::READ.is_writable());
        assert!(Perms::READ_ENCRYPTED.is_readable());
        assert!(Perms::WRITE_ENCRYPTED.is_writable());
        assert!(!Perms::empty().is_readable());
        assert_eq!(Perms::READ_WRITE.to_flags(), ["read", "write"]);
        assert_eq!(
            (Perms::READ | Perms::WRITE_ENCRYPTED).to_flags(),
            ["read", "encrypt-write"]
        );
    }
}
