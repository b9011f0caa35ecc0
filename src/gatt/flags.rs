bitflags::bitflags! {
    /// Characteristic properties and BlueZ access flags
    /// ([Vol 3] Part G, Section 3.3.1.1).
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[must_use]
    #[repr(transparent)]
    pub struct Flags: u16 {
        /// Permits broadcasts of the characteristic value.
        const BROADCAST = 0x0001;
        /// Permits reads of the characteristic value.
        const READ = 0x0002;
        /// Permits writes of the characteristic value without response.
        const WRITE_WITHOUT_RESPONSE = 0x0004;
        /// Permits writes of the characteristic value with response.
        const WRITE = 0x0008;
        /// Permits notifications of the characteristic value without
        /// acknowledgment.
        const NOTIFY = 0x0010;
        /// Permits indications of the characteristic value with
        /// acknowledgment.
        const INDICATE = 0x0020;
        /// Permits signed writes to the characteristic value.
        const AUTHENTICATED_SIGNED_WRITES = 0x0040;
        /// Additional properties are defined in the Characteristic Extended
        /// Properties descriptor.
        const EXTENDED_PROPERTIES = 0x0080;
        /// Permits reliable writes.
        const RELIABLE_WRITE = 0x0100;
        /// Permits writes to the Characteristic User Description descriptor.
        const WRITABLE_AUXILIARIES = 0x0200;
        /// Reads require an encrypted link.
        const ENCRYPT_READ = 0x0400;
        /// Writes require an encrypted link.
        const ENCRYPT_WRITE = 0x0800;
        /// Reads require an authenticated encrypted link.
        const ENCRYPT_AUTHENTICATED_READ = 0x1000;
        /// Writes require an authenticated encrypted link.
        const ENCRYPT_AUTHENTICATED_WRITE = 0x2000;
    }
}

/// BlueZ flag names in property order.
const NAMES: [(Flags, &str); 14] = [
    (Flags::BROADCAST, "broadcast"),
    (Flags::READ, "read"),
    (Flags::WRITE_WITHOUT_RESPONSE, "write-without-response"),
    (Flags::WRITE, "write"),
    (Flags::NOTIFY, "notify"),
    (Flags::INDICATE, "indicate"),
    (Flags::AUTHENTICATED_SIGNED_WRITES, "authenticated-signed-writes"),
    (Flags::EXTENDED_PROPERTIES, "extended-properties"),
    (Flags::RELIABLE_WRITE, "reliable-write"),
    (Flags::WRITABLE_AUXILIARIES, "writable-auxiliaries"),
    (Flags::ENCRYPT_READ, "encrypt-read"),
    (Flags::ENCRYPT_WRITE, "encrypt-write"),
    (Flags::ENCRYPT_AUTHENTICATED_READ, "encrypt-authenticated-read"),
    (Flags::ENCRYPT_AUTHENTICATED_WRITE, "encrypt-authenticated-write"),
];

impl Flags {
    const READS: Self = Self::READ
        .union(Self::ENCRYPT_READ)
        .union(Self::ENCRYPT_AUTHENTICATED_READ);
    const WRITES: Self = Self::WRITE
        .union(Self::WRITE_WITHOUT_RESPONSE)
        .union(Self::AUTHENTICATED_SIGNED_WRITES)
        .union(Self::RELIABLE_WRITE)
        .union(Self::ENCRYPT_WRITE)
        .union(Self::ENCRYPT_AUTHENTICATED_WRITE);

    /// Returns whether remote reads are permitted.
    #[inline]
    #[must_use]
    pub const fn can_read(self) -> bool {
        self.intersects(Self::READS)
    }

    /// Returns whether any remote write procedure is permitted.
    #[inline]
    #[must_use]
    pub const fn can_write(self) -> bool {
        self.intersects(Self::WRITES)
    }

    /// Returns whether notifications or indications are supported.
    #[inline]
    #[must_use]
    pub const fn can_notify(self) -> bool {
        self.intersects(Self::NOTIFY.union(Self::INDICATE))
    }

    /// Returns the BlueZ `Flags` property strings.
    #[must_use]
    pub fn to_strings(self) -> Vec<String> {
        (NAMES.iter())
            .filter_map(|&(f, name)| self.contains(f).then(|| name.to_owned()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities() {
        let f = Flags::READ | Flags::WRITE | Flags::NOTIFY;
        assert!(f.can_read() && f.can_write() && f.can_notify());
        assert_eq!(f.to_strings(), ["read", "write", "notify"]);

        assert!(!Flags::READ.can_write());
        assert!(Flags::WRITE_WITHOUT_RESPONSE.can_write());
        assert!(Flags::INDICATE.can_notify());
        assert!(!(Flags::READ | Flags::WRITE).can_notify());
        assert!(Flags::ENCRYPT_AUTHENTICATED_READ.can_read());
        assert!(Flags::empty().to_strings().is_empty());
        assert_eq!(Flags::all().to_strings().len(), NAMES.len());
    }
}
