//! LE advertisement object (`org.bluez.LEAdvertisement1`).
//!
//! The advertisement holds the payload that the daemon broadcasts while the
//! server is advertising. The payload is only mutable while the advertisement
//! is not registered. The daemon reports that it stopped advertising by
//! calling `Release`, which never fails.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use tracing::{debug, info};

use crate::bus::{Path, Props, ReqError, Variant};
use crate::{Error, Result, Uuid};

/// Maximum length of one manufacturer or service data entry. A legacy
/// advertising PDU carries 31 bytes, of which the entry header and the
/// mandatory flags field take 4.
pub const MAX_DATA_LEN: usize = 27;

/// Maximum length of the local name in a legacy advertising PDU.
pub const MAX_NAME_LEN: usize = 29;

/// Advertisement type.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AdvKind {
    /// Non-connectable advertisement.
    Broadcast,
    /// Connectable advertisement.
    #[default]
    Peripheral,
}

impl AdvKind {
    /// Returns the daemon's name for the type.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Peripheral => "peripheral",
        }
    }
}

impl Display for AdvKind {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advertisement payload and release state.
#[derive(Clone, Debug)]
pub struct Advertisement {
    path: Path,
    kind: AdvKind,
    service_uuids: Vec<Uuid>,
    solicit_uuids: Vec<Uuid>,
    manufacturer_data: BTreeMap<u16, Vec<u8>>,
    service_data: BTreeMap<Uuid, Vec<u8>>,
    include_tx_power: bool,
    local_name: Option<String>,
    appearance: Option<u16>,
    released: bool,
    locked: bool,
}

impl Advertisement {
    /// Creates an empty advertisement at `path`.
    #[must_use]
    pub fn new(path: Path, kind: AdvKind) -> Self {
        Self {
            path,
            kind,
            service_uuids: Vec::new(),
            solicit_uuids: Vec::new(),
            manufacturer_data: BTreeMap::new(),
            service_data: BTreeMap::new(),
            include_tx_power: false,
            local_name: None,
            appearance: None,
            released: false,
            locked: false,
        }
    }

    /// Returns the object path.
    #[inline(always)]
    #[must_use]
    pub const fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the advertisement type.
    #[inline(always)]
    #[must_use]
    pub const fn kind(&self) -> AdvKind {
        self.kind
    }

    /// Returns the advertised service UUIDs.
    #[inline(always)]
    #[must_use]
    pub fn service_uuids(&self) -> &[Uuid] {
        &self.service_uuids
    }

    /// Returns the solicited service UUIDs.
    #[inline(always)]
    #[must_use]
    pub fn solicit_uuids(&self) -> &[Uuid] {
        &self.solicit_uuids
    }

    /// Returns manufacturer data keyed by company identifier.
    #[inline(always)]
    #[must_use]
    pub const fn manufacturer_data(&self) -> &BTreeMap<u16, Vec<u8>> {
        &self.manufacturer_data
    }

    /// Returns service data keyed by service UUID.
    #[inline(always)]
    #[must_use]
    pub const fn service_data(&self) -> &BTreeMap<Uuid, Vec<u8>> {
        &self.service_data
    }

    /// Returns whether the TX power level is included.
    #[inline(always)]
    #[must_use]
    pub const fn include_tx_power(&self) -> bool {
        self.include_tx_power
    }

    /// Returns the advertised local name.
    #[inline(always)]
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the advertised appearance.
    #[inline(always)]
    #[must_use]
    pub const fn appearance(&self) -> Option<u16> {
        self.appearance
    }

    /// Returns whether the daemon released the advertisement.
    #[inline(always)]
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.released
    }

    /// Returns whether the payload is locked for advertising.
    #[inline(always)]
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Sets the advertisement type.
    pub fn set_kind(&mut self, kind: AdvKind) -> Result<&mut Self> {
        self.check_unlocked()?.kind = kind;
        Ok(self)
    }

    /// Replaces the advertised service UUIDs. When empty, the UUIDs of all
    /// primary services are advertised instead.
    pub fn set_service_uuids(&mut self, uuids: impl IntoIterator<Item = Uuid>) -> Result<&mut Self> {
        self.check_unlocked()?.service_uuids = uuids.into_iter().collect();
        Ok(self)
    }

    /// Replaces the solicited service UUIDs.
    pub fn set_solicit_uuids(&mut self, uuids: impl IntoIterator<Item = Uuid>) -> Result<&mut Self> {
        self.check_unlocked()?.solicit_uuids = uuids.into_iter().collect();
        Ok(self)
    }

    /// Sets or removes (when `data` is [`None`]) manufacturer data for
    /// `company_id`.
    pub fn set_manufacturer_data(&mut self, company_id: u16, data: Option<Vec<u8>>) -> Result<&mut Self> {
        let m = &mut self.check_unlocked()?.manufacturer_data;
        match data {
            Some(v) => m.insert(company_id, v),
            None => m.remove(&company_id),
        };
        Ok(self)
    }

    /// Sets or removes (when `data` is [`None`]) service data for `uuid`.
    pub fn set_service_data(&mut self, uuid: Uuid, data: Option<Vec<u8>>) -> Result<&mut Self> {
        let m = &mut self.check_unlocked()?.service_data;
        match data {
            Some(v) => m.insert(uuid, v),
            None => m.remove(&uuid),
        };
        Ok(self)
    }

    /// Sets whether the TX power level is included.
    pub fn set_include_tx_power(&mut self, include: bool) -> Result<&mut Self> {
        self.check_unlocked()?.include_tx_power = include;
        Ok(self)
    }

    /// Sets or removes the advertised local name.
    pub fn set_local_name(&mut self, name: Option<String>) -> Result<&mut Self> {
        self.check_unlocked()?.local_name = name;
        Ok(self)
    }

    /// Sets or removes the advertised appearance.
    pub fn set_appearance(&mut self, appearance: Option<u16>) -> Result<&mut Self> {
        self.check_unlocked()?.appearance = appearance;
        Ok(self)
    }

    /// Checks that the payload fits a legacy advertising PDU and is
    /// consistent with the advertisement type.
    pub fn validate(&self) -> Result<()> {
        let err = |s: String| Err(Error::InvalidAdvertisement(s));
        if self.kind == AdvKind::Broadcast && !self.solicit_uuids.is_empty() {
            return err("broadcast advertisement cannot solicit services".to_owned());
        }
        if let Some((id, v)) = (self.manufacturer_data.iter()).find(|(_, v)| v.len() > MAX_DATA_LEN) {
            return err(format!(
                "manufacturer data for {id:#06X} is {} bytes (max {MAX_DATA_LEN})",
                v.len()
            ));
        }
        if let Some((u, v)) = (self.service_data.iter()).find(|(_, v)| v.len() > MAX_DATA_LEN) {
            return err(format!(
                "service data for {u} is {} bytes (max {MAX_DATA_LEN})",
                v.len()
            ));
        }
        match self.local_name {
            Some(ref n) if n.len() > MAX_NAME_LEN => {
                err(format!("local name is {} bytes (max {MAX_NAME_LEN})", n.len()))
            }
            _ => Ok(()),
        }
    }

    /// Returns the exported properties. `fallback` UUIDs are advertised when
    /// no service UUIDs were set explicitly.
    #[must_use]
    pub fn properties(&self, fallback: &[Uuid]) -> Props {
        let uuids = if self.service_uuids.is_empty() {
            fallback
        } else {
            &self.service_uuids
        };
        let mut p = Props::from([
            ("Type", Variant::from(self.kind.as_str())),
            ("ServiceUUIDs", Variant::from(strings(uuids))),
            ("ManufacturerData", Variant::U16Bytes(self.manufacturer_data.clone())),
            (
                "ServiceData",
                Variant::StrBytes(
                    (self.service_data.iter())
                        .map(|(u, v)| (u.to_string(), v.clone()))
                        .collect(),
                ),
            ),
            ("IncludeTxPower", Variant::from(self.include_tx_power)),
        ]);
        if !self.solicit_uuids.is_empty() {
            p.insert("SolicitUUIDs", Variant::from(strings(&self.solicit_uuids)));
        }
        if let Some(ref n) = self.local_name {
            p.insert("LocalName", Variant::from(n.as_str()));
        }
        if let Some(a) = self.appearance {
            p.insert("Appearance", Variant::from(a));
        }
        p
    }

    /// Handles `Properties.Set` from the daemon.
    pub fn set_property(&mut self, name: &str, v: &Variant) -> Result<()> {
        let bad = || Error::Rejected(ReqError::InvalidArgs);
        if self.locked {
            return Err(Error::Rejected(ReqError::NotPermitted));
        }
        match name {
            "Type" => {
                let kind = match v.as_str() {
                    Some("broadcast") => AdvKind::Broadcast,
                    Some("peripheral") => AdvKind::Peripheral,
                    _ => return Err(bad()),
                };
                self.set_kind(kind)?;
            }
            "ServiceUUIDs" | "SolicitUUIDs" => {
                let Variant::StrArray(ref a) = *v else {
                    return Err(bad());
                };
                let uuids = (a.iter().map(|s| s.parse()))
                    .collect::<Result<Vec<Uuid>>>()
                    .map_err(|_| bad())?;
                if name == "ServiceUUIDs" {
                    self.set_service_uuids(uuids)?;
                } else {
                    self.set_solicit_uuids(uuids)?;
                }
            }
            "ManufacturerData" => {
                let Variant::U16Bytes(ref m) = *v else {
                    return Err(bad());
                };
                self.manufacturer_data = m.clone();
            }
            "ServiceData" => {
                let Variant::StrBytes(ref m) = *v else {
                    return Err(bad());
                };
                self.service_data = (m.iter())
                    .map(|(u, d)| -> Result<(Uuid, Vec<u8>)> { Ok((u.parse()?, d.clone())) })
                    .collect::<Result<_>>()
                    .map_err(|_| bad())?;
            }
            "IncludeTxPower" => {
                self.set_include_tx_power(v.as_bool().ok_or_else(bad)?)?;
            }
            "LocalName" => {
                self.set_local_name(Some(v.as_str().ok_or_else(bad)?.to_owned()))?;
            }
            "Appearance" => {
                self.set_appearance(Some(v.as_u16().ok_or_else(bad)?))?;
            }
            _ => return Err(Error::Rejected(ReqError::UnknownProperty)),
        }
        debug!("Advertisement property {name} set by daemon");
        Ok(())
    }

    /// Handles `Release` from the daemon. Marks the advertisement as released
    /// and unlocks the payload.
    pub fn release(&mut self) {
        self.released = true;
        self.locked = false;
        info!(path = %self.path, "Advertisement released");
    }

    /// Locks the payload for advertising and clears the released flag.
    pub(crate) fn lock(&mut self) {
        self.locked = true;
        self.released = false;
    }

    /// Unlocks the payload after advertising stopped.
    pub(crate) fn unlock(&mut self) {
        self.locked = false;
    }

    fn check_unlocked(&mut self) -> Result<&mut Self> {
        if self.locked {
            Err(Error::InvalidState("advertisement is active"))
        } else {
            Ok(self)
        }
    }
}

fn strings(uuids: &[Uuid]) -> Vec<String> {
    uuids.iter().map(Uuid::to_string).collect()
}

#[cfg(test)]
mod tests {
    use matches::assert_matches;

    use super::*;

    fn adv() -> Advertisement {
        let path = Path::new("/org/bluez/test/advertisement0").unwrap();
        Advertisement::new(path, AdvKind::Peripheral)
    }

    #[test]
    fn properties() {
        let mut a = adv();
        (a.set_manufacturer_data(0xFFFF, Some(vec![1, 2])))
            .unwrap()
            .set_include_tx_power(true)
            .unwrap();
        let p = a.properties(&[Uuid::sig(0x180F)]);
        assert_eq!(p["Type"], Variant::from("peripheral"));
        assert_eq!(
            p["ServiceUUIDs"],
            Variant::from(vec!["0000180f-0000-1000-8000-00805f9b34fb".to_owned()])
        );
        assert_eq!(p["IncludeTxPower"], Variant::Bool(true));
        assert!(!p.contains_key("SolicitUUIDs"));
        assert!(!p.contains_key("LocalName"));

        a.set_service_uuids([Uuid::sig(0x1809)]).unwrap();
        let p = a.properties(&[Uuid::sig(0x180F)]);
        assert_eq!(
            p["ServiceUUIDs"],
            Variant::from(vec!["00001809-0000-1000-8000-00805f9b34fb".to_owned()])
        );
    }

    #[test]
    fn lock_and_release() {
        let mut a = adv();
        a.lock();
        assert_matches!(a.set_local_name(Some("x".to_owned())), Err(Error::InvalidState(_)));
        assert_matches!(
            a.set_property("IncludeTxPower", &Variant::Bool(true)),
            Err(Error::Rejected(ReqError::NotPermitted))
        );
        a.release();
        a.release();
        assert!(a.is_released());
        assert!(!a.is_locked());
        a.set_local_name(Some("x".to_owned())).unwrap();
    }

    #[test]
    fn validate() {
        let mut a = adv();
        a.validate().unwrap();
        a.set_manufacturer_data(1, Some(vec![0; MAX_DATA_LEN + 1])).unwrap();
        assert_matches!(a.validate(), Err(Error::InvalidAdvertisement(_)));
        a.set_manufacturer_data(1, None).unwrap();
        a.set_local_name(Some("n".repeat(MAX_NAME_LEN + 1))).unwrap();
        assert_matches!(a.validate(), Err(Error::InvalidAdvertisement(_)));
        a.set_local_name(Some("n".repeat(MAX_NAME_LEN))).unwrap();
        a.validate().unwrap();
        (a.set_kind(AdvKind::Broadcast).unwrap()).set_solicit_uuids([Uuid::sig(0x180D)]).unwrap();
        assert_matches!(a.validate(), Err(Error::InvalidAdvertisement(_)));
    }

    #[test]
    fn set_property() {
        let mut a = adv();
        a.set_property("Type", &Variant::from("broadcast")).unwrap();
        assert_eq!(a.kind(), AdvKind::Broadcast);
        let uuids = Variant::from(vec!["180d".to_owned()]);
        a.set_property("ServiceUUIDs", &uuids).unwrap();
        assert_eq!(a.service_uuids(), [Uuid::sig(0x180D)]);
        assert_matches!(
            a.set_property("Type", &Variant::Bool(true)),
            Err(Error::Rejected(ReqError::InvalidArgs))
        );
        assert_matches!(
            a.set_property("Nope", &Variant::Bool(true)),
            Err(Error::Rejected(ReqError::UnknownProperty))
        );
    }
}
