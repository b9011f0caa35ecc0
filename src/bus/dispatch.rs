use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;

use super::*;

/// Daemon-invoked method, resolved from an interface and member name.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Method {
    ReadValue,
    WriteValue,
    StartNotify,
    StopNotify,
    Confirm,
    Release,
    GetManagedObjects,
    Get,
    GetAll,
    Set,
}

/// Dispatch table mapping interface and member names to typed handler tags.
static METHODS: Lazy<HashMap<&'static str, HashMap<&'static str, Method>>> = Lazy::new(|| {
    use Method::*;
    let table = [
        (CHARACTERISTIC_IFACE, "ReadValue", ReadValue),
        (CHARACTERISTIC_IFACE, "WriteValue", WriteValue),
        (CHARACTERISTIC_IFACE, "StartNotify", StartNotify),
        (CHARACTERISTIC_IFACE, "StopNotify", StopNotify),
        (CHARACTERISTIC_IFACE, "Confirm", Confirm),
        (DESCRIPTOR_IFACE, "ReadValue", ReadValue),
        (DESCRIPTOR_IFACE, "WriteValue", WriteValue),
        (ADVERTISEMENT_IFACE, "Release", Release),
        (OBJECT_MANAGER_IFACE, "GetManagedObjects", GetManagedObjects),
        (PROPERTIES_IFACE, "Get", Get),
        (PROPERTIES_IFACE, "GetAll", GetAll),
        (PROPERTIES_IFACE, "Set", Set),
    ];
    let mut m: HashMap<_, HashMap<_, _>> = HashMap::new();
    for (iface, member, method) in table {
        m.entry(iface).or_default().insert(member, method);
    }
    m
});

impl Method {
    /// Resolves a method call. Returns `UnknownInterface` if no method is
    /// defined for `iface` and `UnknownMethod` if only the member is unknown.
    pub fn resolve(iface: &str, member: &str) -> Result<Self, ReqError> {
        let members = METHODS.get(iface).ok_or(ReqError::UnknownInterface)?;
        members.get(member).copied().ok_or(ReqError::UnknownMethod)
    }
}

/// Decoded daemon method call.
#[derive(Clone, Debug)]
pub struct Call {
    pub path: Path,
    pub iface: String,
    pub member: String,
    pub args: Args,
}

impl Call {
    /// Creates a method call.
    #[must_use]
    pub fn new(path: Path, iface: impl Into<String>, member: impl Into<String>, args: Args) -> Self {
        Self {
            path,
            iface: iface.into(),
            member: member.into(),
            args,
        }
    }
}

/// Method call arguments.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub enum Args {
    #[default]
    None,
    /// `ReadValue(a{sv} options)`.
    Options(Options),
    /// `WriteValue(ay value, a{sv} options)`.
    Write(Vec<u8>, Options),
    /// `Properties.GetAll(s interface)`.
    Iface(String),
    /// `Properties.Get(s interface, s name)`.
    Property(String, String),
    /// `Properties.Set(s interface, s name, v value)`.
    SetProperty(String, String, Variant),
}

/// Successful method reply.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Reply {
    Empty,
    Bytes(Vec<u8>),
    Value(Variant),
    Props(Props),
    Objects(ObjectMap),
}

/// Request options dictionary (`a{sv}`).
pub type Options = BTreeMap<String, Variant>;

/// Link type reported in request options.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Link {
    BrEdr,
    Le,
}

/// Decoded `ReadValue` options.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct ReadOptions {
    /// Value offset.
    pub offset: u16,
    /// Exchanged MTU, if known.
    pub mtu: Option<u16>,
    /// Requesting device object.
    pub device: Option<Path>,
    /// Link type.
    pub link: Option<Link>,
}

impl ReadOptions {
    /// Decodes read options. Unknown keys are ignored.
    pub fn decode(opts: &Options) -> Result<Self, ReqError> {
        Ok(Self {
            offset: u16_opt(opts, "offset")?.unwrap_or_default(),
            mtu: u16_opt(opts, "mtu")?,
            device: path_opt(opts, "device")?,
            link: link_opt(opts)?,
        })
    }
}

/// Write procedure reported in `WriteValue` options.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WriteType {
    /// Write without response.
    Command,
    /// Write with response.
    #[default]
    Request,
    /// Reliable (queued) write.
    Reliable,
}

/// Decoded `WriteValue` options.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct WriteOptions {
    /// Value offset.
    pub offset: u16,
    /// Write procedure.
    pub typ: WriteType,
    /// Exchanged MTU, if known.
    pub mtu: Option<u16>,
    /// Requesting device object.
    pub device: Option<Path>,
    /// Link type.
    pub link: Option<Link>,
    /// Whether this is an authorization request for a prepared write.
    pub prepare_authorize: bool,
}

impl WriteOptions {
    /// Returns the largest value that fits one write request at the exchanged
    /// MTU, if known. The request header takes 3 bytes.
    #[inline]
    #[must_use]
    pub fn max_payload(&self) -> Option<usize> {
        self.mtu.map(|mtu| usize::from(mtu).saturating_sub(3))
    }

    /// Decodes write options. Unknown keys are ignored.
    pub fn decode(opts: &Options) -> Result<Self, ReqError> {
        let typ = match opts.get("type") {
            None => WriteType::default(),
            Some(v) => match v.as_str() {
                Some("command") => WriteType::Command,
                Some("request") => WriteType::Request,
                Some("reliable") => WriteType::Reliable,
                _ => return Err(ReqError::InvalidArgs),
            },
        };
        let prepare_authorize = match opts.get("prepare-authorize") {
            None => false,
            Some(v) => v.as_bool().ok_or(ReqError::InvalidArgs)?,
        };
        Ok(Self {
            offset: u16_opt(opts, "offset")?.unwrap_or_default(),
            typ,
            mtu: u16_opt(opts, "mtu")?,
            device: path_opt(opts, "device")?,
            link: link_opt(opts)?,
            prepare_authorize,
        })
    }
}

fn u16_opt(opts: &Options, key: &str) -> Result<Option<u16>, ReqError> {
    (opts.get(key))
        .map(|v| v.as_u16().ok_or(ReqError::InvalidArgs))
        .transpose()
}

fn path_opt(opts: &Options, key: &str) -> Result<Option<Path>, ReqError> {
    (opts.get(key))
        .map(|v| v.as_path().cloned().ok_or(ReqError::InvalidArgs))
        .transpose()
}

fn link_opt(opts: &Options) -> Result<Option<Link>, ReqError> {
    (opts.get("link"))
        .map(|v| match v.as_str() {
            Some("BR/EDR") => Ok(Link::BrEdr),
            Some("LE") => Ok(Link::Le),
            _ => Err(ReqError::InvalidArgs),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve() {
        assert_eq!(
            Method::resolve(CHARACTERISTIC_IFACE, "StartNotify"),
            Ok(Method::StartNotify)
        );
        assert_eq!(
            Method::resolve(DESCRIPTOR_IFACE, "WriteValue"),
            Ok(Method::WriteValue)
        );
        assert_eq!(
            Method::resolve(DESCRIPTOR_IFACE, "StartNotify"),
            Err(ReqError::UnknownMethod)
        );
        assert_eq!(
            Method::resolve("org.example.Nope", "ReadValue"),
            Err(ReqError::UnknownInterface)
        );
    }

    #[test]
    fn options() {
        let dev = Path::new("/org/bluez/hci0/dev_00_11_22_33_44_55").unwrap();
        let opts = Options::from([
            ("offset".to_owned(), Variant::U16(3)),
            ("mtu".to_owned(), Variant::U16(185)),
            ("device".to_owned(), Variant::Path(dev.clone())),
            ("link".to_owned(), Variant::from("LE")),
            ("type".to_owned(), Variant::from("command")),
            ("unknown".to_owned(), Variant::Bool(true)),
        ]);
        let r = ReadOptions::decode(&opts).unwrap();
        assert_eq!(r.offset, 3);
        assert_eq!(r.mtu, Some(185));
        assert_eq!(r.device, Some(dev));
        assert_eq!(r.link, Some(Link::Le));
        let w = WriteOptions::decode(&opts).unwrap();
        assert_eq!(w.typ, WriteType::Command);
        assert_eq!(w.max_payload(), Some(182));
        assert!(!w.prepare_authorize);

        let empty = WriteOptions::decode(&Options::new()).unwrap();
        assert_eq!(empty, WriteOptions::default());
        assert_eq!(empty.max_payload(), None);

        let bad = Options::from([("offset".to_owned(), Variant::from("x"))]);
        assert_eq!(ReadOptions::decode(&bad), Err(ReqError::InvalidArgs));
        let bad = Options::from([("type".to_owned(), Variant::from("other"))]);
        assert_eq!(WriteOptions::decode(&bad), Err(ReqError::InvalidArgs));
    }
}
