use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use matches::assert_matches;

use crate::bus::testing::{Op, Recorder};
use crate::Phase;

use super::*;

const SVC: Uuid = Uuid::sig(0x180D);
const HR: Uuid = Uuid::sig(0x2A37);
const LOC: Uuid = Uuid::sig(0x2A38);
const CCCD: Uuid = Uuid::sig(0x2902);

const S1: &str = "a07498ca-ad5b-474e-940d-16f1fbe7e8cd";
const C1: &str = "51ff12bb-3ed8-46e5-b4f9-d64e2fec021b";
const C1_PATH: &str = "/org/bluez/Test_Server/service0/char0";
const ADV_PATH: &str = "/org/bluez/Test_Server/advertisement0";

fn init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn heart_rate() -> Server<Recorder> {
    let s = Server::new(Recorder::new(), Config::new("test")).unwrap();
    s.add_service(SVC, true).unwrap();
    (s.add_characteristic(SVC, HR, Flags::READ | Flags::NOTIFY, Perms::READ, [0, 60])).unwrap();
    (s.add_characteristic(SVC, LOC, Flags::READ | Flags::WRITE, Perms::READ_WRITE, [1])).unwrap();
    s.add_descriptor(HR, CCCD, Perms::READ, [0, 0]).unwrap();
    s
}

fn server() -> anyhow::Result<(Server<Recorder>, Uuid, Uuid)> {
    init();
    let (s1, c1): (Uuid, Uuid) = (S1.parse()?, C1.parse()?);
    let s = Server::new(Recorder::new(), Config::new("Test Server"))?;
    s.add_service(s1, true)?;
    let flags = Flags::READ | Flags::WRITE | Flags::NOTIFY;
    s.add_characteristic(s1, c1, flags, Perms::READ_WRITE, b"hi")?;
    Ok((s, s1, c1))
}

fn path(s: &str) -> Path {
    Path::new(s).unwrap()
}

fn call(p: &str, iface: &str, member: &str, args: Args) -> Call {
    Call::new(path(p), iface, member, args)
}

fn device() -> Path {
    path("/org/bluez/hci0/dev_11_22_33_44_55_66")
}

fn notify(member: &str) -> Call {
    call(C1_PATH, CHARACTERISTIC_IFACE, member, Args::None)
}

#[test]
fn lookups() {
    let s = heart_rate();
    assert!(s.get_characteristic(HR).is_some());
    assert!(s.get_characteristic(CCCD).is_none());
    assert_matches!(
        s.add_characteristic(SVC, HR, Flags::READ, Perms::READ, []),
        Err(Error::Duplicate(u)) if u == HR
    );
    assert_matches!(
        s.add_characteristic(Uuid::sig(0x1800), Uuid::sig(0x2A00), Flags::READ, Perms::READ, []),
        Err(Error::NotFound(_))
    );
    s.set_value(LOC, [2]).unwrap();
    assert_eq!(s.value(LOC).unwrap(), [2]);
    assert_matches!(s.value(Uuid::sig(0x2A00)), Err(Error::NotFound(_)));
}

#[test]
fn dispatch_values() {
    let s = heart_rate();
    let chr = "/org/bluez/test/service0/char1";
    let opts = Options::from([("offset".to_owned(), Variant::U16(0))]);
    let r = s.dispatch(call(chr, CHARACTERISTIC_IFACE, "WriteValue", Args::Write(vec![9], opts)));
    assert_eq!(r, Ok(Reply::Empty));
    let r = s.dispatch(call(chr, CHARACTERISTIC_IFACE, "ReadValue", Args::Options(Options::new())));
    assert_eq!(r, Ok(Reply::Bytes(vec![9])));

    let hr = "/org/bluez/test/service0/char0";
    let r = s.dispatch(call(hr, CHARACTERISTIC_IFACE, "WriteValue", Args::Write(vec![1], Options::new())));
    assert_eq!(r, Err(ReqError::NotPermitted));
    let r = s.dispatch(call(chr, CHARACTERISTIC_IFACE, "StartNotify", Args::None));
    assert_eq!(r, Err(ReqError::NotSupported));
    let r = s.dispatch(call(hr, CHARACTERISTIC_IFACE, "StartNotify", Args::None));
    assert_eq!(r, Ok(Reply::Empty));
    let r = s.dispatch(call(hr, CHARACTERISTIC_IFACE, "Confirm", Args::None));
    assert_eq!(r, Ok(Reply::Empty));

    let desc = "/org/bluez/test/service0/char0/desc0";
    let r = s.dispatch(call(desc, DESCRIPTOR_IFACE, "ReadValue", Args::None));
    assert_eq!(r, Ok(Reply::Bytes(vec![0, 0])));
    let r = s.dispatch(call(desc, CHARACTERISTIC_IFACE, "ReadValue", Args::None));
    assert_eq!(r, Err(ReqError::UnknownInterface));

    let r = s.dispatch(call("/org/bluez/test/service9", SERVICE_IFACE, "GetAll", Args::None));
    assert_eq!(r, Err(ReqError::UnknownInterface));
    let r = s.dispatch(call("/nope", CHARACTERISTIC_IFACE, "ReadValue", Args::None));
    assert_eq!(r, Err(ReqError::UnknownObject));
}

#[test]
fn dispatch_properties() {
    let s = heart_rate();
    let get = |p: &str, iface: &str, name: &str| {
        let args = Args::Property(iface.to_owned(), name.to_owned());
        s.dispatch(call(p, PROPERTIES_IFACE, "Get", args))
    };
    let svc = "/org/bluez/test/service0";
    assert_eq!(get(svc, SERVICE_IFACE, "Primary"), Ok(Reply::Value(Variant::Bool(true))));
    assert_eq!(
        get(svc, SERVICE_IFACE, "UUID"),
        Ok(Reply::Value(Variant::from("0000180d-0000-1000-8000-00805f9b34fb")))
    );
    let hr = "/org/bluez/test/service0/char0";
    assert_eq!(
        get(hr, CHARACTERISTIC_IFACE, "Flags"),
        Ok(Reply::Value(Variant::from(vec!["read".to_owned(), "notify".to_owned()])))
    );
    assert_eq!(get(hr, CHARACTERISTIC_IFACE, "Bogus"), Err(ReqError::UnknownProperty));
    assert_eq!(get(hr, SERVICE_IFACE, "UUID"), Err(ReqError::UnknownInterface));

    let set = Args::SetProperty(CHARACTERISTIC_IFACE.to_owned(), "Value".to_owned(), Variant::Bytes(vec![]));
    assert_eq!(s.dispatch(call(hr, PROPERTIES_IFACE, "Set", set)), Err(ReqError::PropertyReadOnly));

    let adv = "/org/bluez/test/advertisement0";
    let set = Args::SetProperty(ADVERTISEMENT_IFACE.to_owned(), "LocalName".to_owned(), Variant::from("hr"));
    assert_eq!(s.dispatch(call(adv, PROPERTIES_IFACE, "Set", set)), Ok(Reply::Empty));
    assert_eq!(s.advertisement_mut().local_name(), Some("hr"));
    let all = s.dispatch(call(adv, PROPERTIES_IFACE, "GetAll", Args::Iface(ADVERTISEMENT_IFACE.to_owned())));
    let Ok(Reply::Props(p)) = all else {
        panic!("unexpected reply {all:?}");
    };
    assert_eq!(p["LocalName"], Variant::from("hr"));

    let objs = s.dispatch(call("/org/bluez/test", OBJECT_MANAGER_IFACE, "GetManagedObjects", Args::None));
    let Ok(Reply::Objects(objs)) = objs else {
        panic!("unexpected reply {objs:?}");
    };
    assert_eq!(objs.len(), 4);
    assert!(objs[&path(svc)].contains_key(SERVICE_IFACE));
}

#[tokio::test]
async fn start_stop() {
    let s = heart_rate();
    s.start().await.unwrap();
    assert!(s.is_advertising());
    assert_matches!(s.start().await, Err(Error::AlreadyAdvertising));
    let bus = s.bus();
    let adv = bus.advertisement(&path("/org/bluez/test/advertisement0")).unwrap();
    assert_eq!(
        adv["ServiceUUIDs"],
        Variant::from(vec!["0000180d-0000-1000-8000-00805f9b34fb".to_owned()])
    );
    assert_matches!(s.advertisement_mut().set_include_tx_power(true), Err(Error::InvalidState(_)));

    assert!(bus.release(&path("/org/bluez/test/advertisement0")));
    let r = s.dispatch(call("/org/bluez/test/advertisement0", ADVERTISEMENT_IFACE, "Release", Args::None));
    assert_eq!(r, Ok(Reply::Empty));
    assert!(!s.is_advertising());
    assert!(s.application().is_registered());
    assert!(s.advertisement_mut().is_released());

    s.stop().await;
    s.stop().await;
    assert!(!s.application().is_registered());
    assert_eq!(
        bus.ops(),
        [Op::RegisterApplication, Op::RegisterAdvertisement, Op::UnregisterApplication]
    );
}

#[tokio::test]
async fn start_failure() {
    let s = heart_rate();
    s.bus().fail_next(Op::RegisterAdvertisement);
    assert_matches!(s.start().await, Err(Error::Registration(_)));
    assert!(!s.is_advertising());
    assert!(!s.application().is_registered());
    assert!(!s.advertisement_mut().is_locked());
    assert_eq!(s.bus().application_count(), 0);

    s.advertisement_mut()
        .set_manufacturer_data(0x05AC, Some(vec![0; 28]))
        .unwrap();
    assert_matches!(s.start().await, Err(Error::InvalidAdvertisement(_)));
    s.advertisement_mut().set_manufacturer_data(0x05AC, None).unwrap();
    s.start().await.unwrap();
}

#[tokio::test]
async fn scenario() -> anyhow::Result<()> {
    let (s, s1, c1) = server()?;
    s.register().await?;
    assert!(s.application().is_registered());
    assert_matches!(s.add_service(Uuid::sig(0x180F), true), Err(Error::AlreadyRegistered));

    s.start().await?;
    assert!(s.is_advertising());
    assert_eq!(s.state().phase, Phase::Advertising);
    // Registered explicitly, so start only adds the advertisement.
    assert_eq!(s.bus().ops(), [Op::RegisterApplication, Op::RegisterAdvertisement]);

    assert!(s.on_connect(device()));
    assert!(s.is_connected());

    assert!(!s.update_value(s1, c1).await?);
    assert!(s.bus().signals().is_empty());

    assert_eq!(s.dispatch(notify("StartNotify")), Ok(Reply::Empty));
    assert_eq!(s.dispatch(notify("StartNotify")), Ok(Reply::Empty));
    let h = s.get_characteristic(c1).unwrap();
    assert!(s.application().is_subscribed(h)?);

    s.set_value(c1, [1, 2, 3])?;
    assert!(s.update_value(s1, c1).await?);
    let signals = s.bus().signals();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].path.as_str(), C1_PATH);
    assert_eq!(signals[0].changed["Value"], Variant::Bytes(vec![1, 2, 3]));

    assert!(s.on_disconnect(&device()));
    assert!(!s.is_connected());
    assert!(s.is_advertising());

    s.stop().await;
    assert!(!s.is_advertising());
    assert!(!s.application().is_registered());
    assert!(!s.application().is_subscribed(h)?);
    assert_eq!(s.bus().application_count(), 0);
    assert_eq!(s.bus().advertisement_count(), 0);
    assert_eq!(s.state().phase, Phase::Stopped);

    s.add_service(Uuid::sig(0x180F), true)?;
    Ok(())
}

#[tokio::test]
async fn stop_during_start() -> anyhow::Result<()> {
    use Op::*;
    for op in [RegisterApplication, RegisterAdvertisement] {
        let (s, _, _) = server()?;
        let mut rx = s.subscribe();
        let bus = s.bus();
        bus.pause_next(op);
        let (started, ()) = tokio::join!(s.start(), async {
            bus.paused().await;
            assert_eq!(s.state().phase, Phase::Starting);
            s.stop().await;
            bus.resume();
        });
        assert_matches!(started, Err(Error::Cancelled));
        assert_eq!(s.state().phase, Phase::Stopped);
        assert!(!s.is_advertising());
        assert!(!s.application().is_registered());
        assert!(!s.advertisement_mut().is_locked());
        assert_eq!(bus.application_count(), 0);
        assert_eq!(bus.advertisement_count(), 0);
        assert!(rx.has_changed()?);
        assert_eq!(rx.borrow_and_update().phase, Phase::Stopped);
        if op == RegisterApplication {
            assert_eq!(bus.ops(), [RegisterApplication, UnregisterApplication]);
        } else {
            let want = [
                RegisterApplication,
                UnregisterApplication,
                RegisterAdvertisement,
                UnregisterAdvertisement,
            ];
            assert_eq!(bus.ops(), want);
        }

        s.start().await?;
        assert!(s.is_advertising());
    }
    Ok(())
}

#[tokio::test]
async fn abandoned_start() -> anyhow::Result<()> {
    for op in [Op::RegisterApplication, Op::RegisterAdvertisement] {
        let (s, _, _) = server()?;
        s.bus().pause_next(op);
        let r = tokio::time::timeout(Duration::from_millis(20), s.start()).await;
        assert!(r.is_err(), "{op:?} completed");
        assert_eq!(s.state().phase, Phase::Idle);
        assert!(!s.is_advertising());
        assert!(!s.advertisement_mut().is_locked());
        assert_eq!(s.application().is_registered(), op == Op::RegisterAdvertisement);

        s.stop().await;
        assert_eq!(s.state().phase, Phase::Stopped);
        assert!(!s.application().is_registered());
        assert_eq!(s.bus().application_count(), 0);
        assert_eq!(s.bus().advertisement_count(), 0);
        assert!(s.bus().ops().contains(&Op::UnregisterApplication));

        s.add_service(Uuid::sig(0x180F), true)?;
        s.start().await?;
        assert!(s.is_advertising());
        assert_eq!(s.bus().application_count(), 1);
        assert_eq!(s.bus().advertisement_count(), 1);
    }

    // Starting again without a stop clears the interrupted advertisement
    // first.
    let (s, _, _) = server()?;
    s.bus().pause_next(Op::RegisterAdvertisement);
    let r = tokio::time::timeout(Duration::from_millis(20), s.start()).await;
    assert!(r.is_err());
    s.start().await?;
    assert!(s.is_advertising());
    assert_eq!(
        s.bus().ops(),
        [
            Op::RegisterApplication,
            Op::UnregisterAdvertisement,
            Op::RegisterAdvertisement
        ]
    );
    Ok(())
}

#[tokio::test]
async fn restart_after_release() -> anyhow::Result<()> {
    let (s, _, _) = server()?;
    s.start().await?;
    assert!(s.bus().release(&path(ADV_PATH)));
    let release = call(ADV_PATH, ADVERTISEMENT_IFACE, "Release", Args::None);
    assert_eq!(s.dispatch(release), Ok(Reply::Empty));
    assert!(!s.is_advertising());
    assert_eq!(s.state().phase, Phase::Idle);
    assert!(s.application().is_registered());
    assert!(s.advertisement_mut().is_released());

    s.start().await?;
    assert!(s.is_advertising());
    assert!(!s.advertisement_mut().is_released());
    assert_eq!(
        s.bus().ops(),
        [
            Op::RegisterApplication,
            Op::RegisterAdvertisement,
            Op::RegisterAdvertisement
        ]
    );
    s.stop().await;
    assert_eq!(s.bus().advertisement_count(), 0);
    assert_eq!(s.bus().application_count(), 0);
    Ok(())
}

#[tokio::test]
async fn failed_registration() -> anyhow::Result<()> {
    let (s, s1, _) = server()?;
    s.bus().fail_next(Op::RegisterApplication);
    assert_matches!(s.start().await, Err(Error::Registration(_)));
    assert!(!s.is_advertising());
    assert!(!s.application().is_registered());
    assert_eq!(s.state().phase, Phase::Idle);

    let c2 = Uuid::sig(0x2A19);
    s.add_characteristic(s1, c2, Flags::READ, Perms::READ, [100])?;
    s.start().await?;
    let objs = s.bus().application(&s.application().path()).unwrap();
    assert_eq!(objs.len(), 3);
    Ok(())
}

#[tokio::test]
async fn hooks() -> anyhow::Result<()> {
    let (s, _, c1) = server()?;
    let reads = Arc::new(AtomicUsize::new(0));
    let n = Arc::clone(&reads);
    s.set_read_hook(c1, move |r| {
        n.fetch_add(1, Ordering::Relaxed);
        r.complete(b"from hook")
    })?;
    s.set_write_hook(c1, |w| {
        if w.data().len() > 4 {
            return Err(ReqError::InvalidValueLength);
        }
        w.accept()
    })?;
    s.start().await?;

    let read = call(C1_PATH, CHARACTERISTIC_IFACE, "ReadValue", Args::None);
    assert_eq!(s.dispatch(read), Ok(Reply::Bytes(b"from hook".to_vec())));
    assert_eq!(reads.load(Ordering::Relaxed), 1);
    assert_eq!(s.value(c1)?, b"hi");

    let write = |v: &[u8], opts: Options| {
        let args = Args::Write(v.to_vec(), opts);
        s.dispatch(call(C1_PATH, CHARACTERISTIC_IFACE, "WriteValue", args))
    };
    assert_eq!(write(b"abc", Options::new()), Ok(Reply::Empty));
    assert_eq!(s.value(c1)?, b"abc");
    assert_eq!(write(b"abcdef", Options::new()), Err(ReqError::InvalidValueLength));
    assert_eq!(s.value(c1)?, b"abc");

    // A payload over the exchanged MTU is rejected before the hook runs.
    let mtu = || Options::from([("mtu".to_owned(), Variant::U16(5))]);
    assert_eq!(write(b"ab", mtu()), Ok(Reply::Empty));
    assert_eq!(write(b"abc", mtu()), Err(ReqError::InvalidValueLength));
    assert_eq!(s.value(c1)?, b"ab");
    s.stop().await;
    Ok(())
}
