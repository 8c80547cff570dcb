use super::*;

fn eid(s: &str) -> Eid {
    s.parse().expect(s)
}

#[test]
fn parse_null() {
    assert_eq!(eid("dtn:none"), Eid::Null);
}

#[test]
fn parse_dtn() {
    assert_eq!(
        eid("dtn://node/app1"),
        Eid::Dtn {
            node: "node".into(),
            demux: "app1".into()
        }
    );
    assert_eq!(
        eid("dtn://node/"),
        Eid::Dtn {
            node: "node".into(),
            demux: "".into()
        }
    );
    assert_eq!(eid("dtn://node"), eid("dtn://node/"));
    assert!("dtn:node".parse::<Eid>().is_err());
    assert!("dtn:///app".parse::<Eid>().is_err());
}

#[test]
fn parse_ipn() {
    assert_eq!(
        eid("ipn:1.0"),
        Eid::Ipn {
            node: 1,
            service: 0
        }
    );
    assert_eq!(
        eid("ipn:977.42"),
        Eid::Ipn {
            node: 977,
            service: 42
        }
    );
    assert!("ipn:1".parse::<Eid>().is_err());
    assert!("ipn:a.b".parse::<Eid>().is_err());
}

#[test]
fn parse_api() {
    assert_eq!(eid("api:me"), Eid::Api { demux: "".into() });
    assert_eq!(
        eid("api:me/ping"),
        Eid::Api {
            demux: "ping".into()
        }
    );
    assert!("api:you".parse::<Eid>().is_err());
}

#[test]
fn parse_cla() {
    let Eid::Cla(cla) = eid("dtn://[tcp:127.0.0.1:4556]/sink") else {
        panic!("expected a CLA EID")
    };
    assert_eq!(&*cla.name, "tcp");
    assert_eq!(
        cla.address,
        ClaAddress::Tcp("127.0.0.1:4556".parse().unwrap())
    );
    assert_eq!(&*cla.demux, "sink");
}

#[test]
fn unknown_cla_name() {
    // Non-strict factories pass the address through unparsed
    let Eid::Cla(cla) = eid("dtn://[ws:opaque-addr]/") else {
        panic!("expected a CLA EID")
    };
    assert_eq!(cla.address, ClaAddress::Unknown("opaque-addr".into()));

    assert!(matches!(
        EidFactory::new().strict().parse("dtn://[ws:example]/"),
        Err(Error::UnknownCla(_))
    ));
}

#[test]
fn display_round_trip() {
    for s in [
        "dtn:none",
        "dtn://node/app1",
        "dtn://node/",
        "ipn:1.0",
        "ipn:977.42",
        "api:me",
        "api:me/ping",
        "dtn://[tcp:127.0.0.1:4556]/sink",
    ] {
        assert_eq!(eid(s).to_string(), s);
    }
}

#[test]
fn matching() {
    // Null matches nothing, not even itself
    assert!(!Eid::Null.matches(&Eid::Null));
    assert!(!Eid::Null.matches(&eid("dtn://node/")));

    // dtn prefix semantics
    assert!(eid("dtn://node/").matches(&eid("dtn://node/app1")));
    assert!(eid("dtn://node/").matches(&eid("dtn://node/")));
    assert!(!eid("dtn://node/app1").matches(&eid("dtn://node/")));
    assert!(!eid("dtn://node/").matches(&eid("dtn://nodeX/app")));

    // ipn is exact
    assert!(eid("ipn:1.7").matches(&eid("ipn:1.7")));
    assert!(!eid("ipn:1.0").matches(&eid("ipn:1.7")));

    // No cross-scheme matching
    assert!(!eid("dtn://node/").matches(&eid("ipn:1.0")));
}

#[test]
fn authority() {
    assert!(eid("dtn://node/").is_authoritative());
    assert!(!eid("dtn://node/app1").is_authoritative());
    assert!(eid("ipn:1.0").is_authoritative());
    assert!(!eid("ipn:1.7").is_authoritative());
    assert!(!Eid::Null.is_authoritative());

    assert!(eid("dtn://node/").is_authoritative_over(&eid("dtn://node/app1")));
    assert!(!eid("dtn://node/app1").is_authoritative_over(&eid("dtn://node/app2")));
    assert!(eid("ipn:1.0").is_authoritative_over(&eid("ipn:1.7")));
    assert!(!eid("ipn:1.0").is_authoritative_over(&eid("ipn:2.7")));
}
