use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tern_bpa::{
    async_trait, cla,
    config::Config,
    registrar::{DeliveryFailure, Registrar},
    storage::{self, mem, Storage},
    Bpa, Bytes,
};
use tern_bpv7 as bpv7;
use tern_cbor as cbor;

use bpv7::eid::Eid;
use bpv7::status_report::{AdministrativeRecord, ReasonCode, StatusReport};

#[derive(Default)]
struct MockRegistrar {
    registrations: Mutex<Vec<Eid>>,
    failures: Mutex<HashMap<Eid, DeliveryFailure>>,
    delivered: Mutex<Vec<(Eid, bpv7::Bundle)>>,
    later: Mutex<Vec<(Eid, bpv7::BundleId)>>,
}

impl MockRegistrar {
    fn new(registrations: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            registrations: Mutex::new(
                registrations.iter().map(|s| s.parse().unwrap()).collect(),
            ),
            ..Default::default()
        })
    }

    fn add_registration(&self, endpoint: &str) {
        self.registrations
            .lock()
            .unwrap()
            .push(endpoint.parse().unwrap());
    }

    fn fail_with(&self, endpoint: &str, failure: DeliveryFailure) {
        self.failures
            .lock()
            .unwrap()
            .insert(endpoint.parse().unwrap(), failure);
    }

    fn clear_failures(&self) {
        self.failures.lock().unwrap().clear()
    }

    fn delivered(&self) -> Vec<(Eid, bpv7::Bundle)> {
        self.delivered.lock().unwrap().clone()
    }

    fn deferred(&self) -> Vec<(Eid, bpv7::BundleId)> {
        self.later.lock().unwrap().clone()
    }
}

#[async_trait]
impl Registrar for MockRegistrar {
    async fn registrations(&self) -> Vec<Eid> {
        self.registrations.lock().unwrap().clone()
    }

    async fn deliver(
        &self,
        endpoint: &Eid,
        bundle: &bpv7::Bundle,
    ) -> Result<(), DeliveryFailure> {
        if let Some(failure) = self.failures.lock().unwrap().get(endpoint) {
            return Err(*failure);
        }
        self.delivered
            .lock()
            .unwrap()
            .push((endpoint.clone(), bundle.clone()));
        Ok(())
    }

    async fn deliver_later(&self, endpoint: &Eid, bundle_id: bpv7::BundleId) {
        self.later
            .lock()
            .unwrap()
            .push((endpoint.clone(), bundle_id));
    }
}

#[derive(Default)]
struct CountingStorage {
    inner: mem::Storage,
    removes: AtomicUsize,
}

#[async_trait]
impl Storage for CountingStorage {
    async fn store(&self, bundle: &bpv7::Bundle) -> storage::Result<()> {
        self.inner.store(bundle).await
    }

    async fn load(&self, bundle_id: &bpv7::BundleId) -> storage::Result<bpv7::Bundle> {
        self.inner.load(bundle_id).await
    }

    async fn remove(&self, bundle_id: &bpv7::BundleId) -> storage::Result<()> {
        self.removes.fetch_add(1, Ordering::Relaxed);
        self.inner.remove(bundle_id).await
    }

    async fn contains(&self, bundle_id: &bpv7::BundleId) -> bool {
        self.inner.contains(bundle_id).await
    }

    async fn find_by_destination(&self, destination: &Eid) -> Vec<bpv7::BundleId> {
        self.inner.find_by_destination(destination).await
    }
}

struct MockChannel {
    peer: Eid,
    sent: Mutex<Vec<Bytes>>,
}

impl MockChannel {
    fn new(peer: &str) -> Arc<Self> {
        Arc::new(Self {
            peer: peer.parse().unwrap(),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl cla::Channel for MockChannel {
    fn peer(&self) -> &Eid {
        &self.peer
    }

    async fn send(&self, data: Bytes) -> cla::Result<usize> {
        let len = data.len();
        self.sent.lock().unwrap().push(data);
        Ok(len)
    }
}

fn node_config(status_reports: bool) -> Config {
    Config {
        node_id: "dtn://node/".parse().unwrap(),
        status_reports,
        ..Default::default()
    }
}

fn build_bundle(destination: &str, report_to: &str, flags: bpv7::bundle::Flags) -> bpv7::Bundle {
    let mut b = bpv7::builder::Builder::new();
    b.flags(flags)
        .source("ipn:977000.1".parse().unwrap())
        .destination(destination.parse().unwrap())
        .report_to(report_to.parse().unwrap())
        .lifetime(Duration::from_secs(3600))
        .add_payload_block(b"ping".to_vec());
    b.build()
}

fn status_report(bundle: &bpv7::Bundle) -> StatusReport {
    assert!(bundle.flags.is_admin_record);
    let payload = bundle.payload().expect("admin record has a payload");
    let (AdministrativeRecord::BundleStatusReport(report), _) =
        cbor::decode::parse::<AdministrativeRecord>(&payload.data)
            .expect("payload decodes as an administrative record");
    report
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// The mailboxes process events asynchronously; give them a moment
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await
}

#[tokio::test(flavor = "multi_thread")]
async fn delivers_to_a_registration() {
    let storage = Arc::new(CountingStorage::default());
    let registrar = MockRegistrar::new(&["dtn://node/app1"]);
    let bpa = Bpa::new(&node_config(false), storage.clone(), registrar.clone());

    let bundle = build_bundle("dtn://node/app1", "dtn:none", Default::default());
    let id = bundle.id.clone();
    bpa.receive(bundle).await;
    settle().await;

    let delivered = registrar.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "dtn://node/app1".parse::<Eid>().unwrap());
    assert_eq!(&*delivered[0].1.payload().unwrap().data, b"ping");
    assert_eq!(storage.removes.load(Ordering::Relaxed), 1);
    assert!(storage.inner.is_empty().await);

    // A stale expiry for an id that is already gone is a no-op
    bpa.expire(id).await;
    settle().await;
    assert_eq!(registrar.delivered().len(), 1);
    assert_eq!(storage.removes.load(Ordering::Relaxed), 1);

    bpa.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn registrations_take_precedence_over_the_node_id() {
    // A node-wide registration is broader than the destination, and the node
    // id matches the destination too; delivery still goes via the registrar,
    // keyed by the registered endpoint
    let storage = Arc::new(CountingStorage::default());
    let registrar = MockRegistrar::new(&["dtn://node/"]);
    let bpa = Bpa::new(&node_config(false), storage.clone(), registrar.clone());

    bpa.receive(build_bundle("dtn://node/app1", "dtn:none", Default::default()))
        .await;
    settle().await;

    let delivered = registrar.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "dtn://node/".parse::<Eid>().unwrap());

    bpa.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn expiry_generates_a_deletion_report() {
    let storage = Arc::new(CountingStorage::default());
    let registrar = MockRegistrar::new(&[]);
    let bpa = Bpa::new(&node_config(true), storage.clone(), registrar.clone());

    let bundle = build_bundle(
        "dtn://far/app",
        "dtn://origin/",
        bpv7::bundle::Flags {
            delete_report_requested: true,
            ..Default::default()
        },
    );
    let id = bundle.id.clone();
    storage.store(&bundle).await.unwrap();

    bpa.expire(id.clone()).await;
    settle().await;

    assert!(!storage.contains(&id).await);

    // The deletion report could not be forwarded anywhere, so it is held in
    // storage, addressed to the report-to endpoint and sourced by this node
    let held = storage
        .find_by_destination(&"dtn://origin/".parse().unwrap())
        .await;
    assert_eq!(held.len(), 1);
    let report_bundle = storage.load(&held[0]).await.unwrap();
    assert_eq!(report_bundle.id.source, "dtn://node/".parse::<Eid>().unwrap());

    let report = status_report(&report_bundle);
    assert_eq!(report.bundle_id, id);
    assert_eq!(report.reason, ReasonCode::LifetimeExpired);
    assert!(report.deleted.is_some());
    assert!(report.received.is_none());
    assert!(report.forwarded.is_none());
    assert!(report.delivered.is_none());

    bpa.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_block_can_delete_the_bundle() {
    let storage = Arc::new(CountingStorage::default());
    let registrar = MockRegistrar::new(&["dtn://node/app1"]);
    let bpa = Bpa::new(&node_config(false), storage.clone(), registrar.clone());

    let mut b = bpv7::builder::Builder::new();
    b.source("ipn:977000.1".parse().unwrap())
        .destination("dtn://node/app1".parse().unwrap())
        .report_to("dtn:none".parse().unwrap());
    b.add_extension_block(bpv7::block::Type::Unrecognised(199))
        .delete_bundle_on_failure(true)
        .data(cbor::encode::emit(&0u64))
        .build()
        .add_payload_block(b"ping".to_vec());

    bpa.receive(b.build()).await;
    settle().await;

    assert!(registrar.delivered().is_empty());
    assert!(storage.inner.is_empty().await);

    bpa.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_block_can_be_dropped() {
    let storage = Arc::new(CountingStorage::default());
    let registrar = MockRegistrar::new(&["dtn://node/app1"]);
    let bpa = Bpa::new(&node_config(false), storage.clone(), registrar.clone());

    let mut b = bpv7::builder::Builder::new();
    b.source("ipn:977000.1".parse().unwrap())
        .destination("dtn://node/app1".parse().unwrap())
        .report_to("dtn:none".parse().unwrap());
    b.add_extension_block(bpv7::block::Type::Unrecognised(199))
        .delete_block_on_failure(true)
        .data(cbor::encode::emit(&0u64))
        .build()
        .add_payload_block(b"ping".to_vec());

    bpa.receive(b.build()).await;
    settle().await;

    let delivered = registrar.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0]
        .1
        .block_of_type(bpv7::block::Type::Unrecognised(199))
        .is_none());
    assert!(delivered[0].1.payload().is_some());

    bpa.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn held_bundle_forwards_when_a_channel_comes_up() {
    let storage = Arc::new(CountingStorage::default());
    let registrar = MockRegistrar::new(&["dtn://node/app1"]);
    let bpa = Bpa::new(&node_config(true), storage.clone(), registrar.clone());

    let bundle = build_bundle(
        "dtn://far/app",
        "dtn://node/app1",
        bpv7::bundle::Flags {
            forward_report_requested: true,
            ..Default::default()
        },
    );
    let id = bundle.id.clone();
    bpa.receive(bundle).await;
    settle().await;

    // No route: the routing layer takes custody and holds the bundle
    assert!(storage.contains(&id).await);
    assert!(registrar.delivered().is_empty());

    let channel = MockChannel::new("dtn://far/");
    bpa.channel_up(channel.clone()).await;
    settle().await;

    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    let (forwarded, _) = bpv7::Bundle::parse(&sent[0]).unwrap();
    assert_eq!(forwarded.id, id);
    assert_eq!(
        forwarded
            .block_of_type(bpv7::block::Type::PreviousNode)
            .expect("stamped with a previous-node block")
            .previous_node()
            .unwrap(),
        "dtn://node/".parse::<Eid>().unwrap()
    );

    // Exactly one forwarded report, delivered to the local report-to sink
    let delivered = registrar.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "dtn://node/app1".parse::<Eid>().unwrap());
    let report = status_report(&delivered[0].1);
    assert_eq!(report.bundle_id, id);
    assert_eq!(report.reason, ReasonCode::NoAdditionalInformation);
    assert!(report.forwarded.is_some());

    assert!(storage.inner.is_empty().await);

    bpa.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_bundle_is_deleted_with_a_report() {
    let storage = Arc::new(CountingStorage::default());
    let registrar = MockRegistrar::new(&["dtn://node/app1"]);
    let bpa = Bpa::new(&node_config(true), storage.clone(), registrar.clone());

    let bundle = build_bundle(
        "dtn://elsewhere/app",
        "dtn://node/app1",
        bpv7::bundle::Flags {
            delete_report_requested: true,
            ..Default::default()
        },
    );
    let id = bundle.id.clone();
    let mut data = bundle.emit().unwrap();

    // Corrupt one payload byte so the payload block CRC fails
    let at = find(&data, b"ping").expect("payload bytes in the encoding");
    data[at] ^= 0x01;

    // Feed the stream in two arbitrary chunks; nothing happens until the
    // bundle decodes completely
    let peer: Eid = "ipn:9.0".parse().unwrap();
    let mid = data.len() / 2;
    bpa.ingress().push(&peer, &data[..mid]).await;
    settle().await;
    assert!(registrar.delivered().is_empty());

    bpa.ingress().push(&peer, &data[mid..]).await;
    settle().await;

    let delivered = registrar.delivered();
    assert_eq!(delivered.len(), 1);
    let report = status_report(&delivered[0].1);
    assert_eq!(report.bundle_id, id);
    assert_eq!(report.reason, ReasonCode::BlockUnintelligible);
    assert!(report.deleted.is_some());
    assert!(storage.inner.is_empty().await);

    bpa.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn passive_registration_defers_delivery() {
    let storage = Arc::new(CountingStorage::default());
    let registrar = MockRegistrar::new(&["dtn://node/app1"]);
    registrar.fail_with("dtn://node/app1", DeliveryFailure::Passive);
    let bpa = Bpa::new(&node_config(false), storage.clone(), registrar.clone());

    let bundle = build_bundle("dtn://node/app1", "dtn:none", Default::default());
    let id = bundle.id.clone();
    bpa.receive(bundle).await;
    settle().await;

    assert!(registrar.delivered().is_empty());
    assert!(storage.contains(&id).await);
    let deferred = registrar.deferred();
    assert_eq!(deferred.len(), 1);
    assert_eq!(deferred[0].0, "dtn://node/app1".parse::<Eid>().unwrap());
    assert_eq!(deferred[0].1, id);

    // The registration wakes up
    registrar.clear_failures();
    bpa.resume_delivery(id.clone()).await;
    settle().await;

    let delivered = registrar.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(&*delivered[0].1.payload().unwrap().data, b"ping");
    assert!(!storage.contains(&id).await);
    assert!(storage.inner.is_empty().await);

    bpa.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn received_report_survives_hold() {
    let storage = Arc::new(CountingStorage::default());
    let registrar = MockRegistrar::new(&["dtn://node/app1"]);
    let bpa = Bpa::new(&node_config(true), storage.clone(), registrar.clone());

    let bundle = build_bundle(
        "dtn://far/app",
        "dtn://node/app1",
        bpv7::bundle::Flags {
            receipt_report_requested: true,
            ..Default::default()
        },
    );
    let id = bundle.id.clone();
    bpa.receive(bundle).await;
    settle().await;

    // No route: the routing layer takes custody and holds the bundle, but
    // the received report generated at Reception still goes out
    assert!(storage.contains(&id).await);

    let delivered = registrar.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "dtn://node/app1".parse::<Eid>().unwrap());
    assert_eq!(
        delivered[0].1.id.source,
        "dtn://node/".parse::<Eid>().unwrap()
    );
    let report = status_report(&delivered[0].1);
    assert_eq!(report.bundle_id, id);
    assert_eq!(report.reason, ReasonCode::NoAdditionalInformation);
    assert!(report.received.is_some());

    bpa.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn received_report_survives_deferred_delivery() {
    let storage = Arc::new(CountingStorage::default());
    let registrar = MockRegistrar::new(&["dtn://node/app1", "dtn://node/app2"]);
    registrar.fail_with("dtn://node/app1", DeliveryFailure::Passive);
    let bpa = Bpa::new(&node_config(true), storage.clone(), registrar.clone());

    let bundle = build_bundle(
        "dtn://node/app1",
        "dtn://node/app2",
        bpv7::bundle::Flags {
            receipt_report_requested: true,
            ..Default::default()
        },
    );
    let id = bundle.id.clone();
    bpa.receive(bundle).await;
    settle().await;

    // Delivery is deferred on the passive registration, but the received
    // report generated at Reception still reaches the report-to endpoint
    assert!(storage.contains(&id).await);
    let deferred = registrar.deferred();
    assert_eq!(deferred.len(), 1);
    assert_eq!(deferred[0].1, id);

    let delivered = registrar.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "dtn://node/app2".parse::<Eid>().unwrap());
    let report = status_report(&delivered[0].1);
    assert_eq!(report.bundle_id, id);
    assert!(report.received.is_some());

    bpa.shutdown().await;
}

struct LateRegistrationStrategy {
    registrar: Arc<MockRegistrar>,
}

#[async_trait]
impl tern_bpa::routing::RoutingStrategy for LateRegistrationStrategy {
    fn id(&self) -> u32 {
        42
    }

    fn name(&self) -> &str {
        "late-registration"
    }

    async fn route(
        &self,
        _bundle: &bpv7::Bundle,
    ) -> tern_bpa::routing::Result<tern_bpa::routing::StrategyResult> {
        // An application registers for the destination while the bundle is
        // in flight, then routing gives up on it
        self.registrar.add_registration("dtn://other/");
        Ok(tern_bpa::routing::StrategyResult::CustodyRefused)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn forwarding_failure_rediscovers_a_local_destination() {
    let storage = Arc::new(CountingStorage::default());
    let registrar = MockRegistrar::new(&[]);
    let bpa = Bpa::new(&node_config(false), storage.clone(), registrar.clone());
    bpa.routing()
        .register(Arc::new(LateRegistrationStrategy {
            registrar: registrar.clone(),
        }))
        .unwrap();

    let mut b = bpv7::builder::Builder::new();
    b.source("ipn:977000.1".parse().unwrap())
        .destination("dtn://other/app".parse().unwrap())
        .report_to("dtn:none".parse().unwrap())
        .lifetime(Duration::from_secs(3600));
    b.add_extension_block(bpv7::block::Type::Routing)
        .data(cbor::encode::emit(&42u32))
        .build()
        .add_payload_block(b"ping".to_vec());

    bpa.receive(b.build()).await;
    settle().await;

    // The refused forward loops back to dispatching, finds the fresh
    // registration, and delivers instead of deleting
    let delivered = registrar.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "dtn://other/".parse::<Eid>().unwrap());
    assert_eq!(&*delivered[0].1.payload().unwrap().data, b"ping");
    assert!(storage.inner.is_empty().await);

    bpa.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn forwarding_disabled_deletes_unroutable_bundles() {
    let storage = Arc::new(CountingStorage::default());
    let registrar = MockRegistrar::new(&[]);
    let bpa = Bpa::new(
        &Config {
            forwarding: false,
            ..node_config(false)
        },
        storage.clone(),
        registrar.clone(),
    );

    bpa.receive(build_bundle("dtn://far/app", "dtn:none", Default::default()))
        .await;
    settle().await;

    assert!(registrar.delivered().is_empty());
    assert!(storage.inner.is_empty().await);

    bpa.shutdown().await;
}
