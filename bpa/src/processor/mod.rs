use super::*;
use core::{future::Future, pin::Pin};
use hashbrown::HashMap;
use tokio::sync::{mpsc, Mutex};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

mod state_machine;

const MAILBOX_DEPTH: usize = 16;

/// A lifecycle event for one bundle.
pub(crate) enum Event {
    /// Local submission; enters at Transmission.
    Transmit(bundle::Bundle),
    /// Arrived from a channel; enters at Reception.
    Receive(bundle::Bundle),
    /// Lifetime elapsed while stored.
    Expired,
    /// A forwarding opportunity appeared for a stored bundle.
    Forward,
    /// A registration the bundle was held for became active.
    ResumeDelivery,
}

/// The bundle lifecycle engine. Events for the same bundle id are funneled
/// through one mailbox and processed strictly in order; distinct bundles
/// run in parallel.
pub struct Processor {
    pub(crate) settings: config::Settings,
    pub(crate) node_id: bpv7::eid::Eid,
    pub(crate) max_passes: usize,
    pub(crate) storage: Arc<dyn storage::Storage>,
    pub(crate) registrar: Arc<dyn registrar::Registrar>,
    pub(crate) channels: Arc<cla::ChannelTable>,
    pub(crate) local_eids: local_eids::LocalEidTable,
    pub(crate) registry: block_processor::Registry,
    pub(crate) engine: routing::RoutingEngine,

    mailboxes: Mutex<HashMap<bpv7::BundleId, mpsc::Sender<Event>>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Processor {
    pub fn new(
        config: &config::Config,
        storage: Arc<dyn storage::Storage>,
        registrar: Arc<dyn registrar::Registrar>,
        channels: Arc<cla::ChannelTable>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings: config::Settings::new(config),
            node_id: config.node_id.clone(),
            max_passes: config.max_processing_passes,
            local_eids: local_eids::LocalEidTable::new(config, registrar.clone(), channels.clone()),
            registry: block_processor::Registry::new(),
            engine: routing::RoutingEngine::new(channels.clone(), storage.clone()),
            storage,
            registrar,
            channels,
            mailboxes: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn settings(&self) -> &config::Settings {
        &self.settings
    }

    pub fn registry(&self) -> &block_processor::Registry {
        &self.registry
    }

    pub fn engine(&self) -> &routing::RoutingEngine {
        &self.engine
    }

    /// Local submission entry point.
    pub async fn transmit(self: &Arc<Self>, bundle: bpv7::Bundle) {
        let id = bundle.id.clone();
        self.submit(id, Event::Transmit(bundle::Bundle::new(bundle)))
            .await
    }

    /// Channel reception entry point.
    pub async fn receive(self: &Arc<Self>, bundle: bpv7::Bundle) {
        let id = bundle.id.clone();
        self.submit(id, Event::Receive(bundle::Bundle::new(bundle)))
            .await
    }

    /// Lifetime-timer collaborator entry point.
    pub async fn expired(self: &Arc<Self>, bundle_id: bpv7::BundleId) {
        self.submit(bundle_id, Event::Expired).await
    }

    /// A stored bundle has a new forwarding opportunity.
    pub async fn forward_stored(self: &Arc<Self>, bundle_id: bpv7::BundleId) {
        self.submit(bundle_id, Event::Forward).await
    }

    /// A registration a stored bundle was held for is active again.
    pub async fn resume_delivery(self: &Arc<Self>, bundle_id: bpv7::BundleId) {
        self.submit(bundle_id, Event::ResumeDelivery).await
    }

    /// Stop accepting events and wait for in-flight transitions to finish.
    /// Transitions are never interrupted mid-step.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    // Boxed rather than an `async fn`: the worker it spawns calls back into
    // submit when a discarded bundle flushes its status reports, and that
    // cycle needs a type-erased future
    pub(crate) fn submit(
        self: &Arc<Self>,
        id: bpv7::BundleId,
        event: Event,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut event = event;
            if self.cancel.is_cancelled() {
                warn!("Event for {id} dropped during shutdown");
                return;
            }

            loop {
                let tx = {
                    let mut mailboxes = self.mailboxes.lock().await;
                    match mailboxes.get(&id) {
                        Some(tx) => tx.clone(),
                        None => {
                            let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
                            mailboxes.insert(id.clone(), tx.clone());
                            let processor = self.clone();
                            let id = id.clone();
                            self.tracker.spawn(async move {
                                processor.run_mailbox(id, rx).await;
                            });
                            tx
                        }
                    }
                };

                match tx.send(event).await {
                    Ok(()) => return,
                    // The worker is retiring; it removes the map entry once
                    // it has drained, after which the loop creates a fresh
                    // mailbox
                    Err(mpsc::error::SendError(e)) => {
                        event = e;
                        tokio::task::yield_now().await;
                    }
                }
            }
        })
    }

    async fn run_mailbox(self: Arc<Self>, id: bpv7::BundleId, mut rx: mpsc::Receiver<Event>) {
        loop {
            let event = tokio::select! {
                e = rx.recv() => match e {
                    Some(e) => e,
                    None => break,
                },
                _ = self.cancel.cancelled() => break,
            };

            self.handle(&id, event).await;

            if rx.is_empty() {
                // Retire: refuse new sends, drain stragglers, and only then
                // release the id so a successor mailbox cannot overlap us
                rx.close();
                while let Some(event) = rx.recv().await {
                    self.handle(&id, event).await;
                }
                self.mailboxes.lock().await.remove(&id);
                break;
            }
        }
    }

    async fn handle(self: &Arc<Self>, id: &bpv7::BundleId, event: Event) {
        match event {
            Event::Transmit(bundle) => self.transmission(bundle).await,
            Event::Receive(bundle) => self.reception(bundle).await,
            Event::Expired => match self.load_stored(id).await {
                Some(bundle) => self.expire(bundle).await,
                None => trace!("Expiry for {id}, already gone"),
            },
            Event::Forward => match self.load_stored(id).await {
                Some(bundle) => self.forward_pulled(bundle).await,
                None => trace!("Forwarding opportunity for {id}, already gone"),
            },
            Event::ResumeDelivery => match self.load_stored(id).await {
                Some(bundle) => self.dispatch(bundle).await,
                None => trace!("Delivery resume for {id}, already gone"),
            },
        }
    }

    async fn load_stored(&self, id: &bpv7::BundleId) -> Option<bundle::Bundle> {
        match self.storage.load(id).await {
            Ok(b) => {
                let mut b = bundle::Bundle::new(b);
                b.tags.in_storage = true;
                Some(b)
            }
            Err(storage::Error::NotFound) => None,
            Err(e) => {
                error!("Failed to load {id} from storage: {e}");
                None
            }
        }
    }
}
