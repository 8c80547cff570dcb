use super::*;

/// The assembled agent: one processor, its collaborators, and the channel
/// and ingress plumbing.
pub struct Bpa {
    processor: Arc<processor::Processor>,
    channels: Arc<cla::ChannelTable>,
    ingress: ingress::Ingress,
}

impl Bpa {
    pub fn new(
        config: &config::Config,
        storage: Arc<dyn storage::Storage>,
        registrar: Arc<dyn registrar::Registrar>,
    ) -> Self {
        let channels = Arc::new(cla::ChannelTable::default());
        let processor = processor::Processor::new(config, storage, registrar, channels.clone());
        info!("Agent up as {}", config.node_id);
        Self {
            ingress: ingress::Ingress::new(processor.clone()),
            processor,
            channels,
        }
    }

    pub fn settings(&self) -> &config::Settings {
        self.processor.settings()
    }

    pub fn block_processors(&self) -> &block_processor::Registry {
        self.processor.registry()
    }

    pub fn routing(&self) -> &routing::RoutingEngine {
        self.processor.engine()
    }

    pub fn ingress(&self) -> &ingress::Ingress {
        &self.ingress
    }

    /// Submit a locally-built bundle.
    pub async fn send(&self, bundle: bpv7::Bundle) {
        self.processor.transmit(bundle).await
    }

    /// Submit a bundle that has already been decoded, e.g. by a channel
    /// that frames bundles itself.
    pub async fn receive(&self, bundle: bpv7::Bundle) {
        self.processor.receive(bundle).await
    }

    /// The lifetime-timer collaborator noticed a stored bundle expire.
    pub async fn expire(&self, bundle_id: bpv7::BundleId) {
        self.processor.expired(bundle_id).await
    }

    /// The registrar's deferred registration became active again.
    pub async fn resume_delivery(&self, bundle_id: bpv7::BundleId) {
        self.processor.resume_delivery(bundle_id).await
    }

    /// A convergence-layer channel connected. Held bundles the new peer can
    /// make progress toward re-enter the state machine at Forwarding.
    pub async fn channel_up(&self, channel: Arc<dyn cla::Channel>) {
        let peer = channel.peer().clone();
        info!("Channel up: {peer}");
        self.channels.insert(channel).await;

        for bundle_id in self.processor.engine().drain_matching(&peer).await {
            self.processor.forward_stored(bundle_id).await;
        }
    }

    pub async fn channel_down(&self, peer: &bpv7::eid::Eid) {
        info!("Channel down: {peer}");
        self.channels.remove(peer).await;
        self.ingress.channel_closed(peer).await;
    }

    pub async fn shutdown(&self) {
        self.processor.shutdown().await;
        info!("Agent stopped");
    }
}
