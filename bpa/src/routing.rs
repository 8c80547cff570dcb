use super::*;
use hashbrown::HashMap;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Error, Debug)]
pub enum Error {
    #[error("A strategy with id {0} is already registered")]
    DuplicateStrategy(u32),

    #[error("Strategy {0} returned CustodyAccepted from a direct route")]
    IllegalStrategyResult(u32),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Codec(#[from] bpv7::Error),
}

pub type Result<T> = core::result::Result<T, Error>;

/// The only three things a routing strategy may say about a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyResult {
    /// The bundle has been sent; the caller reports and discards.
    Forwarded,
    /// The routing layer now owns the bundle and will act on a future
    /// opportunity; the caller must neither delete nor discard it.
    CustodyAccepted,
    /// The strategy cannot make progress.
    CustodyRefused,
}

/// A pluggable alternate strategy, selected by the bundle's routing-hint
/// block. Identifiers are small integers fixed at registration.
#[async_trait]
pub trait RoutingStrategy: Send + Sync {
    fn id(&self) -> u32;
    fn name(&self) -> &str;
    async fn route(&self, bundle: &bpv7::Bundle) -> Result<StrategyResult>;
}

/// The single-hop direct strategy: a live channel whose peer matches the
/// destination, or one static next-hop table lookup away from one.
struct DirectStrategy {
    channels: Arc<cla::ChannelTable>,
    next_hops: RwLock<HashMap<bpv7::eid::Eid, bpv7::eid::Eid>>,
}

impl DirectStrategy {
    async fn resolve(&self, destination: &bpv7::eid::Eid) -> Option<Arc<dyn cla::Channel>> {
        if let Some(channel) = self.channels.find_matching(destination).await {
            return Some(channel);
        }
        let next_hop = self.next_hops.read().await.get(destination).cloned()?;
        self.channels.find_matching(&next_hop).await
    }
}

#[async_trait]
impl RoutingStrategy for DirectStrategy {
    fn id(&self) -> u32 {
        0
    }

    fn name(&self) -> &str {
        "direct"
    }

    async fn route(&self, bundle: &bpv7::Bundle) -> Result<StrategyResult> {
        let Some(channel) = self.resolve(&bundle.destination).await else {
            return Ok(StrategyResult::CustodyRefused);
        };

        let data = bundle.emit()?;
        match channel.send(data.into()).await {
            Ok(sent) => {
                trace!("Forwarded {} bytes to {}", sent, channel.peer());
                Ok(StrategyResult::Forwarded)
            }
            Err(e) => {
                warn!("Send to {} failed: {e}", channel.peer());
                Ok(StrategyResult::CustodyRefused)
            }
        }
    }
}

/// The routing decision layer. Direct first, then the hinted alternate
/// strategy, then hold for a network opportunity.
pub struct RoutingEngine {
    direct: DirectStrategy,
    strategies: std::sync::RwLock<Arc<HashMap<u32, Arc<dyn RoutingStrategy>>>>,
    storage: Arc<dyn storage::Storage>,
    watch_list: Mutex<HashMap<bpv7::eid::Eid, Vec<bpv7::BundleId>>>,
}

impl RoutingEngine {
    pub fn new(channels: Arc<cla::ChannelTable>, storage: Arc<dyn storage::Storage>) -> Self {
        Self {
            direct: DirectStrategy {
                channels,
                next_hops: RwLock::new(HashMap::new()),
            },
            strategies: std::sync::RwLock::new(Arc::new(HashMap::new())),
            storage,
            watch_list: Mutex::new(HashMap::new()),
        }
    }

    /// Add a static next-hop entry: bundles for `destination` go via the
    /// channel peer `next_hop`.
    pub async fn add_next_hop(&self, destination: bpv7::eid::Eid, next_hop: bpv7::eid::Eid) {
        self.direct
            .next_hops
            .write()
            .await
            .insert(destination, next_hop);
    }

    pub fn register(&self, strategy: Arc<dyn RoutingStrategy>) -> Result<()> {
        let mut guard = self
            .strategies
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let id = strategy.id();
        if id == self.direct.id() || guard.contains_key(&id) {
            return Err(Error::DuplicateStrategy(id));
        }
        let mut map = (**guard).clone();
        map.insert(id, strategy);
        *guard = Arc::new(map);
        Ok(())
    }

    pub async fn route(&self, bundle: &mut bundle::Bundle) -> Result<StrategyResult> {
        match self.direct.route(&bundle.bundle).await? {
            StrategyResult::Forwarded => return Ok(StrategyResult::Forwarded),
            StrategyResult::CustodyAccepted => {
                return Err(Error::IllegalStrategyResult(self.direct.id()));
            }
            StrategyResult::CustodyRefused => {}
        }

        if let Some(hint) = bundle
            .bundle
            .block_of_type(bpv7::block::Type::Routing)
            .and_then(|b| b.routing_hint().ok())
        {
            let strategy = self
                .strategies
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(&hint)
                .cloned();
            if let Some(strategy) = strategy {
                trace!("Delegating to strategy {} ({})", hint, strategy.name());
                return strategy.route(&bundle.bundle).await;
            }
        }

        self.forward_later(bundle).await?;
        Ok(StrategyResult::CustodyAccepted)
    }

    /// Hold the bundle against a future channel-up opportunity.
    async fn forward_later(&self, bundle: &mut bundle::Bundle) -> Result<()> {
        if !bundle.tags.in_storage {
            self.storage.store(&bundle.bundle).await?;
            bundle.tags.in_storage = true;
        }
        self.watch_list
            .lock()
            .await
            .entry(bundle.bundle.destination.clone())
            .or_default()
            .push(bundle.id().clone());
        trace!("Holding {} for a future opportunity", bundle.id());
        Ok(())
    }

    /// A channel to `peer` just came up: release every held bundle the peer
    /// can now make progress toward.
    pub async fn drain_matching(&self, peer: &bpv7::eid::Eid) -> Vec<bpv7::BundleId> {
        let next_hops = self.direct.next_hops.read().await;
        let mut watch_list = self.watch_list.lock().await;
        let destinations: Vec<_> = watch_list
            .keys()
            .filter(|dest| {
                peer.matches(dest)
                    || next_hops.get(*dest).is_some_and(|hop| peer.matches(hop))
            })
            .cloned()
            .collect();
        drop(next_hops);

        let mut released = Vec::new();
        for dest in destinations {
            if let Some(ids) = watch_list.remove(&dest) {
                released.extend(ids);
            }
        }
        released
    }

    /// Remove a deleted bundle from every watch-list. Idempotent.
    pub async fn forget(&self, bundle_id: &bpv7::BundleId) {
        let mut watch_list = self.watch_list.lock().await;
        watch_list.retain(|_, ids| {
            ids.retain(|id| id != bundle_id);
            !ids.is_empty()
        });
    }
}
