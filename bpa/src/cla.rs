use super::*;
use hashbrown::HashMap;
use tokio::sync::RwLock;

pub type Error = Box<dyn core::error::Error + Send + Sync>;
pub type Result<T> = core::result::Result<T, Error>;

/// One connected convergence-layer channel. A channel has a stable peer
/// identity for the lifetime of the connection and accepts whole encoded
/// bundles for transmission.
#[async_trait]
pub trait Channel: Send + Sync {
    /// The EID of the directly-connected peer.
    fn peer(&self) -> &bpv7::eid::Eid;

    /// Send one encoded bundle, returning the number of bytes written.
    async fn send(&self, data: bytes::Bytes) -> Result<usize>;
}

/// The link-local table: peer EID to live channel, maintained by
/// [`Bpa::channel_up`](crate::Bpa::channel_up) and `channel_down`.
#[derive(Default)]
pub struct ChannelTable {
    channels: RwLock<HashMap<bpv7::eid::Eid, Arc<dyn Channel>>>,
}

impl ChannelTable {
    pub async fn insert(&self, channel: Arc<dyn Channel>) {
        let peer = channel.peer().clone();
        if self
            .channels
            .write()
            .await
            .insert(peer.clone(), channel)
            .is_some()
        {
            warn!("Replacing live channel for peer {peer}");
        }
    }

    pub async fn remove(&self, peer: &bpv7::eid::Eid) -> Option<Arc<dyn Channel>> {
        self.channels.write().await.remove(peer)
    }

    pub async fn find(&self, peer: &bpv7::eid::Eid) -> Option<Arc<dyn Channel>> {
        self.channels.read().await.get(peer).cloned()
    }

    /// Find a live channel that can carry traffic for `eid`: the peer
    /// matches it by the usual EID rules, or administers the same node.
    pub async fn find_matching(&self, eid: &bpv7::eid::Eid) -> Option<Arc<dyn Channel>> {
        let channels = self.channels.read().await;
        if let Some(channel) = channels.get(eid) {
            return Some(channel.clone());
        }
        channels
            .values()
            .find(|c| c.peer().matches(eid) || c.peer().is_authoritative_over(eid))
            .cloned()
    }
}
