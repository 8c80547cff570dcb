use super::*;
use hashbrown::{HashMap, HashSet};
use tokio::sync::RwLock;

struct Indexes {
    bundles: HashMap<bpv7::BundleId, bpv7::Bundle>,
    by_destination: HashMap<bpv7::eid::Eid, HashSet<bpv7::BundleId>>,
}

/// In-memory reference storage. The id index and the destination reverse
/// index share one lock so the two are never observed out of step; readers
/// proceed concurrently, writers are exclusive.
pub struct Storage {
    max_bundles: Option<usize>,
    indexes: RwLock<Indexes>,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Storage {
    pub fn new(max_bundles: Option<usize>) -> Self {
        Self {
            max_bundles,
            indexes: RwLock::new(Indexes {
                bundles: HashMap::new(),
                by_destination: HashMap::new(),
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.indexes.read().await.bundles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.indexes.read().await.bundles.is_empty()
    }
}

#[async_trait]
impl super::Storage for Storage {
    async fn store(&self, bundle: &bpv7::Bundle) -> Result<()> {
        let mut indexes = self.indexes.write().await;
        if indexes.bundles.contains_key(&bundle.id) {
            return Err(Error::AlreadyExists);
        }
        if let Some(max) = self.max_bundles {
            if indexes.bundles.len() >= max {
                return Err(Error::Full);
            }
        }

        indexes
            .by_destination
            .entry(bundle.destination.clone())
            .or_default()
            .insert(bundle.id.clone());
        indexes.bundles.insert(bundle.id.clone(), bundle.clone());
        Ok(())
    }

    async fn load(&self, bundle_id: &bpv7::BundleId) -> Result<bpv7::Bundle> {
        self.indexes
            .read()
            .await
            .bundles
            .get(bundle_id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn remove(&self, bundle_id: &bpv7::BundleId) -> Result<()> {
        let mut indexes = self.indexes.write().await;
        let Some(bundle) = indexes.bundles.remove(bundle_id) else {
            return Err(Error::NotFound);
        };

        if let Some(ids) = indexes.by_destination.get_mut(&bundle.destination) {
            ids.remove(bundle_id);
            if ids.is_empty() {
                indexes.by_destination.remove(&bundle.destination);
            }
        }
        Ok(())
    }

    async fn contains(&self, bundle_id: &bpv7::BundleId) -> bool {
        self.indexes.read().await.bundles.contains_key(bundle_id)
    }

    async fn find_by_destination(&self, destination: &bpv7::eid::Eid) -> Vec<bpv7::BundleId> {
        self.indexes
            .read()
            .await
            .by_destination
            .get(destination)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}
