use super::*;
use thiserror::Error;

pub mod mem;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Bundle already exists in storage")]
    AlreadyExists,

    #[error("Bundle not found in storage")]
    NotFound,

    #[error("Storage is full")]
    Full,

    #[error("Storage is unavailable")]
    Unavailable,

    #[error(transparent)]
    Internal(Box<dyn core::error::Error + Send + Sync>),
}

pub type Result<T> = core::result::Result<T, Error>;

/// Bundle storage collaborator. Implementations are free to persist however
/// they like; the agent only requires the four operations below, with the
/// distinct failure kinds of [`Error`].
#[async_trait]
pub trait Storage: Send + Sync {
    async fn store(&self, bundle: &bpv7::Bundle) -> Result<()>;

    async fn load(&self, bundle_id: &bpv7::BundleId) -> Result<bpv7::Bundle>;

    async fn remove(&self, bundle_id: &bpv7::BundleId) -> Result<()>;

    async fn contains(&self, bundle_id: &bpv7::BundleId) -> bool;

    /// Ids of every stored bundle addressed to `destination`.
    async fn find_by_destination(&self, destination: &bpv7::eid::Eid) -> Vec<bpv7::BundleId>;
}
