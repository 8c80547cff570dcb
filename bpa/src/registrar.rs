use super::*;
use thiserror::Error;

/// Why a local delivery did not happen.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    #[error("The registration refused the bundle")]
    Refused,

    #[error("Delivery is disabled for this registration")]
    Disabled,

    /// The registration exists but is not currently accepting bundles. The
    /// agent stores the bundle and calls [`Registrar::deliver_later`].
    #[error("The registration is passive")]
    Passive,

    #[error("No registration for this endpoint")]
    Unregistered,
}

/// The application-agent side of local delivery.
#[async_trait]
pub trait Registrar: Send + Sync {
    /// The registered endpoints, as consulted by the local-EID table.
    async fn registrations(&self) -> Vec<bpv7::eid::Eid>;

    /// Deliver a bundle to the registration matching `endpoint`.
    async fn deliver(
        &self,
        endpoint: &bpv7::eid::Eid,
        bundle: &bpv7::Bundle,
    ) -> core::result::Result<(), DeliveryFailure>;

    /// Record that `bundle_id` is stored and waiting for `endpoint` to
    /// become active.
    async fn deliver_later(&self, endpoint: &bpv7::eid::Eid, bundle_id: bpv7::BundleId);
}
