use super::*;

/// Process-local lifecycle state. Tags are never serialized; they exist only
/// while the agent holds the bundle.
#[derive(Default, Debug)]
pub struct Tags {
    pub dispatch_pending: bool,
    pub forward_pending: bool,
    pub delivery_pending: bool,
    pub in_storage: bool,
    pub deletion_reason: Option<bpv7::status_report::ReasonCode>,

    /// Status reports generated during the current processing pass. Each is
    /// re-entered at Transmission when the pass ends, whether by discard,
    /// deferred delivery, or routing taking custody.
    pub reports: Vec<bpv7::Bundle>,
}

impl Tags {
    /// The steady-state invariant: between transitions at most one pending
    /// aspect holds.
    pub fn pending_count(&self) -> usize {
        [
            self.dispatch_pending,
            self.forward_pending,
            self.delivery_pending,
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }
}

/// A bundle in flight through the agent: the wire bundle plus its tags.
#[derive(Debug)]
pub struct Bundle {
    pub bundle: bpv7::Bundle,
    pub tags: Tags,
}

impl Bundle {
    pub fn new(bundle: bpv7::Bundle) -> Self {
        Self {
            bundle,
            tags: Tags::default(),
        }
    }

    pub fn id(&self) -> &bpv7::BundleId {
        &self.bundle.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_count_tracks_each_aspect() {
        let mut tags = Tags::default();
        assert_eq!(tags.pending_count(), 0);

        tags.dispatch_pending = true;
        assert_eq!(tags.pending_count(), 1);

        tags.dispatch_pending = false;
        tags.forward_pending = true;
        assert_eq!(tags.pending_count(), 1);

        tags.delivery_pending = true;
        assert_eq!(tags.pending_count(), 2);

        // Storage residency and a recorded deletion reason are not pending
        // aspects
        tags.forward_pending = false;
        tags.delivery_pending = false;
        tags.in_storage = true;
        tags.deletion_reason = Some(bpv7::status_report::ReasonCode::LifetimeExpired);
        assert_eq!(tags.pending_count(), 0);
    }
}
