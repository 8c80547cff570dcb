use super::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// Startup configuration for a [`Bpa`].
pub struct Config {
    /// The node's own administrative endpoint. Stamped as the source of
    /// locally-originated bundles and status reports.
    pub node_id: bpv7::eid::Eid,

    /// Additional EIDs the node answers to.
    pub aliases: Vec<bpv7::eid::Eid>,

    pub forwarding: bool,
    pub status_reports: bool,

    /// Upper bound on block-processing passes during reception. A pass is
    /// re-run only after a processor mutates the bundle; exceeding the bound
    /// deletes the bundle as unintelligible.
    pub max_processing_passes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: bpv7::eid::Eid::Null,
            aliases: Vec::new(),
            forwarding: true,
            status_reports: false,
            max_processing_passes: 2,
        }
    }
}

impl core::fmt::Debug for Config {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Config")
            .field("node_id", &self.node_id)
            .field("forwarding", &self.forwarding)
            .field("status_reports", &self.status_reports)
            .finish()
    }
}

/// The live-observable switches. Collaborators may toggle these while the
/// agent runs; the state machine reads them at each decision point rather
/// than caching them.
pub struct Settings {
    forwarding: AtomicBool,
    status_reports: AtomicBool,
    receipt_reports: AtomicBool,
    forward_reports: AtomicBool,
    delivery_reports: AtomicBool,
    delete_reports: AtomicBool,
}

impl Settings {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            forwarding: AtomicBool::new(config.forwarding),
            status_reports: AtomicBool::new(config.status_reports),
            receipt_reports: AtomicBool::new(true),
            forward_reports: AtomicBool::new(true),
            delivery_reports: AtomicBool::new(true),
            delete_reports: AtomicBool::new(true),
        }
    }

    pub fn forwarding(&self) -> bool {
        self.forwarding.load(Ordering::Relaxed)
    }

    pub fn set_forwarding(&self, enabled: bool) {
        self.forwarding.store(enabled, Ordering::Relaxed)
    }

    pub fn status_reports(&self) -> bool {
        self.status_reports.load(Ordering::Relaxed)
    }

    pub fn set_status_reports(&self, enabled: bool) {
        self.status_reports.store(enabled, Ordering::Relaxed)
    }

    pub fn receipt_reports(&self) -> bool {
        self.status_reports() && self.receipt_reports.load(Ordering::Relaxed)
    }

    pub fn set_receipt_reports(&self, enabled: bool) {
        self.receipt_reports.store(enabled, Ordering::Relaxed)
    }

    pub fn forward_reports(&self) -> bool {
        self.status_reports() && self.forward_reports.load(Ordering::Relaxed)
    }

    pub fn set_forward_reports(&self, enabled: bool) {
        self.forward_reports.store(enabled, Ordering::Relaxed)
    }

    pub fn delivery_reports(&self) -> bool {
        self.status_reports() && self.delivery_reports.load(Ordering::Relaxed)
    }

    pub fn set_delivery_reports(&self, enabled: bool) {
        self.delivery_reports.store(enabled, Ordering::Relaxed)
    }

    pub fn delete_reports(&self) -> bool {
        self.status_reports() && self.delete_reports.load(Ordering::Relaxed)
    }

    pub fn set_delete_reports(&self, enabled: bool) {
        self.delete_reports.store(enabled, Ordering::Relaxed)
    }
}
