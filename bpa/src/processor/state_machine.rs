use super::*;
use bpv7::status_report::{AdministrativeRecord, ReasonCode, StatusAssertion, StatusReport};
use core::{future::Future, pin::Pin};

/// Which assertion a status report makes.
#[derive(Clone, Copy)]
enum ReportKind {
    Received,
    Forwarded,
    Delivered,
    Deleted,
}

impl Processor {
    /// Transmission: entry point for locally-submitted bundles, including
    /// re-entered status reports.
    pub(crate) async fn transmission(self: &Arc<Self>, mut bundle: bundle::Bundle) {
        trace!("Transmission of {}", bundle.id());

        if bundle.bundle.id.source.is_null()
            || matches!(bundle.bundle.id.source, bpv7::eid::Eid::Api { .. })
        {
            bundle.bundle.id.source = self.node_id.clone();
        }
        bundle.tags.dispatch_pending = true;
        self.dispatch(bundle).await
    }

    /// Reception: a bundle arrived over a channel.
    pub(crate) async fn reception(self: &Arc<Self>, mut bundle: bundle::Bundle) {
        trace!("Reception of {}", bundle.id());
        bundle.tags.dispatch_pending = true;

        if bundle.bundle.flags.receipt_report_requested && self.settings.receipt_reports() {
            self.generate_report(
                &mut bundle,
                ReportKind::Received,
                ReasonCode::NoAdditionalInformation,
            );
        }

        if !bundle.bundle.crc_ok() {
            debug!("CRC failure on {}", bundle.id());
            bundle.tags.deletion_reason = Some(ReasonCode::BlockUnintelligible);
            return self.deletion(bundle).await;
        }

        let mut pass = 0;
        loop {
            pass += 1;
            if pass > self.max_passes {
                debug!("{} exceeded the processing pass bound", bundle.id());
                bundle.tags.deletion_reason = Some(ReasonCode::BlockUnintelligible);
                return self.deletion(bundle).await;
            }
            match self.process_blocks(&mut bundle) {
                Ok(false) => break,
                Ok(true) => continue,
                Err(reason) => {
                    bundle.tags.deletion_reason = Some(reason);
                    return self.deletion(bundle).await;
                }
            }
        }

        self.dispatch(bundle).await
    }

    /// One block-processing pass. Returns whether a processor mutated the
    /// bundle in a way that needs another pass.
    fn process_blocks(&self, bundle: &mut bundle::Bundle) -> Result<bool, ReasonCode> {
        let blocks: Vec<_> = bundle
            .bundle
            .blocks
            .iter()
            .map(|b| (b.number, b.block_type, b.flags.clone()))
            .collect();

        let mut mutated = false;
        for (number, block_type, flags) in blocks {
            let Some(processor) = self.registry.lookup(block_type) else {
                trace!("No processor for {block_type:?} block {number}");
                if flags.report_on_failure && self.settings.receipt_reports() {
                    self.generate_report(
                        bundle,
                        ReportKind::Received,
                        ReasonCode::BlockUnintelligible,
                    );
                }
                if flags.delete_bundle_on_failure {
                    return Err(ReasonCode::BlockUnintelligible);
                }
                if flags.delete_block_on_failure {
                    bundle.bundle.remove_block(number);
                }
                continue;
            };

            match processor.on_reception(&mut bundle.bundle, number) {
                Ok(block_processor::Outcome::Unchanged) => {}
                Ok(block_processor::Outcome::Mutated) => mutated = true,
                Ok(block_processor::Outcome::RemoveBlock) => bundle.bundle.remove_block(number),
                Err(e) => {
                    debug!("Processing {block_type:?} block {number} failed: {e}");
                    return Err(e.reason());
                }
            }
        }
        Ok(mutated)
    }

    /// Dispatching: local delivery, forwarding, or deletion. Boxed rather
    /// than an `async fn`: Forwarding-Failed for a destination that turns
    /// out to be local loops back here, and that cycle needs a type-erased
    /// future.
    pub(crate) fn dispatch(
        self: &Arc<Self>,
        mut bundle: bundle::Bundle,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            // Between transitions at most one lifecycle aspect is pending
            debug_assert!(bundle.tags.pending_count() <= 1);

            match self.local_eids.lookup(&bundle.bundle.destination).await {
                Some(target) => self.local_delivery(bundle, target).await,
                None => {
                    if self.settings.forwarding() {
                        self.forward(bundle).await
                    } else {
                        trace!("Forwarding disabled, deleting {}", bundle.id());
                        bundle.tags.deletion_reason =
                            Some(ReasonCode::NoKnownRouteToDestination);
                        self.deletion(bundle).await
                    }
                }
            }
        })
    }

    /// Forwarding: hand the bundle to the routing decision layer.
    pub(crate) async fn forward(self: &Arc<Self>, mut bundle: bundle::Bundle) {
        bundle.tags.dispatch_pending = false;
        bundle.tags.forward_pending = true;

        self.stamp_previous_node(&mut bundle.bundle);

        match self.engine.route(&mut bundle).await {
            Ok(routing::StrategyResult::Forwarded) => self.forwarding_successful(bundle).await,
            Ok(routing::StrategyResult::CustodyAccepted) => {
                // The routing layer holds the bundle now; this pass ends
                // without deletion or discard
                trace!("Custody of {} accepted by routing", bundle.id());
                self.flush_reports(&mut bundle).await;
            }
            Ok(routing::StrategyResult::CustodyRefused) => self.forwarding_failed(bundle).await,
            Err(e) => {
                warn!("Routing {} failed: {e}", bundle.id());
                bundle.tags.deletion_reason = Some(match e {
                    routing::Error::Storage(storage::Error::Full) => ReasonCode::DepletedStorage,
                    _ => ReasonCode::NoKnownRouteToDestination,
                });
                self.deletion(bundle).await
            }
        }
    }

    /// A held bundle has a fresh opportunity; re-enters at Forwarding.
    pub(crate) async fn forward_pulled(self: &Arc<Self>, mut bundle: bundle::Bundle) {
        if let Err(reason) = self.pulled_pass(&mut bundle.bundle) {
            bundle.tags.deletion_reason = Some(reason);
            return self.deletion(bundle).await;
        }
        self.forward(bundle).await
    }

    fn pulled_pass(&self, bundle: &mut bpv7::Bundle) -> Result<(), ReasonCode> {
        let blocks: Vec<_> = bundle.blocks.iter().map(|b| (b.number, b.block_type)).collect();
        for (number, block_type) in blocks {
            if let Some(processor) = self.registry.lookup(block_type) {
                match processor.on_pulled_from_storage(bundle, number) {
                    Ok(block_processor::Outcome::RemoveBlock) => bundle.remove_block(number),
                    Ok(_) => {}
                    Err(e) => return Err(e.reason()),
                }
            }
        }
        Ok(())
    }

    /// Record this node as the previous hop before the bundle leaves,
    /// replacing any stamp left by the sender.
    fn stamp_previous_node(&self, bundle: &mut bpv7::Bundle) {
        if self.node_id.is_null() || !self.node_id.has_wire_form() {
            return;
        }
        let data = cbor::encode::emit(&self.node_id);

        if let Some(block) = bundle
            .blocks
            .iter_mut()
            .find(|b| b.block_type == bpv7::block::Type::PreviousNode)
        {
            block.data = data.into();
            block.crc_check = None;
            return;
        }

        let number = bundle.blocks.iter().map(|b| b.number).max().unwrap_or(0) + 1;
        let block = bpv7::block::Block::new(
            bpv7::block::Type::PreviousNode,
            number,
            bpv7::block::Flags::default(),
            bpv7::crc::CrcType::CRC16_X25,
            data,
        );
        // The payload block stays last
        let at = bundle.blocks.len().saturating_sub(1);
        bundle.blocks.insert(at, block);
    }

    async fn forwarding_successful(self: &Arc<Self>, mut bundle: bundle::Bundle) {
        trace!("Forwarded {}", bundle.id());
        bundle.tags.forward_pending = false;

        if bundle.bundle.flags.forward_report_requested && self.settings.forward_reports() {
            self.generate_report(
                &mut bundle,
                ReportKind::Forwarded,
                ReasonCode::NoAdditionalInformation,
            );
        }
        self.discard(bundle).await
    }

    /// Forwarding-Failed: a destination that turns out to be local loops
    /// back to Dispatching; anything else is deleted as unroutable.
    async fn forwarding_failed(self: &Arc<Self>, mut bundle: bundle::Bundle) {
        bundle.tags.forward_pending = false;

        if self
            .local_eids
            .lookup(&bundle.bundle.destination)
            .await
            .is_some()
        {
            debug!("{} is local after all, re-dispatching", bundle.id());
            bundle.tags.dispatch_pending = true;
            return self.dispatch(bundle).await;
        }

        bundle.tags.deletion_reason = Some(ReasonCode::NoKnownRouteToDestination);
        self.deletion(bundle).await
    }

    /// Expired: lifetime elapsed while the bundle was held.
    pub(crate) async fn expire(self: &Arc<Self>, mut bundle: bundle::Bundle) {
        trace!("{} expired", bundle.id());
        bundle.tags.deletion_reason = Some(ReasonCode::LifetimeExpired);
        self.deletion(bundle).await
    }

    /// Local Delivery: hand the bundle to its local target.
    async fn local_delivery(self: &Arc<Self>, mut bundle: bundle::Bundle, target: local_eids::Lookup) {
        bundle.tags.dispatch_pending = false;
        bundle.tags.delivery_pending = true;

        let endpoint = match target {
            local_eids::Lookup::Registration(endpoint) => endpoint,
            local_eids::Lookup::NodeId => {
                if bundle.bundle.flags.is_admin_record {
                    self.consume_admin_record(&bundle.bundle);
                    return self.delivery_successful(bundle).await;
                }
                bundle.bundle.destination.clone()
            }
            local_eids::Lookup::ClaAlias => {
                // Link-local destination: delivery is a send over the
                // matching channel
                return self.deliver_link_local(bundle).await;
            }
        };

        match self.registrar.deliver(&endpoint, &bundle.bundle).await {
            Ok(()) => self.delivery_successful(bundle).await,
            Err(registrar::DeliveryFailure::Unregistered) => {
                bundle.tags.deletion_reason = Some(ReasonCode::DestinationEndpointUnavailable);
                self.deletion(bundle).await
            }
            Err(e) => self.defer_delivery(bundle, endpoint, e).await,
        }
    }

    /// The sink exists but cannot take the bundle now: persist it and wait
    /// for the registration to wake up.
    async fn defer_delivery(
        self: &Arc<Self>,
        mut bundle: bundle::Bundle,
        endpoint: bpv7::eid::Eid,
        failure: registrar::DeliveryFailure,
    ) {
        trace!("Deferring delivery of {}: {failure}", bundle.id());

        if !bundle.tags.in_storage {
            match self.storage.store(&bundle.bundle).await {
                Ok(()) | Err(storage::Error::AlreadyExists) => bundle.tags.in_storage = true,
                Err(e) => {
                    error!("Cannot store {} for deferred delivery: {e}", bundle.id());
                    bundle.tags.deletion_reason = Some(ReasonCode::DepletedStorage);
                    return self.deletion(bundle).await;
                }
            }
        }
        self.registrar
            .deliver_later(&endpoint, bundle.id().clone())
            .await;
        self.flush_reports(&mut bundle).await;
    }

    async fn deliver_link_local(self: &Arc<Self>, mut bundle: bundle::Bundle) {
        let Some(channel) = self
            .channels
            .find_matching(&bundle.bundle.destination)
            .await
        else {
            bundle.tags.deletion_reason = Some(ReasonCode::DestinationEndpointUnavailable);
            return self.deletion(bundle).await;
        };

        let data = match bundle.bundle.emit() {
            Ok(data) => data,
            Err(e) => {
                error!("Cannot encode {}: {e}", bundle.id());
                bundle.tags.deletion_reason = Some(ReasonCode::NoAdditionalInformation);
                return self.deletion(bundle).await;
            }
        };

        match channel.send(data.into()).await {
            Ok(_) => self.delivery_successful(bundle).await,
            Err(e) => {
                warn!("Link-local send of {} failed: {e}", bundle.id());
                bundle.tags.deletion_reason = Some(ReasonCode::DestinationEndpointUnavailable);
                self.deletion(bundle).await
            }
        }
    }

    async fn delivery_successful(self: &Arc<Self>, mut bundle: bundle::Bundle) {
        trace!("Delivered {}", bundle.id());
        bundle.tags.delivery_pending = false;

        if bundle.bundle.flags.delivery_report_requested && self.settings.delivery_reports() {
            self.generate_report(
                &mut bundle,
                ReportKind::Delivered,
                ReasonCode::NoAdditionalInformation,
            );
        }
        self.discard(bundle).await
    }

    /// Deletion: record the reason, report if asked, then discard.
    pub(crate) async fn deletion(self: &Arc<Self>, mut bundle: bundle::Bundle) {
        let reason = bundle
            .tags
            .deletion_reason
            .unwrap_or(ReasonCode::NoAdditionalInformation);
        debug!("Deleting {}: {reason:?}", bundle.id());

        if bundle.bundle.flags.delete_report_requested && self.settings.delete_reports() {
            self.generate_report(&mut bundle, ReportKind::Deleted, reason);
        }

        bundle.tags.dispatch_pending = false;
        bundle.tags.forward_pending = false;
        bundle.tags.delivery_pending = false;
        self.discard(bundle).await
    }

    /// Discarding: terminal. Purges storage and watch-lists, then flushes
    /// any remaining status reports. Idempotent: a second discard of the
    /// same id finds nothing to do.
    pub(crate) async fn discard(self: &Arc<Self>, mut bundle: bundle::Bundle) {
        match self.storage.remove(bundle.id()).await {
            Ok(()) | Err(storage::Error::NotFound) => {}
            Err(e) => error!("Failed to remove {} from storage: {e}", bundle.id()),
        }
        bundle.tags.in_storage = false;
        self.engine.forget(bundle.id()).await;
        self.flush_reports(&mut bundle).await;
    }

    /// Re-enter each accumulated status report at Transmission. Called at
    /// every pass exit, not just Discarding: a pass can also end with the
    /// routing layer taking custody or with delivery deferred, and reports
    /// generated earlier in the pass must still go out.
    async fn flush_reports(self: &Arc<Self>, bundle: &mut bundle::Bundle) {
        for mut report in core::mem::take(&mut bundle.tags.reports) {
            report.id.source = self.node_id.clone();
            let id = report.id.clone();
            self.submit(id, Event::Transmit(bundle::Bundle::new(report)))
                .await;
        }
    }

    fn consume_admin_record(&self, bundle: &bpv7::Bundle) {
        let Some(payload) = bundle.payload() else {
            return;
        };
        match cbor::decode::parse::<AdministrativeRecord>(&payload.data) {
            Ok((AdministrativeRecord::BundleStatusReport(report), _)) => {
                info!(
                    "Status report for {}: {:?}",
                    report.bundle_id, report.reason
                );
            }
            Err(e) => warn!("Undecodable administrative record from {}: {e}", bundle.id.source),
        }
    }

    /// Build a status report about `bundle` and queue it on the tags. It is
    /// submitted for transmission at Discarding.
    fn generate_report(&self, bundle: &mut bundle::Bundle, kind: ReportKind, reason: ReasonCode) {
        if bundle.bundle.report_to.is_null() {
            return;
        }

        let assertion = Some(StatusAssertion(
            bundle
                .bundle
                .flags
                .report_status_time
                .then(bpv7::DtnTime::now),
        ));
        let mut report = StatusReport {
            bundle_id: bundle.bundle.id.clone(),
            reason,
            ..Default::default()
        };
        match kind {
            ReportKind::Received => report.received = assertion,
            ReportKind::Forwarded => report.forwarded = assertion,
            ReportKind::Delivered => report.delivered = assertion,
            ReportKind::Deleted => report.deleted = assertion,
        }

        let mut b = bpv7::builder::Builder::new();
        b.flags(bpv7::bundle::Flags {
            is_admin_record: true,
            ..Default::default()
        })
        .destination(bundle.bundle.report_to.clone())
        .report_to(bpv7::eid::Eid::Null)
        .lifetime(bundle.bundle.lifetime)
        .add_payload_block(AdministrativeRecord::BundleStatusReport(report).to_payload());

        let mut report_bundle = b.build();
        // Reports about many bundles can share a millisecond; randomize the
        // sequence number so their ids stay distinct
        report_bundle.id.timestamp.sequence_number = rand::random::<u32>() as u64;

        trace!(
            "Generated {} report about {}",
            match kind {
                ReportKind::Received => "reception",
                ReportKind::Forwarded => "forwarding",
                ReportKind::Delivered => "delivery",
                ReportKind::Deleted => "deletion",
            },
            bundle.id()
        );
        bundle.tags.reports.push(report_bundle);
    }
}
