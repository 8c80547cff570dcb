use super::*;
use bytes::{Buf, BytesMut};
use hashbrown::HashMap;
use tokio::sync::Mutex;

/// Per-channel reassembly of the inbound byte stream. Channels deliver
/// arbitrarily-chunked bytes; a bundle is handed to the processor as soon
/// as one decodes completely.
pub struct Ingress {
    processor: Arc<processor::Processor>,
    buffers: Mutex<HashMap<bpv7::eid::Eid, BytesMut>>,
}

impl Ingress {
    pub(crate) fn new(processor: Arc<processor::Processor>) -> Self {
        Self {
            processor,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Feed bytes received from the channel whose peer is `peer`.
    pub async fn push(&self, peer: &bpv7::eid::Eid, data: &[u8]) {
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers.entry(peer.clone()).or_default();
        buffer.extend_from_slice(data);

        while !buffer.is_empty() {
            match bpv7::Bundle::parse(buffer) {
                Ok((bundle, len)) => {
                    buffer.advance(len);

                    if let Err(e) = self.processor.registry.on_decoded(&bundle) {
                        warn!("Rejecting bundle {} from {peer}: {e}", bundle.id);
                        continue;
                    }
                    self.processor.receive(bundle).await;
                }
                Err(bpv7::Error::NeedMoreData) => break,
                Err(e) => {
                    // The framing is gone; nothing downstream of this point
                    // can be trusted
                    warn!("Dropping {} buffered bytes from {peer}: {e}", buffer.len());
                    buffer.clear();
                    break;
                }
            }
        }

        if buffer.is_empty() {
            buffers.remove(peer);
        }
    }

    /// The channel went away; any partial bundle is lost.
    pub(crate) async fn channel_closed(&self, peer: &bpv7::eid::Eid) {
        if let Some(buffer) = self.buffers.lock().await.remove(peer) {
            if !buffer.is_empty() {
                debug!("Discarding {} partial bytes from {peer}", buffer.len());
            }
        }
    }
}
