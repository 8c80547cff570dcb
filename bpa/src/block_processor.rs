use super::*;
use bpv7::block;
use hashbrown::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("A processor is already registered for {0:?}")]
    DuplicateProcessor(block::Type),

    #[error("Hop limit exceeded")]
    HopLimitExceeded,

    #[error(transparent)]
    Processing(Box<dyn core::error::Error + Send + Sync>),
}

impl Error {
    /// The deletion reason the state machine records when this error aborts
    /// a bundle.
    pub fn reason(&self) -> bpv7::status_report::ReasonCode {
        match self {
            Error::HopLimitExceeded => bpv7::status_report::ReasonCode::HopLimitExceeded,
            _ => bpv7::status_report::ReasonCode::BlockUnintelligible,
        }
    }
}

impl From<bpv7::Error> for Error {
    fn from(e: bpv7::Error) -> Self {
        Error::Processing(e.into())
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// What a reception hook did to the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    /// The bundle was altered in a way that needs re-validation, e.g. a
    /// confidentiality block unwrapped another block. Triggers one more
    /// processing pass.
    Mutated,
    /// The block has served its purpose and must be removed.
    RemoveBlock,
}

/// Per-block-type hooks invoked by the state machine.
pub trait BlockProcessor: Send + Sync {
    /// Structural validation, run as soon as a bundle is decoded and before
    /// it enters Reception.
    fn on_decoded(&self, block: &block::Block) -> Result<()>;

    /// Reception-time processing. May mutate the bundle; `number` is the
    /// block being processed.
    fn on_reception(&self, bundle: &mut bpv7::Bundle, number: u64) -> Result<Outcome>;

    /// Invoked when a stored bundle is pulled back out for another pass.
    /// Reception-time work has already happened once, so the default does
    /// nothing.
    fn on_pulled_from_storage(&self, bundle: &mut bpv7::Bundle, number: u64) -> Result<Outcome> {
        let _ = (bundle, number);
        Ok(Outcome::Unchanged)
    }
}

/// Block type to processor. Built-ins are registered at startup; lookups
/// clone an immutable snapshot so the read path takes no lock longer than a
/// pointer copy.
pub struct Registry {
    processors: RwLock<Arc<HashMap<block::Type, Arc<dyn BlockProcessor>>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A registry with the built-in processors installed.
    pub fn new() -> Self {
        let mut processors: HashMap<block::Type, Arc<dyn BlockProcessor>> = HashMap::new();
        processors.insert(block::Type::Payload, Arc::new(PayloadProcessor));
        processors.insert(block::Type::PreviousNode, Arc::new(PreviousNodeProcessor));
        processors.insert(block::Type::BundleAge, Arc::new(BundleAgeProcessor));
        processors.insert(block::Type::HopCount, Arc::new(HopCountProcessor));
        Self {
            processors: RwLock::new(Arc::new(processors)),
        }
    }

    pub fn register(
        &self,
        block_type: block::Type,
        processor: Arc<dyn BlockProcessor>,
    ) -> Result<()> {
        let mut guard = self
            .processors
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if guard.contains_key(&block_type) {
            return Err(Error::DuplicateProcessor(block_type));
        }
        let mut map = (**guard).clone();
        map.insert(block_type, processor);
        *guard = Arc::new(map);
        Ok(())
    }

    pub fn lookup(&self, block_type: block::Type) -> Option<Arc<dyn BlockProcessor>> {
        self.processors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&block_type)
            .cloned()
    }

    /// Run `on_decoded` for every block that has a processor.
    pub fn on_decoded(&self, bundle: &bpv7::Bundle) -> Result<()> {
        let snapshot = self
            .processors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for block in &bundle.blocks {
            if let Some(processor) = snapshot.get(&block.block_type) {
                processor.on_decoded(block)?;
            }
        }
        Ok(())
    }
}

struct PayloadProcessor;

impl BlockProcessor for PayloadProcessor {
    fn on_decoded(&self, _block: &block::Block) -> Result<()> {
        Ok(())
    }

    fn on_reception(&self, _bundle: &mut bpv7::Bundle, _number: u64) -> Result<Outcome> {
        Ok(Outcome::Unchanged)
    }
}

/// The previous-node block names the forwarder that sent us the bundle. It
/// is consumed here; the next forwarder inserts a fresh one.
struct PreviousNodeProcessor;

impl BlockProcessor for PreviousNodeProcessor {
    fn on_decoded(&self, block: &block::Block) -> Result<()> {
        block.previous_node().map(|_| ()).map_err(Into::into)
    }

    fn on_reception(&self, bundle: &mut bpv7::Bundle, number: u64) -> Result<Outcome> {
        let Some(block) = bundle.block(number) else {
            return Ok(Outcome::Unchanged);
        };
        let previous = block.previous_node()?;
        trace!("Bundle arrived via {previous}");
        Ok(Outcome::RemoveBlock)
    }
}

/// Re-derives the bundle age from the creation timestamp where the source
/// had a clock; sources without one rely on forwarders accumulating transit
/// time, which this node cannot measure, so the block is left alone.
struct BundleAgeProcessor;

impl BlockProcessor for BundleAgeProcessor {
    fn on_decoded(&self, block: &block::Block) -> Result<()> {
        block.bundle_age().map(|_| ()).map_err(Into::into)
    }

    fn on_reception(&self, bundle: &mut bpv7::Bundle, number: u64) -> Result<Outcome> {
        let Some(creation_time) = bundle.id.timestamp.creation_time else {
            return Ok(Outcome::Unchanged);
        };
        let age = bpv7::DtnTime::now()
            .millisecs()
            .saturating_sub(creation_time.millisecs());
        if let Some(block) = bundle.block_mut(number) {
            block.data = cbor::encode::emit(&age).into();
        }
        // No re-validation needed for a refreshed age
        Ok(Outcome::Unchanged)
    }
}

struct HopCountProcessor;

impl BlockProcessor for HopCountProcessor {
    fn on_decoded(&self, block: &block::Block) -> Result<()> {
        block.hop_count().map(|_| ()).map_err(Into::into)
    }

    fn on_reception(&self, bundle: &mut bpv7::Bundle, number: u64) -> Result<Outcome> {
        let Some(block) = bundle.block_mut(number) else {
            return Ok(Outcome::Unchanged);
        };
        let mut info = block.hop_count()?;
        info.count += 1;
        if info.count > info.limit {
            return Err(Error::HopLimitExceeded);
        }
        block.data = cbor::encode::emit_array(Some(2), |a| {
            a.emit(&info.limit);
            a.emit(&info.count);
        })
        .into();
        Ok(Outcome::Unchanged)
    }
}
