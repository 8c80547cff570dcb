/*!
Bundle processing agent.

Drives the bundle lifecycle: reception from convergence-layer channels,
per-block processing, the routing decision, local delivery, status reporting
and deletion. The wire format lives in `tern-bpv7`; this crate owns the state
machine and its collaborators (storage, registrar, channels).
*/

pub mod block_processor;
pub mod bpa;
pub mod bundle;
pub mod cla;
pub mod config;
pub mod ingress;
pub mod local_eids;
pub mod registrar;
pub mod routing;
pub mod storage;

mod processor;

use std::sync::Arc;
use tern_bpv7 as bpv7;
use tern_cbor as cbor;
use tracing::{debug, error, info, trace, warn};

pub use async_trait::async_trait;
pub use bpa::Bpa;
pub use bytes::Bytes;
