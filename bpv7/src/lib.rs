/*!
Bundle Protocol version 7 wire format.

This crate implements the bundle binary format: the primary block, canonical
blocks with per-block CRCs, endpoint identifiers, creation timestamps, and
administrative status reports. It is a pure codec crate; the processing agent
lives in `tern-bpa`.
*/

pub mod block;
pub mod builder;
pub mod bundle;
pub mod bundle_id;
pub mod creation_timestamp;
pub mod crc;
pub mod dtn_time;
pub mod eid;
pub mod error;
pub mod status_report;

pub use bundle::Bundle;
pub use bundle_id::{BundleId, FragmentInfo};
pub use creation_timestamp::CreationTimestamp;
pub use dtn_time::DtnTime;
pub use error::Error;

use tern_cbor as cbor;
