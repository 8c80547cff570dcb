use super::*;
use thiserror::Error;

/// The primary error type for the `bpv7` crate.
#[derive(Error, Debug)]
pub enum Error {
    /// The input ends before the bundle does. Callers buffer more bytes and
    /// retry; no partial bundle is produced.
    #[error("More data required to complete the bundle")]
    NeedMoreData,

    #[error("Bundle has additional data after end of CBOR array")]
    AdditionalData,

    #[error("Unsupported bundle protocol version {0}")]
    InvalidVersion(u64),

    #[error("Bundle has no payload block")]
    MissingPayload,

    #[error("Final block of bundle is not the payload block")]
    PayloadNotFinal,

    #[error("Bundle has more than one block with block number {0}")]
    DuplicateBlockNumber(u64),

    #[error("{1:?} block cannot be block number {0}")]
    InvalidBlockNumber(u64, block::Type),

    #[error("Bundle has multiple {0:?} blocks")]
    DuplicateBlocks(block::Type),

    #[error("Invalid fragment information: offset {0}, total length {1}")]
    InvalidFragmentInfo(u64, u64),

    /// `api:` EIDs are process-local aliases and have no wire form.
    #[error("api: EIDs cannot be serialized")]
    ApiEidOnWire,

    #[error(transparent)]
    InvalidCrc(crc::Error),

    #[error(transparent)]
    InvalidEid(eid::Error),

    #[error("Invalid CBOR: {0}")]
    InvalidCbor(cbor::decode::Error),

    #[error("Failed to parse {field}: {source}")]
    InvalidField {
        field: &'static str,
        source: Box<dyn core::error::Error + Send + Sync>,
    },
}

impl From<cbor::decode::Error> for Error {
    fn from(e: cbor::decode::Error) -> Self {
        match e {
            cbor::decode::Error::NeedMoreData => Error::NeedMoreData,
            e => Error::InvalidCbor(e),
        }
    }
}

impl From<eid::Error> for Error {
    fn from(e: eid::Error) -> Self {
        match e {
            eid::Error::InvalidCbor(cbor::decode::Error::NeedMoreData) => Error::NeedMoreData,
            e => Error::InvalidEid(e),
        }
    }
}

impl From<crc::Error> for Error {
    fn from(e: crc::Error) -> Self {
        match e {
            crc::Error::InvalidCbor(cbor::decode::Error::NeedMoreData) => Error::NeedMoreData,
            e => Error::InvalidCrc(e),
        }
    }
}

/// A trait for mapping errors to a [`Error::InvalidField`], capturing the
/// name of the field being parsed. Truncation is passed through untouched so
/// incremental callers still see [`Error::NeedMoreData`].
pub trait CaptureFieldErr<T> {
    fn map_field_err(self, field: &'static str) -> Result<T, Error>;
}

impl<T, E: Into<Error>> CaptureFieldErr<T> for core::result::Result<T, E> {
    fn map_field_err(self, field: &'static str) -> Result<T, Error> {
        self.map_err(|e| match e.into() {
            Error::NeedMoreData => Error::NeedMoreData,
            e => Error::InvalidField {
                field,
                source: e.into(),
            },
        })
    }
}
