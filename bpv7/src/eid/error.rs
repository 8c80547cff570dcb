use super::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported EID scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("Invalid scheme-specific part '{0}'")]
    InvalidSsp(String),

    #[error("Unknown convergence-layer name '{0}'")]
    UnknownCla(String),

    #[error("Invalid {0} convergence-layer address '{1}'")]
    InvalidClaAddress(&'static str, String),

    #[error("Expecting 'ipn:node.service'")]
    IpnFormat,

    #[error("Additional items in EID array")]
    AdditionalItems,

    #[error("Failed to parse {field}: {source}")]
    InvalidField {
        field: &'static str,
        source: Box<dyn core::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    InvalidCbor(#[from] cbor::decode::Error),
}

pub(super) trait CaptureFieldErr<T> {
    fn map_field_err(self, field: &'static str) -> Result<T, Error>;
}

impl<T, E: Into<Error>> CaptureFieldErr<T> for core::result::Result<T, E> {
    fn map_field_err(self, field: &'static str) -> Result<T, Error> {
        self.map_err(|e| match e.into() {
            Error::InvalidCbor(cbor::decode::Error::NeedMoreData) => {
                Error::InvalidCbor(cbor::decode::Error::NeedMoreData)
            }
            e => Error::InvalidField {
                field,
                source: e.into(),
            },
        })
    }
}
