use super::*;
use thiserror::Error;

const X25: ::crc::Crc<u16> = ::crc::Crc::<u16>::new(&::crc::CRC_16_IBM_SDLC);
const CASTAGNOLI: ::crc::Crc<u32> = ::crc::Crc::<u32>::new(&::crc::CRC_32_ISCSI);

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid CRC type {0}")]
    InvalidType(u64),

    #[error("Block has unexpected CRC value length {0}")]
    InvalidLength(usize),

    #[error("Block has a CRC value with no CRC type specified")]
    UnexpectedCrcValue,

    #[error("Missing CRC value")]
    MissingCrc,

    #[error(transparent)]
    InvalidCbor(#[from] cbor::decode::Error),
}

#[allow(non_camel_case_types)]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum CrcType {
    #[default]
    None,
    CRC16_X25,
    CRC32_CASTAGNOLI,
    Unrecognised(u64),
}

impl From<u64> for CrcType {
    fn from(value: u64) -> Self {
        match value {
            0 => Self::None,
            1 => Self::CRC16_X25,
            2 => Self::CRC32_CASTAGNOLI,
            v => Self::Unrecognised(v),
        }
    }
}

impl From<CrcType> for u64 {
    fn from(value: CrcType) -> Self {
        match value {
            CrcType::None => 0,
            CrcType::CRC16_X25 => 1,
            CrcType::CRC32_CASTAGNOLI => 2,
            CrcType::Unrecognised(v) => v,
        }
    }
}

impl cbor::encode::ToCbor for CrcType {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit(&u64::from(*self))
    }
}

impl cbor::decode::FromCbor for CrcType {
    type Error = cbor::decode::Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
        cbor::decode::parse::<u64>(data).map(|(v, len)| (v.into(), len))
    }
}

/// Parse and verify the trailing CRC field of a block.
///
/// `data` is the serialization of the whole block, `block` is the block's
/// array cursor positioned after the block-specific data field. The CRC is
/// computed over the block bytes with the CRC value itself zeroed. A mismatch
/// is NOT an error: it is reported as `Some(false)` and consumed later by
/// reception processing. `None` means the block carries no CRC.
pub fn parse_crc_value(
    data: &[u8],
    block: &mut cbor::decode::Array,
    crc_type: CrcType,
) -> Result<Option<bool>, Error> {
    let crc_value = block.try_parse_value(|value, _| match value {
        cbor::decode::Value::Bytes(crc) => match crc_type {
            CrcType::None => Err(Error::UnexpectedCrcValue),
            CrcType::CRC16_X25 => {
                if let Ok(crc) = <[u8; 2]>::try_from(crc) {
                    Ok(u16::from_be_bytes(crc) as u32)
                } else {
                    Err(Error::InvalidLength(crc.len()))
                }
            }
            CrcType::CRC32_CASTAGNOLI => {
                if let Ok(crc) = <[u8; 4]>::try_from(crc) {
                    Ok(u32::from_be_bytes(crc))
                } else {
                    Err(Error::InvalidLength(crc.len()))
                }
            }
            CrcType::Unrecognised(_) => Ok(0),
        },
        value => Err(cbor::decode::Error::IncorrectType(
            "Definite-length Byte String".to_string(),
            value.type_name(),
        )
        .into()),
    })?;

    let crc_val_end = block.offset();
    let crc_end = block.end()?.unwrap_or(crc_val_end);

    match (crc_type, crc_value) {
        (CrcType::None, None) => Ok(None),
        (CrcType::CRC16_X25, Some(crc_value)) => {
            let mut digest = X25.digest();
            digest.update(&data[0..crc_val_end - 2]);
            digest.update(&[0u8; 2]);
            digest.update(&data[crc_val_end..crc_end]);
            Ok(Some(crc_value == digest.finalize() as u32))
        }
        (CrcType::CRC32_CASTAGNOLI, Some(crc_value)) => {
            let mut digest = CASTAGNOLI.digest();
            digest.update(&data[0..crc_val_end - 4]);
            digest.update(&[0u8; 4]);
            digest.update(&data[crc_val_end..crc_end]);
            Ok(Some(crc_value == digest.finalize()))
        }
        (CrcType::Unrecognised(t), _) => Err(Error::InvalidType(t)),
        _ => Err(Error::MissingCrc),
    }
}

/// Append the CRC value to the serialization of a block, computed with the
/// CRC field zeroed. `data` must end immediately after the block-specific
/// data field of a definite-length block array sized to include the CRC item.
pub fn append_crc_value(crc_type: CrcType, mut data: Vec<u8>) -> Vec<u8> {
    match crc_type {
        CrcType::None => {}
        CrcType::CRC16_X25 => {
            data.push(0x42);
            let mut digest = X25.digest();
            digest.update(&data);
            digest.update(&[0; 2]);
            data.extend_from_slice(&digest.finalize().to_be_bytes());
        }
        CrcType::CRC32_CASTAGNOLI => {
            data.push(0x44);
            let mut digest = CASTAGNOLI.digest();
            digest.update(&data);
            digest.update(&[0; 4]);
            data.extend_from_slice(&digest.finalize().to_be_bytes());
        }
        // Unrecognised CRC types never survive parsing
        _ => unreachable!(),
    }
    data
}
