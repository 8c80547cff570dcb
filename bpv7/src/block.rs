use super::*;
use error::CaptureFieldErr;

/// Block processing control flags.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Flags {
    /// Replicate this block in every fragment.
    pub must_replicate: bool,
    /// Request a status report if this block cannot be processed.
    pub report_on_failure: bool,
    /// Delete the whole bundle if this block cannot be processed.
    pub delete_bundle_on_failure: bool,
    /// Discard just this block if it cannot be processed.
    pub delete_block_on_failure: bool,
    /// The block data is encrypted by a confidentiality block.
    pub block_is_encrypted: bool,

    /// A bitmask of any unrecognised flags, carried losslessly.
    pub unrecognised: Option<u64>,
}

impl From<&Flags> for u64 {
    fn from(value: &Flags) -> Self {
        let mut flags = value.unrecognised.unwrap_or_default();
        if value.must_replicate {
            flags |= 1 << 0;
        }
        if value.report_on_failure {
            flags |= 1 << 1;
        }
        if value.delete_bundle_on_failure {
            flags |= 1 << 2;
        }
        if value.delete_block_on_failure {
            flags |= 1 << 4;
        }
        if value.block_is_encrypted {
            flags |= 1 << 6;
        }
        flags
    }
}

impl From<u64> for Flags {
    fn from(value: u64) -> Self {
        let mut flags = Self::default();
        let mut unrecognised = value;

        if (value & (1 << 0)) != 0 {
            flags.must_replicate = true;
            unrecognised &= !(1 << 0);
        }
        if (value & (1 << 1)) != 0 {
            flags.report_on_failure = true;
            unrecognised &= !(1 << 1);
        }
        if (value & (1 << 2)) != 0 {
            flags.delete_bundle_on_failure = true;
            unrecognised &= !(1 << 2);
        }
        if (value & (1 << 4)) != 0 {
            flags.delete_block_on_failure = true;
            unrecognised &= !(1 << 4);
        }
        if (value & (1 << 6)) != 0 {
            flags.block_is_encrypted = true;
            unrecognised &= !(1 << 6);
        }

        if unrecognised != 0 {
            flags.unrecognised = Some(unrecognised);
        }
        flags
    }
}

impl cbor::encode::ToCbor for Flags {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit(&u64::from(self))
    }
}

impl cbor::decode::FromCbor for Flags {
    type Error = cbor::decode::Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
        cbor::decode::parse::<u64>(data).map(|(value, len)| (value.into(), len))
    }
}

/// The type of a canonical block.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Payload,
    Manifest,
    FlowLabel,
    PreviousNode,
    BundleAge,
    HopCount,
    BlockIntegrity,
    BlockConfidentiality,
    Routing,
    Unrecognised(u64),
}

impl From<Type> for u64 {
    fn from(value: Type) -> Self {
        match value {
            Type::Payload => 1,
            Type::Manifest => 4,
            Type::FlowLabel => 5,
            Type::PreviousNode => 6,
            Type::BundleAge => 7,
            Type::HopCount => 10,
            Type::BlockIntegrity => 11,
            Type::BlockConfidentiality => 12,
            Type::Routing => 42,
            Type::Unrecognised(v) => v,
        }
    }
}

impl From<u64> for Type {
    fn from(value: u64) -> Self {
        match value {
            1 => Type::Payload,
            4 => Type::Manifest,
            5 => Type::FlowLabel,
            6 => Type::PreviousNode,
            7 => Type::BundleAge,
            10 => Type::HopCount,
            11 => Type::BlockIntegrity,
            12 => Type::BlockConfidentiality,
            42 => Type::Routing,
            value => Type::Unrecognised(value),
        }
    }
}

impl cbor::encode::ToCbor for Type {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit(&u64::from(*self))
    }
}

impl cbor::decode::FromCbor for Type {
    type Error = cbor::decode::Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
        cbor::decode::parse::<u64>(data).map(|(value, len)| (value.into(), len))
    }
}

/// Hop count block content: `[limit, count]`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HopInfo {
    pub limit: u64,
    pub count: u64,
}

/// A canonical block. The block owns its data, so block processors can
/// mutate it in place; `crc_check` is the integrity tag populated at decode
/// and never serialized.
#[derive(Debug, Clone)]
pub struct Block {
    pub block_type: Type,
    pub number: u64,
    pub flags: Flags,
    pub crc_type: crc::CrcType,
    pub data: Box<[u8]>,
    pub crc_check: Option<bool>,
}

impl Block {
    pub fn new(block_type: Type, number: u64, flags: Flags, crc_type: crc::CrcType, data: Vec<u8>) -> Self {
        Self {
            block_type,
            number,
            flags,
            crc_type,
            data: data.into(),
            crc_check: None,
        }
    }

    /// Typed view of a previous-node block.
    pub fn previous_node(&self) -> Result<eid::Eid, Error> {
        cbor::decode::parse::<eid::Eid>(&self.data)
            .map(|(eid, _)| eid)
            .map_field_err("previous node EID")
    }

    /// Typed view of a bundle-age block (milliseconds).
    pub fn bundle_age(&self) -> Result<core::time::Duration, Error> {
        cbor::decode::parse::<u64>(&self.data)
            .map(|(millisecs, _)| core::time::Duration::from_millis(millisecs))
            .map_field_err("bundle age")
    }

    /// Typed view of a hop-count block.
    pub fn hop_count(&self) -> Result<HopInfo, Error> {
        cbor::decode::parse_value(&self.data, |value, _| {
            let cbor::decode::Value::Array(a) = value else {
                return Err(cbor::decode::Error::IncorrectType(
                    "Array".to_string(),
                    value.type_name(),
                )
                .into());
            };
            let info = HopInfo {
                limit: a.parse().map_field_err("hop limit")?,
                count: a.parse().map_field_err("hop count")?,
            };
            if a.end()?.is_none() {
                return Err(Error::AdditionalData);
            }
            Ok::<_, Error>(info)
        })
        .map(|(info, _)| info)
    }

    /// Typed view of a routing block: the hinted alternate strategy id.
    pub fn routing_hint(&self) -> Result<u32, Error> {
        cbor::decode::parse::<u32>(&self.data)
            .map(|(id, _)| id)
            .map_field_err("routing strategy id")
    }

    /// The standalone serialization of this block, CRC included. Data
    /// fields longer than [`MAX_DATA_CHUNK`] go out as an indefinite-length
    /// byte string in fixed-size chunks.
    pub(crate) fn to_vec(&self) -> Vec<u8> {
        crc::append_crc_value(
            self.crc_type,
            cbor::encode::emit_array(
                Some(if let crc::CrcType::None = self.crc_type {
                    5
                } else {
                    6
                }),
                |a| {
                    a.emit(&self.block_type);
                    a.emit(&self.number);
                    a.emit(&self.flags);
                    a.emit(&self.crc_type);
                    if self.data.len() > MAX_DATA_CHUNK {
                        a.emit_byte_stream(|s| {
                            for chunk in self.data.chunks(MAX_DATA_CHUNK) {
                                s.emit(chunk);
                            }
                        });
                    } else {
                        a.emit(&*self.data);
                    }

                    // CRC value appended after the fact
                    if !matches!(self.crc_type, crc::CrcType::None) {
                        a.skip_value();
                    }
                },
            ),
        )
    }
}

/// Chunk size for block data emitted as an indefinite-length byte string.
const MAX_DATA_CHUNK: usize = 4096;

impl cbor::decode::FromCbor for Block {
    type Error = crate::Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
        cbor::decode::parse_value(data, |value, _| {
            let cbor::decode::Value::Array(block) = value else {
                return Err(cbor::decode::Error::IncorrectType(
                    "Array".to_string(),
                    value.type_name(),
                )
                .into());
            };

            let block_type = block
                .parse::<Type>()
                .map_field_err("block type code")?;

            let number = block.parse::<u64>().map_field_err("block number")?;
            match (number, block_type) {
                (0, Type::Payload) => {}
                (0, _) | (_, Type::Payload) => {
                    return Err(Error::InvalidBlockNumber(number, block_type));
                }
                _ => {}
            }

            let flags = block
                .parse::<Flags>()
                .map_field_err("block processing control flags")?;

            let crc_type = block.parse::<crc::CrcType>().map_field_err("CRC type")?;

            // Block data, definite or chunked
            let mut buffer = Vec::new();
            block
                .parse_byte_chunks(|chunk| {
                    buffer.extend_from_slice(chunk);
                    Ok::<_, Error>(())
                })
                .map_field_err("block data")?;

            let crc_check = crc::parse_crc_value(data, block, crc_type)?;

            Ok::<_, Error>(Block {
                block_type,
                number,
                flags,
                crc_type,
                data: buffer.into(),
                crc_check,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(block: &Block) -> Block {
        let data = cbor::encode::emit_array(Some(1), |a| a.emit_raw_slice(&block.to_vec()));
        cbor::decode::parse_value(&data, |value, _| {
            let cbor::decode::Value::Array(a) = value else {
                panic!("expected array")
            };
            a.parse::<Block>()
        })
        .unwrap()
        .0
    }

    #[test]
    fn emit_parse_round_trip() {
        let block = Block::new(
            Type::BundleAge,
            3,
            Flags {
                delete_block_on_failure: true,
                ..Default::default()
            },
            crc::CrcType::CRC16_X25,
            cbor::encode::emit(&300u64),
        );

        let parsed = round_trip(&block);
        assert_eq!(parsed.block_type, Type::BundleAge);
        assert_eq!(parsed.number, 3);
        assert_eq!(parsed.flags, block.flags);
        assert_eq!(parsed.data, block.data);
        assert_eq!(parsed.crc_check, Some(true));
        assert_eq!(
            parsed.bundle_age().unwrap(),
            core::time::Duration::from_millis(300)
        );
    }

    #[test]
    fn crc_mismatch_is_a_tag() {
        let block = Block::new(
            Type::Payload,
            0,
            Flags::default(),
            crc::CrcType::CRC32_CASTAGNOLI,
            b"hello".to_vec(),
        );

        let mut data = cbor::encode::emit_array(Some(1), |a| a.emit_raw_slice(&block.to_vec()));
        // Corrupt one payload byte
        let n = data.len() - 8;
        data[n] ^= 0x01;

        let parsed = cbor::decode::parse_value(data.as_slice(), |value, _| {
            let cbor::decode::Value::Array(a) = value else {
                panic!("expected array")
            };
            a.parse::<Block>()
        })
        .unwrap()
        .0;
        assert_eq!(parsed.crc_check, Some(false));
    }

    #[test]
    fn payload_number_is_fixed() {
        let block = Block::new(
            Type::Payload,
            1,
            Flags::default(),
            crc::CrcType::None,
            Vec::new(),
        );
        let data = cbor::encode::emit_array(Some(1), |a| a.emit_raw_slice(&block.to_vec()));
        let r = cbor::decode::parse_value(data.as_slice(), |value, _| {
            let cbor::decode::Value::Array(a) = value else {
                panic!("expected array")
            };
            a.parse::<Block>()
        });
        assert!(matches!(r, Err(Error::InvalidBlockNumber(1, Type::Payload))));
    }

    #[test]
    fn large_data_is_emitted_chunked() {
        let block = Block::new(
            Type::Unrecognised(193),
            7,
            Flags::default(),
            crc::CrcType::CRC32_CASTAGNOLI,
            vec![0x5A; 10_000],
        );

        // One indefinite-length byte string header. Ignoring the CRC
        // trailer, nothing else in the encoding can be 0x5F given the 0x5A
        // fill and 4096-byte chunk headers
        let encoding = block.to_vec();
        let body = &encoding[..encoding.len() - 5];
        assert_eq!(body.iter().filter(|b| **b == 0x5F).count(), 1);

        let parsed = round_trip(&block);
        assert_eq!(parsed.data, block.data);
        assert_eq!(parsed.crc_check, Some(true));
    }

    #[test]
    fn flags_round_trip() {
        let flags = Flags {
            report_on_failure: true,
            delete_bundle_on_failure: true,
            unrecognised: Some(1 << 9),
            ..Default::default()
        };
        assert_eq!(Flags::from(u64::from(&flags)), flags);
    }
}
