use super::*;
use error::CaptureFieldErr;
use hashbrown::HashSet;

impl Bundle {
    /// Parse one complete bundle from the front of `data`, returning the
    /// bundle and the number of bytes consumed. A truncated buffer fails
    /// with [`Error::NeedMoreData`] and leaves no partial result, so a
    /// streaming caller can append more input and call again.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), Error> {
        cbor::decode::parse_value(data, |value, _| {
            let cbor::decode::Value::Array(outer) = value else {
                return Err(cbor::decode::Error::IncorrectType(
                    "Array".to_string(),
                    value.type_name(),
                )
                .into());
            };

            let primary = outer
                .parse::<primary_block::PrimaryBlock>()
                .map_field_err("primary block")?;

            let blocks = outer.parse_array(|blocks, _| {
                let mut v = Vec::new();
                while let Some(block) = blocks.try_parse::<block::Block>()? {
                    v.push(block);
                }
                Ok::<_, Error>(v)
            })?;

            if outer.end()?.is_none() {
                return Err(Error::AdditionalData);
            }

            let mut numbers = HashSet::new();
            let mut singletons = HashSet::new();
            for block in &blocks {
                if !numbers.insert(block.number) {
                    return Err(Error::DuplicateBlockNumber(block.number));
                }
                if matches!(
                    block.block_type,
                    block::Type::Payload
                        | block::Type::PreviousNode
                        | block::Type::BundleAge
                        | block::Type::HopCount
                        | block::Type::Routing
                ) && !singletons.insert(block.block_type)
                {
                    return Err(Error::DuplicateBlocks(block.block_type));
                }
            }

            match blocks.last() {
                Some(block) if block.block_type == block::Type::Payload => {}
                _ => {
                    if numbers.contains(&0) {
                        return Err(Error::PayloadNotFinal);
                    }
                    return Err(Error::MissingPayload);
                }
            }

            Ok::<_, Error>(Bundle {
                id: BundleId {
                    source: primary.source,
                    timestamp: primary.timestamp,
                    fragment_info: primary.fragment_info,
                },
                flags: primary.flags,
                crc_type: primary.crc_type,
                destination: primary.destination,
                report_to: primary.report_to,
                lifetime: primary.lifetime,
                blocks,
                crc_check: primary.crc_check,
            })
        })
    }
}
