use super::*;
use error::CaptureFieldErr;

/// The parsed form of a primary block. Unpacked straight into [`Bundle`]
/// fields; never stored as a block.
pub(crate) struct PrimaryBlock {
    pub flags: Flags,
    pub crc_type: crc::CrcType,
    pub source: eid::Eid,
    pub destination: eid::Eid,
    pub report_to: eid::Eid,
    pub timestamp: CreationTimestamp,
    pub lifetime: core::time::Duration,
    pub fragment_info: Option<FragmentInfo>,
    pub crc_check: Option<bool>,
}

impl PrimaryBlock {
    pub fn emit(bundle: &Bundle) -> Vec<u8> {
        let count = 8
            + if bundle.flags.is_fragment { 2 } else { 0 }
            + if let crc::CrcType::None = bundle.crc_type {
                0
            } else {
                1
            };

        crc::append_crc_value(
            bundle.crc_type,
            cbor::encode::emit_array(Some(count), |a| {
                a.emit(&7u64);
                a.emit(&bundle.flags);
                a.emit(&bundle.crc_type);
                a.emit(&bundle.destination);
                a.emit(&bundle.id.source);
                a.emit(&bundle.report_to);
                a.emit(&bundle.id.timestamp);
                a.emit(&(bundle.lifetime.as_millis() as u64));

                if let Some(fragment_info) = &bundle.id.fragment_info {
                    a.emit(&fragment_info.offset);
                    a.emit(&fragment_info.total_len);
                }

                if !matches!(bundle.crc_type, crc::CrcType::None) {
                    a.skip_value();
                }
            }),
        )
    }
}

impl cbor::decode::FromCbor for PrimaryBlock {
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

            let version = block.parse::<u64>().map_field_err("version")?;
            if version != 7 {
                return Err(Error::InvalidVersion(version));
            }

            let flags = block
                .parse::<Flags>()
                .map_field_err("bundle processing control flags")?;
            let crc_type = block.parse::<crc::CrcType>().map_field_err("CRC type")?;
            let destination = block.parse::<eid::Eid>().map_field_err("destination EID")?;
            let source = block.parse::<eid::Eid>().map_field_err("source EID")?;
            let report_to = block.parse::<eid::Eid>().map_field_err("report-to EID")?;
            let timestamp = block
                .parse::<CreationTimestamp>()
                .map_field_err("creation timestamp")?;
            let lifetime = block.parse::<u64>().map_field_err("lifetime")?;

            let fragment_info = if flags.is_fragment {
                let offset = block.parse::<u64>().map_field_err("fragment offset")?;
                let total_len = block
                    .parse::<u64>()
                    .map_field_err("total application data unit length")?;
                if offset > total_len {
                    return Err(Error::InvalidFragmentInfo(offset, total_len));
                }
                Some(FragmentInfo { offset, total_len })
            } else {
                None
            };

            let crc_check = crc::parse_crc_value(data, block, crc_type)?;

            Ok::<_, Error>(PrimaryBlock {
                flags,
                crc_type,
                source,
                destination,
                report_to,
                timestamp,
                lifetime: core::time::Duration::from_millis(lifetime),
                fragment_info,
                crc_check,
            })
        })
    }
}
